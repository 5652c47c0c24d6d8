//! Message catalog for self-service flow UIs.
//!
//! Every message a flow can render carries a stable numeric id so that API
//! clients can translate or branch on it without string matching. Info
//! messages live in the `10xxxxx` range (grouped per flow), validation
//! errors in `40xxxxx`, system faults in `50xxxxx`. The English text is the
//! canonical fallback rendering.

use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

// Login flow.
pub const INFO_LOGIN_TOTP_LABEL: u32 = 1_010_006;
pub const INFO_LOGIN_LOOKUP_LABEL: u32 = 1_010_010;
pub const INFO_LOGIN_PASSKEY: u32 = 1_010_021;
pub const INFO_LOGIN_REAUTH: u32 = 1_010_003;
pub const INFO_LOGIN: u32 = 1_010_001;

// Registration flow.
pub const INFO_REGISTRATION_PASSKEY: u32 = 1_040_007;
pub const INFO_REGISTRATION_CONTINUE: u32 = 1_040_003;

// Settings flow.
pub const INFO_SETTINGS_UPDATE_SUCCESS: u32 = 1_050_001;
pub const INFO_SETTINGS_TOTP_QRCODE: u32 = 1_050_005;
pub const INFO_SETTINGS_TOTP_SECRET: u32 = 1_050_006;
pub const INFO_SETTINGS_TOTP_SECRET_LABEL: u32 = 1_050_017;
pub const INFO_SETTINGS_TOTP_UNLINK: u32 = 1_050_016;
pub const INFO_SETTINGS_LOOKUP_REVEAL: u32 = 1_050_009;
pub const INFO_SETTINGS_LOOKUP_REGENERATE: u32 = 1_050_008;
pub const INFO_SETTINGS_LOOKUP_CONFIRM: u32 = 1_050_010;
pub const INFO_SETTINGS_LOOKUP_DISABLE: u32 = 1_050_012;
pub const INFO_SETTINGS_LOOKUP_SECRETS: u32 = 1_050_013;
pub const INFO_SETTINGS_LOOKUP_SECRET_USED: u32 = 1_050_014;
pub const INFO_SETTINGS_PASSKEY_REGISTER: u32 = 1_050_018;
pub const INFO_SETTINGS_PASSKEY_REMOVE: u32 = 1_050_019;
pub const INFO_LABEL_VERIFY: u32 = 1_070_009;
pub const INFO_LABEL_SAVE: u32 = 1_070_003;
pub const INFO_LABEL_SUBMIT: u32 = 1_070_005;
pub const INFO_LABEL_IDENTIFIER: u32 = 1_070_002;

// Validation errors.
pub const ERR_VALIDATION_GENERIC: u32 = 4_000_001;
pub const ERR_VALIDATION_REQUIRED: u32 = 4_000_002;
pub const ERR_VALIDATION_TOTP_WRONG: u32 = 4_000_008;
pub const ERR_VALIDATION_LOOKUP_INVALID: u32 = 4_000_012;
pub const ERR_VALIDATION_LOOKUP_USED: u32 = 4_000_013;
pub const ERR_VALIDATION_NO_TOTP: u32 = 4_000_009;
pub const ERR_VALIDATION_NO_LOOKUP: u32 = 4_000_014;
pub const ERR_VALIDATION_NO_WEBAUTHN: u32 = 4_000_015;
pub const ERR_VALIDATION_WEBAUTHN_WRONG: u32 = 4_000_016;
pub const ERR_VALIDATION_NO_STRATEGY: u32 = 4_000_017;
pub const ERR_VALIDATION_LOOKUP_CONFIRM_FIRST: u32 = 4_000_018;
pub const ERR_VALIDATION_MISSING_IDENTIFIER: u32 = 4_000_019;
pub const ERR_VALIDATION_LAST_FIRST_FACTOR: u32 = 4_000_020;
pub const ERR_FLOW_EXPIRED: u32 = 4_010_001;
pub const ERR_CSRF: u32 = 4_010_002;
pub const ERR_SESSION_REFRESH_REQUIRED: u32 = 4_010_003;

/// Message severity, rendered as the JSON `type` field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Error,
}

/// A UI message bound to a node or a whole flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: u32,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl Message {
    #[must_use]
    pub fn info(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            kind: MessageKind::Info,
            context: None,
        }
    }

    #[must_use]
    pub fn error(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            kind: MessageKind::Error,
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    // Labels and info messages.

    #[must_use]
    pub fn login_totp_label() -> Self {
        Self::info(INFO_LOGIN_TOTP_LABEL, "Authentication code")
    }

    #[must_use]
    pub fn login_lookup_label() -> Self {
        Self::info(INFO_LOGIN_LOOKUP_LABEL, "Backup recovery code")
    }

    #[must_use]
    pub fn login_passkey() -> Self {
        Self::info(INFO_LOGIN_PASSKEY, "Sign in with a passkey")
    }

    #[must_use]
    pub fn login_reauth() -> Self {
        Self::info(
            INFO_LOGIN_REAUTH,
            "Please confirm this action by verifying that it is you.",
        )
    }

    #[must_use]
    pub fn registration_passkey() -> Self {
        Self::info(INFO_REGISTRATION_PASSKEY, "Sign up with a passkey")
    }

    #[must_use]
    pub fn registration_continue() -> Self {
        Self::info(INFO_REGISTRATION_CONTINUE, "Continue")
    }

    #[must_use]
    pub fn settings_update_success() -> Self {
        Self::info(INFO_SETTINGS_UPDATE_SUCCESS, "Your changes have been saved!")
    }

    #[must_use]
    pub fn totp_qrcode_label() -> Self {
        Self::info(INFO_SETTINGS_TOTP_QRCODE, "Authenticator app QR code")
    }

    #[must_use]
    pub fn totp_secret(secret: &str) -> Self {
        Self::info(
            INFO_SETTINGS_TOTP_SECRET,
            "This is your authenticator app secret. Use it if you can not scan the QR code.",
        )
        .with_context(json!({ "secret": secret }))
    }

    #[must_use]
    pub fn totp_secret_label() -> Self {
        Self::info(INFO_SETTINGS_TOTP_SECRET_LABEL, "Authenticator app secret")
    }

    #[must_use]
    pub fn totp_unlink() -> Self {
        Self::info(INFO_SETTINGS_TOTP_UNLINK, "Unlink TOTP Authenticator App")
    }

    #[must_use]
    pub fn lookup_reveal() -> Self {
        Self::info(INFO_SETTINGS_LOOKUP_REVEAL, "Reveal backup recovery codes")
    }

    #[must_use]
    pub fn lookup_regenerate() -> Self {
        Self::info(
            INFO_SETTINGS_LOOKUP_REGENERATE,
            "Generate new backup recovery codes",
        )
    }

    #[must_use]
    pub fn lookup_confirm() -> Self {
        Self::info(
            INFO_SETTINGS_LOOKUP_CONFIRM,
            "Confirm backup recovery codes",
        )
    }

    #[must_use]
    pub fn lookup_disable() -> Self {
        Self::info(INFO_SETTINGS_LOOKUP_DISABLE, "Disable this method")
    }

    /// Recovery codes rendered as a text node; used codes appear as `used`.
    #[must_use]
    pub fn lookup_secrets(secrets: Vec<serde_json::Value>) -> Self {
        Self::info(
            INFO_SETTINGS_LOOKUP_SECRETS,
            "These are your back up recovery codes. Please keep them in a safe place!",
        )
        .with_context(json!({ "secrets": secrets }))
    }

    #[must_use]
    pub fn lookup_secret_used() -> Self {
        Self::info(INFO_SETTINGS_LOOKUP_SECRET_USED, "Secret was used")
    }

    #[must_use]
    pub fn settings_passkey_register() -> Self {
        Self::info(INFO_SETTINGS_PASSKEY_REGISTER, "Add passkey")
    }

    #[must_use]
    pub fn settings_passkey_remove(display_name: &str) -> Self {
        Self::info(INFO_SETTINGS_PASSKEY_REMOVE, "Remove passkey")
            .with_context(json!({ "display_name": display_name }))
    }

    #[must_use]
    pub fn label_verify() -> Self {
        Self::info(INFO_LABEL_VERIFY, "Verify")
    }

    #[must_use]
    pub fn label_save() -> Self {
        Self::info(INFO_LABEL_SAVE, "Save")
    }

    #[must_use]
    pub fn label_submit() -> Self {
        Self::info(INFO_LABEL_SUBMIT, "Submit")
    }

    #[must_use]
    pub fn label_identifier() -> Self {
        Self::info(INFO_LABEL_IDENTIFIER, "ID (email, phone, username)")
    }

    // Validation errors.

    #[must_use]
    pub fn error_required(property: &str) -> Self {
        Self::error(
            ERR_VALIDATION_REQUIRED,
            format!("Property {property} is missing."),
        )
        .with_context(json!({ "property": property }))
    }

    #[must_use]
    pub fn error_totp_wrong() -> Self {
        Self::error(
            ERR_VALIDATION_TOTP_WRONG,
            "The provided authentication code is invalid, please try again.",
        )
    }

    #[must_use]
    pub fn error_lookup_invalid() -> Self {
        Self::error(
            ERR_VALIDATION_LOOKUP_INVALID,
            "The backup recovery code is not valid.",
        )
    }

    #[must_use]
    pub fn error_lookup_used() -> Self {
        Self::error(
            ERR_VALIDATION_LOOKUP_USED,
            "This backup recovery code has already been used.",
        )
    }

    #[must_use]
    pub fn error_no_totp() -> Self {
        Self::error(
            ERR_VALIDATION_NO_TOTP,
            "You have no TOTP device set up.",
        )
    }

    #[must_use]
    pub fn error_no_lookup() -> Self {
        Self::error(
            ERR_VALIDATION_NO_LOOKUP,
            "You have no backup recovery codes set up.",
        )
    }

    #[must_use]
    pub fn error_no_webauthn() -> Self {
        Self::error(
            ERR_VALIDATION_NO_WEBAUTHN,
            "This account does not exist or has no security key set up.",
        )
    }

    #[must_use]
    pub fn error_webauthn_wrong() -> Self {
        Self::error(
            ERR_VALIDATION_WEBAUTHN_WRONG,
            "The provided authentication credential is invalid.",
        )
    }

    #[must_use]
    pub fn error_no_strategy() -> Self {
        Self::error(
            ERR_VALIDATION_NO_STRATEGY,
            "Could not find a strategy to sign in with. Did you fill out the form correctly?",
        )
    }

    #[must_use]
    pub fn error_lookup_confirm_first() -> Self {
        Self::error(
            ERR_VALIDATION_LOOKUP_CONFIRM_FIRST,
            "You must (re-)generate recovery backup codes before you can save them.",
        )
    }

    #[must_use]
    pub fn error_missing_identifier() -> Self {
        Self::error(
            ERR_VALIDATION_MISSING_IDENTIFIER,
            "Could not find an identifier for the passkey. Make sure your identity schema marks a trait as the passkey identifier.",
        )
    }

    #[must_use]
    pub fn error_last_first_factor() -> Self {
        Self::error(
            ERR_VALIDATION_LAST_FIRST_FACTOR,
            "You can not remove the last passkey because it would lock you out of your account.",
        )
    }

    #[must_use]
    pub fn error_flow_expired() -> Self {
        Self::error(
            ERR_FLOW_EXPIRED,
            "The flow expired, please start over.",
        )
    }

    #[must_use]
    pub fn error_csrf() -> Self {
        Self::error(
            ERR_CSRF,
            "The anti-CSRF token was invalid. Please retry the request.",
        )
    }

    #[must_use]
    pub fn error_session_refresh_required() -> Self {
        Self::error(
            ERR_SESSION_REFRESH_REQUIRED,
            "The login session is too old and must be refreshed before settings can be updated.",
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_kind_as_type() {
        let value = serde_json::to_value(Message::error_totp_wrong()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["id"], ERR_VALIDATION_TOTP_WRONG);
        assert!(value.get("context").is_none());
    }

    #[test]
    fn context_round_trips() {
        let msg = Message::error_required("totp_code");
        let back: Message = serde_json::from_value(serde_json::to_value(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.context.unwrap()["property"], "totp_code");
    }
}
