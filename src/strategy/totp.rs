//! TOTP (RFC 6238) second-factor strategy.
//!
//! Flow Overview:
//! 1) Settings populate generates a fresh secret, parks the provisioning
//!    URL in the flow's internal context and renders QR + secret + verify
//!    nodes. The URL is never exposed as a credential.
//! 2) Settings submit verifies the first code against the parked secret and
//!    persists the credential wholesale.
//! 3) Login populate renders the code input only for identities that own a
//!    TOTP credential on an AAL2 flow; login submit verifies with one
//!    window of clock skew.
//!
//! Security boundaries:
//! - Secrets are ≥160 bits, generated server-side, never logged.
//! - Unlink requires only CSRF plus a privileged session; no code check.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::FlowError;
use crate::flow::{Flow, FlowName};
use crate::identity::{
    Credential, CredentialsType, Identity, TotpCredentialConfig, schema,
};
use crate::session::{Aal, Session};
use crate::store::Store;
use crate::strategy::{
    LoginOutcome, SettingsOutcome, Strategy, payload_bool, payload_method, payload_str,
};
use crate::text::Message;
use crate::ui::{Group, Node};

/// Internal-context key parking the provisioning URL between populate and
/// verify.
pub const INTERNAL_KEY_URL: &str = "totp.url";

/// Wire field carrying the verification code.
pub const FIELD_CODE: &str = "totp_code";
/// Wire field requesting credential removal.
pub const FIELD_UNLINK: &str = "totp_unlink";

const CREDENTIAL_VERSION: u32 = 0;
const QR_SIZE: i64 = 256;

pub struct TotpStrategy {
    config: Arc<Config>,
    store: Arc<dyn Store>,
}

impl TotpStrategy {
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    /// Parse a provisioning URL into a verifier with one window of skew.
    fn verifier_from_url(url: &str) -> Result<TOTP, FlowError> {
        let mut totp = TOTP::from_url(url).map_err(|err| {
            FlowError::internal_with("stored TOTP URL does not parse", anyhow::anyhow!("{err:?}"))
        })?;
        totp.skew = 1;
        Ok(totp)
    }

    fn generate_key(&self, identity: &Identity) -> Result<TOTP, FlowError> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret.to_bytes().map_err(|err| {
            FlowError::internal_with("TOTP secret generation failed", anyhow::anyhow!("{err:?}"))
        })?;
        let account_name = schema::totp_account_name(
            schema::default_schema(),
            &identity.traits,
            &identity.id.to_string(),
        );
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.config.totp_issuer()),
            account_name,
        )
        .map_err(|err| {
            FlowError::internal_with("TOTP key construction failed", anyhow::anyhow!("{err:?}"))
        })
    }

    fn verify_code(url: &str, code: &str) -> Result<bool, FlowError> {
        let totp = Self::verifier_from_url(url)?;
        totp.check_current(code)
            .map_err(|err| FlowError::internal_with("system clock error", err))
    }

    async fn settings_add(
        &self,
        flow: &mut Flow,
        identity: &Identity,
        payload: &Value,
    ) -> Result<SettingsOutcome, FlowError> {
        let Some(url) = flow.internal_context.get::<String>(INTERNAL_KEY_URL)? else {
            return Err(FlowError::internal("no TOTP key parked in the flow"));
        };

        let Some(code) = payload_str(payload, FIELD_CODE) else {
            return Err(FlowError::validation_node(
                Group::Totp,
                FIELD_CODE,
                Message::error_required(FIELD_CODE),
            ));
        };

        if !Self::verify_code(&url, code)? {
            return Err(FlowError::validation_node(
                Group::Totp,
                FIELD_CODE,
                Message::error_totp_wrong(),
            ));
        }

        let mut identity = identity.clone();
        let credential = Credential::new(
            CredentialsType::Totp,
            vec![identity.id.to_string()],
            &TotpCredentialConfig { totp_url: url },
            CREDENTIAL_VERSION,
        )
        .map_err(|err| FlowError::internal_with("credential encode failed", err))?;
        identity.upsert_credential(credential);
        flow.internal_context.remove(INTERNAL_KEY_URL);

        info!(identity_id = %identity.id, "TOTP device linked");
        Ok(SettingsOutcome::Saved {
            identity,
            method: Some((CredentialsType::Totp, Aal::Aal2)),
            continue_with: Vec::new(),
        })
    }

    fn settings_unlink(&self, identity: &Identity) -> SettingsOutcome {
        let mut identity = identity.clone();
        identity.remove_credential(CredentialsType::Totp);
        info!(identity_id = %identity.id, "TOTP device unlinked");
        SettingsOutcome::Saved {
            identity,
            method: None,
            continue_with: Vec::new(),
        }
    }
}

#[async_trait]
impl Strategy for TotpStrategy {
    fn id(&self) -> CredentialsType {
        CredentialsType::Totp
    }

    fn completed_aal(&self) -> Aal {
        Aal::Aal2
    }

    fn count_active_multi_factor(
        &self,
        credentials: &HashMap<CredentialsType, Credential>,
    ) -> usize {
        let Some(credential) = credentials.get(&CredentialsType::Totp) else {
            return 0;
        };
        if credential.identifiers.iter().all(String::is_empty) {
            return 0;
        }
        let Ok(config) = credential.config_as::<TotpCredentialConfig>() else {
            return 0;
        };
        match TOTP::from_url(&config.totp_url) {
            Ok(totp) if !totp.secret.is_empty() => 1,
            _ => 0,
        }
    }

    async fn populate_login(
        &self,
        flow: &mut Flow,
        identity: Option<&Identity>,
    ) -> Result<(), FlowError> {
        if flow.requested_aal != Some(Aal::Aal2) {
            return Ok(());
        }
        let Some(identity) = identity else {
            return Ok(());
        };
        if identity.credential(CredentialsType::Totp).is_none() {
            return Ok(());
        }

        let mut code = crate::ui::InputAttributes::new(FIELD_CODE, crate::ui::InputType::Text);
        code.required = true;
        code.autocomplete = Some("one-time-code".to_string());
        flow.ui
            .nodes
            .upsert(Node::input(Group::Totp, code).with_label(Message::login_totp_label()));
        flow.ui.nodes.upsert(Node::submit(
            Group::Totp,
            "method",
            json!("totp"),
            Message::label_submit(),
        ));
        Ok(())
    }

    async fn login(
        &self,
        flow: &mut Flow,
        session: Option<&Session>,
        payload: &Value,
    ) -> Result<LoginOutcome, FlowError> {
        let Some(code) = payload_str(payload, FIELD_CODE) else {
            return Err(FlowError::NotResponsible);
        };
        if flow.requested_aal != Some(Aal::Aal2) {
            return Err(FlowError::NotResponsible);
        }
        let Some(session) = session else {
            return Err(FlowError::NotResponsible);
        };

        let identity = self
            .store
            .get_identity_confidential(flow.network_id, session.identity_id)
            .await?;
        let Some(config) = identity
            .credential_config::<TotpCredentialConfig>(CredentialsType::Totp)
            .map_err(|err| FlowError::internal_with("TOTP config decode failed", err))?
        else {
            return Err(FlowError::validation_flow(Message::error_no_totp()));
        };

        if !Self::verify_code(&config.totp_url, code)? {
            return Err(FlowError::validation_node(
                Group::Totp,
                FIELD_CODE,
                Message::error_totp_wrong(),
            ));
        }

        debug!(identity_id = %identity.id, "TOTP login verified");
        flow.active = Some(CredentialsType::Totp);
        Ok(LoginOutcome {
            identity,
            method: CredentialsType::Totp,
            aal: Aal::Aal2,
        })
    }

    async fn populate_settings(
        &self,
        flow: &mut Flow,
        identity: &Identity,
    ) -> Result<(), FlowError> {
        if identity.credential(CredentialsType::Totp).is_some() {
            flow.ui.nodes.upsert(Node::submit(
                Group::Totp,
                FIELD_UNLINK,
                json!(true),
                Message::totp_unlink(),
            ));
            return Ok(());
        }

        let totp = self.generate_key(identity)?;
        let url = totp.get_url();
        flow.internal_context.set(INTERNAL_KEY_URL, &url)?;

        let qr = totp
            .get_qr_base64()
            .map_err(|err| FlowError::internal_with("QR encoding failed", anyhow::anyhow!(err)))?;
        flow.ui.nodes.append(
            Node::image(
                Group::Totp,
                "totp_qr",
                format!("data:image/png;base64,{qr}"),
                QR_SIZE,
                QR_SIZE,
            )
            .with_label(Message::totp_qrcode_label()),
        );
        flow.ui.nodes.append(
            Node::text(
                Group::Totp,
                "totp_secret_key",
                Message::totp_secret(&totp.get_secret_base32()),
            )
            .with_label(Message::totp_secret_label()),
        );

        let mut code = crate::ui::InputAttributes::new(FIELD_CODE, crate::ui::InputType::Text);
        code.required = true;
        flow.ui
            .nodes
            .upsert(Node::input(Group::Totp, code).with_label(Message::label_verify()));
        flow.ui.nodes.upsert(Node::submit(
            Group::Totp,
            "method",
            json!("totp"),
            Message::label_save(),
        ));
        Ok(())
    }

    async fn settings(
        &self,
        flow: &mut Flow,
        identity: &Identity,
        payload: &Value,
    ) -> Result<SettingsOutcome, FlowError> {
        debug_assert_eq!(flow.flow_name, FlowName::Settings);
        if payload_bool(payload, FIELD_UNLINK) {
            return Ok(self.settings_unlink(identity));
        }
        if payload_method(payload) == Some("totp") {
            return self.settings_add(flow, identity, payload).await;
        }
        Err(FlowError::NotResponsible)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use chrono::Duration;
    use std::time::{SystemTime, UNIX_EPOCH};
    use url::Url;
    use uuid::Uuid;

    fn strategy() -> TotpStrategy {
        let config =
            Arc::new(Config::new(Url::parse("https://auth.example.com/").unwrap()).unwrap());
        TotpStrategy::new(config, Arc::new(InMemoryStore::new()))
    }

    fn settings_flow(network_id: Uuid) -> Flow {
        Flow::new(
            FlowName::Settings,
            crate::flow::FlowType::Browser,
            network_id,
            "/self-service/settings".into(),
            Duration::minutes(30),
        )
    }

    fn identity() -> Identity {
        Identity::new(Uuid::new_v4(), json!({"email": "totp@example.com"}))
    }

    fn current_code(url: &str, offset_seconds: i64) -> String {
        let totp = TOTP::from_url(url).unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let at = now.checked_add_signed(offset_seconds).unwrap_or(now);
        totp.generate(at)
    }

    #[tokio::test]
    async fn populate_parks_url_and_renders_qr() {
        let strategy = strategy();
        let identity = identity();
        let mut flow = settings_flow(identity.network_id);

        strategy.populate_settings(&mut flow, &identity).await.unwrap();

        let url: String = flow.internal_context.get(INTERNAL_KEY_URL).unwrap().unwrap();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("auth.example.com"));
        assert!(url.contains("totp%40example.com") || url.contains("totp@example.com"));
        assert!(flow.ui.nodes.find(Group::Totp, FIELD_CODE).is_some());
        // QR and secret are visual nodes appended to the totp group
        assert!(flow.ui.nodes.group(Group::Totp).count() >= 4);
    }

    #[tokio::test]
    async fn settings_verifies_and_persists_credential() {
        let strategy = strategy();
        let identity = identity();
        let mut flow = settings_flow(identity.network_id);
        strategy.populate_settings(&mut flow, &identity).await.unwrap();
        let url: String = flow.internal_context.get(INTERNAL_KEY_URL).unwrap().unwrap();

        let payload = json!({ "method": "totp", FIELD_CODE: current_code(&url, 0) });
        let outcome = strategy.settings(&mut flow, &identity, &payload).await.unwrap();

        let SettingsOutcome::Saved {
            identity: updated,
            method,
            ..
        } = outcome
        else {
            panic!("expected saved outcome");
        };
        assert_eq!(method, Some((CredentialsType::Totp, Aal::Aal2)));
        let config: TotpCredentialConfig = updated
            .credential_config(CredentialsType::Totp)
            .unwrap()
            .unwrap();
        assert!(config.totp_url.starts_with("otpauth://totp/"));
        assert!(!flow.internal_context.contains(INTERNAL_KEY_URL));
    }

    #[tokio::test]
    async fn settings_rejects_wrong_and_stale_codes() {
        let strategy = strategy();
        let identity = identity();
        let mut flow = settings_flow(identity.network_id);
        strategy.populate_settings(&mut flow, &identity).await.unwrap();
        let url: String = flow.internal_context.get(INTERNAL_KEY_URL).unwrap().unwrap();

        for code in ["000000".to_string(), current_code(&url, -90), current_code(&url, 90)] {
            let payload = json!({ "method": "totp", FIELD_CODE: code });
            let err = strategy
                .settings(&mut flow, &identity, &payload)
                .await
                .unwrap_err();
            match err {
                FlowError::Validation { message, .. } => {
                    assert_eq!(message.id, crate::text::ERR_VALIDATION_TOTP_WRONG);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn settings_without_parked_key_is_internal_fault() {
        let strategy = strategy();
        let identity = identity();
        let mut flow = settings_flow(identity.network_id);
        let payload = json!({ "method": "totp", FIELD_CODE: "123456" });
        assert!(matches!(
            strategy.settings(&mut flow, &identity, &payload).await,
            Err(FlowError::Internal { .. })
        ));
    }

    #[tokio::test]
    async fn unlink_removes_the_credential_kind() {
        let strategy = strategy();
        let mut identity = identity();
        identity.upsert_credential(
            Credential::new(
                CredentialsType::Totp,
                vec![identity.id.to_string()],
                &TotpCredentialConfig {
                    totp_url: "otpauth://totp/x?secret=JBSWY3DPEHPK3PXP".into(),
                },
                0,
            )
            .unwrap(),
        );
        let mut flow = settings_flow(identity.network_id);
        let payload = json!({ FIELD_UNLINK: true });
        let outcome = strategy.settings(&mut flow, &identity, &payload).await.unwrap();
        let SettingsOutcome::Saved { identity: updated, method, .. } = outcome else {
            panic!("expected saved outcome");
        };
        assert!(method.is_none());
        assert!(updated.credential(CredentialsType::Totp).is_none());
    }

    #[tokio::test]
    async fn other_submissions_are_not_claimed() {
        let strategy = strategy();
        let identity = identity();
        let mut flow = settings_flow(identity.network_id);
        let payload = json!({ "method": "lookup_secret" });
        assert!(matches!(
            strategy.settings(&mut flow, &identity, &payload).await,
            Err(FlowError::NotResponsible)
        ));
    }

    #[test]
    fn multi_factor_counting_requires_parseable_secret() {
        let strategy = strategy();
        let mut credentials = HashMap::new();
        assert_eq!(strategy.count_active_multi_factor(&credentials), 0);

        // totp-rs enforces a 128-bit minimum when parsing otpauth URLs.
        let secret = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";
        credentials.insert(
            CredentialsType::Totp,
            Credential::new(
                CredentialsType::Totp,
                vec!["some-identity".into()],
                &TotpCredentialConfig {
                    totp_url: format!(
                        "otpauth://totp/Example:x?secret={secret}&issuer=Example"
                    ),
                },
                0,
            )
            .unwrap(),
        );
        assert_eq!(strategy.count_active_multi_factor(&credentials), 1);
        assert_eq!(strategy.count_active_first_factor(&credentials), 0);

        credentials.insert(
            CredentialsType::Totp,
            Credential::new(
                CredentialsType::Totp,
                vec![String::new()],
                &TotpCredentialConfig {
                    totp_url: format!("otpauth://totp/x?secret={secret}"),
                },
                0,
            )
            .unwrap(),
        );
        assert_eq!(strategy.count_active_multi_factor(&credentials), 0);

        // A secret below the 128-bit minimum does not parse and counts as
        // no active factor.
        credentials.insert(
            CredentialsType::Totp,
            Credential::new(
                CredentialsType::Totp,
                vec!["some-identity".into()],
                &TotpCredentialConfig {
                    totp_url: "otpauth://totp/x?secret=JBSWY3DPEHPK3PXP".into(),
                },
                0,
            )
            .unwrap(),
        );
        assert_eq!(strategy.count_active_multi_factor(&credentials), 0);
    }
}
