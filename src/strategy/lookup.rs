//! Lookup-secret (backup recovery code) second-factor strategy.
//!
//! Flow Overview:
//! 1) Settings drives a small state machine: regenerate parks twelve fresh
//!    codes in the flow's internal context, confirm persists them wholesale,
//!    reveal renders the stored codes, disable deletes the credential kind.
//!    Previously persisted codes stay valid until confirm replaces them.
//! 2) Login verifies one code by exact match and burns it with
//!    seconds-precision UTC before any session work happens, so a crash
//!    after the burn leaves the code consumed (at-least-once burn).
//!
//! Security boundaries:
//! - Codes transition fresh to used exactly once and never back.
//! - Codes are never logged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::FlowError;
use crate::flow::Flow;
use crate::identity::{
    Credential, CredentialsType, Identity, LookupCredentialConfig, RecoveryCode,
};
use crate::session::{Aal, Session};
use crate::store::Store;
use crate::strategy::{LoginOutcome, SettingsOutcome, Strategy, payload_bool, payload_str};
use crate::text::Message;
use crate::ui::{Group, Node};

/// Number of codes issued per regeneration.
pub const NUM_CODES: usize = 12;
const CODE_LEN: usize = 8;
const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Internal-context key parking regenerated-but-unconfirmed codes.
pub const INTERNAL_KEY_REGENERATED: &str = "lookup_secret.regenerated";

/// Wire field carrying the code on login.
pub const FIELD_SECRET: &str = "lookup_secret";
pub const FIELD_REVEAL: &str = "lookup_secret_reveal";
pub const FIELD_REGENERATE: &str = "lookup_secret_regenerate";
pub const FIELD_CONFIRM: &str = "lookup_secret_confirm";
pub const FIELD_DISABLE: &str = "lookup_secret_disable";

const CREDENTIAL_VERSION: u32 = 0;
const CODES_NODE_ID: &str = "lookup_secret_codes";

pub struct LookupStrategy {
    store: Arc<dyn Store>,
}

impl LookupStrategy {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn generate_codes() -> Vec<String> {
        (0..NUM_CODES).map(|_| Self::generate_code()).collect()
    }

    fn generate_code() -> String {
        let mut raw = [0u8; CODE_LEN];
        OsRng.fill_bytes(&mut raw);
        raw.iter()
            .map(|byte| CODE_ALPHABET[usize::from(*byte) % CODE_ALPHABET.len()] as char)
            .collect()
    }

    fn codes_message(codes: &[RecoveryCode]) -> Message {
        let secrets = codes
            .iter()
            .map(|code| match code.used_at {
                Some(used_at) => json!({ "code": code.code, "used_at": used_at }),
                None => json!({ "code": code.code }),
            })
            .collect();
        Message::lookup_secrets(secrets)
    }

    /// Swap the lookup group to the given action nodes plus an optional
    /// codes text node.
    fn render_group(flow: &mut Flow, codes: Option<&[RecoveryCode]>, actions: &[(&str, Message)]) {
        let ids: Vec<String> = flow
            .ui
            .nodes
            .group(Group::LookupSecret)
            .map(Node::id)
            .collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        flow.ui.nodes.remove(&ids);
        if let Some(codes) = codes {
            flow.ui
                .nodes
                .append(Node::text(Group::LookupSecret, CODES_NODE_ID, Self::codes_message(codes)));
        }
        for (name, label) in actions {
            flow.ui.nodes.append(Node::submit(
                Group::LookupSecret,
                name,
                json!(true),
                label.clone(),
            ));
        }
    }

    fn settings_regenerate(
        &self,
        flow: &mut Flow,
        _identity: &Identity,
    ) -> Result<SettingsOutcome, FlowError> {
        let codes: Vec<RecoveryCode> = Self::generate_codes()
            .into_iter()
            .map(|code| RecoveryCode {
                code,
                used_at: None,
            })
            .collect();
        flow.internal_context.set(INTERNAL_KEY_REGENERATED, &codes)?;
        Self::render_group(
            flow,
            Some(&codes),
            &[
                (FIELD_CONFIRM, Message::lookup_confirm()),
                (FIELD_REGENERATE, Message::lookup_regenerate()),
            ],
        );
        Ok(SettingsOutcome::Render)
    }

    fn settings_confirm(
        &self,
        flow: &mut Flow,
        identity: &Identity,
    ) -> Result<SettingsOutcome, FlowError> {
        let Some(codes) = flow
            .internal_context
            .take::<Vec<RecoveryCode>>(INTERNAL_KEY_REGENERATED)?
        else {
            return Err(FlowError::validation_flow(
                Message::error_lookup_confirm_first(),
            ));
        };

        let mut identity = identity.clone();
        let credential = Credential::new(
            CredentialsType::LookupSecret,
            vec![identity.id.to_string()],
            &LookupCredentialConfig {
                recovery_codes: codes,
            },
            CREDENTIAL_VERSION,
        )
        .map_err(|err| FlowError::internal_with("credential encode failed", err))?;
        identity.upsert_credential(credential);

        Self::render_group(
            flow,
            None,
            &[
                (FIELD_REVEAL, Message::lookup_reveal()),
                (FIELD_REGENERATE, Message::lookup_regenerate()),
                (FIELD_DISABLE, Message::lookup_disable()),
            ],
        );
        info!(identity_id = %identity.id, "recovery codes confirmed");
        Ok(SettingsOutcome::Saved {
            identity,
            method: Some((CredentialsType::LookupSecret, Aal::Aal2)),
            continue_with: Vec::new(),
        })
    }

    fn settings_reveal(
        &self,
        flow: &mut Flow,
        identity: &Identity,
    ) -> Result<SettingsOutcome, FlowError> {
        // Unconfirmed regenerated codes take precedence over persisted ones.
        if let Some(codes) = flow
            .internal_context
            .get::<Vec<RecoveryCode>>(INTERNAL_KEY_REGENERATED)?
        {
            Self::render_group(
                flow,
                Some(&codes),
                &[
                    (FIELD_CONFIRM, Message::lookup_confirm()),
                    (FIELD_REGENERATE, Message::lookup_regenerate()),
                ],
            );
            return Ok(SettingsOutcome::Render);
        }

        let Some(config) = Self::config_of(identity)? else {
            return Err(FlowError::validation_flow(Message::error_no_lookup()));
        };
        Self::render_group(
            flow,
            Some(&config.recovery_codes),
            &[
                (FIELD_REGENERATE, Message::lookup_regenerate()),
                (FIELD_DISABLE, Message::lookup_disable()),
            ],
        );
        Ok(SettingsOutcome::Render)
    }

    fn settings_disable(
        &self,
        flow: &mut Flow,
        identity: &Identity,
    ) -> Result<SettingsOutcome, FlowError> {
        if identity.credential(CredentialsType::LookupSecret).is_none() {
            return Err(FlowError::validation_flow(Message::error_no_lookup()));
        }
        let mut identity = identity.clone();
        identity.remove_credential(CredentialsType::LookupSecret);
        flow.internal_context.remove(INTERNAL_KEY_REGENERATED);
        Self::render_group(flow, None, &[(FIELD_REGENERATE, Message::lookup_regenerate())]);
        info!(identity_id = %identity.id, "recovery codes disabled");
        Ok(SettingsOutcome::Saved {
            identity,
            method: None,
            continue_with: Vec::new(),
        })
    }

    fn config_of(identity: &Identity) -> Result<Option<LookupCredentialConfig>, FlowError> {
        identity
            .credential_config::<LookupCredentialConfig>(CredentialsType::LookupSecret)
            .map_err(|err| FlowError::internal_with("lookup config decode failed", err))
    }

    /// Burn timestamp with seconds precision.
    fn burn_timestamp() -> chrono::DateTime<Utc> {
        let now = Utc::now();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

#[async_trait]
impl Strategy for LookupStrategy {
    fn id(&self) -> CredentialsType {
        CredentialsType::LookupSecret
    }

    fn completed_aal(&self) -> Aal {
        Aal::Aal2
    }

    fn count_active_multi_factor(
        &self,
        credentials: &HashMap<CredentialsType, Credential>,
    ) -> usize {
        credentials
            .get(&CredentialsType::LookupSecret)
            .and_then(|credential| credential.config_as::<LookupCredentialConfig>().ok())
            .map_or(0, |config| usize::from(!config.recovery_codes.is_empty()))
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
        if identity.credential(CredentialsType::LookupSecret).is_none() {
            return Ok(());
        }

        let mut secret =
            crate::ui::InputAttributes::new(FIELD_SECRET, crate::ui::InputType::Text);
        secret.required = true;
        flow.ui.nodes.upsert(
            Node::input(Group::LookupSecret, secret).with_label(Message::login_lookup_label()),
        );
        flow.ui.nodes.upsert(Node::submit(
            Group::LookupSecret,
            "method",
            json!("lookup_secret"),
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
        let Some(submitted) = payload_str(payload, FIELD_SECRET) else {
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
        let Some(mut config) = Self::config_of(&identity)? else {
            return Err(FlowError::validation_flow(Message::error_no_lookup()));
        };

        let Some(index) = config
            .recovery_codes
            .iter()
            .position(|code| code.code == submitted)
        else {
            return Err(FlowError::validation_node(
                Group::LookupSecret,
                FIELD_SECRET,
                Message::error_lookup_invalid(),
            ));
        };
        if config.recovery_codes[index].used_at.is_some() {
            return Err(FlowError::validation_node(
                Group::LookupSecret,
                FIELD_SECRET,
                Message::error_lookup_used(),
            ));
        }

        // Functional replacement committed in one store round-trip. The burn
        // is persisted before any session work so it survives downstream
        // failures.
        config.recovery_codes[index].used_at = Some(Self::burn_timestamp());
        let mut updated = identity.clone();
        let credential = Credential::new(
            CredentialsType::LookupSecret,
            vec![identity.id.to_string()],
            &config,
            CREDENTIAL_VERSION,
        )
        .map_err(|err| FlowError::internal_with("credential encode failed", err))?;
        updated.upsert_credential(credential);
        self.store
            .update_identity(flow.network_id, &updated)
            .await?;

        debug!(identity_id = %updated.id, "recovery code burned");
        flow.active = Some(CredentialsType::LookupSecret);
        Ok(LoginOutcome {
            identity: updated,
            method: CredentialsType::LookupSecret,
            aal: Aal::Aal2,
        })
    }

    async fn populate_settings(
        &self,
        flow: &mut Flow,
        identity: &Identity,
    ) -> Result<(), FlowError> {
        if identity.credential(CredentialsType::LookupSecret).is_some() {
            Self::render_group(
                flow,
                None,
                &[
                    (FIELD_REVEAL, Message::lookup_reveal()),
                    (FIELD_REGENERATE, Message::lookup_regenerate()),
                    (FIELD_DISABLE, Message::lookup_disable()),
                ],
            );
        } else {
            Self::render_group(flow, None, &[(FIELD_REGENERATE, Message::lookup_regenerate())]);
        }
        Ok(())
    }

    async fn settings(
        &self,
        flow: &mut Flow,
        identity: &Identity,
        payload: &Value,
    ) -> Result<SettingsOutcome, FlowError> {
        let actions = [
            payload_bool(payload, FIELD_REVEAL),
            payload_bool(payload, FIELD_REGENERATE),
            payload_bool(payload, FIELD_CONFIRM),
            payload_bool(payload, FIELD_DISABLE),
        ];
        match actions.iter().filter(|set| **set).count() {
            0 => return Err(FlowError::NotResponsible),
            1 => {}
            _ => {
                return Err(FlowError::validation_flow(Message::error(
                    crate::text::ERR_VALIDATION_GENERIC,
                    "Exactly one recovery-code action may be submitted at a time.",
                )));
            }
        }

        if actions[0] {
            self.settings_reveal(flow, identity)
        } else if actions[1] {
            self.settings_regenerate(flow, identity)
        } else if actions[2] {
            self.settings_confirm(flow, identity)
        } else {
            self.settings_disable(flow, identity)
        }
    }
}
