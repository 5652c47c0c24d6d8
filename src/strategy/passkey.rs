//! Passkey (WebAuthn) passwordless first-factor strategy.
//!
//! Flow Overview:
//! 1) Settings populate begins a registration ceremony bound to the
//!    identity's stable user handle, parks the ceremony state in the flow's
//!    internal context and renders the challenge options plus the trigger
//!    script. Submit verifies the attestation and appends the credential;
//!    existing credentials are never replaced.
//! 2) Registration runs the same ceremony in two steps inside one flow:
//!    traits first, attestation second. The passkey identifier trait becomes
//!    the WebAuthn user name.
//! 3) Login is discoverable: populate parks authentication state and emits
//!    hidden challenge nodes; submit identifies the user handle from the
//!    assertion, loads the identity by that handle and verifies.
//!
//! Security boundaries:
//! - Origin and RP id validation are enforced by `webauthn-rs`.
//! - Unknown-user lookups are masked with a randomized delay matched to the
//!   password hasher's timing.
//! - API flows are unsupported; every hook answers `NotResponsible`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, DiscoverableAuthentication, DiscoverableKey, Passkey,
    PasskeyRegistration, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse, Webauthn, WebauthnBuilder,
};

use crate::config::Config;
use crate::error::FlowError;
use crate::flow::{Flow, FlowType};
use crate::identity::{
    Credential, CredentialsType, Identity, PasskeyCredentialConfig, PasskeyStoredCredential,
    schema,
};
use crate::session::{Aal, Session};
use crate::store::Store;
use crate::strategy::{
    ContinueWith, LoginOutcome, RegistrationOutcome, SettingsOutcome, Strategy, payload_method,
    payload_str,
};
use crate::text::Message;
use crate::ui::{Group, InputAttributes, InputType, Node};

/// Internal-context key parking ceremony state between round-trips.
pub const INTERNAL_KEY_SESSION_DATA: &str = "passkey.session_data";

/// Wire field carrying the login assertion.
pub const FIELD_LOGIN: &str = "passkey_login";
/// Wire field carrying the sign-up attestation.
pub const FIELD_REGISTER: &str = "passkey_register";
/// Wire field carrying the settings attestation.
pub const FIELD_SETTINGS_REGISTER: &str = "passkey_settings_register";
/// Wire field carrying the hex credential id to remove.
pub const FIELD_REMOVE: &str = "passkey_remove";
/// Hidden field carrying the serialized creation options.
pub const FIELD_CREATE_DATA: &str = "create_passkey_data";
/// Hidden field carrying the serialized request options.
pub const FIELD_CHALLENGE: &str = "passkey_challenge";
/// Button wired to the trigger script.
pub const FIELD_TRIGGER: &str = "passkey_register_trigger";
const FIELD_LOGIN_TRIGGER: &str = "passkey_login_trigger";
const FIELD_IDENTIFIER: &str = "identifier";

const CREDENTIAL_VERSION: u32 = 1;

/// Registration ceremony state parked in the flow.
#[derive(Serialize, Deserialize)]
struct ParkedRegistration {
    user_handle: Uuid,
    registration: PasskeyRegistration,
}

pub struct PasskeyStrategy {
    config: Arc<Config>,
    store: Arc<dyn Store>,
}

impl PasskeyStrategy {
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    /// Relying party built from configuration. A missing RP id is a server
    /// configuration fault, not user input.
    fn webauthn(&self) -> Result<Webauthn, FlowError> {
        let Some(rp_id) = self.config.passkey_rp_id.as_deref() else {
            return Err(FlowError::internal(
                "passkey relying party id is not configured",
            ));
        };
        let origin = self
            .config
            .passkey_origins
            .first()
            .unwrap_or(&self.config.public_url);
        let mut builder = WebauthnBuilder::new(rp_id, origin)
            .map_err(|err| FlowError::internal_with("webauthn relying party rejected", err))?
            .rp_name(&self.config.passkey_rp_display_name);
        for extra in self.config.passkey_origins.iter().skip(1) {
            builder = builder.append_allowed_origin(extra);
        }
        builder
            .build()
            .map_err(|err| FlowError::internal_with("webauthn build failed", err))
    }

    fn passkey_config(identity: &Identity) -> Result<Option<PasskeyCredentialConfig>, FlowError> {
        identity
            .credential_config::<PasskeyCredentialConfig>(CredentialsType::Passkey)
            .map_err(|err| FlowError::internal_with("passkey config decode failed", err))
    }

    fn encode_passkey(passkey: &Passkey) -> Result<Value, FlowError> {
        serde_json::to_value(passkey)
            .map_err(|err| FlowError::internal_with("passkey encode failed", err))
    }

    fn decode_passkey(value: &Value) -> Result<Passkey, FlowError> {
        serde_json::from_value(value.clone())
            .map_err(|err| FlowError::internal_with("stored passkey does not decode", err))
    }

    fn encode_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    /// Mask the duration of an unknown-user lookup so passkey login cannot be
    /// used to probe for account existence.
    async fn mitigate_unknown_user_timing(&self) {
        let timing = self.config.hasher_timing;
        let min = timing
            .expected_duration
            .saturating_sub(timing.expected_deviation);
        let max = timing.expected_duration + timing.expected_deviation;
        let delay = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(delay).await;
    }

    /// WebAuthn user name for an identity: the flagged identifier trait,
    /// falling back to the identity id.
    fn user_name(identity: &Identity) -> String {
        schema::IdentifierExtractor::new()
            .extract(schema::default_schema(), &identity.traits)
            .unwrap_or_else(|| identity.id.to_string())
    }

    fn hidden_json<T: Serialize>(name: &str, value: &T) -> Result<Node, FlowError> {
        let raw = serde_json::to_string(value)
            .map_err(|err| FlowError::internal_with("challenge encode failed", err))?;
        Ok(Node::hidden(Group::Passkey, name, Value::String(raw)))
    }

    /// Creation options node with the configured user-verification policy.
    /// `webauthn-rs` fixes the policy on its passkey profile, so the knob is
    /// applied to the client-facing options.
    fn creation_options_node(
        &self,
        options: &CreationChallengeResponse,
    ) -> Result<Node, FlowError> {
        let mut value = serde_json::to_value(options)
            .map_err(|err| FlowError::internal_with("challenge encode failed", err))?;
        let policy = self.config.passkey_user_verification.as_str();
        if let Some(public_key) = value.get_mut("publicKey").and_then(Value::as_object_mut) {
            let selection = public_key
                .entry("authenticatorSelection")
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Some(selection) = selection.as_object_mut() {
                selection.insert("userVerification".to_string(), json!(policy));
            }
        }
        Self::hidden_json(FIELD_CREATE_DATA, &value)
    }

    /// Request options node with the configured user-verification policy.
    fn request_options_node(&self, options: &RequestChallengeResponse) -> Result<Node, FlowError> {
        let mut value = serde_json::to_value(options)
            .map_err(|err| FlowError::internal_with("challenge encode failed", err))?;
        let policy = self.config.passkey_user_verification.as_str();
        if let Some(public_key) = value.get_mut("publicKey").and_then(Value::as_object_mut) {
            public_key.insert("userVerification".to_string(), json!(policy));
        }
        Self::hidden_json(FIELD_CHALLENGE, &value)
    }

    fn trigger_button(name: &'static str, onclick: &str, label: Message) -> Node {
        let mut attrs = InputAttributes::new(name, InputType::Button);
        attrs.value = Value::String(String::new());
        attrs.onclick = Some(onclick.to_string());
        Node::input(Group::Passkey, attrs).with_label(label)
    }

    fn settings_register(
        &self,
        flow: &mut Flow,
        identity: &Identity,
        raw: &str,
    ) -> Result<SettingsOutcome, FlowError> {
        let response: RegisterPublicKeyCredential = serde_json::from_str(raw).map_err(|err| {
            debug!(error = %err, "attestation did not parse");
            FlowError::validation_node(
                Group::Passkey,
                FIELD_SETTINGS_REGISTER,
                Message::error(
                    crate::text::ERR_VALIDATION_GENERIC,
                    "Parse error for Registration",
                ),
            )
        })?;

        let webauthn = self.webauthn()?;
        let Some(parked) = flow
            .internal_context
            .take::<ParkedRegistration>(INTERNAL_KEY_SESSION_DATA)?
        else {
            return Err(FlowError::internal(
                "no passkey registration parked in the flow",
            ));
        };

        let passkey = webauthn
            .finish_passkey_registration(&response, &parked.registration)
            .map_err(|err| {
                debug!(error = %err, "passkey registration verification failed");
                FlowError::validation_node(
                    Group::Passkey,
                    FIELD_SETTINGS_REGISTER,
                    Message::error_webauthn_wrong(),
                )
            })?;

        let mut config = Self::passkey_config(identity)?.unwrap_or(PasskeyCredentialConfig {
            user_handle: parked.user_handle,
            credentials: Vec::new(),
        });
        config.credentials.push(PasskeyStoredCredential {
            id: Self::encode_hex(passkey.cred_id().as_ref()),
            public_key: Self::encode_passkey(&passkey)?,
            display_name: None,
            added_at: Utc::now(),
            is_passwordless: true,
        });

        let mut identifiers = identity
            .credential(CredentialsType::Passkey)
            .map(|credential| credential.identifiers.clone())
            .unwrap_or_default();
        let handle = config.user_handle.to_string();
        if !identifiers.contains(&handle) {
            identifiers.push(handle);
        }

        let mut identity = identity.clone();
        let credential = Credential::new(
            CredentialsType::Passkey,
            identifiers,
            &config,
            CREDENTIAL_VERSION,
        )
        .map_err(|err| FlowError::internal_with("credential encode failed", err))?;
        identity.upsert_credential(credential);

        let continue_with = if flow.flow_type == FlowType::Spa {
            vec![ContinueWith::RedirectBrowserTo {
                redirect_browser_to: self.config.settings_ui_url.to_string(),
            }]
        } else {
            Vec::new()
        };

        info!(identity_id = %identity.id, "passkey added");
        Ok(SettingsOutcome::Saved {
            identity,
            method: Some((CredentialsType::Passkey, Aal::Aal1)),
            continue_with,
        })
    }

    fn settings_remove(
        &self,
        identity: &Identity,
        credential_id: &str,
    ) -> Result<SettingsOutcome, FlowError> {
        let Some(mut config) = Self::passkey_config(identity)? else {
            return Err(FlowError::validation_flow(Message::error_no_webauthn()));
        };
        let Some(index) = config
            .credentials
            .iter()
            .position(|stored| stored.id.eq_ignore_ascii_case(credential_id))
        else {
            return Err(FlowError::validation_node(
                Group::Passkey,
                FIELD_REMOVE,
                Message::error(
                    crate::text::ERR_VALIDATION_GENERIC,
                    "The passkey to remove could not be found.",
                ),
            ));
        };

        let has_password = identity
            .credential(CredentialsType::Password)
            .is_some_and(|credential| !credential.identifiers.is_empty());
        if config.credentials.len() == 1 && !has_password {
            return Err(FlowError::validation_node(
                Group::Passkey,
                FIELD_REMOVE,
                Message::error_last_first_factor(),
            ));
        }

        let removed = config.credentials.remove(index);
        let mut identity = identity.clone();
        if config.credentials.is_empty() {
            identity.remove_credential(CredentialsType::Passkey);
        } else {
            let identifiers = identity
                .credential(CredentialsType::Passkey)
                .map(|credential| credential.identifiers.clone())
                .unwrap_or_default();
            let credential = Credential::new(
                CredentialsType::Passkey,
                identifiers,
                &config,
                CREDENTIAL_VERSION,
            )
            .map_err(|err| FlowError::internal_with("credential encode failed", err))?;
            identity.upsert_credential(credential);
        }

        info!(identity_id = %identity.id, credential_id = %removed.id, "passkey removed");
        Ok(SettingsOutcome::Saved {
            identity,
            method: None,
            continue_with: Vec::new(),
        })
    }

    /// Step one of sign-up: begin the ceremony from validated traits.
    fn register_begin(
        &self,
        flow: &mut Flow,
        traits: &Value,
    ) -> Result<RegistrationOutcome, FlowError> {
        let Some(identifier) =
            schema::IdentifierExtractor::new().extract(schema::default_schema(), traits)
        else {
            return Err(FlowError::validation_flow(
                Message::error_missing_identifier(),
            ));
        };

        let webauthn = self.webauthn()?;
        let user_handle = Uuid::new_v4();
        let (options, registration) = webauthn
            .start_passkey_registration(user_handle, &identifier, &identifier, None)
            .map_err(|err| FlowError::internal_with("registration ceremony failed", err))?;
        flow.internal_context.set(
            INTERNAL_KEY_SESSION_DATA,
            &ParkedRegistration {
                user_handle,
                registration,
            },
        )?;

        self.upsert_trait_nodes(flow, traits);
        flow.ui
            .nodes
            .upsert(self.creation_options_node(&options)?);
        flow.ui
            .nodes
            .upsert(Node::hidden(Group::Passkey, FIELD_REGISTER, Value::Null));
        flow.ui
            .nodes
            .append(crate::script::script_node(&self.config, Group::Passkey));
        flow.ui.nodes.upsert(Self::trigger_button(
            FIELD_TRIGGER,
            "window.oryWebAuthnRegistration()",
            Message::registration_continue(),
        ));
        Ok(RegistrationOutcome::Render)
    }

    /// Step two of sign-up: verify the attestation and mint the identity.
    fn register_finish(
        &self,
        flow: &mut Flow,
        traits: &Value,
        raw: &str,
    ) -> Result<RegistrationOutcome, FlowError> {
        let response: RegisterPublicKeyCredential = serde_json::from_str(raw).map_err(|err| {
            debug!(error = %err, "attestation did not parse");
            FlowError::validation_node(
                Group::Passkey,
                FIELD_REGISTER,
                Message::error(
                    crate::text::ERR_VALIDATION_GENERIC,
                    "Parse error for Registration",
                ),
            )
        })?;
        let Some(identifier) =
            schema::IdentifierExtractor::new().extract(schema::default_schema(), traits)
        else {
            return Err(FlowError::validation_flow(
                Message::error_missing_identifier(),
            ));
        };

        let webauthn = self.webauthn()?;
        let Some(parked) = flow
            .internal_context
            .take::<ParkedRegistration>(INTERNAL_KEY_SESSION_DATA)?
        else {
            return Err(FlowError::internal(
                "no passkey registration parked in the flow",
            ));
        };
        let passkey = webauthn
            .finish_passkey_registration(&response, &parked.registration)
            .map_err(|err| {
                debug!(error = %err, "passkey registration verification failed");
                FlowError::validation_flow(Message::error_webauthn_wrong())
            })?;

        let mut identity = Identity::new(flow.network_id, traits.clone());
        let config = PasskeyCredentialConfig {
            user_handle: parked.user_handle,
            credentials: vec![PasskeyStoredCredential {
                id: Self::encode_hex(passkey.cred_id().as_ref()),
                public_key: Self::encode_passkey(&passkey)?,
                display_name: None,
                added_at: Utc::now(),
                is_passwordless: true,
            }],
        };
        let credential = Credential::new(
            CredentialsType::Passkey,
            vec![identifier, parked.user_handle.to_string()],
            &config,
            CREDENTIAL_VERSION,
        )
        .map_err(|err| FlowError::internal_with("credential encode failed", err))?;
        identity.upsert_credential(credential);

        info!(identity_id = %identity.id, "passkey sign-up verified");
        flow.active = Some(CredentialsType::Passkey);
        Ok(RegistrationOutcome::Created {
            identity,
            method: CredentialsType::Passkey,
            aal: Aal::Aal1,
        })
    }

    fn upsert_trait_nodes(&self, flow: &mut Flow, traits: &Value) {
        let schema = schema::default_schema();
        let required: Vec<&str> = schema
            .pointer("/properties/traits/required")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(properties) = schema
            .pointer("/properties/traits/properties")
            .and_then(Value::as_object)
        {
            for (name, property) in properties {
                let value = traits.get(name).cloned().unwrap_or(Value::Null);
                flow.ui.nodes.upsert(Node::from_schema_property(
                    Group::Default,
                    &format!("traits.{name}"),
                    property,
                    required.contains(&name.as_str()),
                    value,
                ));
            }
        }
        flow.ui.nodes.sort_by_schema(schema, "traits.");
    }
}

#[async_trait]
impl Strategy for PasskeyStrategy {
    fn id(&self) -> CredentialsType {
        CredentialsType::Passkey
    }

    fn completed_aal(&self) -> Aal {
        Aal::Aal1
    }

    fn count_active_first_factor(
        &self,
        credentials: &HashMap<CredentialsType, Credential>,
    ) -> usize {
        let Some(credential) = credentials.get(&CredentialsType::Passkey) else {
            return 0;
        };
        if credential.identifiers.iter().all(String::is_empty) {
            return 0;
        }
        credential
            .config_as::<PasskeyCredentialConfig>()
            .map_or(0, |config| config.credentials.len())
    }

    async fn populate_login(
        &self,
        flow: &mut Flow,
        _identity: Option<&Identity>,
    ) -> Result<(), FlowError> {
        if flow.flow_type == FlowType::Api || flow.requested_aal == Some(Aal::Aal2) {
            return Ok(());
        }

        let webauthn = self.webauthn()?;
        let (options, state) = webauthn
            .start_discoverable_authentication()
            .map_err(|err| FlowError::internal_with("login ceremony failed", err))?;
        flow.internal_context
            .set(INTERNAL_KEY_SESSION_DATA, &state)?;

        let mut identifier = InputAttributes::new(FIELD_IDENTIFIER, InputType::Text);
        identifier.autocomplete = Some("username webauthn".to_string());
        flow.ui.nodes.upsert(
            Node::input(Group::Default, identifier).with_label(Message::label_identifier()),
        );
        flow.ui
            .nodes
            .upsert(self.request_options_node(&options)?);
        flow.ui
            .nodes
            .upsert(Node::hidden(Group::Passkey, FIELD_LOGIN, Value::Null));
        flow.ui
            .nodes
            .append(crate::script::script_node(&self.config, Group::Passkey));
        flow.ui.nodes.upsert(Self::trigger_button(
            FIELD_LOGIN_TRIGGER,
            "window.oryPasskeyLogin()",
            Message::login_passkey(),
        ));
        Ok(())
    }

    async fn login(
        &self,
        flow: &mut Flow,
        _session: Option<&Session>,
        payload: &Value,
    ) -> Result<LoginOutcome, FlowError> {
        let Some(raw) = payload_str(payload, FIELD_LOGIN) else {
            return Err(FlowError::NotResponsible);
        };
        if flow.flow_type == FlowType::Api {
            return Err(FlowError::NotResponsible);
        }

        let response: PublicKeyCredential = serde_json::from_str(raw).map_err(|err| {
            debug!(error = %err, "assertion did not parse");
            FlowError::validation_node(
                Group::Passkey,
                FIELD_LOGIN,
                Message::error(crate::text::ERR_VALIDATION_GENERIC, "Parse error for Login"),
            )
        })?;
        let Some(state) = flow
            .internal_context
            .get::<DiscoverableAuthentication>(INTERNAL_KEY_SESSION_DATA)?
        else {
            return Err(FlowError::internal("no passkey challenge parked in the flow"));
        };

        let webauthn = self.webauthn()?;
        let (user_handle, _credential_id) = webauthn
            .identify_discoverable_authentication(&response)
            .map_err(|err| {
                debug!(error = %err, "assertion carries no usable user handle");
                FlowError::validation_flow(Message::error_webauthn_wrong())
            })?;

        let identity = match self
            .store
            .find_by_credentials_identifier(
                flow.network_id,
                CredentialsType::Passkey,
                &user_handle.to_string(),
            )
            .await
        {
            Ok(identity) => identity,
            Err(FlowError::NotFound) => {
                self.mitigate_unknown_user_timing().await;
                return Err(FlowError::validation_flow(Message::error_no_webauthn()));
            }
            Err(err) => return Err(err),
        };
        let Some(mut config) = Self::passkey_config(&identity)? else {
            return Err(FlowError::validation_flow(Message::error_no_webauthn()));
        };

        // Credentials usable at the requested AAL; a refresh selects all.
        let mut eligible: Vec<(usize, Passkey)> = Vec::new();
        for (index, stored) in config.credentials.iter().enumerate() {
            if !flow.refresh && !stored.is_passwordless {
                continue;
            }
            eligible.push((index, Self::decode_passkey(&stored.public_key)?));
        }
        if eligible.is_empty() {
            self.mitigate_unknown_user_timing().await;
            return Err(FlowError::validation_flow(Message::error_no_webauthn()));
        }

        let keys: Vec<DiscoverableKey> = eligible
            .iter()
            .map(|(_, passkey)| DiscoverableKey::from(passkey))
            .collect();
        let result = webauthn
            .finish_discoverable_authentication(&response, state, &keys)
            .map_err(|err| {
                debug!(error = %err, "passkey assertion verification failed");
                FlowError::validation_flow(Message::error_webauthn_wrong())
            })?;

        let mut identity = identity;
        if result.needs_update() {
            for (index, passkey) in &mut eligible {
                if passkey.cred_id() != result.cred_id() {
                    continue;
                }
                if passkey.update_credential(&result) == Some(true) {
                    config.credentials[*index].public_key = Self::encode_passkey(passkey)?;
                    let identifiers = identity
                        .credential(CredentialsType::Passkey)
                        .map(|credential| credential.identifiers.clone())
                        .unwrap_or_default();
                    let credential = Credential::new(
                        CredentialsType::Passkey,
                        identifiers,
                        &config,
                        CREDENTIAL_VERSION,
                    )
                    .map_err(|err| FlowError::internal_with("credential encode failed", err))?;
                    identity.upsert_credential(credential);
                    self.store
                        .update_identity(flow.network_id, &identity)
                        .await?;
                }
            }
        }

        flow.internal_context.remove(INTERNAL_KEY_SESSION_DATA);
        debug!(identity_id = %identity.id, "passkey login verified");
        flow.active = Some(CredentialsType::Passkey);
        Ok(LoginOutcome {
            identity,
            method: CredentialsType::Passkey,
            aal: Aal::Aal1,
        })
    }

    async fn populate_settings(
        &self,
        flow: &mut Flow,
        identity: &Identity,
    ) -> Result<(), FlowError> {
        if flow.flow_type == FlowType::Api {
            return Ok(());
        }

        let existing = Self::passkey_config(identity)?;
        if let Some(config) = &existing {
            for stored in &config.credentials {
                flow.ui.nodes.append(Node::submit(
                    Group::Passkey,
                    FIELD_REMOVE,
                    json!(stored.id),
                    Message::settings_passkey_remove(
                        stored.display_name.as_deref().unwrap_or("Passkey"),
                    ),
                ));
            }
        }

        let user_handle = existing
            .as_ref()
            .map_or_else(Uuid::new_v4, |config| config.user_handle);
        let exclude = existing.as_ref().map(|config| {
            config
                .credentials
                .iter()
                .filter_map(|stored| Self::decode_passkey(&stored.public_key).ok())
                .map(|passkey| passkey.cred_id().clone())
                .collect()
        });

        let webauthn = self.webauthn()?;
        let user_name = Self::user_name(identity);
        let (options, registration) = webauthn
            .start_passkey_registration(user_handle, &user_name, &user_name, exclude)
            .map_err(|err| FlowError::internal_with("registration ceremony failed", err))?;
        flow.internal_context.set(
            INTERNAL_KEY_SESSION_DATA,
            &ParkedRegistration {
                user_handle,
                registration,
            },
        )?;

        flow.ui
            .nodes
            .upsert(self.creation_options_node(&options)?);
        flow.ui.nodes.upsert(Node::hidden(
            Group::Passkey,
            FIELD_SETTINGS_REGISTER,
            Value::Null,
        ));
        flow.ui
            .nodes
            .append(crate::script::script_node(&self.config, Group::Passkey));
        flow.ui.nodes.upsert(Self::trigger_button(
            FIELD_TRIGGER,
            "window.oryPasskeyRegistration()",
            Message::settings_passkey_register(),
        ));
        Ok(())
    }

    async fn settings(
        &self,
        flow: &mut Flow,
        identity: &Identity,
        payload: &Value,
    ) -> Result<SettingsOutcome, FlowError> {
        if flow.flow_type == FlowType::Api {
            return Err(FlowError::NotResponsible);
        }
        if let Some(credential_id) = payload_str(payload, FIELD_REMOVE) {
            return self.settings_remove(identity, credential_id);
        }
        if let Some(raw) = payload_str(payload, FIELD_SETTINGS_REGISTER) {
            return self.settings_register(flow, identity, raw);
        }
        Err(FlowError::NotResponsible)
    }

    async fn populate_registration(&self, flow: &mut Flow) -> Result<(), FlowError> {
        if flow.flow_type == FlowType::Api {
            return Ok(());
        }
        self.upsert_trait_nodes(flow, &Value::Null);
        flow.ui.nodes.upsert(Node::submit(
            Group::Passkey,
            "method",
            json!("passkey"),
            Message::registration_passkey(),
        ));
        Ok(())
    }

    async fn register(
        &self,
        flow: &mut Flow,
        payload: &Value,
    ) -> Result<RegistrationOutcome, FlowError> {
        let attestation = payload_str(payload, FIELD_REGISTER);
        if payload_method(payload) != Some("passkey") && attestation.is_none() {
            return Err(FlowError::NotResponsible);
        }
        if flow.flow_type == FlowType::Api {
            return Err(FlowError::NotResponsible);
        }

        let traits = payload.get("traits").cloned().unwrap_or(json!({}));
        if let Err(messages) = schema::validate_traits(schema::default_schema(), &traits) {
            let message = messages
                .into_iter()
                .next()
                .unwrap_or_else(|| Message::error_required("traits"));
            return Err(FlowError::validation_flow(message));
        }

        match attestation {
            Some(raw) => self.register_finish(flow, &traits, raw),
            None => self.register_begin(flow, &traits),
        }
    }
}
