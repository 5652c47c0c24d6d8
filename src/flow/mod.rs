//! Persisted self-service flows.
//!
//! A flow is a durable, tenant-scoped envelope around one multi-step
//! conversation: the UI tree the client renders, the CSRF token bound at
//! init, the requested assurance level, and a server-only internal context
//! where strategies park ceremony state between round-trips. Clients never
//! see the internal context, the CSRF token record, or the tenant id.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::FlowError;
use crate::identity::CredentialsType;
use crate::session::Aal;
use crate::ui::UiContainer;

/// How the client talks to the subsystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Browser,
    Spa,
    Api,
}

impl FlowType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Spa => "spa",
            Self::Api => "api",
        }
    }
}

/// Which self-service conversation the flow drives.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowName {
    Login,
    Settings,
    Registration,
}

impl FlowName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Settings => "settings",
            Self::Registration => "registration",
        }
    }

    /// Bundled JSON schema describing this flow's submission payload.
    #[must_use]
    pub fn payload_schema(self) -> &'static str {
        match self {
            Self::Login => include_str!("../schemas/login.schema.json"),
            Self::Settings => include_str!("../schemas/settings.schema.json"),
            Self::Registration => include_str!("../schemas/registration.schema.json"),
        }
    }
}

/// Render state of the flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    ShowForm,
    Success,
}

/// Server-only key-value document inside a flow. Keys are namespaced
/// `<strategy-id>.<key>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InternalContext(serde_json::Map<String, Value>);

impl InternalContext {
    /// Park a serializable value under `key`.
    ///
    /// # Errors
    /// Returns an internal fault when the value cannot be serialized.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), FlowError> {
        let value = serde_json::to_value(value)
            .map_err(|err| FlowError::internal_with("internal context encode failed", err))?;
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    /// Read a parked value without consuming it. Corrupt parked state is a
    /// server fault, distinct from absent state.
    ///
    /// # Errors
    /// Returns an internal fault when the stored value does not decode.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FlowError> {
        self.0
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|err| FlowError::internal_with("internal context decode failed", err))
    }

    /// Read and delete a parked value.
    ///
    /// # Errors
    /// Returns an internal fault when the stored value does not decode.
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, FlowError> {
        self.0
            .remove(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| FlowError::internal_with("internal context decode failed", err))
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// A persisted, resumable self-service flow.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Flow {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    pub flow_name: FlowName,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Strategy that claimed the current step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<CredentialsType>,
    pub state: FlowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_aal: Option<Aal>,
    /// Force re-authentication even with an active session.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub refresh: bool,
    pub ui: UiContainer,
    /// Never serialized towards clients.
    #[serde(skip)]
    pub internal_context: InternalContext,
    #[serde(skip)]
    pub network_id: Uuid,
    /// Token issued at init; compared against non-API submissions.
    #[serde(skip)]
    pub csrf_token: String,
    #[serde(skip)]
    pub session_id_linked: Option<Uuid>,
    /// Opaque client payload passed through to webhooks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient_payload: Option<Value>,
}

impl Flow {
    #[must_use]
    pub fn new(
        flow_name: FlowName,
        flow_type: FlowType,
        network_id: Uuid,
        action: String,
        lifespan: Duration,
    ) -> Self {
        let now = Utc::now();
        let csrf_token = crate::csrf::new_token();
        let mut ui = UiContainer::new(action);
        ui.set_csrf(&csrf_token);
        Self {
            id: Uuid::new_v4(),
            flow_type,
            flow_name,
            issued_at: now,
            expires_at: now + lifespan,
            active: None,
            state: FlowState::ShowForm,
            requested_aal: None,
            refresh: false,
            ui,
            internal_context: InternalContext::default(),
            network_id,
            csrf_token,
            session_id_linked: None,
            transient_payload: None,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Issue a fresh CSRF token and swap the hidden node. Called whenever an
    /// error re-renders a browser form.
    pub fn rotate_csrf(&mut self) {
        self.csrf_token = crate::csrf::new_token();
        self.ui.set_csrf(&self.csrf_token);
    }

    /// Whether the flow requires CSRF enforcement at all.
    #[must_use]
    pub fn needs_csrf(&self, disable_api_enforcement: bool) -> bool {
        match self.flow_type {
            FlowType::Browser | FlowType::Spa => true,
            FlowType::Api => !disable_api_enforcement,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow() -> Flow {
        Flow::new(
            FlowName::Login,
            FlowType::Browser,
            Uuid::new_v4(),
            "https://auth.example.com/self-service/login?flow=x".into(),
            Duration::minutes(30),
        )
    }

    #[test]
    fn internal_context_round_trips_and_takes() {
        let mut flow = flow();
        flow.internal_context
            .set("totp.url", &"otpauth://totp/x?secret=ABC")
            .unwrap();
        assert!(flow.internal_context.contains("totp.url"));
        let url: String = flow.internal_context.get("totp.url").unwrap().unwrap();
        assert_eq!(url, "otpauth://totp/x?secret=ABC");
        let taken: String = flow.internal_context.take("totp.url").unwrap().unwrap();
        assert_eq!(taken, url);
        assert!(!flow.internal_context.contains("totp.url"));
        assert_eq!(flow.internal_context.get::<String>("totp.url").unwrap(), None);
    }

    #[test]
    fn corrupt_parked_state_is_a_server_fault_not_absence() {
        let mut flow = flow();
        flow.internal_context
            .set("passkey.session_data", &json!({"not": "a string"}))
            .unwrap();
        let err = flow
            .internal_context
            .get::<String>("passkey.session_data")
            .unwrap_err();
        assert!(matches!(err, crate::error::FlowError::Internal { .. }));
        // The corrupt value is still parked; only `take` consumes it.
        assert!(flow.internal_context.contains("passkey.session_data"));
        let err = flow
            .internal_context
            .take::<String>("passkey.session_data")
            .unwrap_err();
        assert!(matches!(err, crate::error::FlowError::Internal { .. }));
        assert!(!flow.internal_context.contains("passkey.session_data"));
    }

    #[test]
    fn client_serialization_hides_server_state() {
        let mut flow = flow();
        flow.internal_context
            .set("passkey.session_data", &json!({"challenge": "c"}))
            .unwrap();
        let value = serde_json::to_value(&flow).unwrap();
        assert!(value.get("internal_context").is_none());
        assert!(value.get("csrf_token").is_none());
        assert!(value.get("network_id").is_none());
        assert_eq!(value["state"], "show_form");
        assert_eq!(value["type"], "browser");
    }

    #[test]
    fn payload_schemas_parse_and_cover_the_wire_fields() {
        for name in [FlowName::Login, FlowName::Settings, FlowName::Registration] {
            let schema: serde_json::Value = serde_json::from_str(name.payload_schema()).unwrap();
            assert!(schema["properties"]["csrf_token"].is_object(), "{}", name.as_str());
        }
        let login: serde_json::Value =
            serde_json::from_str(FlowName::Login.payload_schema()).unwrap();
        assert!(login["properties"]["totp_code"].is_object());
        assert!(login["properties"]["lookup_secret"].is_object());
        let registration: serde_json::Value =
            serde_json::from_str(FlowName::Registration.payload_schema()).unwrap();
        assert!(registration["properties"]["traits"].is_object());
    }

    #[test]
    fn expiry_is_enforced_at_the_deadline() {
        let mut flow = flow();
        assert!(!flow.is_expired(Utc::now()));
        flow.expires_at = Utc::now() - Duration::seconds(1);
        assert!(flow.is_expired(Utc::now()));
    }

    #[test]
    fn rotate_csrf_swaps_token_and_node() {
        let mut flow = flow();
        let before = flow.csrf_token.clone();
        flow.rotate_csrf();
        assert_ne!(flow.csrf_token, before);
        let node = flow
            .ui
            .nodes
            .find(crate::ui::Group::Default, crate::csrf::TOKEN_NAME)
            .unwrap();
        let crate::ui::Attributes::Input(attrs) = &node.attributes else {
            panic!("expected input");
        };
        assert_eq!(attrs.value, json!(flow.csrf_token));
    }

    #[test]
    fn api_flows_can_skip_csrf() {
        let mut flow = flow();
        assert!(flow.needs_csrf(true));
        flow.flow_type = FlowType::Api;
        assert!(!flow.needs_csrf(true));
        assert!(flow.needs_csrf(false));
    }
}
