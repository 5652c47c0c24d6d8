//! Flow orchestration: init, dispatch and persistence.
//!
//! Flow Overview:
//! 1) Init builds a flow for the requested kind, lets every enabled
//!    strategy contribute nodes, and persists it tenant-scoped.
//! 2) Submit loads the flow (expiry and CSRF enforced at load), walks the
//!    strategies in config order and lets the first one that claims the
//!    payload handle it; the rest are never consulted.
//! 3) Success commits identity and session changes before the flow is
//!    marked done; validation failures re-render the form with messages
//!    and a rotated CSRF token.
//!
//! Security boundaries:
//! - Every store access carries the tenant id; foreign flows are NotFound.
//! - Settings mutations require a privileged (fresh) session.
//! - `NotResponsible` and `NoStrategyFound` never leak which strategies
//!   are enabled beyond what the rendered form already shows.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::csrf;
use crate::error::{FlowError, MessageTarget};
use crate::flow::{Flow, FlowName, FlowState, FlowType};
use crate::session::{Aal, Session};
use crate::store::Store;
use crate::strategy::{ContinueWith, Registry, RegistrationOutcome, SettingsOutcome};
use crate::text::Message;

/// Node values that survive an error re-render. Ceremony challenges must
/// keep their value so the client can retry without a new init.
const RESET_KEEP_VALUES: &[&str] = &[
    csrf::TOKEN_NAME,
    crate::strategy::passkey::FIELD_CREATE_DATA,
    crate::strategy::passkey::FIELD_CHALLENGE,
];

/// A successfully completed login submission.
#[derive(Debug)]
pub struct LoginSuccess {
    pub flow: Flow,
    pub session: Session,
    /// Whether the session was minted by this submission (first factor) or
    /// an existing one was upgraded (second factor).
    pub session_created: bool,
}

/// A successfully handled settings submission.
#[derive(Debug)]
pub enum SettingsSuccess {
    /// The flow was re-rendered (revealed codes, a fresh ceremony); nothing
    /// was persisted beyond the flow itself.
    Render(Box<Flow>),
    Saved {
        flow: Box<Flow>,
        continue_with: Vec<ContinueWith>,
    },
}

/// A successfully handled registration submission.
#[derive(Debug)]
pub enum RegistrationSuccess {
    /// Step one of a multi-step sign-up; the flow carries the challenge.
    Render(Box<Flow>),
    Created { flow: Box<Flow>, session: Session },
}

/// How a failed submission is surfaced to the transport layer.
#[derive(Debug)]
pub enum SubmitError {
    /// The flow was re-rendered with validation messages and persisted;
    /// respond with the flow body and a 4xx status.
    Render { flow: Box<Flow>, error: FlowError },
    /// No re-renderable flow; respond with a machine-readable error body.
    Error(FlowError),
    /// Browser clients are sent back to the UI instead of an error body.
    RedirectBrowserTo(String),
}

impl From<FlowError> for SubmitError {
    fn from(err: FlowError) -> Self {
        Self::Error(err)
    }
}

/// Coordinates flows, strategies and the store. One instance per process.
pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    registry: Registry,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Self {
        let registry = Registry::new(config.clone(), store.clone());
        Self {
            config,
            store,
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn new_flow(&self, name: FlowName, flow_type: FlowType) -> Flow {
        let mut flow = Flow::new(
            name,
            flow_type,
            self.config.network_id,
            String::new(),
            self.config.flow_lifespan,
        );
        flow.ui.action = self.config.flow_action_url(name, flow.id);
        flow
    }

    /// Initialize a login flow.
    ///
    /// An AAL2 flow authenticates an existing session further and therefore
    /// requires one; strategies only render second-factor nodes for methods
    /// the identity actually owns.
    ///
    /// # Errors
    /// Fails when AAL2 is requested without a session or the store rejects
    /// the flow.
    pub async fn create_login_flow(
        &self,
        flow_type: FlowType,
        requested_aal: Option<Aal>,
        refresh: bool,
        session: Option<&Session>,
    ) -> Result<Flow, FlowError> {
        if requested_aal == Some(Aal::Aal2) && session.is_none() {
            return Err(FlowError::validation_flow(Message::error(
                crate::text::ERR_VALIDATION_GENERIC,
                "A session is required to request a higher assurance level.",
            )));
        }

        let identity = match session {
            Some(session) => Some(
                self.store
                    .get_identity_confidential(self.config.network_id, session.identity_id)
                    .await?,
            ),
            None => None,
        };

        let mut flow = self.new_flow(FlowName::Login, flow_type);
        flow.requested_aal = requested_aal;
        flow.refresh = refresh;
        flow.session_id_linked = session.map(|session| session.id);
        if refresh {
            flow.ui.add_message(Message::login_reauth());
        }

        for strategy in self.registry.strategies() {
            strategy.populate_login(&mut flow, identity.as_ref()).await?;
        }

        self.store
            .create_flow(self.config.network_id, &mut flow)
            .await?;
        info!(flow_id = %flow.id, flow_type = flow_type.as_str(), "login flow created");
        Ok(flow)
    }

    /// Initialize a settings flow for the session's identity.
    ///
    /// # Errors
    /// Fails when the identity cannot be loaded or the flow cannot be
    /// persisted.
    pub async fn create_settings_flow(
        &self,
        flow_type: FlowType,
        session: &Session,
    ) -> Result<Flow, FlowError> {
        let identity = self
            .store
            .get_identity_confidential(self.config.network_id, session.identity_id)
            .await?;

        let mut flow = self.new_flow(FlowName::Settings, flow_type);
        flow.session_id_linked = Some(session.id);
        for strategy in self.registry.strategies() {
            strategy.populate_settings(&mut flow, &identity).await?;
        }

        self.store
            .create_flow(self.config.network_id, &mut flow)
            .await?;
        info!(flow_id = %flow.id, identity_id = %identity.id, "settings flow created");
        Ok(flow)
    }

    /// Initialize a registration flow.
    ///
    /// # Errors
    /// Fails when the flow cannot be persisted.
    pub async fn create_registration_flow(&self, flow_type: FlowType) -> Result<Flow, FlowError> {
        let mut flow = self.new_flow(FlowName::Registration, flow_type);
        for strategy in self.registry.strategies() {
            strategy.populate_registration(&mut flow).await?;
        }

        self.store
            .create_flow(self.config.network_id, &mut flow)
            .await?;
        info!(flow_id = %flow.id, flow_type = flow_type.as_str(), "registration flow created");
        Ok(flow)
    }

    /// Load a flow for submission: tenant scope, kind, deadline and CSRF.
    async fn load_for_submit(
        &self,
        name: FlowName,
        id: Uuid,
        payload: &Value,
    ) -> Result<Flow, FlowError> {
        let flow = self.store.get_flow(self.config.network_id, id).await?;
        if flow.flow_name != name {
            return Err(FlowError::NotFound);
        }
        if flow.is_expired(Utc::now()) {
            debug!(flow_id = %flow.id, "flow past its deadline");
            return Err(FlowError::FlowExpired);
        }
        if flow.needs_csrf(self.config.disable_api_flow_enforcement) {
            let submitted = payload
                .get(csrf::TOKEN_NAME)
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !csrf::tokens_match(&flow.csrf_token, submitted) {
                warn!(flow_id = %flow.id, "anti-csrf token mismatch");
                return Err(FlowError::CsrfViolation);
            }
        }
        Ok(flow)
    }

    /// Re-render a flow after a failed submission: values cleared (ceremony
    /// challenges excepted), CSRF rotated for cookie-bound clients, and the
    /// error's message attached where it belongs.
    async fn render_error(&self, mut flow: Flow, err: FlowError) -> SubmitError {
        let Some(message) = err.ui_message() else {
            return SubmitError::Error(err);
        };
        flow.ui.reset(RESET_KEEP_VALUES);
        if matches!(flow.flow_type, FlowType::Browser | FlowType::Spa) {
            flow.rotate_csrf();
        }
        match &err {
            FlowError::Validation {
                target: MessageTarget::Node(group, id),
                ..
            } => flow.ui.add_node_message(*group, id, message),
            _ => flow.ui.add_message(message),
        }
        if let Err(persist) = self
            .store
            .update_flow(self.config.network_id, &flow)
            .await
        {
            return SubmitError::Error(persist);
        }
        SubmitError::Render {
            flow: Box::new(flow),
            error: err,
        }
    }

    /// Handle a login submission.
    ///
    /// The winning strategy has already persisted any state it must not
    /// lose (burned recovery codes); this only appends the session method
    /// and completes the flow.
    ///
    /// # Errors
    /// Returns `SubmitError::Render` for validation failures and
    /// `SubmitError::Error` for machine errors.
    pub async fn submit_login(
        &self,
        flow_id: Uuid,
        payload: &Value,
        session: Option<&Session>,
    ) -> Result<LoginSuccess, SubmitError> {
        let mut flow = self.load_for_submit(FlowName::Login, flow_id, payload).await?;

        let mut claimed = None;
        for strategy in self.registry.strategies() {
            match strategy.login(&mut flow, session, payload).await {
                Ok(outcome) => {
                    claimed = Some(outcome);
                    break;
                }
                Err(FlowError::NotResponsible) => {}
                Err(err) => return Err(self.render_error(flow, err).await),
            }
        }
        let Some(outcome) = claimed else {
            return Err(self.render_error(flow, FlowError::NoStrategyFound).await);
        };

        let (mut session, session_created) = match session {
            Some(existing) => {
                if existing.identity_id != outcome.identity.id {
                    return Err(SubmitError::Error(FlowError::internal(
                        "session does not belong to the authenticated identity",
                    )));
                }
                (existing.clone(), false)
            }
            None => (
                Session::new(self.config.network_id, outcome.identity.id),
                true,
            ),
        };
        session.complete_with(outcome.method, outcome.aal);
        if session_created {
            self.store
                .create_session(self.config.network_id, &session)
                .await?;
        } else {
            self.store
                .update_session(self.config.network_id, &session)
                .await?;
        }

        flow.state = FlowState::Success;
        self.store
            .update_flow(self.config.network_id, &flow)
            .await?;
        info!(
            flow_id = %flow.id,
            identity_id = %outcome.identity.id,
            method = outcome.method.as_str(),
            aal = session.authenticator_assurance_level.as_str(),
            "login flow completed"
        );
        Ok(LoginSuccess {
            flow,
            session,
            session_created,
        })
    }

    /// Handle a settings submission. Requires a privileged session.
    ///
    /// # Errors
    /// When the session's last authentication is older than the privileged
    /// window, browser flows get `SubmitError::RedirectBrowserTo` aimed at
    /// the login UI and other flows get `SessionRefreshRequired`.
    pub async fn submit_settings(
        &self,
        flow_id: Uuid,
        payload: &Value,
        session: &Session,
    ) -> Result<SettingsSuccess, SubmitError> {
        let mut flow = self
            .load_for_submit(FlowName::Settings, flow_id, payload)
            .await?;

        if !session.is_privileged(self.config.privileged_session_max_age, Utc::now()) {
            debug!(flow_id = %flow.id, session_id = %session.id, "stale session on settings submit");
            if flow.flow_type == FlowType::Browser {
                return Err(SubmitError::RedirectBrowserTo(self.config.reauth_url()));
            }
            return Err(SubmitError::Error(FlowError::SessionRefreshRequired {
                redirect_to: self.config.reauth_url(),
            }));
        }

        let identity = self
            .store
            .get_identity_confidential(self.config.network_id, session.identity_id)
            .await
            .map_err(SubmitError::Error)?;

        let mut claimed = None;
        for strategy in self.registry.strategies() {
            match strategy.settings(&mut flow, &identity, payload).await {
                Ok(outcome) => {
                    claimed = Some(outcome);
                    break;
                }
                Err(FlowError::NotResponsible) => {}
                Err(err) => return Err(self.render_error(flow, err).await),
            }
        }
        match claimed {
            Some(SettingsOutcome::Render) => {
                self.store
                    .update_flow(self.config.network_id, &flow)
                    .await?;
                Ok(SettingsSuccess::Render(Box::new(flow)))
            }
            Some(SettingsOutcome::Saved {
                identity,
                method,
                continue_with,
            }) => {
                self.store
                    .update_identity(self.config.network_id, &identity)
                    .await?;
                if let Some((method, aal)) = method {
                    let mut session = session.clone();
                    session.complete_with(method, aal);
                    self.store
                        .update_session(self.config.network_id, &session)
                        .await?;
                }

                flow.state = FlowState::Success;
                flow.ui.reset(&[csrf::TOKEN_NAME]);
                flow.ui.add_message(Message::settings_update_success());
                for strategy in self.registry.strategies() {
                    strategy
                        .populate_settings(&mut flow, &identity)
                        .await
                        .map_err(SubmitError::Error)?;
                }
                self.store
                    .update_flow(self.config.network_id, &flow)
                    .await?;
                info!(flow_id = %flow.id, identity_id = %identity.id, "settings flow completed");
                Ok(SettingsSuccess::Saved {
                    flow: Box::new(flow),
                    continue_with,
                })
            }
            None => Err(self.render_error(flow, FlowError::NoStrategyFound).await),
        }
    }

    /// Handle a registration submission.
    ///
    /// # Errors
    /// Duplicate credential identifiers surface as a re-rendered validation
    /// failure; everything else follows the usual mapping.
    pub async fn submit_registration(
        &self,
        flow_id: Uuid,
        payload: &Value,
    ) -> Result<RegistrationSuccess, SubmitError> {
        let mut flow = self
            .load_for_submit(FlowName::Registration, flow_id, payload)
            .await?;

        let mut claimed = None;
        for strategy in self.registry.strategies() {
            match strategy.register(&mut flow, payload).await {
                Ok(outcome) => {
                    claimed = Some(outcome);
                    break;
                }
                Err(FlowError::NotResponsible) => {}
                Err(err) => return Err(self.render_error(flow, err).await),
            }
        }
        match claimed {
            Some(RegistrationOutcome::Render) => {
                self.store
                    .update_flow(self.config.network_id, &flow)
                    .await?;
                Ok(RegistrationSuccess::Render(Box::new(flow)))
            }
            Some(RegistrationOutcome::Created {
                mut identity,
                method,
                aal,
            }) => {
                if let Err(err) = self
                    .store
                    .create_identity(self.config.network_id, &mut identity)
                    .await
                {
                    return Err(self.render_error(flow, err).await);
                }

                let mut session = Session::new(self.config.network_id, identity.id);
                session.complete_with(method, aal);
                self.store
                    .create_session(self.config.network_id, &session)
                    .await?;

                flow.state = FlowState::Success;
                self.store
                    .update_flow(self.config.network_id, &flow)
                    .await?;
                info!(
                    flow_id = %flow.id,
                    identity_id = %identity.id,
                    method = method.as_str(),
                    "registration flow completed"
                );
                Ok(RegistrationSuccess::Created {
                    flow: Box::new(flow),
                    session,
                })
            }
            None => Err(self.render_error(flow, FlowError::NoStrategyFound).await),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::{
        Credential, CredentialsType, Identity, LookupCredentialConfig, RecoveryCode,
        TotpCredentialConfig,
    };
    use crate::store::memory::InMemoryStore;
    use crate::strategy::{lookup, totp};
    use crate::ui::Group;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};
    use totp_rs::TOTP;
    use url::Url;

    fn config() -> Arc<Config> {
        let mut config = Config::new(Url::parse("https://auth.example.com/").unwrap()).unwrap();
        config.passkey_rp_id = Some("auth.example.com".to_string());
        Arc::new(config)
    }

    fn setup() -> (Orchestrator, Arc<InMemoryStore>, Arc<Config>) {
        let config = config();
        let store = Arc::new(InMemoryStore::new());
        (
            Orchestrator::new(config.clone(), store.clone()),
            store,
            config,
        )
    }

    async fn seeded_identity(store: &InMemoryStore, config: &Config) -> Identity {
        let mut identity = Identity::new(config.network_id, json!({"email": "user@example.com"}));
        store
            .create_identity(config.network_id, &mut identity)
            .await
            .unwrap();
        identity
    }

    async fn seeded_session(
        store: &InMemoryStore,
        config: &Config,
        identity: &Identity,
    ) -> Session {
        let mut session = Session::new(config.network_id, identity.id);
        session.complete_with(CredentialsType::Password, Aal::Aal1);
        store
            .create_session(config.network_id, &session)
            .await
            .unwrap();
        session
    }

    fn totp_code(url: &str) -> String {
        let totp = TOTP::from_url(url).unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        totp.generate(now)
    }

    fn csrf_payload(flow: &Flow, mut extra: Value) -> Value {
        extra[csrf::TOKEN_NAME] = json!(flow.csrf_token);
        extra
    }

    #[tokio::test]
    async fn settings_flow_round_trip_links_a_totp_device() {
        let (orchestrator, store, config) = setup();
        let identity = seeded_identity(&store, &config).await;
        let session = seeded_session(&store, &config, &identity).await;

        let flow = orchestrator
            .create_settings_flow(FlowType::Browser, &session)
            .await
            .unwrap();
        let url: String = flow
            .internal_context
            .get(totp::INTERNAL_KEY_URL)
            .unwrap()
            .unwrap();

        let payload = csrf_payload(
            &flow,
            json!({ "method": "totp", totp::FIELD_CODE: totp_code(&url) }),
        );
        let outcome = orchestrator
            .submit_settings(flow.id, &payload, &session)
            .await
            .unwrap();
        let SettingsSuccess::Saved { flow, .. } = outcome else {
            panic!("expected saved outcome");
        };
        assert_eq!(flow.state, FlowState::Success);

        let stored = store
            .get_identity_confidential(config.network_id, identity.id)
            .await
            .unwrap();
        let totp_config: TotpCredentialConfig = stored
            .credential_config(CredentialsType::Totp)
            .unwrap()
            .unwrap();
        assert_eq!(totp_config.totp_url, url);

        // the session picked up the aal2 method
        let session = store
            .get_session(config.network_id, session.id)
            .await
            .unwrap();
        assert_eq!(session.authenticator_assurance_level, Aal::Aal2);

        // success re-render now offers unlink instead of a fresh secret
        assert!(flow.ui.nodes.find(Group::Totp, totp::FIELD_UNLINK).is_some());
    }

    #[tokio::test]
    async fn second_factor_login_upgrades_the_session() {
        let (orchestrator, store, config) = setup();
        let mut identity = seeded_identity(&store, &config).await;
        let key = totp_rs::TOTP::new(
            totp_rs::Algorithm::SHA1,
            6,
            1,
            30,
            totp_rs::Secret::generate_secret().to_bytes().unwrap(),
            Some("Example".to_string()),
            "user@example.com".to_string(),
        )
        .unwrap();
        identity.upsert_credential(
            Credential::new(
                CredentialsType::Totp,
                vec![identity.id.to_string()],
                &TotpCredentialConfig {
                    totp_url: key.get_url(),
                },
                0,
            )
            .unwrap(),
        );
        store
            .update_identity(config.network_id, &identity)
            .await
            .unwrap();
        let session = seeded_session(&store, &config, &identity).await;

        let flow = orchestrator
            .create_login_flow(FlowType::Browser, Some(Aal::Aal2), false, Some(&session))
            .await
            .unwrap();
        assert!(flow.ui.nodes.find(Group::Totp, totp::FIELD_CODE).is_some());

        let payload = csrf_payload(
            &flow,
            json!({ "method": "totp", totp::FIELD_CODE: totp_code(&key.get_url()) }),
        );
        let success = orchestrator
            .submit_login(flow.id, &payload, Some(&session))
            .await
            .unwrap();
        assert!(!success.session_created);
        assert_eq!(success.session.authenticator_assurance_level, Aal::Aal2);
        assert_eq!(success.flow.state, FlowState::Success);
    }

    #[tokio::test]
    async fn aal2_login_without_a_session_is_rejected() {
        let (orchestrator, _, _) = setup();
        let err = orchestrator
            .create_login_flow(FlowType::Browser, Some(Aal::Aal2), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Validation { .. }));
    }

    #[tokio::test]
    async fn csrf_mismatch_is_rejected_before_dispatch() {
        let (orchestrator, store, config) = setup();
        let identity = seeded_identity(&store, &config).await;
        let session = seeded_session(&store, &config, &identity).await;
        let flow = orchestrator
            .create_settings_flow(FlowType::Browser, &session)
            .await
            .unwrap();

        let payload = json!({ "method": "totp", totp::FIELD_CODE: "000000", csrf::TOKEN_NAME: "forged" });
        let err = orchestrator
            .submit_settings(flow.id, &payload, &session)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Error(FlowError::CsrfViolation)
        ));
    }

    #[tokio::test]
    async fn expired_flows_are_rejected_at_load() {
        let (orchestrator, store, config) = setup();
        let identity = seeded_identity(&store, &config).await;
        let session = seeded_session(&store, &config, &identity).await;
        let mut flow = orchestrator
            .create_settings_flow(FlowType::Browser, &session)
            .await
            .unwrap();
        flow.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.update_flow(config.network_id, &flow).await.unwrap();

        let payload = csrf_payload(&flow, json!({ "method": "totp" }));
        let err = orchestrator
            .submit_settings(flow.id, &payload, &session)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Error(FlowError::FlowExpired)));
    }

    #[tokio::test]
    async fn stale_session_requires_refresh() {
        let config = {
            let mut config =
                Config::new(Url::parse("https://auth.example.com/").unwrap()).unwrap();
            config.passkey_rp_id = Some("auth.example.com".to_string());
            config.privileged_session_max_age = chrono::Duration::nanoseconds(1);
            Arc::new(config)
        };
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(config.clone(), store.clone());
        let identity = seeded_identity(&store, &config).await;
        let session = seeded_session(&store, &config, &identity).await;
        let flow = orchestrator
            .create_settings_flow(FlowType::Browser, &session)
            .await
            .unwrap();

        let payload = csrf_payload(&flow, json!({ "method": "totp", totp::FIELD_CODE: "1" }));
        let err = orchestrator
            .submit_settings(flow.id, &payload, &session)
            .await
            .unwrap_err();
        // Browser clients go back to the login UI for re-authentication.
        let SubmitError::RedirectBrowserTo(redirect_to) = err else {
            panic!("expected a browser redirect, got {err:?}");
        };
        assert_eq!(redirect_to, "https://auth.example.com/ui/login?refresh=true");

        // Non-browser clients get the machine-readable refresh error.
        let flow = orchestrator
            .create_settings_flow(FlowType::Spa, &session)
            .await
            .unwrap();
        let payload = csrf_payload(&flow, json!({ "method": "totp", totp::FIELD_CODE: "1" }));
        let err = orchestrator
            .submit_settings(flow.id, &payload, &session)
            .await
            .unwrap_err();
        let SubmitError::Error(FlowError::SessionRefreshRequired { redirect_to }) = err else {
            panic!("expected refresh requirement, got {err:?}");
        };
        assert_eq!(redirect_to, "https://auth.example.com/ui/login?refresh=true");
    }

    #[tokio::test]
    async fn unclaimed_submissions_re_render_with_no_strategy_message() {
        let (orchestrator, store, config) = setup();
        let identity = seeded_identity(&store, &config).await;
        let session = seeded_session(&store, &config, &identity).await;
        let flow = orchestrator
            .create_settings_flow(FlowType::Browser, &session)
            .await
            .unwrap();
        let before = flow.csrf_token.clone();

        let payload = csrf_payload(&flow, json!({ "something": "else" }));
        let err = orchestrator
            .submit_settings(flow.id, &payload, &session)
            .await
            .unwrap_err();
        let SubmitError::Render { flow, error } = err else {
            panic!("expected re-render, got {err:?}");
        };
        assert!(matches!(error, FlowError::NoStrategyFound));
        assert_eq!(
            flow.ui.messages[0].id,
            crate::text::ERR_VALIDATION_NO_STRATEGY
        );
        // cookie-bound flows rotate the token on error
        assert_ne!(flow.csrf_token, before);

        // the re-rendered flow was persisted with the new token
        let stored = store.get_flow(config.network_id, flow.id).await.unwrap();
        assert_eq!(stored.csrf_token, flow.csrf_token);
    }

    #[tokio::test]
    async fn recovery_code_login_burns_through_the_orchestrator() {
        let (orchestrator, store, config) = setup();
        let mut identity = seeded_identity(&store, &config).await;
        identity.upsert_credential(
            Credential::new(
                CredentialsType::LookupSecret,
                vec![identity.id.to_string()],
                &LookupCredentialConfig {
                    recovery_codes: vec![RecoveryCode {
                        code: "aaaa1111".into(),
                        used_at: None,
                    }],
                },
                0,
            )
            .unwrap(),
        );
        store
            .update_identity(config.network_id, &identity)
            .await
            .unwrap();
        let session = seeded_session(&store, &config, &identity).await;

        let flow = orchestrator
            .create_login_flow(FlowType::Browser, Some(Aal::Aal2), false, Some(&session))
            .await
            .unwrap();
        let payload = csrf_payload(&flow, json!({ lookup::FIELD_SECRET: "aaaa1111" }));
        let success = orchestrator
            .submit_login(flow.id, &payload, Some(&session))
            .await
            .unwrap();
        assert_eq!(success.session.authenticator_assurance_level, Aal::Aal2);

        // replaying the same code on a fresh flow fails as used
        let flow = orchestrator
            .create_login_flow(FlowType::Browser, Some(Aal::Aal2), false, Some(&session))
            .await
            .unwrap();
        let payload = csrf_payload(&flow, json!({ lookup::FIELD_SECRET: "aaaa1111" }));
        let err = orchestrator
            .submit_login(flow.id, &payload, Some(&session))
            .await
            .unwrap_err();
        let SubmitError::Render { error, .. } = err else {
            panic!("expected re-render, got {err:?}");
        };
        let FlowError::Validation { message, .. } = error else {
            panic!("expected validation error");
        };
        assert_eq!(message.id, crate::text::ERR_VALIDATION_LOOKUP_USED);
    }

    #[tokio::test]
    async fn passkey_registration_step_one_renders_and_persists_the_challenge() {
        let (orchestrator, store, config) = setup();
        let flow = orchestrator
            .create_registration_flow(FlowType::Browser)
            .await
            .unwrap();

        let payload = csrf_payload(
            &flow,
            json!({ "method": "passkey", "traits": { "email": "new@example.com" } }),
        );
        let outcome = orchestrator
            .submit_registration(flow.id, &payload)
            .await
            .unwrap();
        let RegistrationSuccess::Render(flow) = outcome else {
            panic!("expected render outcome");
        };
        assert!(flow
            .internal_context
            .contains(crate::strategy::passkey::INTERNAL_KEY_SESSION_DATA));

        // the parked challenge survives in the store for the second step
        let stored = store.get_flow(config.network_id, flow.id).await.unwrap();
        assert!(stored
            .internal_context
            .contains(crate::strategy::passkey::INTERNAL_KEY_SESSION_DATA));
    }

    #[tokio::test]
    async fn cross_tenant_flow_ids_are_not_found() {
        let (orchestrator, store, config) = setup();
        let identity = seeded_identity(&store, &config).await;
        let session = seeded_session(&store, &config, &identity).await;
        let flow = orchestrator
            .create_settings_flow(FlowType::Browser, &session)
            .await
            .unwrap();

        let foreign = store.get_flow(Uuid::new_v4(), flow.id).await;
        assert!(matches!(foreign, Err(FlowError::NotFound)));
    }
}
