//! Strategy registry and dispatch.
//!
//! A strategy owns one credential kind and opts into the flows it supports
//! by overriding the matching hooks; the defaults answer `NotResponsible`
//! so the orchestrator can try the next strategy in config order. The
//! first strategy to claim a submission wins.

pub mod lookup;
pub mod passkey;
pub mod totp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::FlowError;
use crate::flow::Flow;
use crate::identity::{Credential, CredentialsType, Identity};
use crate::session::{Aal, Session};
use crate::store::Store;

pub use lookup::LookupStrategy;
pub use passkey::PasskeyStrategy;
pub use totp::TotpStrategy;

/// Successful login submission: the proven identity plus the session method
/// the orchestrator appends.
#[derive(Debug)]
pub struct LoginOutcome {
    pub identity: Identity,
    pub method: CredentialsType,
    pub aal: Aal,
}

/// Post-settings action for SPA clients.
#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ContinueWith {
    RedirectBrowserTo { redirect_browser_to: String },
}

/// Outcome of a settings submission.
#[derive(Debug)]
pub enum SettingsOutcome {
    /// The flow UI was mutated and must be re-rendered; nothing persisted
    /// beyond the flow itself (e.g. revealing codes, starting a ceremony).
    Render,
    /// The identity changed and must be committed.
    Saved {
        identity: Identity,
        /// Session method to append after the identity commit.
        method: Option<(CredentialsType, Aal)>,
        continue_with: Vec<ContinueWith>,
    },
}

/// Outcome of a registration submission.
#[derive(Debug)]
pub enum RegistrationOutcome {
    /// Step one: a ceremony challenge was emitted, re-render the flow.
    Render,
    /// Step two: a new identity is ready to be committed.
    Created {
        identity: Identity,
        method: CredentialsType,
        aal: Aal,
    },
}

/// A pluggable credential-kind implementation. Stateless process-wide
/// singleton holding only dependency references.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn id(&self) -> CredentialsType;

    /// AAL this strategy completes at.
    fn completed_aal(&self) -> Aal;

    /// Active first-factor credentials in the given credentials map.
    fn count_active_first_factor(
        &self,
        _credentials: &HashMap<CredentialsType, Credential>,
    ) -> usize {
        0
    }

    /// Active second-factor credentials in the given credentials map.
    fn count_active_multi_factor(
        &self,
        _credentials: &HashMap<CredentialsType, Credential>,
    ) -> usize {
        0
    }

    /// Contribute nodes to a login flow. No-op unless the strategy applies
    /// to the identity and requested AAL.
    async fn populate_login(
        &self,
        _flow: &mut Flow,
        _identity: Option<&Identity>,
    ) -> Result<(), FlowError> {
        Ok(())
    }

    /// Handle a login submission, or answer `NotResponsible`.
    async fn login(
        &self,
        _flow: &mut Flow,
        _session: Option<&Session>,
        _payload: &Value,
    ) -> Result<LoginOutcome, FlowError> {
        Err(FlowError::NotResponsible)
    }

    /// Contribute nodes to a settings flow.
    async fn populate_settings(
        &self,
        _flow: &mut Flow,
        _identity: &Identity,
    ) -> Result<(), FlowError> {
        Ok(())
    }

    /// Handle a settings submission, or answer `NotResponsible`.
    async fn settings(
        &self,
        _flow: &mut Flow,
        _identity: &Identity,
        _payload: &Value,
    ) -> Result<SettingsOutcome, FlowError> {
        Err(FlowError::NotResponsible)
    }

    /// Contribute nodes to a registration flow.
    async fn populate_registration(&self, _flow: &mut Flow) -> Result<(), FlowError> {
        Ok(())
    }

    /// Handle a registration submission, or answer `NotResponsible`.
    async fn register(
        &self,
        _flow: &mut Flow,
        _payload: &Value,
    ) -> Result<RegistrationOutcome, FlowError> {
        Err(FlowError::NotResponsible)
    }
}

/// Maps credential kinds to strategies, in config order.
pub struct Registry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl Registry {
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Self {
        let mut strategies: Vec<Arc<dyn Strategy>> = Vec::new();
        for kind in &config.enabled_strategies {
            match kind {
                CredentialsType::Totp => {
                    strategies.push(Arc::new(TotpStrategy::new(config.clone(), store.clone())));
                }
                CredentialsType::LookupSecret => {
                    strategies.push(Arc::new(LookupStrategy::new(store.clone())));
                }
                CredentialsType::Passkey => {
                    strategies.push(Arc::new(PasskeyStrategy::new(
                        config.clone(),
                        store.clone(),
                    )));
                }
                CredentialsType::Password => {
                    // password is an external collaborator, not part of this
                    // subsystem's registry
                }
            }
        }
        Self { strategies }
    }

    pub fn strategies(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> {
        self.strategies.iter()
    }

    #[must_use]
    pub fn find(&self, kind: CredentialsType) -> Option<&Arc<dyn Strategy>> {
        self.strategies.iter().find(|strategy| strategy.id() == kind)
    }

    /// First-factor credentials across all strategies, plus a stored
    /// password credential which always counts as a first factor.
    #[must_use]
    pub fn count_active_first_factor(
        &self,
        credentials: &HashMap<CredentialsType, Credential>,
    ) -> usize {
        let password = credentials
            .get(&CredentialsType::Password)
            .map_or(0, |credential| usize::from(!credential.identifiers.is_empty()));
        password
            + self
                .strategies
                .iter()
                .map(|strategy| strategy.count_active_first_factor(credentials))
                .sum::<usize>()
    }

    #[must_use]
    pub fn count_active_multi_factor(
        &self,
        credentials: &HashMap<CredentialsType, Credential>,
    ) -> usize {
        self.strategies
            .iter()
            .map(|strategy| strategy.count_active_multi_factor(credentials))
            .sum()
    }
}

/// Non-empty string field of a submission payload.
#[must_use]
pub fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Truthy field of a submission payload; form-encoded bodies arrive as
/// strings, so `"true"`, `"on"` and `"1"` count.
#[must_use]
pub fn payload_bool(payload: &Value, key: &str) -> bool {
    match payload.get(key) {
        Some(Value::Bool(value)) => *value,
        Some(Value::String(value)) => matches!(value.as_str(), "true" | "on" | "1"),
        _ => false,
    }
}

/// The `method` field of a submission payload.
#[must_use]
pub fn payload_method<'a>(payload: &'a Value) -> Option<&'a str> {
    payload_str(payload, "method")
}
