//! In-memory reference implementation of the store contract.
//!
//! Per-map `RwLock`s give the single-node transactional semantics the
//! contract asks for: every operation takes the lock once, so readers see
//! pre- or post-state and concurrent session appends are serialized.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::FlowError;
use crate::flow::Flow;
use crate::identity::{CredentialsType, Identity};
use crate::session::Session;
use crate::store::Store;
use crate::text::Message;

#[derive(Default)]
pub struct InMemoryStore {
    flows: RwLock<HashMap<Uuid, Flow>>,
    identities: RwLock<HashMap<Uuid, Identity>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenant-unique identifiers per kind: no other identity in the network
    /// may claim any of this identity's `(kind, identifier)` pairs.
    fn check_identifier_uniqueness(
        identities: &HashMap<Uuid, Identity>,
        network_id: Uuid,
        candidate: &Identity,
    ) -> Result<(), FlowError> {
        for other in identities.values() {
            if other.id == candidate.id || other.network_id != network_id {
                continue;
            }
            for (kind, credential) in &candidate.credentials {
                let Some(existing) = other.credential(*kind) else {
                    continue;
                };
                if credential
                    .identifiers
                    .iter()
                    .any(|identifier| existing.identifiers.contains(identifier))
                {
                    return Err(FlowError::validation_flow(Message::error(
                        crate::text::ERR_VALIDATION_GENERIC,
                        "An account with the same credential identifier exists already.",
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_flow(&self, network_id: Uuid, flow: &mut Flow) -> Result<(), FlowError> {
        flow.network_id = network_id;
        let mut flows = self.flows.write().await;
        flows.insert(flow.id, flow.clone());
        Ok(())
    }

    async fn get_flow(&self, network_id: Uuid, id: Uuid) -> Result<Flow, FlowError> {
        let flows = self.flows.read().await;
        flows
            .get(&id)
            .filter(|flow| flow.network_id == network_id)
            .cloned()
            .ok_or(FlowError::NotFound)
    }

    async fn update_flow(&self, network_id: Uuid, flow: &Flow) -> Result<(), FlowError> {
        let mut flows = self.flows.write().await;
        let existing = flows
            .get_mut(&flow.id)
            .filter(|existing| existing.network_id == network_id)
            .ok_or(FlowError::NotFound)?;
        let mut updated = flow.clone();
        // id and network id are read-only
        updated.id = existing.id;
        updated.network_id = existing.network_id;
        *existing = updated;
        Ok(())
    }

    async fn delete_expired_flows(&self, now: DateTime<Utc>) -> Result<usize, FlowError> {
        let mut flows = self.flows.write().await;
        let before = flows.len();
        flows.retain(|_, flow| !flow.is_expired(now));
        Ok(before - flows.len())
    }

    async fn create_identity(
        &self,
        network_id: Uuid,
        identity: &mut Identity,
    ) -> Result<(), FlowError> {
        identity.network_id = network_id;
        let mut identities = self.identities.write().await;
        Self::check_identifier_uniqueness(&identities, network_id, identity)?;
        identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn get_identity_confidential(
        &self,
        network_id: Uuid,
        id: Uuid,
    ) -> Result<Identity, FlowError> {
        let identities = self.identities.read().await;
        identities
            .get(&id)
            .filter(|identity| identity.network_id == network_id)
            .cloned()
            .ok_or(FlowError::NotFound)
    }

    async fn find_by_credentials_identifier(
        &self,
        network_id: Uuid,
        kind: CredentialsType,
        identifier: &str,
    ) -> Result<Identity, FlowError> {
        let identities = self.identities.read().await;
        identities
            .values()
            .find(|identity| {
                identity.network_id == network_id
                    && identity
                        .credential(kind)
                        .is_some_and(|credential| {
                            credential.identifiers.iter().any(|id| id == identifier)
                        })
            })
            .cloned()
            .ok_or(FlowError::NotFound)
    }

    async fn update_identity(
        &self,
        network_id: Uuid,
        identity: &Identity,
    ) -> Result<(), FlowError> {
        let mut identities = self.identities.write().await;
        if !identities
            .get(&identity.id)
            .is_some_and(|existing| existing.network_id == network_id)
        {
            return Err(FlowError::NotFound);
        }
        Self::check_identifier_uniqueness(&identities, network_id, identity)?;
        let mut updated = identity.clone();
        updated.network_id = network_id;
        identities.insert(updated.id, updated);
        Ok(())
    }

    async fn create_session(&self, network_id: Uuid, session: &Session) -> Result<(), FlowError> {
        let mut sessions = self.sessions.write().await;
        let mut session = session.clone();
        session.network_id = network_id;
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, network_id: Uuid, id: Uuid) -> Result<Session, FlowError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .filter(|session| session.network_id == network_id)
            .cloned()
            .ok_or(FlowError::NotFound)
    }

    async fn get_session_by_token(
        &self,
        network_id: Uuid,
        token: &str,
    ) -> Result<Session, FlowError> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|session| session.network_id == network_id && session.token == token)
            .cloned()
            .ok_or(FlowError::NotFound)
    }

    async fn update_session(&self, network_id: Uuid, session: &Session) -> Result<(), FlowError> {
        let mut sessions = self.sessions.write().await;
        let existing = sessions
            .get_mut(&session.id)
            .filter(|existing| existing.network_id == network_id)
            .ok_or(FlowError::NotFound)?;
        let mut updated = session.clone();
        updated.id = existing.id;
        updated.network_id = existing.network_id;
        *existing = updated;
        Ok(())
    }
}
