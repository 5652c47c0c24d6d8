//! Persistence contract consumed by the flows.
//!
//! Every operation is tenant-scoped by a network id and transactional from
//! the caller's point of view: readers observe pre- or post-state, never a
//! split. Cross-tenant reads and writes surface as `NotFound` so tenants
//! cannot be enumerated. The crate ships [`memory::InMemoryStore`] as the
//! reference implementation; production deployments bring their own.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::FlowError;
use crate::flow::Flow;
use crate::identity::{CredentialsType, Identity};
use crate::session::Session;

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new flow, stamping the caller's tenant onto it. Covers
    /// login, settings and registration flows; the kind is recorded on the
    /// flow itself.
    async fn create_flow(&self, network_id: Uuid, flow: &mut Flow) -> Result<(), FlowError>;

    /// Load a flow. Returns `NotFound` for other tenants' flows.
    async fn get_flow(&self, network_id: Uuid, id: Uuid) -> Result<Flow, FlowError>;

    /// Replace a flow's mutable state. Id and network id are read-only;
    /// cross-tenant updates fail with `NotFound`.
    async fn update_flow(&self, network_id: Uuid, flow: &Flow) -> Result<(), FlowError>;

    /// Garbage-collect flows whose deadline passed. Returns how many were
    /// removed.
    async fn delete_expired_flows(&self, now: DateTime<Utc>) -> Result<usize, FlowError>;

    /// Persist a new identity, enforcing tenant-unique credential
    /// identifiers per kind.
    async fn create_identity(&self, network_id: Uuid, identity: &mut Identity)
        -> Result<(), FlowError>;

    /// Load an identity with all credential configs hydrated.
    async fn get_identity_confidential(
        &self,
        network_id: Uuid,
        id: Uuid,
    ) -> Result<Identity, FlowError>;

    /// Single-row lookup by `(kind, identifier)`.
    async fn find_by_credentials_identifier(
        &self,
        network_id: Uuid,
        kind: CredentialsType,
        identifier: &str,
    ) -> Result<Identity, FlowError>;

    /// Atomic wholesale replace of the identity, credentials map included.
    async fn update_identity(&self, network_id: Uuid, identity: &Identity)
        -> Result<(), FlowError>;

    async fn create_session(&self, network_id: Uuid, session: &Session) -> Result<(), FlowError>;

    async fn get_session(&self, network_id: Uuid, id: Uuid) -> Result<Session, FlowError>;

    /// Lookup by the opaque bearer token API/SPA clients present.
    async fn get_session_by_token(
        &self,
        network_id: Uuid,
        token: &str,
    ) -> Result<Session, FlowError>;

    /// Replace session state; concurrent appends to one session are
    /// serialized by the implementation.
    async fn update_session(&self, network_id: Uuid, session: &Session) -> Result<(), FlowError>;
}
