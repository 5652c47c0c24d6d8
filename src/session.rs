//! Sessions and authenticator assurance levels.
//!
//! A session records every completed authentication method; its effective
//! AAL is the maximum over those methods. TOTP and lookup secrets complete
//! at AAL2, passkeys at AAL1 (passwordless first factor).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::identity::CredentialsType;

/// Authenticator assurance level. Ordered: AAL2 > AAL1.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Aal {
    Aal1,
    Aal2,
}

impl Aal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aal1 => "aal1",
            Self::Aal2 => "aal2",
        }
    }
}

/// One completed authentication method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticationMethod {
    #[schema(value_type = String)]
    pub method: CredentialsType,
    pub aal: Aal,
    pub completed_at: DateTime<Utc>,
}

/// Session envelope. Cookie issuance and token transport belong to the
/// session manager; this subsystem only appends methods and reads assurance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    #[serde(skip)]
    pub network_id: Uuid,
    pub identity_id: Uuid,
    /// Opaque bearer token used by API/SPA clients.
    #[serde(skip)]
    pub token: String,
    pub issued_at: DateTime<Utc>,
    /// Time of the most recent authentication, not of session creation.
    pub authenticated_at: DateTime<Utc>,
    pub authenticator_assurance_level: Aal,
    pub authentication_methods: Vec<AuthenticationMethod>,
}

impl Session {
    #[must_use]
    pub fn new(network_id: Uuid, identity_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            network_id,
            identity_id,
            token: crate::csrf::new_token(),
            issued_at: now,
            authenticated_at: now,
            authenticator_assurance_level: Aal::Aal1,
            authentication_methods: Vec::new(),
        }
    }

    /// Append a completed method and recompute the effective AAL.
    pub fn complete_with(&mut self, method: CredentialsType, aal: Aal) {
        let now = Utc::now();
        self.authentication_methods.push(AuthenticationMethod {
            method,
            aal,
            completed_at: now,
        });
        self.authenticated_at = now;
        self.authenticator_assurance_level = self.effective_aal();
    }

    /// Max AAL over all completed methods; AAL1 when none completed.
    #[must_use]
    pub fn effective_aal(&self) -> Aal {
        self.authentication_methods
            .iter()
            .map(|method| method.aal)
            .max()
            .unwrap_or(Aal::Aal1)
    }

    /// Whether the last authentication is fresh enough for privileged
    /// (settings) mutations.
    #[must_use]
    pub fn is_privileged(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.authenticated_at + max_age > now
    }
}
