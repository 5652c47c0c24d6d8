//! Identity records and per-strategy credential configs.
//!
//! An identity is an opaque subject scoped to one network (tenant). Each
//! credential kind appears at most once per identity; its config is an
//! opaque JSON blob interpreted only by the owning strategy, and its
//! identifiers are the tenant-unique lookup keys for that kind.

pub mod schema;

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Credential kinds known to the subsystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsType {
    Password,
    Totp,
    LookupSecret,
    Passkey,
}

impl CredentialsType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Totp => "totp",
            Self::LookupSecret => "lookup_secret",
            Self::Passkey => "passkey",
        }
    }
}

/// A stored credential record: kind tag, tenant-unique identifiers, an
/// opaque config blob and a config schema version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    pub credentials_type: CredentialsType,
    pub identifiers: Vec<String>,
    pub config: Value,
    pub version: u32,
}

impl Credential {
    /// Build a record from a typed config.
    ///
    /// # Errors
    /// Returns an error when the config cannot be serialized.
    pub fn new<T: Serialize>(
        credentials_type: CredentialsType,
        identifiers: Vec<String>,
        config: &T,
        version: u32,
    ) -> Result<Self> {
        Ok(Self {
            credentials_type,
            identifiers,
            config: serde_json::to_value(config).context("failed to serialize credential config")?,
            version,
        })
    }

    /// Decode the config blob into the owning strategy's type.
    ///
    /// # Errors
    /// Returns an error when the stored config does not decode; this is a
    /// server-owned-data fault, not user input.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.config.clone()).with_context(|| {
            format!(
                "failed to decode {} credential config",
                self.credentials_type.as_str()
            )
        })
    }
}

/// TOTP credential config: the provisioning URL carries issuer, account
/// name and the base32 secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TotpCredentialConfig {
    pub totp_url: String,
}

/// One single-use recovery code. `used_at` only ever transitions from
/// absent to set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

/// Lookup-secret credential config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupCredentialConfig {
    pub recovery_codes: Vec<RecoveryCode>,
}

/// One WebAuthn credential attached to an identity. The `public_key` field
/// is the authenticator credential as `webauthn-rs` serializes it (COSE key,
/// sign count and transports included); it is decoded back into a typed
/// passkey only when verifying an assertion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PasskeyStoredCredential {
    /// Hex-encoded raw credential id.
    pub id: String,
    pub public_key: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub added_at: DateTime<Utc>,
    pub is_passwordless: bool,
}

/// Passkey credential config: one user handle, many credentials.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PasskeyCredentialConfig {
    pub user_handle: Uuid,
    pub credentials: Vec<PasskeyStoredCredential>,
}

/// An opaque subject with traits and per-kind credentials.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    #[serde(skip)]
    pub network_id: Uuid,
    pub schema_id: String,
    pub traits: Value,
    /// At most one record per kind; confidential, never rendered to clients.
    #[serde(skip)]
    pub credentials: HashMap<CredentialsType, Credential>,
}

impl Identity {
    #[must_use]
    pub fn new(network_id: Uuid, traits: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            network_id,
            schema_id: "default".to_string(),
            traits,
            credentials: HashMap::new(),
        }
    }

    #[must_use]
    pub fn credential(&self, kind: CredentialsType) -> Option<&Credential> {
        self.credentials.get(&kind)
    }

    /// Create or replace the record for the credential's kind wholesale.
    pub fn upsert_credential(&mut self, credential: Credential) {
        self.credentials
            .insert(credential.credentials_type, credential);
    }

    pub fn remove_credential(&mut self, kind: CredentialsType) {
        self.credentials.remove(&kind);
    }

    /// Decode the config for `kind` when the identity owns it.
    ///
    /// # Errors
    /// Returns an error when the stored config blob does not decode.
    pub fn credential_config<T: DeserializeOwned>(
        &self,
        kind: CredentialsType,
    ) -> Result<Option<T>> {
        self.credential(kind)
            .map(Credential::config_as)
            .transpose()
    }
}
