//! Subsystem configuration.
//!
//! One immutable snapshot per request (`Arc<Config>`). Values come from the
//! environment with safe defaults; every builder method exists so tests can
//! construct exact configurations without touching the environment.

use anyhow::{Context, Result};
use chrono::Duration;
use std::time::Duration as StdDuration;
use url::Url;
use uuid::Uuid;

use crate::identity::CredentialsType;

const ENV_PUBLIC_URL: &str = "ENSALUTI_PUBLIC_URL";
const ENV_TOTP_ISSUER: &str = "ENSALUTI_TOTP_ISSUER";
const ENV_PASSKEY_RP_ID: &str = "ENSALUTI_PASSKEY_RP_ID";
const ENV_PASSKEY_RP_NAME: &str = "ENSALUTI_PASSKEY_RP_NAME";
const ENV_PASSKEY_ORIGINS: &str = "ENSALUTI_PASSKEY_ORIGINS";
const ENV_PASSKEY_USER_VERIFICATION: &str = "ENSALUTI_PASSKEY_USER_VERIFICATION";
const ENV_PRIVILEGED_MAX_AGE_SECONDS: &str = "ENSALUTI_PRIVILEGED_MAX_AGE_SECONDS";
const ENV_FLOW_LIFESPAN_SECONDS: &str = "ENSALUTI_FLOW_LIFESPAN_SECONDS";
const ENV_DISABLE_API_FLOW_ENFORCEMENT: &str = "ENSALUTI_DISABLE_API_FLOW_ENFORCEMENT";

const DEFAULT_PUBLIC_URL: &str = "http://localhost:4433/";
const DEFAULT_FLOW_LIFESPAN_SECONDS: i64 = 60 * 60;
const DEFAULT_PRIVILEGED_MAX_AGE_SECONDS: i64 = 15 * 60;

/// Expected password-hasher timing, used to mask unknown-user lookups on
/// passkey login.
#[derive(Clone, Copy, Debug)]
pub struct HasherTiming {
    pub expected_duration: StdDuration,
    pub expected_deviation: StdDuration,
}

impl Default for HasherTiming {
    fn default() -> Self {
        Self {
            expected_duration: StdDuration::from_millis(100),
            expected_deviation: StdDuration::from_millis(50),
        }
    }
}

/// User-verification requirement sent to authenticators in passkey
/// ceremonies.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PasskeyUserVerification {
    Discouraged,
    #[default]
    Preferred,
    Required,
}

impl PasskeyUserVerification {
    /// WebAuthn wire value (`userVerification` in client options).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discouraged => "discouraged",
            Self::Preferred => "preferred",
            Self::Required => "required",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "discouraged" => Ok(Self::Discouraged),
            "preferred" => Ok(Self::Preferred),
            "required" => Ok(Self::Required),
            other => anyhow::bail!("invalid passkey user verification policy: {other}"),
        }
    }
}

/// Immutable per-request configuration snapshot.
#[derive(Clone, Debug)]
pub struct Config {
    pub network_id: Uuid,
    pub public_url: Url,
    pub login_ui_url: Url,
    pub settings_ui_url: Url,
    pub registration_ui_url: Url,
    pub default_return_url: Url,
    pub totp_issuer: Option<String>,
    pub passkey_rp_id: Option<String>,
    pub passkey_rp_display_name: String,
    pub passkey_origins: Vec<Url>,
    pub passkey_user_verification: PasskeyUserVerification,
    pub privileged_session_max_age: Duration,
    pub flow_lifespan: Duration,
    pub disable_api_flow_enforcement: bool,
    pub hasher_timing: HasherTiming,
    /// Dispatch order; the first strategy to claim a submission wins.
    pub enabled_strategies: Vec<CredentialsType>,
}

impl Config {
    /// Configuration with defaults, rooted at `public_url`.
    ///
    /// # Errors
    /// Returns an error when derived URLs cannot be built.
    pub fn new(public_url: Url) -> Result<Self> {
        let login_ui_url = public_url.join("ui/login").context("invalid login UI URL")?;
        let settings_ui_url = public_url
            .join("ui/settings")
            .context("invalid settings UI URL")?;
        let registration_ui_url = public_url
            .join("ui/registration")
            .context("invalid registration UI URL")?;
        let default_return_url = public_url.clone();
        Ok(Self {
            network_id: Uuid::new_v4(),
            public_url,
            login_ui_url,
            settings_ui_url,
            registration_ui_url,
            default_return_url,
            totp_issuer: None,
            passkey_rp_id: None,
            passkey_rp_display_name: "Ensaluti".to_string(),
            passkey_origins: Vec::new(),
            passkey_user_verification: PasskeyUserVerification::default(),
            privileged_session_max_age: Duration::seconds(DEFAULT_PRIVILEGED_MAX_AGE_SECONDS),
            flow_lifespan: Duration::seconds(DEFAULT_FLOW_LIFESPAN_SECONDS),
            disable_api_flow_enforcement: false,
            hasher_timing: HasherTiming::default(),
            enabled_strategies: vec![
                CredentialsType::Totp,
                CredentialsType::LookupSecret,
                CredentialsType::Passkey,
            ],
        })
    }

    /// Build configuration from `ENSALUTI_*` environment variables with safe
    /// defaults.
    ///
    /// # Errors
    /// Returns an error when a configured URL or origin cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let public_url = env_trimmed(ENV_PUBLIC_URL)
            .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string());
        let public_url = Url::parse(&public_url).context("invalid public URL")?;
        let mut config = Self::new(public_url)?;

        config.totp_issuer = env_trimmed(ENV_TOTP_ISSUER);
        config.passkey_rp_id = env_trimmed(ENV_PASSKEY_RP_ID);
        if let Some(name) = env_trimmed(ENV_PASSKEY_RP_NAME) {
            config.passkey_rp_display_name = name;
        }
        if let Some(origins) = env_trimmed(ENV_PASSKEY_ORIGINS) {
            config.passkey_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(|origin| Url::parse(origin).context("invalid passkey origin"))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(policy) = env_trimmed(ENV_PASSKEY_USER_VERIFICATION) {
            config.passkey_user_verification = PasskeyUserVerification::parse(&policy)?;
        }
        if let Some(seconds) = env_seconds(ENV_PRIVILEGED_MAX_AGE_SECONDS) {
            config.privileged_session_max_age = Duration::seconds(seconds);
        }
        if let Some(seconds) = env_seconds(ENV_FLOW_LIFESPAN_SECONDS) {
            config.flow_lifespan = Duration::seconds(seconds);
        }
        config.disable_api_flow_enforcement = env_trimmed(ENV_DISABLE_API_FLOW_ENFORCEMENT)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(config)
    }

    /// TOTP issuer: explicit configuration or the public URL's host.
    #[must_use]
    pub fn totp_issuer(&self) -> String {
        self.totp_issuer.clone().unwrap_or_else(|| {
            self.public_url
                .host_str()
                .unwrap_or("localhost")
                .to_string()
        })
    }

    /// Absolute action URL for a flow submit endpoint.
    #[must_use]
    pub fn flow_action_url(&self, flow_name: crate::flow::FlowName, flow_id: Uuid) -> String {
        let mut url = self.public_url.clone();
        url.set_path(&format!("self-service/{}", flow_name.as_str()));
        url.set_query(Some(&format!("flow={flow_id}")));
        url.to_string()
    }

    /// Login URL used for privileged-session re-authentication redirects.
    #[must_use]
    pub fn reauth_url(&self) -> String {
        let mut url = self.login_ui_url.clone();
        url.set_query(Some("refresh=true"));
        url.to_string()
    }
}

fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_seconds(name: &str) -> Option<i64> {
    env_trimmed(name)?.parse().ok().filter(|value| *value > 0)
}
