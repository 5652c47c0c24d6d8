//! # Ensaluti (Self-service Authentication Flows)
//!
//! `ensaluti` implements pluggable second-factor and passwordless
//! authentication as persisted self-service flows: TOTP authenticator apps,
//! single-use backup recovery codes, and WebAuthn passkeys.
//!
//! ## Flows
//!
//! Every conversation with a client is a durable **flow** (login, settings,
//! registration) carrying a declarative UI node tree, an anti-CSRF token and
//! a server-only internal context where strategies park ceremony state
//! between round-trips. Flows are initialized over GET, submitted over POST,
//! and re-rendered with typed messages on validation failure.
//!
//! ## Strategies
//!
//! Each credential kind is a [`strategy::Strategy`]: a stateless singleton
//! that claims submissions carrying its wire fields and answers
//! `NotResponsible` otherwise. The orchestrator walks strategies in config
//! order; the first claim wins.
//!
//! ## Tenancy & assurance
//!
//! - Every store operation is scoped by a network (tenant) id; foreign ids
//!   surface as `404` to prevent cross-tenant enumeration.
//! - Sessions track completed methods and derive their authenticator
//!   assurance level (AAL) as the maximum over them; TOTP and recovery codes
//!   complete at AAL2, passkeys at AAL1.
//! - Settings mutations require a privileged (recently authenticated)
//!   session.

pub mod api;
pub mod config;
pub mod csrf;
pub mod error;
pub mod flow;
pub mod identity;
pub mod orchestrator;
pub mod script;
pub mod session;
pub mod store;
pub mod strategy;
pub mod text;
pub mod ui;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
