//! Error taxonomy for self-service flows.
//!
//! Strategies surface everything through [`FlowError`]; the orchestrator
//! decides between re-rendering the flow with messages, redirecting, or
//! returning a machine-readable error body. `NotResponsible` is a routing
//! sentinel only and must never reach a client.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::text::Message;
use crate::ui::Group;

/// Where a validation message should be attached.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageTarget {
    /// Flow-level message.
    Flow,
    /// Message on the node `(group, attribute-id)`.
    Node(Group, &'static str),
}

#[derive(Debug, Error)]
pub enum FlowError {
    /// The submission does not carry this strategy's signature field; the
    /// orchestrator tries the next strategy.
    #[error("strategy is not responsible for this submission")]
    NotResponsible,

    /// No enabled strategy claimed the submission.
    #[error("could not find a strategy to handle the request")]
    NoStrategyFound,

    /// Malformed or failing input; re-rendered as node/flow messages with
    /// state `show_form`.
    #[error("validation failed: {}", message.text)]
    Validation {
        message: Message,
        target: MessageTarget,
    },

    /// Anti-CSRF token missing or not matching the one issued at flow init.
    #[error("the anti-csrf token is missing or invalid")]
    CsrfViolation,

    /// The flow passed its deadline and was rejected at load.
    #[error("the flow has expired")]
    FlowExpired,

    /// Settings mutations require a privileged (fresh) session.
    #[error("the session is too old for this operation and must be refreshed")]
    SessionRefreshRequired {
        /// Login URL the browser should be redirected to for re-auth.
        redirect_to: String,
    },

    /// Flow or identity unreachable; cross-tenant reads surface the same
    /// error to avoid tenant leakage.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Server-owned state is broken (parked context missing, config JSON
    /// undecodable, store faults). Carries a stable reason string.
    #[error("internal error: {reason}")]
    Internal {
        reason: &'static str,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl FlowError {
    #[must_use]
    pub fn validation(message: Message, target: MessageTarget) -> Self {
        Self::Validation { message, target }
    }

    #[must_use]
    pub fn validation_flow(message: Message) -> Self {
        Self::Validation {
            message,
            target: MessageTarget::Flow,
        }
    }

    #[must_use]
    pub fn validation_node(group: Group, id: &'static str, message: Message) -> Self {
        Self::Validation {
            message,
            target: MessageTarget::Node(group, id),
        }
    }

    #[must_use]
    pub fn internal(reason: &'static str) -> Self {
        Self::Internal {
            reason,
            source: None,
        }
    }

    #[must_use]
    pub fn internal_with(reason: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            reason,
            source: Some(source.into()),
        }
    }

    /// HTTP status the error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotResponsible | Self::NoStrategyFound => StatusCode::BAD_REQUEST,
            Self::Validation { .. } | Self::FlowExpired => StatusCode::BAD_REQUEST,
            Self::CsrfViolation => StatusCode::FORBIDDEN,
            Self::SessionRefreshRequired { .. } => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The UI message the error renders with, when it has one.
    #[must_use]
    pub fn ui_message(&self) -> Option<Message> {
        match self {
            Self::Validation { message, .. } => Some(message.clone()),
            Self::NoStrategyFound => Some(Message::error_no_strategy()),
            Self::CsrfViolation => Some(Message::error_csrf()),
            Self::FlowExpired => Some(Message::error_flow_expired()),
            Self::SessionRefreshRequired { .. } => Some(Message::error_session_refresh_required()),
            Self::NotResponsible | Self::NotFound | Self::Internal { .. } => None,
        }
    }
}

/// Machine-readable error body for API and SPA clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetail {
    pub id: &'static str,
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_browser_to: Option<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn from_error(err: &FlowError) -> Self {
        let id = match err {
            FlowError::SessionRefreshRequired { .. } => "session_refresh_required",
            FlowError::CsrfViolation => "security_csrf_violation",
            FlowError::FlowExpired => "self_service_flow_expired",
            FlowError::NotFound => "resource_not_found",
            FlowError::NoStrategyFound | FlowError::NotResponsible | FlowError::Validation { .. } => {
                "validation_failed"
            }
            FlowError::Internal { .. } => "internal_server_error",
        };
        let redirect_browser_to = match err {
            FlowError::SessionRefreshRequired { redirect_to } => Some(redirect_to.clone()),
            _ => None,
        };
        Self {
            error: ErrorDetail {
                id,
                code: err.status().as_u16(),
                message: err.to_string(),
                redirect_browser_to,
            },
        }
    }
}
