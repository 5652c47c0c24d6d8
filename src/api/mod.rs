//! HTTP surface for the self-service flows.
//!
//! One router serves flow init (GET), flow fetch (GET), flow submit (POST)
//! and the bundled WebAuthn trigger script. Handlers stay thin: they parse
//! the transport (JSON or form bodies, session token header), call the
//! orchestrator and map outcomes to redirects or JSON bodies.

mod handlers;
mod openapi;

use std::sync::Arc;

use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info_span};
use uuid::Uuid;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::store::Store;

pub use openapi::ApiDoc;

/// Shared per-process dependencies handlers resolve through an extension.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Self {
        let orchestrator = Orchestrator::new(config.clone(), store.clone());
        Self {
            config,
            store,
            orchestrator,
        }
    }
}

/// Build the router with all self-service routes registered.
#[must_use]
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route(
            "/self-service/login/browser",
            get(handlers::init_login_browser),
        )
        .route("/self-service/login/api", get(handlers::init_login_api))
        .route("/self-service/login/flows", get(handlers::get_login_flow))
        .route("/self-service/login", post(handlers::submit_login))
        .route(
            "/self-service/settings/browser",
            get(handlers::init_settings_browser),
        )
        .route(
            "/self-service/settings/api",
            get(handlers::init_settings_api),
        )
        .route(
            "/self-service/settings/flows",
            get(handlers::get_settings_flow),
        )
        .route("/self-service/settings", post(handlers::submit_settings))
        .route(
            "/self-service/registration/browser",
            get(handlers::init_registration_browser),
        )
        .route(
            "/self-service/registration/api",
            get(handlers::init_registration_api),
        )
        .route(
            "/self-service/registration/flows",
            get(handlers::get_registration_flow),
        )
        .route(
            "/self-service/registration",
            post(handlers::submit_registration),
        )
        .route(crate::script::SCRIPT_PATH, get(handlers::webauthn_script))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Uuid::new_v4().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
