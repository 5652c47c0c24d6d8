//! Request handlers for the self-service routes.
//!
//! Transport conventions:
//! - `/browser` init routes answer with a 303 redirect to the rendering UI,
//!   or with the flow JSON when the client sends `Accept: application/json`
//!   (single-page apps share the browser routes).
//! - `/api` init routes always answer with the flow JSON.
//! - Submit routes accept `application/json` and form-encoded bodies; form
//!   fields with dotted names (`traits.email`) are nested before dispatch.
//! - Sessions are resolved from the `X-Session-Token` header; cookie
//!   transport belongs to the embedding service.

use std::sync::Arc;

use axum::{
    Extension,
    body::Bytes,
    extract::Query,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{ErrorBody, ErrorDetail, FlowError};
use crate::flow::{Flow, FlowName, FlowType};
use crate::orchestrator::{RegistrationSuccess, SettingsSuccess, SubmitError};
use crate::script;
use crate::session::{Aal, Session};

/// Header carrying the opaque session token for API and SPA clients.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginInitQuery {
    /// Requested assurance level; `aal2` turns the flow into a second-factor
    /// step for the current session.
    pub aal: Option<Aal>,
    /// Force re-authentication even with an active session.
    pub refresh: Option<bool>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FlowQuery {
    /// Flow id issued at init.
    pub id: Uuid,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SubmitQuery {
    /// Flow id issued at init.
    pub flow: Uuid,
}

/// SPA clients share the browser routes but ask for JSON.
fn browser_or_spa(headers: &HeaderMap) -> FlowType {
    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));
    if accepts_json {
        FlowType::Spa
    } else {
        FlowType::Browser
    }
}

async fn session_from_headers(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    let token = headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|token| !token.is_empty())?;
    state
        .store
        .get_session_by_token(state.config.network_id, token)
        .await
        .ok()
}

/// Nest a dotted form field (`traits.email`) into the payload object.
fn insert_nested(target: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        Some((head, rest)) => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = entry {
                insert_nested(inner, rest, value);
            }
        }
        None => {
            target.insert(key.to_string(), value);
        }
    }
}

/// Decode a submission body: JSON verbatim, form bodies as nested objects.
fn parse_payload(headers: &HeaderMap, body: &Bytes) -> Result<Value, Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("application/json") {
        return serde_json::from_slice(body).map_err(|err| {
            debug!(error = %err, "submission body is not valid JSON");
            bad_request("the request body is not valid JSON")
        });
    }

    let mut payload = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        insert_nested(&mut payload, &key, Value::String(value.into_owned()));
    }
    Ok(Value::Object(payload))
}

fn bad_request(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            id: "bad_request",
            code: StatusCode::BAD_REQUEST.as_u16(),
            message: message.to_string(),
            redirect_browser_to: None,
        },
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn session_required() -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            id: "session_inactive",
            code: StatusCode::UNAUTHORIZED.as_u16(),
            message: "No active session was found in the request.".to_string(),
            redirect_browser_to: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

fn flow_error_response(err: &FlowError) -> Response {
    (err.status(), Json(ErrorBody::from_error(err))).into_response()
}

/// UI page that renders the given flow.
fn ui_url(state: &AppState, name: FlowName, flow_id: Uuid) -> String {
    let base = match name {
        FlowName::Login => &state.config.login_ui_url,
        FlowName::Settings => &state.config.settings_ui_url,
        FlowName::Registration => &state.config.registration_ui_url,
    };
    let mut url = base.clone();
    url.set_query(Some(&format!("flow={flow_id}")));
    url.to_string()
}

fn init_response(state: &AppState, flow: &Flow) -> Response {
    match flow.flow_type {
        FlowType::Browser => {
            Redirect::to(&ui_url(state, flow.flow_name, flow.id)).into_response()
        }
        FlowType::Spa | FlowType::Api => Json(flow).into_response(),
    }
}

fn submit_error_response(state: &AppState, err: SubmitError) -> Response {
    match err {
        SubmitError::Render { flow, error } => match flow.flow_type {
            FlowType::Browser => {
                Redirect::to(&ui_url(state, flow.flow_name, flow.id)).into_response()
            }
            FlowType::Spa | FlowType::Api => (error.status(), Json(&*flow)).into_response(),
        },
        SubmitError::Error(error) => flow_error_response(&error),
        SubmitError::RedirectBrowserTo(redirect_to) => {
            Redirect::to(&redirect_to).into_response()
        }
    }
}

// Login.

#[utoipa::path(
    get,
    path = "/self-service/login/browser",
    params(LoginInitQuery),
    responses(
        (status = 303, description = "Redirect to the login UI with the flow id"),
        (status = 200, description = "Login flow (SPA clients)", body = Object),
        (status = 400, description = "Invalid request", body = ErrorBody)
    ),
    tag = "login",
)]
/// Initialize a login flow for browser and SPA clients.
pub async fn init_login_browser(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<LoginInitQuery>,
    headers: HeaderMap,
) -> Response {
    let flow_type = browser_or_spa(&headers);
    init_login(&state, flow_type, query, &headers).await
}

#[utoipa::path(
    get,
    path = "/self-service/login/api",
    params(LoginInitQuery),
    responses(
        (status = 200, description = "Login flow", body = Object),
        (status = 400, description = "Invalid request", body = ErrorBody)
    ),
    tag = "login",
)]
/// Initialize a login flow for native API clients.
pub async fn init_login_api(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<LoginInitQuery>,
    headers: HeaderMap,
) -> Response {
    init_login(&state, FlowType::Api, query, &headers).await
}

async fn init_login(
    state: &AppState,
    flow_type: FlowType,
    query: LoginInitQuery,
    headers: &HeaderMap,
) -> Response {
    let session = session_from_headers(state, headers).await;
    match state
        .orchestrator
        .create_login_flow(
            flow_type,
            query.aal,
            query.refresh.unwrap_or(false),
            session.as_ref(),
        )
        .await
    {
        Ok(flow) => init_response(state, &flow),
        Err(err) => flow_error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/self-service/login/flows",
    params(FlowQuery),
    responses(
        (status = 200, description = "Login flow", body = Object),
        (status = 404, description = "Unknown flow", body = ErrorBody)
    ),
    tag = "login",
)]
/// Fetch a previously initialized login flow.
pub async fn get_login_flow(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Response {
    get_flow(&state, FlowName::Login, query.id).await
}

async fn get_flow(state: &AppState, name: FlowName, id: Uuid) -> Response {
    match state.store.get_flow(state.config.network_id, id).await {
        Ok(flow) if flow.flow_name == name => Json(flow).into_response(),
        Ok(_) => flow_error_response(&FlowError::NotFound),
        Err(err) => flow_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/self-service/login",
    params(SubmitQuery),
    request_body = String,
    responses(
        (status = 200, description = "Login completed; session in the body"),
        (status = 303, description = "Redirect after a completed browser login"),
        (status = 400, description = "Validation failed; flow re-rendered", body = Object),
        (status = 403, description = "Anti-CSRF failure", body = ErrorBody)
    ),
    tag = "login",
)]
/// Submit a login flow.
pub async fn submit_login(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match parse_payload(&headers, &body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let session = session_from_headers(&state, &headers).await;

    match state
        .orchestrator
        .submit_login(query.flow, &payload, session.as_ref())
        .await
    {
        Ok(success) => match success.flow.flow_type {
            FlowType::Browser => {
                Redirect::to(state.config.default_return_url.as_str()).into_response()
            }
            FlowType::Spa | FlowType::Api => {
                let mut body = json!({ "session": success.session });
                if success.session_created {
                    body["session_token"] = json!(success.session.token);
                }
                Json(body).into_response()
            }
        },
        Err(err) => submit_error_response(&state, err),
    }
}

// Settings.

#[utoipa::path(
    get,
    path = "/self-service/settings/browser",
    responses(
        (status = 303, description = "Redirect to the settings UI with the flow id"),
        (status = 200, description = "Settings flow (SPA clients)", body = Object),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "settings",
)]
/// Initialize a settings flow for browser and SPA clients.
pub async fn init_settings_browser(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let flow_type = browser_or_spa(&headers);
    init_settings(&state, flow_type, &headers).await
}

#[utoipa::path(
    get,
    path = "/self-service/settings/api",
    responses(
        (status = 200, description = "Settings flow", body = Object),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "settings",
)]
/// Initialize a settings flow for native API clients.
pub async fn init_settings_api(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    init_settings(&state, FlowType::Api, &headers).await
}

async fn init_settings(state: &AppState, flow_type: FlowType, headers: &HeaderMap) -> Response {
    let Some(session) = session_from_headers(state, headers).await else {
        return session_required();
    };
    match state
        .orchestrator
        .create_settings_flow(flow_type, &session)
        .await
    {
        Ok(flow) => init_response(state, &flow),
        Err(err) => flow_error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/self-service/settings/flows",
    params(FlowQuery),
    responses(
        (status = 200, description = "Settings flow", body = Object),
        (status = 404, description = "Unknown flow", body = ErrorBody)
    ),
    tag = "settings",
)]
/// Fetch a previously initialized settings flow.
pub async fn get_settings_flow(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Response {
    get_flow(&state, FlowName::Settings, query.id).await
}

#[utoipa::path(
    post,
    path = "/self-service/settings",
    params(SubmitQuery),
    request_body = String,
    responses(
        (status = 200, description = "Settings flow updated or completed", body = Object),
        (status = 303, description = "Redirect after a completed browser submission"),
        (status = 400, description = "Validation failed; flow re-rendered", body = Object),
        (status = 401, description = "No active session", body = ErrorBody),
        (status = 403, description = "Privileged session required", body = ErrorBody)
    ),
    tag = "settings",
)]
/// Submit a settings flow.
pub async fn submit_settings(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match parse_payload(&headers, &body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let Some(session) = session_from_headers(&state, &headers).await else {
        return session_required();
    };

    match state
        .orchestrator
        .submit_settings(query.flow, &payload, &session)
        .await
    {
        Ok(SettingsSuccess::Render(flow)) => match flow.flow_type {
            FlowType::Browser => {
                Redirect::to(&ui_url(&state, FlowName::Settings, flow.id)).into_response()
            }
            FlowType::Spa | FlowType::Api => Json(&*flow).into_response(),
        },
        Ok(SettingsSuccess::Saved {
            flow,
            continue_with,
        }) => match flow.flow_type {
            FlowType::Browser => {
                Redirect::to(&ui_url(&state, FlowName::Settings, flow.id)).into_response()
            }
            FlowType::Spa | FlowType::Api => {
                let mut body = match serde_json::to_value(&*flow) {
                    Ok(body) => body,
                    Err(err) => {
                        return flow_error_response(&FlowError::internal_with(
                            "flow encode failed",
                            err,
                        ));
                    }
                };
                if !continue_with.is_empty() {
                    body["continue_with"] = json!(continue_with);
                }
                Json(body).into_response()
            }
        },
        Err(err) => submit_error_response(&state, err),
    }
}

// Registration.

#[utoipa::path(
    get,
    path = "/self-service/registration/browser",
    responses(
        (status = 303, description = "Redirect to the registration UI with the flow id"),
        (status = 200, description = "Registration flow (SPA clients)", body = Object)
    ),
    tag = "registration",
)]
/// Initialize a registration flow for browser and SPA clients.
pub async fn init_registration_browser(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let flow_type = browser_or_spa(&headers);
    init_registration(&state, flow_type).await
}

#[utoipa::path(
    get,
    path = "/self-service/registration/api",
    responses(
        (status = 200, description = "Registration flow", body = Object)
    ),
    tag = "registration",
)]
/// Initialize a registration flow for native API clients.
pub async fn init_registration_api(Extension(state): Extension<Arc<AppState>>) -> Response {
    init_registration(&state, FlowType::Api).await
}

async fn init_registration(state: &AppState, flow_type: FlowType) -> Response {
    match state.orchestrator.create_registration_flow(flow_type).await {
        Ok(flow) => init_response(state, &flow),
        Err(err) => flow_error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/self-service/registration/flows",
    params(FlowQuery),
    responses(
        (status = 200, description = "Registration flow", body = Object),
        (status = 404, description = "Unknown flow", body = ErrorBody)
    ),
    tag = "registration",
)]
/// Fetch a previously initialized registration flow.
pub async fn get_registration_flow(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Response {
    get_flow(&state, FlowName::Registration, query.id).await
}

#[utoipa::path(
    post,
    path = "/self-service/registration",
    params(SubmitQuery),
    request_body = String,
    responses(
        (status = 200, description = "Flow re-rendered with a challenge, or account created"),
        (status = 303, description = "Redirect after a completed browser sign-up"),
        (status = 400, description = "Validation failed; flow re-rendered", body = Object)
    ),
    tag = "registration",
)]
/// Submit a registration flow.
pub async fn submit_registration(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match parse_payload(&headers, &body) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    match state
        .orchestrator
        .submit_registration(query.flow, &payload)
        .await
    {
        Ok(RegistrationSuccess::Render(flow)) => match flow.flow_type {
            FlowType::Browser => {
                Redirect::to(&ui_url(&state, FlowName::Registration, flow.id)).into_response()
            }
            FlowType::Spa | FlowType::Api => Json(&*flow).into_response(),
        },
        Ok(RegistrationSuccess::Created { flow, session }) => match flow.flow_type {
            FlowType::Browser => {
                Redirect::to(state.config.default_return_url.as_str()).into_response()
            }
            FlowType::Spa | FlowType::Api => Json(json!({
                "session": session,
                "session_token": session.token,
            }))
            .into_response(),
        },
        Err(err) => submit_error_response(&state, err),
    }
}

// Assets.

#[utoipa::path(
    get,
    path = "/.well-known/ory/webauthn.js",
    responses(
        (status = 200, description = "WebAuthn trigger script", body = String, content_type = "text/javascript")
    ),
    tag = "assets",
)]
/// Serve the bundled WebAuthn trigger script.
pub async fn webauthn_script() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        script::WEBAUTHN_JS,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn form_bodies_nest_dotted_fields() {
        let body = Bytes::from_static(
            b"csrf_token=tok&method=passkey&traits.email=a%40b.c&traits.name=Ada",
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );

        let payload = parse_payload(&headers, &body).unwrap();
        assert_eq!(payload["csrf_token"], "tok");
        assert_eq!(payload["method"], "passkey");
        assert_eq!(payload["traits"]["email"], "a@b.c");
        assert_eq!(payload["traits"]["name"], "Ada");
    }

    #[test]
    fn json_bodies_pass_through() {
        let body = Bytes::from_static(br#"{"method":"totp","totp_code":"123456"}"#);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());

        let payload = parse_payload(&headers, &body).unwrap();
        assert_eq!(payload["totp_code"], "123456");
    }

    #[test]
    fn malformed_json_is_rejected() {
        let body = Bytes::from_static(b"{not json");
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(parse_payload(&headers, &body).is_err());
    }

    #[test]
    fn spa_detection_reads_the_accept_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(browser_or_spa(&headers), FlowType::Browser);
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert_eq!(browser_or_spa(&headers), FlowType::Spa);
        headers.insert(header::ACCEPT, "text/html".parse().unwrap());
        assert_eq!(browser_or_spa(&headers), FlowType::Browser);
    }
}
