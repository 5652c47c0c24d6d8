//! OpenAPI document aggregating the self-service routes.

use utoipa::OpenApi;

use crate::api::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ensaluti",
        description = "Self-service second-factor and passwordless authentication flows",
        license(name = "BSD-3-Clause"),
    ),
    paths(
        handlers::init_login_browser,
        handlers::init_login_api,
        handlers::get_login_flow,
        handlers::submit_login,
        handlers::init_settings_browser,
        handlers::init_settings_api,
        handlers::get_settings_flow,
        handlers::submit_settings,
        handlers::init_registration_browser,
        handlers::init_registration_api,
        handlers::get_registration_flow,
        handlers::submit_registration,
        handlers::webauthn_script,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::flow::FlowType,
        crate::flow::FlowName,
        crate::flow::FlowState,
        crate::session::Aal,
        crate::session::AuthenticationMethod,
        crate::session::Session,
        crate::strategy::ContinueWith,
        crate::text::Message,
        crate::text::MessageKind,
        crate::ui::UiContainer,
    )),
    tags(
        (name = "login", description = "Login flows, first and second factor"),
        (name = "settings", description = "Credential management flows"),
        (name = "registration", description = "Passwordless sign-up flows"),
        (name = "assets", description = "Bundled client assets"),
    )
)]
pub struct ApiDoc;
