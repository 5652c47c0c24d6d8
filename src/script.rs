//! Bundled WebAuthn trigger script.
//!
//! The passkey strategy renders a `script` node pointing at the copy served
//! by the router; both sides reference the same bundled source so the
//! subresource-integrity hash always matches what is served.

use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha512};

use crate::config::Config;
use crate::ui::{Attributes, Group, Node, ScriptAttributes};

/// Path the router serves the script under.
pub const SCRIPT_PATH: &str = "/.well-known/ory/webauthn.js";

/// Node id the script node is rendered with.
pub const SCRIPT_NODE_ID: &str = "webauthn_script";

/// The bundled script source.
pub const WEBAUTHN_JS: &str = include_str!("../static/webauthn.js");

static INTEGRITY: OnceLock<String> = OnceLock::new();

/// Subresource-integrity hash of the bundled script.
#[must_use]
pub fn integrity() -> &'static str {
    INTEGRITY.get_or_init(|| {
        let digest = Sha512::digest(WEBAUTHN_JS.as_bytes());
        format!("sha512-{}", STANDARD.encode(digest))
    })
}

/// The script node flows embed so clients load the trigger functions.
#[must_use]
pub fn script_node(config: &Config, group: Group) -> Node {
    let src = config
        .public_url
        .join(SCRIPT_PATH)
        .map_or_else(|_| SCRIPT_PATH.to_string(), |url| url.to_string());
    Node::new(
        group,
        Attributes::Script(ScriptAttributes {
            id: SCRIPT_NODE_ID.to_string(),
            src,
            load_async: true,
            referrerpolicy: "no-referrer".to_string(),
            crossorigin: "anonymous".to_string(),
            integrity: integrity().to_string(),
            script_type: "text/javascript".to_string(),
            nonce: None,
        }),
    )
}
