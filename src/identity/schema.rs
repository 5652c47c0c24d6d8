//! Identity-schema helpers.
//!
//! The subsystem does not compile JSON-Schema; it walks bundled schema
//! documents for the few things flows need: property order, required-trait
//! validation, and the credential annotations that mark a trait as the TOTP
//! account name or the passkey identifier.

use std::sync::{Mutex, OnceLock};

use serde_json::Value;

use crate::text::Message;

/// Bundled default identity schema.
pub const DEFAULT_SCHEMA_JSON: &str = include_str!("../schemas/identity.schema.json");

static DEFAULT_SCHEMA: OnceLock<Value> = OnceLock::new();

/// The parsed default identity schema.
#[must_use]
pub fn default_schema() -> &'static Value {
    DEFAULT_SCHEMA.get_or_init(|| {
        serde_json::from_str(DEFAULT_SCHEMA_JSON).expect("bundled identity schema is valid JSON")
    })
}

/// Iterate the trait properties of an identity schema in declaration order.
fn trait_properties(schema: &Value) -> impl Iterator<Item = (&String, &Value)> {
    schema
        .pointer("/properties/traits/properties")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(serde_json::Map::iter)
}

fn annotation_is_set(property: &Value, pointer: &str) -> bool {
    property
        .pointer(pointer)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Resolve the TOTP account name: the first trait flagged
/// `credentials.totp.account_name`, falling back to `fallback` (the identity
/// id) when no trait is flagged or the trait is empty.
#[must_use]
pub fn totp_account_name(schema: &Value, traits: &Value, fallback: &str) -> String {
    for (name, property) in trait_properties(schema) {
        if !annotation_is_set(property, "/credentials/totp/account_name") {
            continue;
        }
        if let Some(value) = traits.get(name).and_then(Value::as_str) {
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    fallback.to_string()
}

/// Name of the trait flagged as the passkey identifier, as a form field path
/// (`traits.<name>`). Honors the legacy `webauthn_identifier` annotation.
#[must_use]
pub fn passkey_identifier_field(schema: &Value) -> Option<String> {
    for (name, property) in trait_properties(schema) {
        if annotation_is_set(property, "/credentials/passkey/identifier")
            || annotation_is_set(property, "/credentials/webauthn/identifier")
            || annotation_is_set(property, "/webauthn_identifier")
        {
            return Some(format!("traits.{name}"));
        }
    }
    None
}

/// Accumulates the passkey identifier during a schema walk.
///
/// Schema validation may evaluate branches in parallel, so the single
/// mutable field is guarded by a mutex; the first flagged, non-empty trait
/// wins.
#[derive(Debug, Default)]
pub struct IdentifierExtractor {
    found: Mutex<Option<String>>,
}

impl IdentifierExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit one trait property with its submitted value.
    pub fn visit(&self, property: &Value, value: &Value) {
        let flagged = annotation_is_set(property, "/credentials/passkey/identifier")
            || annotation_is_set(property, "/credentials/webauthn/identifier")
            || annotation_is_set(property, "/webauthn_identifier");
        if !flagged {
            return;
        }
        let Some(value) = value.as_str().filter(|value| !value.is_empty()) else {
            return;
        };
        if let Ok(mut found) = self.found.lock() {
            if found.is_none() {
                *found = Some(value.to_string());
            }
        }
    }

    /// Run the walk over every trait property.
    #[must_use]
    pub fn extract(self, schema: &Value, traits: &Value) -> Option<String> {
        for (name, property) in trait_properties(schema) {
            self.visit(property, traits.get(name).unwrap_or(&Value::Null));
        }
        self.found.into_inner().ok().flatten()
    }
}

/// Shallow traits validation: required properties must be present and
/// primitive types must match. Returns one message per violation.
///
/// # Errors
/// Returns the validation messages when the traits document is invalid.
pub fn validate_traits(schema: &Value, traits: &Value) -> Result<(), Vec<Message>> {
    let mut messages = Vec::new();

    if !traits.is_object() {
        messages.push(Message::error_required("traits"));
        return Err(messages);
    }

    let required: Vec<&str> = schema
        .pointer("/properties/traits/required")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for name in required {
        let missing = match traits.get(name) {
            None | Some(Value::Null) => true,
            Some(Value::String(value)) => value.is_empty(),
            Some(_) => false,
        };
        if missing {
            messages.push(Message::error_required(&format!("traits.{name}")));
        }
    }

    for (name, property) in trait_properties(schema) {
        let Some(value) = traits.get(name) else {
            continue;
        };
        let expected = property.get("type").and_then(Value::as_str);
        let matches = match expected {
            Some("string") => value.is_string(),
            Some("number") | Some("integer") => value.is_number(),
            Some("boolean") => value.is_boolean(),
            Some("object") => value.is_object(),
            Some("array") => value.is_array(),
            _ => true,
        };
        if !matches && !value.is_null() {
            messages.push(
                Message::error(
                    crate::text::ERR_VALIDATION_GENERIC,
                    format!("Property traits.{name} has an unexpected type."),
                )
                .with_context(serde_json::json!({ "property": format!("traits.{name}") })),
            );
        }
    }

    if messages.is_empty() {
        Ok(())
    } else {
        Err(messages)
    }
}
