//! Typed form nodes.
//!
//! A node is a closed tagged union: the outer `type` discriminator is always
//! derived from the attribute variant at encode time, and a declared `type`
//! that disagrees with the variant is rejected. Decoding reads `type` first
//! and then parses `attributes` into the matching variant.

use serde::de::Error as DeError;
use serde::ser::{Error as SerError, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::text::Message;

/// Node discriminator. Derived from the attribute variant when encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Input,
    Text,
    Image,
    Anchor,
    Script,
    Select,
}

impl NodeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Text => "text",
            Self::Image => "image",
            Self::Anchor => "anchor",
            Self::Script => "script",
            Self::Select => "select",
        }
    }
}

/// UI node category; clients render the nodes of one group together.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Default,
    Password,
    Totp,
    LookupSecret,
    Passkey,
    Webauthn,
}

impl Group {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Password => "password",
            Self::Totp => "totp",
            Self::LookupSecret => "lookup_secret",
            Self::Passkey => "passkey",
            Self::Webauthn => "webauthn",
        }
    }
}

/// HTML input types the subsystem emits.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Password,
    Number,
    Checkbox,
    Hidden,
    Email,
    Date,
    #[serde(rename = "datetime-local")]
    DatetimeLocal,
    Url,
    Submit,
    Button,
}

impl InputType {
    /// Infer the input type from a JSON value the way form rendering expects:
    /// numbers become number inputs, booleans checkboxes, the CSRF token is
    /// hidden and the literal name `password` is masked.
    #[must_use]
    pub fn infer(name: &str, value: &Value) -> Self {
        if name == crate::csrf::TOKEN_NAME {
            return Self::Hidden;
        }
        if name == "password" {
            return Self::Password;
        }
        if value.is_number() {
            return Self::Number;
        }
        if value.is_boolean() {
            return Self::Checkbox;
        }
        Self::Text
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputAttributes {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocomplete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onclick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onload: Option<String>,
}

impl InputAttributes {
    #[must_use]
    pub fn new(name: impl Into<String>, input_type: InputType) -> Self {
        Self {
            name: name.into(),
            input_type,
            value: Value::Null,
            required: false,
            disabled: false,
            pattern: None,
            autocomplete: None,
            onclick: None,
            onload: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextAttributes {
    pub id: String,
    pub text: Message,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageAttributes {
    pub id: String,
    pub src: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorAttributes {
    pub id: String,
    pub href: String,
    pub title: Message,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptAttributes {
    pub id: String,
    pub src: String,
    #[serde(rename = "async")]
    pub load_async: bool,
    pub referrerpolicy: String,
    pub crossorigin: String,
    pub integrity: String,
    #[serde(rename = "type")]
    pub script_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectAttributes {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
}

/// Attribute payload of a node; the variant determines the node type.
#[derive(Clone, Debug, PartialEq)]
pub enum Attributes {
    Input(InputAttributes),
    Text(TextAttributes),
    Image(ImageAttributes),
    Anchor(AnchorAttributes),
    Script(ScriptAttributes),
    Select(SelectAttributes),
}

impl Attributes {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Input(_) => NodeType::Input,
            Self::Text(_) => NodeType::Text,
            Self::Image(_) => NodeType::Image,
            Self::Anchor(_) => NodeType::Anchor,
            Self::Script(_) => NodeType::Script,
            Self::Select(_) => NodeType::Select,
        }
    }

    /// The attribute part of the node's stable identity: the field name for
    /// form inputs, empty for visual-only nodes.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Input(attrs) => &attrs.name,
            Self::Select(attrs) => &attrs.name,
            Self::Text(_) | Self::Image(_) | Self::Anchor(_) | Self::Script(_) => "",
        }
    }

    fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Input(attrs) => serde_json::to_value(attrs),
            Self::Text(attrs) => serde_json::to_value(attrs),
            Self::Image(attrs) => serde_json::to_value(attrs),
            Self::Anchor(attrs) => serde_json::to_value(attrs),
            Self::Script(attrs) => serde_json::to_value(attrs),
            Self::Select(attrs) => serde_json::to_value(attrs),
        }
    }
}

/// Optional presentation metadata, currently only a label.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Message>,
}

/// A single form node with stable identity `<group>/<attribute-id>`.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Declared discriminator; must agree with the attribute variant, the
    /// encoder rejects the node otherwise.
    pub node_type: NodeType,
    pub group: Group,
    pub attributes: Attributes,
    pub messages: Vec<Message>,
    pub meta: Meta,
}

impl Node {
    #[must_use]
    pub fn new(group: Group, attributes: Attributes) -> Self {
        Self {
            node_type: attributes.node_type(),
            group,
            attributes,
            messages: Vec::new(),
            meta: Meta::default(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: Message) -> Self {
        self.meta.label = Some(label);
        self
    }

    /// Stable node identity within a node list.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}/{}", self.group.as_str(), self.attributes.id())
    }

    #[must_use]
    pub fn input(group: Group, attrs: InputAttributes) -> Self {
        Self::new(group, Attributes::Input(attrs))
    }

    /// A text input with the type inferred from its value.
    #[must_use]
    pub fn input_field(group: Group, name: &str, value: Value, required: bool) -> Self {
        let mut attrs = InputAttributes::new(name, InputType::infer(name, &value));
        attrs.value = value;
        attrs.required = required;
        Self::input(group, attrs)
    }

    #[must_use]
    pub fn hidden(group: Group, name: &str, value: Value) -> Self {
        let mut attrs = InputAttributes::new(name, InputType::Hidden);
        attrs.value = value;
        Self::input(group, attrs)
    }

    #[must_use]
    pub fn submit(group: Group, name: &str, value: Value, label: Message) -> Self {
        let mut attrs = InputAttributes::new(name, InputType::Submit);
        attrs.value = value;
        Self::input(group, attrs).with_label(label)
    }

    #[must_use]
    pub fn image(group: Group, id: &str, src: String, width: i64, height: i64) -> Self {
        Self::new(
            group,
            Attributes::Image(ImageAttributes {
                id: id.to_string(),
                src,
                width,
                height,
            }),
        )
    }

    #[must_use]
    pub fn text(group: Group, id: &str, text: Message) -> Self {
        Self::new(
            group,
            Attributes::Text(TextAttributes {
                id: id.to_string(),
                text,
            }),
        )
    }

    /// Build an input node from a JSON-schema property. Formats override the
    /// inferred type, `pattern` is copied verbatim and the `disableFormField`
    /// keyword marks the node disabled.
    #[must_use]
    pub fn from_schema_property(
        group: Group,
        name: &str,
        property: &Value,
        required: bool,
        value: Value,
    ) -> Self {
        let mut input_type = InputType::infer(name, &value);
        match property.get("format").and_then(Value::as_str) {
            Some("date-time") => input_type = InputType::DatetimeLocal,
            Some("email") => input_type = InputType::Email,
            Some("date") => input_type = InputType::Date,
            Some("uri") => input_type = InputType::Url,
            _ => {}
        }
        let mut attrs = InputAttributes::new(name, input_type);
        attrs.value = value;
        attrs.required = required;
        attrs.pattern = property
            .get("pattern")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        attrs.disabled = property
            .get("disableFormField")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut node = Self::input(group, attrs);
        if let Some(title) = property.get("title").and_then(Value::as_str) {
            node.meta.label = Some(Message::info(crate::text::INFO_LABEL_IDENTIFIER, title));
        }
        node
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.node_type != self.attributes.node_type() {
            return Err(S::Error::custom(format!(
                "type mismatch: node declares {} but attributes are {}",
                self.node_type.as_str(),
                self.attributes.node_type().as_str()
            )));
        }
        let attributes = self.attributes.to_json().map_err(S::Error::custom)?;
        let mut state = serializer.serialize_struct("Node", 5)?;
        state.serialize_field("type", &self.node_type)?;
        state.serialize_field("group", &self.group)?;
        state.serialize_field("attributes", &attributes)?;
        state.serialize_field("messages", &self.messages)?;
        state.serialize_field("meta", &self.meta)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct NodeRepr {
    #[serde(rename = "type")]
    node_type: NodeType,
    group: Group,
    attributes: Value,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    meta: Meta,
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = NodeRepr::deserialize(deserializer)?;
        let attributes = match repr.node_type {
            NodeType::Input => serde_json::from_value(repr.attributes).map(Attributes::Input),
            NodeType::Text => serde_json::from_value(repr.attributes).map(Attributes::Text),
            NodeType::Image => serde_json::from_value(repr.attributes).map(Attributes::Image),
            NodeType::Anchor => serde_json::from_value(repr.attributes).map(Attributes::Anchor),
            NodeType::Script => serde_json::from_value(repr.attributes).map(Attributes::Script),
            NodeType::Select => serde_json::from_value(repr.attributes).map(Attributes::Select),
        }
        .map_err(|err| {
            D::Error::custom(format!(
                "unexpected node type: attributes do not match {}: {err}",
                repr.node_type.as_str()
            ))
        })?;
        Ok(Self {
            node_type: repr.node_type,
            group: repr.group,
            attributes,
            messages: repr.messages,
            meta: repr.meta,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_json_round_trip() {
        let mut attrs = InputAttributes::new("totp_code", InputType::Text);
        attrs.required = true;
        let node = Node::input(Group::Totp, attrs).with_label(Message::login_totp_label());

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "input");
        assert_eq!(value["group"], "totp");
        assert_eq!(value["attributes"]["name"], "totp_code");

        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn marshal_rejects_type_variant_mismatch() {
        let mut node = Node::image(Group::Totp, "totp_qr", "data:image/png;base64,x".into(), 256, 256);
        node.node_type = NodeType::Input;
        let err = serde_json::to_value(&node).unwrap_err();
        assert!(err.to_string().contains("type mismatch"), "{err}");
    }

    #[test]
    fn unmarshal_rejects_unknown_type() {
        let err = serde_json::from_value::<Node>(json!({
            "type": "video",
            "group": "default",
            "attributes": {}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown variant"), "{err}");
    }

    #[test]
    fn unmarshal_rejects_mismatched_attributes() {
        let err = serde_json::from_value::<Node>(json!({
            "type": "image",
            "group": "totp",
            "attributes": { "name": "totp_code", "type": "text" }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unexpected node type"), "{err}");
    }

    #[test]
    fn visual_nodes_have_empty_attribute_id() {
        let node = Node::text(
            Group::LookupSecret,
            "lookup_secret_codes",
            Message::lookup_secrets(vec![]),
        );
        assert_eq!(node.id(), "lookup_secret/");
        let input = Node::hidden(Group::Default, crate::csrf::TOKEN_NAME, json!("token"));
        assert_eq!(input.id(), "default/csrf_token");
    }

    #[test]
    fn infers_input_types_from_values() {
        assert_eq!(InputType::infer("age", &json!(42)), InputType::Number);
        assert_eq!(InputType::infer("tos", &json!(true)), InputType::Checkbox);
        assert_eq!(
            InputType::infer(crate::csrf::TOKEN_NAME, &json!("x")),
            InputType::Hidden
        );
        assert_eq!(InputType::infer("password", &Value::Null), InputType::Password);
        assert_eq!(InputType::infer("email", &json!("a@b.c")), InputType::Text);
    }

    #[test]
    fn schema_property_formats_override() {
        let node = Node::from_schema_property(
            Group::Default,
            "traits.email",
            &json!({ "type": "string", "format": "email", "title": "E-Mail" }),
            true,
            Value::Null,
        );
        let Attributes::Input(attrs) = &node.attributes else {
            panic!("expected input attributes");
        };
        assert_eq!(attrs.input_type, InputType::Email);
        assert!(attrs.required);
        assert_eq!(node.meta.label.as_ref().unwrap().text, "E-Mail");
    }
}
