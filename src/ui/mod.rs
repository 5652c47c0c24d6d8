//! Declarative UI tree rendered by self-service flows.
//!
//! A flow carries one [`UiContainer`]: an ordered node list plus the form
//! action/method and flow-level messages. Node identity is
//! `<group>/<attribute-id>`; `upsert` replaces by identity while `append`
//! never checks it.

pub mod node;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use node::{
    AnchorAttributes, Attributes, Group, ImageAttributes, InputAttributes, InputType, Meta, Node,
    NodeType, ScriptAttributes, SelectAttributes, TextAttributes,
};

use crate::text::Message;

/// Fixed ordering prefix applied before schema-driven sorting.
const SORT_PREFIX: [&str; 3] = [crate::csrf::TOKEN_NAME, "identifier", "password"];

/// Ordered node list with identity-aware mutation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nodes(Vec<Node>);

impl Nodes {
    #[must_use]
    pub fn find(&self, group: Group, id: &str) -> Option<&Node> {
        self.0
            .iter()
            .find(|node| node.group == group && node.attributes.id() == id)
    }

    pub fn find_mut(&mut self, group: Group, id: &str) -> Option<&mut Node> {
        self.0
            .iter_mut()
            .find(|node| node.group == group && node.attributes.id() == id)
    }

    /// Replace the node with the same identity, or append when absent.
    pub fn upsert(&mut self, node: Node) {
        let id = node.id();
        if let Some(existing) = self.0.iter_mut().find(|candidate| candidate.id() == id) {
            *existing = node;
        } else {
            self.0.push(node);
        }
    }

    /// Append without identity checks.
    pub fn append(&mut self, node: Node) {
        self.0.push(node);
    }

    /// Remove every node whose identity is in `ids`.
    pub fn remove(&mut self, ids: &[&str]) {
        self.0.retain(|node| !ids.contains(&node.id().as_str()));
    }

    /// Clear input values and all node messages; groups, types and labels
    /// survive. Attribute names in `exclude` keep their value.
    pub fn reset(&mut self, exclude: &[&str]) {
        for node in &mut self.0 {
            node.messages.clear();
            if exclude.contains(&node.attributes.id()) {
                continue;
            }
            match &mut node.attributes {
                Attributes::Input(attrs) => attrs.value = Value::Null,
                Attributes::Select(attrs) => attrs.value = Value::Null,
                Attributes::Text(_)
                | Attributes::Image(_)
                | Attributes::Anchor(_)
                | Attributes::Script(_) => {}
            }
        }
    }

    /// Stable sort by the fixed prefix followed by the schema's property
    /// order. `prefix` is prepended to each property name (e.g. `traits.`).
    /// Nodes without a position keep their relative order at the end.
    pub fn sort_by_schema(&mut self, schema: &Value, prefix: &str) {
        let mut order: Vec<String> = SORT_PREFIX.iter().map(ToString::to_string).collect();
        if let Some(properties) = schema
            .pointer("/properties/traits/properties")
            .or_else(|| schema.pointer("/properties"))
            .and_then(Value::as_object)
        {
            for name in properties.keys() {
                order.push(format!("{prefix}{name}"));
            }
        }
        let position = |node: &Node| -> usize {
            order
                .iter()
                .position(|key| key == node.attributes.id())
                .unwrap_or(order.len())
        };
        self.0.sort_by_key(position);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.0.iter()
    }

    /// Nodes belonging to one group, in order.
    pub fn group(&self, group: Group) -> impl Iterator<Item = &Node> {
        self.0.iter().filter(move |node| node.group == group)
    }
}

impl<'a> IntoIterator for &'a Nodes {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The form container a flow renders to clients.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UiContainer {
    pub action: String,
    pub method: String,
    #[schema(value_type = Vec<Object>)]
    pub nodes: Nodes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<Message>,
}

impl UiContainer {
    #[must_use]
    pub fn new(action: String) -> Self {
        Self {
            action,
            method: "POST".to_string(),
            nodes: Nodes::default(),
            messages: Vec::new(),
        }
    }

    /// Replace the anti-CSRF token node.
    pub fn set_csrf(&mut self, token: &str) {
        self.nodes.upsert(Node::hidden(
            Group::Default,
            crate::csrf::TOKEN_NAME,
            Value::String(token.to_string()),
        ));
    }

    /// Clear input values and every message on the container and its nodes.
    pub fn reset(&mut self, exclude: &[&str]) {
        self.messages.clear();
        self.nodes.reset(exclude);
    }

    /// Attach a flow-level message.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Attach a message to the node identified by `(group, id)`, falling back
    /// to a flow-level message when the node does not exist.
    pub fn add_node_message(&mut self, group: Group, id: &str, message: Message) {
        if let Some(node) = self.nodes.find_mut(group, id) {
            node.messages.push(message);
        } else {
            self.messages.push(message);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(group: Group, name: &str, value: Value) -> Node {
        Node::input_field(group, name, value, false)
    }

    #[test]
    fn upsert_keeps_one_node_per_identity() {
        let mut nodes = Nodes::default();
        for round in 0..4 {
            nodes.upsert(input(Group::Totp, "totp_code", json!(round)));
        }
        assert_eq!(nodes.len(), 1);
        let node = nodes.find(Group::Totp, "totp_code").unwrap();
        let Attributes::Input(attrs) = &node.attributes else {
            panic!("expected input");
        };
        assert_eq!(attrs.value, json!(3));
    }

    #[test]
    fn append_does_not_deduplicate() {
        let mut nodes = Nodes::default();
        nodes.append(input(Group::Totp, "totp_code", Value::Null));
        nodes.append(input(Group::Totp, "totp_code", Value::Null));
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn remove_by_identity() {
        let mut nodes = Nodes::default();
        nodes.append(input(Group::Totp, "totp_code", Value::Null));
        nodes.append(input(Group::Default, "identifier", Value::Null));
        nodes.remove(&["totp/totp_code"]);
        assert_eq!(nodes.len(), 1);
        assert!(nodes.find(Group::Default, "identifier").is_some());
    }

    #[test]
    fn reset_clears_values_and_messages_but_not_labels() {
        let mut container = UiContainer::new("/submit".into());
        container.set_csrf("token-1");
        let mut node = input(Group::Totp, "totp_code", json!("123456"));
        node.meta.label = Some(Message::login_totp_label());
        node.messages.push(Message::error_totp_wrong());
        container.nodes.append(node);
        container.add_message(Message::error_totp_wrong());

        container.reset(&[crate::csrf::TOKEN_NAME]);

        assert!(container.messages.is_empty());
        let node = container.nodes.find(Group::Totp, "totp_code").unwrap();
        assert!(node.messages.is_empty());
        assert_eq!(node.meta.label, Some(Message::login_totp_label()));
        let Attributes::Input(attrs) = &node.attributes else {
            panic!("expected input");
        };
        assert!(attrs.value.is_null());

        // excluded csrf value survives
        let csrf = container
            .nodes
            .find(Group::Default, crate::csrf::TOKEN_NAME)
            .unwrap();
        let Attributes::Input(attrs) = &csrf.attributes else {
            panic!("expected input");
        };
        assert_eq!(attrs.value, json!("token-1"));
    }

    #[test]
    fn sort_by_schema_orders_prefix_then_properties() {
        let schema = json!({
            "properties": {
                "traits": {
                    "properties": {
                        "email": { "type": "string" },
                        "name": { "type": "string" }
                    }
                }
            }
        });
        let mut nodes = Nodes::default();
        nodes.append(input(Group::Default, "traits.name", Value::Null));
        nodes.append(input(Group::Default, "method", Value::Null));
        nodes.append(input(Group::Default, "traits.email", Value::Null));
        nodes.append(input(Group::Password, "password", Value::Null));
        nodes.append(input(Group::Default, crate::csrf::TOKEN_NAME, Value::Null));

        nodes.sort_by_schema(&schema, "traits.");

        let order: Vec<String> = nodes.iter().map(|node| node.attributes.id().to_string()).collect();
        assert_eq!(
            order,
            vec![
                crate::csrf::TOKEN_NAME.to_string(),
                "password".to_string(),
                "traits.email".to_string(),
                "traits.name".to_string(),
                "method".to_string(),
            ]
        );
    }

    #[test]
    fn container_json_round_trips() {
        let mut container = UiContainer::new("https://example.com/self-service/login".into());
        container.set_csrf("token");
        container
            .nodes
            .append(input(Group::Totp, "totp_code", json!("000000")));
        let value = serde_json::to_value(&container).unwrap();
        let back: UiContainer = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(back, container);
        assert_eq!(serde_json::to_value(&back).unwrap(), value);
    }
}
