// descriptor.rs — Declarative description of one action.
//
// A descriptor is data, not code: the wrapper is a single generic function
// parameterized by the descriptor it looks up, so there is no per-action
// wrapping and nothing is discovered by reflection.

use keel_events::ActionKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub domain: String,
    pub verb: String,
    /// Free-form grouping used by tooling (e.g. "lifecycle", "vcs").
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON Schema the inputs must satisfy before anything is recorded.
    #[serde(default = "object_schema")]
    pub input_schema: Value,
    /// JSON Schema a successful output must satisfy.
    #[serde(default = "any_schema")]
    pub output_schema: Value,
    /// Repeating a successful call with identical inputs returns the
    /// earlier output instead of running again.
    #[serde(default)]
    pub idempotent: bool,
    /// Input field identifying the logical target of an idempotent action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
    /// `namespace.type` events the operation may emit while it runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

fn object_schema() -> Value {
    json!({"type": "object"})
}

fn any_schema() -> Value {
    json!({})
}

impl ActionDescriptor {
    pub fn new(domain: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            verb: verb.into(),
            category: default_category(),
            description: String::new(),
            input_schema: object_schema(),
            output_schema: any_schema(),
            idempotent: false,
            target_field: None,
            side_effects: Vec::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    /// Mark as idempotent over the whole input.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Mark as idempotent, keyed by the value of one input field.
    pub fn idempotent_on(mut self, target_field: impl Into<String>) -> Self {
        self.idempotent = true;
        self.target_field = Some(target_field.into());
        self
    }

    pub fn side_effect(mut self, kind: impl Into<String>) -> Self {
        self.side_effects.push(kind.into());
        self
    }

    pub fn key(&self) -> ActionKey {
        ActionKey::new(&self.domain, &self.verb)
    }

    pub fn declares(&self, routing_key: &str) -> bool {
        self.side_effects.iter().any(|s| s == routing_key)
    }

    /// The logical target named by `target_field`, if present in `inputs`.
    pub fn target_of(&self, inputs: &Value) -> Option<String> {
        let value = inputs.get(self.target_field.as_deref()?)?;
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_defaults_fill_optional_fields() {
        let descriptor: ActionDescriptor =
            serde_json::from_value(json!({"domain": "git", "verb": "commit"})).unwrap();
        assert_eq!(descriptor, ActionDescriptor::new("git", "commit"));
        assert_eq!(descriptor.key().to_string(), "git.commit");
    }

    #[test]
    fn target_of_reads_named_field() {
        let descriptor = ActionDescriptor::new("container", "stop").idempotent_on("container_id");
        assert_eq!(
            descriptor.target_of(&json!({"container_id": "c-1"})),
            Some("c-1".to_string())
        );
        assert_eq!(descriptor.target_of(&json!({"container_id": 7})), Some("7".to_string()));
        assert_eq!(descriptor.target_of(&json!({})), None);
        assert_eq!(ActionDescriptor::new("a", "b").target_of(&json!({"x": 1})), None);
    }
}
