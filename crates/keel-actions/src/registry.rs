// registry.rs — The set of known actions.
//
// Registration happens once, through a builder, before anything is
// invoked. `build()` freezes the set into an immutable ActionRegistry that
// is shared by reference (usually an Arc) with the executor and the
// followup graph. There is no process-wide registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use keel_events::schema::is_identifier;
use keel_events::{namespaces, ActionKey};
use serde_json::Value;

use crate::descriptor::ActionDescriptor;
use crate::error::RegistryError;

/// A descriptor with its schemas compiled.
#[derive(Clone)]
pub struct RegisteredAction {
    descriptor: ActionDescriptor,
    input: Arc<Validator>,
    output: Arc<Validator>,
}

impl RegisteredAction {
    fn compile(descriptor: ActionDescriptor) -> Result<Self, RegistryError> {
        for (field, value) in [("domain", &descriptor.domain), ("verb", &descriptor.verb)] {
            if !is_identifier(value) {
                return Err(RegistryError::InvalidIdentifier {
                    field,
                    value: value.clone(),
                });
            }
        }
        let key = descriptor.key();
        for side_effect in &descriptor.side_effects {
            check_side_effect(&key, side_effect)?;
        }
        let compile = |which: &'static str, schema: &Value| {
            jsonschema::validator_for(schema)
                .map(Arc::new)
                .map_err(|e| RegistryError::InvalidSchema {
                    key: key.clone(),
                    which,
                    reason: e.to_string(),
                })
        };
        let input = compile("input", &descriptor.input_schema)?;
        let output = compile("output", &descriptor.output_schema)?;
        Ok(Self {
            descriptor,
            input,
            output,
        })
    }

    pub fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    pub fn key(&self) -> ActionKey {
        self.descriptor.key()
    }

    /// Every input schema violation, or Ok.
    pub fn check_input(&self, inputs: &Value) -> Result<(), Vec<String>> {
        schema_errors(&self.input, inputs)
    }

    pub fn check_output(&self, output: &Value) -> Result<(), Vec<String>> {
        schema_errors(&self.output, output)
    }
}

impl fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

fn check_side_effect(key: &ActionKey, side_effect: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSideEffect {
        key: key.clone(),
        side_effect: side_effect.to_string(),
        reason: reason.to_string(),
    };
    let Some((namespace, kind)) = side_effect.split_once('.') else {
        return Err(invalid("expected 'namespace.type'"));
    };
    if !is_identifier(namespace) || !is_identifier(kind) {
        return Err(invalid("namespace and type must be lowercase identifiers"));
    }
    if namespace == namespaces::ACTION {
        return Err(invalid("the action namespace is reserved for lifecycle events"));
    }
    Ok(())
}

fn schema_errors(validator: &Validator, instance: &Value) -> Result<(), Vec<String>> {
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Collects descriptors before the registry is frozen.
#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    actions: BTreeMap<ActionKey, RegisteredAction>,
}

impl ActionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one descriptor.
    ///
    /// Registering an identical descriptor twice is a no-op; a different
    /// descriptor under an existing key is a conflict.
    pub fn register(&mut self, descriptor: ActionDescriptor) -> Result<(), RegistryError> {
        let key = descriptor.key();
        if let Some(existing) = self.actions.get(&key) {
            if existing.descriptor == descriptor {
                tracing::debug!(action = %key, "identical action re-registered");
                return Ok(());
            }
            return Err(RegistryError::Conflict { key });
        }
        let action = RegisteredAction::compile(descriptor)?;
        self.actions.insert(key, action);
        Ok(())
    }

    /// Chaining form of `register`.
    pub fn with(mut self, descriptor: ActionDescriptor) -> Result<Self, RegistryError> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn extend(
        &mut self,
        descriptors: impl IntoIterator<Item = ActionDescriptor>,
    ) -> Result<(), RegistryError> {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: self.actions,
        }
    }
}

/// Immutable set of registered actions.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<ActionKey, RegisteredAction>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    pub fn lookup(&self, verb: &str, domain: &str) -> Option<&RegisteredAction> {
        self.get(&ActionKey::new(domain, verb))
    }

    pub fn get(&self, key: &ActionKey) -> Option<&RegisteredAction> {
        self.actions.get(key)
    }

    pub fn contains(&self, key: &ActionKey) -> bool {
        self.actions.contains_key(key)
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &ActionKey> {
        self.actions.keys()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.actions.values().map(RegisteredAction::descriptor)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn commit() -> ActionDescriptor {
        ActionDescriptor::new("git", "commit")
            .input_schema(json!({
                "type": "object",
                "required": ["message"],
                "properties": {"message": {"type": "string", "minLength": 1}}
            }))
            .side_effect("git.committed")
    }

    #[test]
    fn identical_registration_is_a_noop() {
        let mut builder = ActionRegistry::builder();
        builder.register(commit()).unwrap();
        builder.register(commit()).unwrap();
        assert_eq!(builder.build().len(), 1);
    }

    #[test]
    fn conflicting_registration_is_rejected() {
        let mut builder = ActionRegistry::builder();
        builder.register(commit()).unwrap();
        let err = builder.register(commit().idempotent()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Conflict {
                key: ActionKey::new("git", "commit")
            }
        );
    }

    #[test]
    fn bad_schema_and_side_effects_are_rejected() {
        let bad_schema = ActionDescriptor::new("git", "merge").input_schema(json!({"type": 12}));
        assert!(matches!(
            ActionRegistry::builder().with(bad_schema),
            Err(RegistryError::InvalidSchema { which: "input", .. })
        ));

        for side_effect in ["committed", "git.Committed", "action.succeeded"] {
            let descriptor = ActionDescriptor::new("git", "merge").side_effect(side_effect);
            assert!(matches!(
                ActionRegistry::builder().with(descriptor),
                Err(RegistryError::InvalidSideEffect { .. })
            ));
        }

        assert!(matches!(
            ActionRegistry::builder().with(ActionDescriptor::new("Git", "merge")),
            Err(RegistryError::InvalidIdentifier { field: "domain", .. })
        ));
    }

    #[test]
    fn lookup_and_input_checks() {
        let registry = ActionRegistry::builder().with(commit()).unwrap().build();
        let action = registry.lookup("commit", "git").unwrap();
        assert!(registry.lookup("push", "git").is_none());

        assert!(action.check_input(&json!({"message": "fix"})).is_ok());
        let errors = action.check_input(&json!({"message": ""})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("/message"));
    }
}
