// schema.rs — Structural validation of candidate events.
//
// Validation is pure: it looks at a candidate and either returns a typed
// Event or says why not. Checks run in a fixed order so the first failure
// reported is the most fundamental one:
//
// 1. Candidate is a JSON object
// 2. Every required top-level field is present
// 3. schema_version parses and its major is supported
// 4. Fields deserialize into their types
// 5. namespace/type are identifiers, actor is non-empty
// 6. Payload satisfies the sub-schema registered for `namespace.type`

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use jsonschema::Validator;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::SchemaError;
use crate::event::Event;
use crate::version::{SchemaVersion, CURRENT_SCHEMA_VERSION};

/// Top-level fields every event must carry.
pub const REQUIRED_FIELDS: &[&str] = &[
    "schema_version",
    "event_id",
    "namespace",
    "type",
    "timestamp",
    "correlation_id",
    "actor",
    "payload",
];

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("identifier regex is valid"))
}

/// Whether `s` is a valid namespace or event type.
pub fn is_identifier(s: &str) -> bool {
    identifier_re().is_match(s)
}

/// Best-effort extraction of the event id from a raw line, for error
/// reports about records that failed validation.
pub fn peek_event_id(line: &str) -> Option<String> {
    serde_json::from_str::<Value>(line)
        .ok()?
        .get("event_id")?
        .as_str()
        .map(str::to_string)
}

/// Compiled JSON Schemas keyed by `namespace.type`.
#[derive(Clone, Default)]
pub struct PayloadSchemas {
    schemas: BTreeMap<String, Arc<Validator>>,
}

impl PayloadSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload schemas for the event types this workspace itself emits.
    pub fn builtin() -> Self {
        let mut schemas = Self::new();
        for (kind, schema) in builtin_schema_documents() {
            // Built-in documents are static and covered by tests.
            if let Err(e) = schemas.insert(kind, &schema) {
                debug_assert!(false, "builtin payload schema rejected: {e}");
            }
        }
        schemas
    }

    /// Compile and register a schema for one `namespace.type`.
    pub fn insert(&mut self, kind: &str, schema: &Value) -> Result<(), SchemaError> {
        let compiled = jsonschema::validator_for(schema).map_err(|e| {
            SchemaError::InvalidPayloadSchema {
                kind: kind.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.schemas.insert(kind.to_string(), Arc::new(compiled));
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    fn check(&self, kind: &str, payload: &Value) -> Option<Result<(), SchemaError>> {
        let validator = self.schemas.get(kind)?;
        let errors: Vec<String> = validator
            .iter_errors(payload)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        Some(if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::PayloadRejected {
                kind: kind.to_string(),
                errors,
            })
        })
    }
}

impl fmt::Debug for PayloadSchemas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.schemas.keys()).finish()
    }
}

/// Validates candidate events against the envelope and payload schemas.
#[derive(Debug, Clone)]
pub struct EventValidator {
    supported_majors: BTreeSet<u64>,
    payloads: PayloadSchemas,
    strict: bool,
}

impl EventValidator {
    /// A validator accepting the given majors. The major of
    /// [`CURRENT_SCHEMA_VERSION`] is always included: a reader must accept
    /// what its own writer produces.
    pub fn new(supported_majors: impl IntoIterator<Item = u64>) -> Self {
        let mut majors: BTreeSet<u64> = supported_majors.into_iter().collect();
        majors.insert(CURRENT_SCHEMA_VERSION.major);
        Self {
            supported_majors: majors,
            payloads: PayloadSchemas::builtin(),
            strict: false,
        }
    }

    pub fn with_payload_schemas(mut self, payloads: PayloadSchemas) -> Self {
        self.payloads = payloads;
        self
    }

    /// Register an extra payload schema on top of the current set.
    pub fn with_payload_schema(mut self, kind: &str, schema: &Value) -> Result<Self, SchemaError> {
        self.payloads.insert(kind, schema)?;
        Ok(self)
    }

    /// In strict mode, types without a payload schema are rejected.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn supported_majors(&self) -> Vec<u64> {
        self.supported_majors.iter().copied().collect()
    }

    /// Highest major this validator understands.
    pub fn highest_major(&self) -> u64 {
        self.supported_majors
            .iter()
            .next_back()
            .copied()
            .unwrap_or(CURRENT_SCHEMA_VERSION.major)
    }

    /// Validate one raw JSONL line.
    pub fn validate_str(&self, line: &str) -> Result<Event, SchemaError> {
        let value: Value = serde_json::from_str(line).map_err(|e| SchemaError::InvalidJson {
            reason: e.to_string(),
        })?;
        self.validate(&value)
    }

    /// Validate a candidate and return the typed event.
    pub fn validate(&self, candidate: &Value) -> Result<Event, SchemaError> {
        let object = candidate.as_object().ok_or(SchemaError::NotAnObject)?;

        if let Some(field) = REQUIRED_FIELDS
            .iter()
            .find(|f| object.get(**f).map_or(true, Value::is_null))
        {
            return Err(SchemaError::MissingField {
                field: field.to_string(),
            });
        }

        let raw_version = object["schema_version"]
            .as_str()
            .ok_or_else(|| SchemaError::InvalidVersion {
                value: object["schema_version"].to_string(),
            })?;
        let version: SchemaVersion = raw_version.parse()?;
        self.check_version(&version)?;

        let event: Event =
            serde_json::from_value(candidate.clone()).map_err(|e| SchemaError::Malformed {
                reason: e.to_string(),
            })?;
        self.check(&event)?;
        Ok(event)
    }

    /// Validate an already typed event (used before writing).
    pub fn check(&self, event: &Event) -> Result<(), SchemaError> {
        self.check_version(&event.schema_version)?;
        for (field, value) in [("namespace", &event.namespace), ("type", &event.kind)] {
            if !is_identifier(value) {
                return Err(SchemaError::InvalidIdentifier {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }
        if event.actor.trim().is_empty() {
            return Err(SchemaError::EmptyField {
                field: "actor".to_string(),
            });
        }
        if matches!(&event.task_id, Some(task) if task.trim().is_empty()) {
            return Err(SchemaError::EmptyField {
                field: "task_id".to_string(),
            });
        }

        let kind = event.routing_key();
        match self.payloads.check(&kind, &event.payload) {
            Some(result) => result,
            None if self.strict => Err(SchemaError::UnknownEventType { kind }),
            None => Ok(()),
        }
    }

    fn check_version(&self, version: &SchemaVersion) -> Result<(), SchemaError> {
        if self.supported_majors.contains(&version.major) {
            Ok(())
        } else {
            Err(SchemaError::UnsupportedVersion {
                major: version.major,
                supported: self.supported_majors(),
            })
        }
    }
}

impl Default for EventValidator {
    fn default() -> Self {
        Self::new([CURRENT_SCHEMA_VERSION.major])
    }
}

fn builtin_schema_documents() -> Vec<(&'static str, Value)> {
    let action_base = |required: &[&str], extra: Value| {
        let mut properties = json!({
            "domain": {"type": "string", "minLength": 1},
            "verb": {"type": "string", "minLength": 1},
            "duration_ms": {"type": "integer", "minimum": 0}
        });
        if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
            props.extend(extra.clone());
        }
        let mut all_required = vec!["domain", "verb"];
        all_required.extend_from_slice(required);
        json!({"type": "object", "required": all_required, "properties": properties})
    };

    vec![
        (
            "action.invoked",
            action_base(
                &["inputs", "input_fingerprint"],
                json!({"input_fingerprint": {"type": "string", "minLength": 1}}),
            ),
        ),
        (
            "action.succeeded",
            action_base(&["output", "duration_ms"], json!({})),
        ),
        (
            "action.failed",
            action_base(&["error"], json!({"error": {"type": "string"}})),
        ),
        (
            "action.aborted",
            action_base(&["reason"], json!({"reason": {"type": "string"}})),
        ),
        (
            "task.created",
            json!({
                "type": "object",
                "required": ["title"],
                "properties": {"title": {"type": "string", "minLength": 1}}
            }),
        ),
        (
            "task.state_changed",
            json!({
                "type": "object",
                "required": ["to"],
                "properties": {
                    "to": {"type": "string", "minLength": 1},
                    "from": {"type": "string"}
                }
            }),
        ),
        (
            "system.config_change",
            json!({
                "type": "object",
                "required": ["changed", "current_hash"],
                "properties": {
                    "changed": {"type": "array", "items": {"type": "string"}},
                    "previous_hash": {"type": ["string", "null"]},
                    "current_hash": {"type": "string"}
                }
            }),
        ),
        (
            "system.retention_applied",
            json!({
                "type": "object",
                "required": ["affected", "mode"],
                "properties": {
                    "affected": {"type": "array", "items": {"type": "string"}},
                    "mode": {"enum": ["archive", "delete"]}
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDraft, EventIdGenerator};
    use chrono::Utc;
    use proptest::prelude::*;

    fn event(namespace: &str, kind: &str, payload: Value) -> Event {
        let mut ids = EventIdGenerator::with_origin(3);
        let (id, ts) = ids.next(Utc::now());
        EventDraft::new(namespace, kind, "agent-1")
            .with_task("T-1")
            .with_payload(payload)
            .into_event(id, ts)
    }

    #[test]
    fn accepts_well_formed_event() {
        let e = event("task", "created", json!({"title": "Write docs"}));
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(EventValidator::default().validate(&value).unwrap(), e);
    }

    #[test]
    fn reports_first_missing_field() {
        let mut value = serde_json::to_value(event("git", "commit", json!({}))).unwrap();
        value.as_object_mut().unwrap().remove("correlation_id");
        assert_eq!(
            EventValidator::default().validate(&value),
            Err(SchemaError::MissingField {
                field: "correlation_id".to_string()
            })
        );
    }

    #[test]
    fn rejects_unknown_major_version() {
        let mut value = serde_json::to_value(event("git", "commit", json!({}))).unwrap();
        value["schema_version"] = json!("2.0.0");
        assert!(matches!(
            EventValidator::default().validate(&value),
            Err(SchemaError::UnsupportedVersion { major: 2, .. })
        ));
        // A reader that declares major 2 accepts it.
        assert!(EventValidator::new([1, 2]).validate(&value).is_ok());
    }

    #[test]
    fn newer_minor_versions_are_accepted() {
        let mut value = serde_json::to_value(event("git", "commit", json!({}))).unwrap();
        value["schema_version"] = json!("1.7.0");
        value["new_optional_field"] = json!(true);
        let parsed = EventValidator::default().validate(&value).unwrap();
        assert_eq!(parsed.schema_version, SchemaVersion::new(1, 7, 0));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), value);
    }

    #[test]
    fn payload_sub_schema_is_enforced() {
        let e = event("task", "created", json!({"summary": "no title"}));
        match EventValidator::default().check(&e) {
            Err(SchemaError::PayloadRejected { kind, errors }) => {
                assert_eq!(kind, "task.created");
                assert!(!errors.is_empty());
            }
            other => panic!("expected PayloadRejected, got {other:?}"),
        }
    }

    #[test]
    fn bad_identifiers_are_rejected() {
        let e = event("Git", "commit", json!({}));
        assert!(matches!(
            EventValidator::default().check(&e),
            Err(SchemaError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn strict_mode_rejects_unregistered_types() {
        let e = event("git", "commit", json!({}));
        assert!(EventValidator::default().check(&e).is_ok());
        assert!(matches!(
            EventValidator::default().strict(true).check(&e),
            Err(SchemaError::UnknownEventType { .. })
        ));
    }

    #[test]
    fn non_json_and_non_object_candidates() {
        let v = EventValidator::default();
        assert!(matches!(
            v.validate_str("{not json"),
            Err(SchemaError::InvalidJson { .. })
        ));
        assert_eq!(v.validate(&json!([1, 2])), Err(SchemaError::NotAnObject));
    }

    #[test]
    fn custom_payload_schema_can_be_added() {
        let v = EventValidator::default()
            .with_payload_schema(
                "git.commit",
                &json!({"type": "object", "required": ["sha"]}),
            )
            .unwrap();
        assert!(v.check(&event("git", "commit", json!({"sha": "abc"}))).is_ok());
        assert!(v.check(&event("git", "commit", json!({}))).is_err());
    }

    #[test]
    fn peek_event_id_reads_raw_lines() {
        assert_eq!(
            peek_event_id(r#"{"event_id": "x", "broken": }"#),
            None
        );
        assert_eq!(
            peek_event_id(r#"{"event_id": "abc"}"#).as_deref(),
            Some("abc")
        );
    }

    proptest! {
        #[test]
        fn validate_of_serialized_event_is_identity(
            namespace in "[a-z][a-z0-9_]{0,10}",
            kind in "[a-z][a-z0-9_]{0,10}",
            actor in "[a-zA-Z0-9_-]{1,12}",
            task in proptest::option::of("[A-Z]-[0-9]{1,4}"),
            note in ".{0,40}",
            count in any::<i64>(),
        ) {
            prop_assume!(namespace != "action" && namespace != "system" && namespace != "task");
            let mut ids = EventIdGenerator::new();
            let (id, ts) = ids.next(Utc::now());
            let mut draft = EventDraft::new(namespace, kind, actor)
                .with_payload(json!({"note": note, "count": count}));
            if let Some(task) = task {
                draft = draft.with_task(task);
            }
            let e = draft.into_event(id, ts);
            let line = e.to_line().unwrap();
            prop_assert_eq!(EventValidator::default().validate_str(&line).unwrap(), e);
        }
    }
}
