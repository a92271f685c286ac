// idempotency.rs — Explicit result reuse for idempotent actions.
//
// An idempotent descriptor opts into a cache keyed by the action, its
// logical target and a fingerprint of the inputs. A repeat call with the
// same key after a success is answered from the cache; the log still
// records it (invoked + succeeded with `deduplicated_from`).
//
// The cache is only an accelerator over the log: it can be rebuilt at any
// time by seeding it from replayed history.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use keel_events::{
    action_types, namespaces, ActionKey, Event, InvokedPayload, SucceededPayload,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::registry::ActionRegistry;

/// SHA-256 over the canonical JSON of `inputs`, hex-encoded.
///
/// Canonical means object keys sorted at every level, so two inputs that
/// differ only in key order fingerprint the same.
pub fn fingerprint(inputs: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(inputs).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let fields: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub action: ActionKey,
    pub target: Option<String>,
    pub fingerprint: String,
}

/// The first successful result for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub correlation_id: Uuid,
    pub output: Value,
}

#[derive(Debug, Default)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<IdempotencyKey, CachedResult>>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<CachedResult> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Remember a result. An existing entry is kept: the first success
    /// stays the one later calls point at.
    pub fn insert(&self, key: IdempotencyKey, result: CachedResult) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_insert(result);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild entries from history: every `action.succeeded` of an
    /// idempotent action, paired with its `action.invoked` by correlation
    /// id. Returns how many entries were added.
    pub fn seed_from_events(&self, registry: &ActionRegistry, events: &[Event]) -> usize {
        let mut invoked: HashMap<Uuid, InvokedPayload> = HashMap::new();
        let mut added = 0;
        for event in events {
            if event.namespace != namespaces::ACTION {
                continue;
            }
            match event.kind.as_str() {
                action_types::INVOKED => {
                    if let Ok(payload) =
                        serde_json::from_value::<InvokedPayload>(event.payload.clone())
                    {
                        invoked.insert(event.correlation_id, payload);
                    }
                }
                action_types::SUCCEEDED => {
                    let Some(call) = invoked.remove(&event.correlation_id) else {
                        continue;
                    };
                    let Ok(done) =
                        serde_json::from_value::<SucceededPayload>(event.payload.clone())
                    else {
                        continue;
                    };
                    let action = ActionKey::new(&call.domain, &call.verb);
                    if !registry.get(&action).is_some_and(|a| a.descriptor().idempotent) {
                        continue;
                    }
                    let before = self.len();
                    self.insert(
                        IdempotencyKey {
                            action,
                            target: call.target,
                            fingerprint: call.input_fingerprint,
                        },
                        CachedResult {
                            correlation_id: done.deduplicated_from.unwrap_or(event.correlation_id),
                            output: done.output,
                        },
                    );
                    added += self.len() - before;
                }
                _ => {
                    invoked.remove(&event.correlation_id);
                }
            }
        }
        added
    }
}
