// event.rs — The canonical event record.
//
// Every significant operation in the workflow (task state change, git
// action, scan, container step, decision, action lifecycle) is recorded as
// an Event: one line in the JSONL log. Events are immutable once written.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::EventIdParseError;
use crate::version::{SchemaVersion, CURRENT_SCHEMA_VERSION};

/// Well-known namespaces.
pub mod namespaces {
    pub const TASK: &str = "task";
    pub const GIT: &str = "git";
    pub const ACTION: &str = "action";
    pub const DECISION: &str = "decision";
    pub const CONTAINER: &str = "container";
    pub const SECURITY: &str = "security";
    pub const SYSTEM: &str = "system";
}

/// Identifier of an event, ordered by time, then writer, then sequence.
///
/// Rendered as `<micros:016x>-<origin:08x>-<seq:012x>`. The fixed-width hex
/// makes the string order equal to the numeric order, so ids sort the same
/// way in files, maps and shell tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId {
    pub micros: u64,
    pub origin: u32,
    pub seq: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:08x}-{:012x}", self.micros, self.origin, self.seq)
    }
}

impl FromStr for EventId {
    type Err = EventIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || EventIdParseError(s.to_string());
        let mut parts = s.split('-');
        let (Some(micros), Some(origin), Some(seq), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        if micros.len() != 16 || origin.len() != 8 || seq.len() != 12 {
            return Err(err());
        }
        Ok(EventId {
            micros: u64::from_str_radix(micros, 16).map_err(|_| err())?,
            origin: u32::from_str_radix(origin, 16).map_err(|_| err())?,
            seq: u64::from_str_radix(seq, 16).map_err(|_| err())?,
        })
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hands out strictly increasing ids and non-decreasing timestamps for one
/// writer instance, even if the wall clock steps backwards.
#[derive(Debug)]
pub struct EventIdGenerator {
    origin: u32,
    seq: u64,
    last: Option<DateTime<Utc>>,
}

impl EventIdGenerator {
    /// A generator with a random origin tag.
    pub fn new() -> Self {
        Self::with_origin(Uuid::new_v4().as_u128() as u32)
    }

    pub fn with_origin(origin: u32) -> Self {
        Self {
            origin,
            seq: 0,
            last: None,
        }
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Stamp the next event observed at `now`.
    pub fn next(&mut self, now: DateTime<Utc>) -> (EventId, DateTime<Utc>) {
        let timestamp = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last = Some(timestamp);
        self.seq += 1;
        let id = EventId {
            micros: timestamp.timestamp_micros().max(0) as u64,
            origin: self.origin,
            seq: self.seq,
        };
        (id, timestamp)
    }
}

impl Default for EventIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A single event: one line in the JSONL log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub schema_version: SchemaVersion,
    pub event_id: EventId,
    /// Top-level category used for routing (`task`, `git`, ...).
    pub namespace: String,
    /// Type within the namespace (`created`, `commit`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    /// Shared by every event of one causal chain.
    pub correlation_id: Uuid,
    /// Agent or human identifier.
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub payload: serde_json::Value,
    /// Fields added by a newer minor version, carried through untouched.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Event {
    /// The `namespace.type` key patterns are matched against.
    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.namespace, self.kind)
    }

    pub fn is(&self, namespace: &str, kind: &str) -> bool {
        self.namespace == namespace && self.kind == kind
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An event before the writer has stamped its id and timestamp.
///
/// Producers describe what happened; the writer decides when and in which
/// order it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub namespace: String,
    pub kind: String,
    pub actor: String,
    pub task_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

impl EventDraft {
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            actor: actor.into(),
            task_id: None,
            correlation_id: None,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Finish the draft with writer-assigned identity. A fresh correlation
    /// id is generated when the producer did not supply one.
    pub fn into_event(self, event_id: EventId, timestamp: DateTime<Utc>) -> Event {
        Event {
            schema_version: CURRENT_SCHEMA_VERSION,
            event_id,
            namespace: self.namespace,
            kind: self.kind,
            timestamp,
            correlation_id: self.correlation_id.unwrap_or_else(Uuid::new_v4),
            actor: self.actor,
            task_id: self.task_id,
            payload: self.payload,
            extensions: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample() -> Event {
        let mut ids = EventIdGenerator::with_origin(7);
        let (id, ts) = ids.next(Utc::now());
        EventDraft::new("task", "created", "agent-1")
            .with_task("T-1")
            .with_payload(json!({"title": "Add login"}))
            .into_event(id, ts)
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = sample();
        let line = event.to_line().unwrap();
        let restored: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(event, restored);
        assert!(line.contains("\"type\":\"created\""));
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["trace_parent"] = json!("00-abc");
        let event: Event = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(event.extensions["trace_parent"], json!("00-abc"));
        assert_eq!(serde_json::to_value(&event).unwrap(), value);
    }

    #[test]
    fn event_id_string_order_matches_numeric_order() {
        let a = EventId { micros: 9, origin: 1, seq: 15 };
        let b = EventId { micros: 10, origin: 0, seq: 1 };
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
        assert_eq!(a.to_string().parse::<EventId>().unwrap(), a);
    }

    #[test]
    fn event_id_rejects_wrong_shapes() {
        assert!("abc".parse::<EventId>().is_err());
        assert!("0-0-0".parse::<EventId>().is_err());
        assert!("000000000000000g-00000000-000000000001"
            .parse::<EventId>()
            .is_err());
    }

    #[test]
    fn generator_is_monotonic_when_clock_steps_back() {
        let mut ids = EventIdGenerator::with_origin(1);
        let now = Utc::now();
        let (first, t1) = ids.next(now);
        let (second, t2) = ids.next(now - Duration::seconds(5));
        assert!(second > first);
        assert_eq!(t1, t2);
    }

    #[test]
    fn draft_generates_correlation_when_absent() {
        let mut ids = EventIdGenerator::new();
        let (id, ts) = ids.next(Utc::now());
        let e1 = EventDraft::new("git", "commit", "a").into_event(id, ts);
        let (id, ts) = ids.next(Utc::now());
        let e2 = EventDraft::new("git", "commit", "a").into_event(id, ts);
        assert_ne!(e1.correlation_id, e2.correlation_id);
        assert_eq!(e1.routing_key(), "git.commit");
    }
}
