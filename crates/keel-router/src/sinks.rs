// sinks.rs — Built-in handlers: JSONL mirror, metrics, in-memory index.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use keel_events::Event;
use serde::Serialize;

use crate::error::HandlerError;
use crate::handler::EventHandler;

/// Mirrors events as JSONL to an external file.
///
/// This is a plain mirror for downstream tooling, not the log of record:
/// it takes no lock and makes no durability promise.
pub struct JsonlSink {
    name: String,
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventHandler for JsonlSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| HandlerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HandlerError::Io {
                path: self.path.clone(),
                source,
            })?;

        let json = event.to_line()?;
        writeln!(file, "{}", json).map_err(|source| HandlerError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Point-in-time counters collected by [`MetricsHandler`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_actor: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Counts events per `namespace.type` and per actor.
pub struct MetricsHandler {
    name: String,
    counters: Mutex<MetricsSnapshot>,
}

impl MetricsHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventHandler for MetricsHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.total += 1;
        *counters.by_kind.entry(event.routing_key()).or_insert(0) += 1;
        *counters.by_actor.entry(event.actor.clone()).or_insert(0) += 1;
        counters.last_seen = Some(
            counters
                .last_seen
                .map_or(event.timestamp, |seen| seen.max(event.timestamp)),
        );
        Ok(())
    }
}

/// Keeps recent events in memory for ad-hoc queries.
///
/// With a capacity the oldest events are evicted first; without one the
/// index grows with the log.
pub struct IndexHandler {
    name: String,
    capacity: Option<usize>,
    events: RwLock<VecDeque<Event>>,
}

impl IndexHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: None,
            events: RwLock::new(VecDeque::new()),
        }
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: Some(capacity.max(1)),
            events: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the indexed events, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Indexed events passing `predicate`, oldest first.
    pub fn select(&self, predicate: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}

impl EventHandler for IndexHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if let Some(capacity) = self.capacity {
            while events.len() >= capacity {
                events.pop_front();
            }
        }
        events.push_back(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_events::{EventDraft, EventIdGenerator, EventValidator};
    use tempfile::tempdir;

    fn events(specs: &[(&str, &str, &str)]) -> Vec<Event> {
        let mut ids = EventIdGenerator::with_origin(3);
        specs
            .iter()
            .map(|(ns, kind, actor)| {
                let (id, ts) = ids.next(Utc::now());
                EventDraft::new(*ns, *kind, *actor).into_event(id, ts)
            })
            .collect()
    }

    #[test]
    fn jsonl_sink_mirrors_valid_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror/events.jsonl");
        let sink = JsonlSink::new("mirror", &path);
        let written = events(&[("git", "commit", "a"), ("git", "merge", "b")]);
        for e in &written {
            sink.handle(e).unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let validator = EventValidator::default();
        let read: Vec<Event> = content
            .lines()
            .map(|l| validator.validate_str(l).unwrap())
            .collect();
        assert_eq!(read, written);
    }

    #[test]
    fn jsonl_sink_reports_unwritable_path() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let sink = JsonlSink::new("mirror", blocker.join("events.jsonl"));
        let err = sink.handle(&events(&[("git", "commit", "a")])[0]).unwrap_err();
        assert!(matches!(err, HandlerError::Io { .. }));
    }

    #[test]
    fn metrics_count_by_kind_and_actor() {
        let metrics = MetricsHandler::new("metrics");
        for e in events(&[
            ("git", "commit", "a"),
            ("git", "commit", "b"),
            ("task", "created", "a"),
        ]) {
            metrics.handle(&e).unwrap();
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.by_kind["git.commit"], 2);
        assert_eq!(snapshot.by_actor["a"], 2);
        assert!(snapshot.last_seen.is_some());
    }

    #[test]
    fn bounded_index_evicts_oldest() {
        let index = IndexHandler::with_capacity("index", 2);
        let all = events(&[
            ("git", "commit", "a"),
            ("git", "merge", "a"),
            ("task", "created", "b"),
        ]);
        for e in &all {
            index.handle(e).unwrap();
        }
        assert_eq!(index.snapshot(), all[1..].to_vec());
        assert_eq!(index.select(|e| e.actor == "b").len(), 1);
    }
}
