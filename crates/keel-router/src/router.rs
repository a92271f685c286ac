// router.rs — Pattern-based fan-out of written events.
//
// The router taps every successful append (it is an AppendObserver on the
// writer) and delivers a copy of the event to every route whose pattern
// and filter match. Delivery is best-effort:
//
// - A handler error or panic is caught, logged and counted; siblings still
//   receive the event.
// - Routes are snapshotted before delivery, so a handler may register or
//   unregister routes without deadlocking the router.
// - Handlers see events in append order; relative timing between handlers
//   is not guaranteed (see QueuedHandler).

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use keel_events::{Event, EventFilter, EventPattern};
use keel_log::AppendObserver;
use serde::Serialize;

use crate::error::HandlerError;
use crate::handler::EventHandler;

/// Handle returned by `register`, used to unregister a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(u64);

struct Route {
    id: RouteId,
    pattern: EventPattern,
    filter: EventFilter,
    handler: Arc<dyn EventHandler>,
}

/// Delivery counters for one handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    pub delivered: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventRouter {
    routes: RwLock<Vec<Route>>,
    next_id: AtomicU64,
    stats: Mutex<BTreeMap<String, HandlerStats>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver events matching `pattern` to `handler`.
    pub fn register(&self, pattern: EventPattern, handler: Arc<dyn EventHandler>) -> RouteId {
        self.register_filtered(pattern, EventFilter::default(), handler)
    }

    /// Like `register`, but the handler only sees events that also pass
    /// `filter` (task, actor, time range).
    pub fn register_filtered(
        &self,
        pattern: EventPattern,
        filter: EventFilter,
        handler: Arc<dyn EventHandler>,
    ) -> RouteId {
        let id = RouteId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(handler = handler.name(), pattern = %pattern, "route registered");
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Route {
                id,
                pattern,
                filter,
                handler,
            });
        id
    }

    /// Remove a route. Returns false if it was not registered.
    pub fn unregister(&self, id: RouteId) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let before = routes.len();
        routes.retain(|r| r.id != id);
        routes.len() != before
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver one event to every matching route.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let key = event.routing_key();
        let targets: Vec<Arc<dyn EventHandler>> = self
            .routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.pattern.matches_key(&key) && r.filter.matches(event))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        let mut report = DispatchReport {
            matched: targets.len(),
            failed: 0,
        };
        for handler in targets {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event)))
                .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload))));
            if let Err(e) = &result {
                report.failed += 1;
                tracing::warn!(
                    handler = handler.name(),
                    event_id = %event.event_id,
                    kind = %key,
                    error = %e,
                    "event handler failed"
                );
            }
            self.record(handler.name(), result);
        }
        report
    }

    /// Per-handler delivery counters, keyed by handler name.
    pub fn stats(&self) -> BTreeMap<String, HandlerStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, handler: &str, result: Result<(), HandlerError>) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(handler.to_string()).or_default();
        match result {
            Ok(()) => entry.delivered += 1,
            Err(e) => {
                entry.failed += 1;
                entry.last_error = Some(e.to_string());
            }
        }
    }
}

impl AppendObserver for EventRouter {
    fn on_append(&self, event: &Event) {
        self.dispatch(event);
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use keel_events::{EventDraft, EventIdGenerator};
    use keel_log::{EventWriter, WriterOptions};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn event(ns: &str, kind: &str, task: &str, actor: &str) -> Event {
        let mut ids = EventIdGenerator::with_origin(1);
        let (id, ts) = ids.next(chrono::Utc::now());
        EventDraft::new(ns, kind, actor)
            .with_task(task)
            .into_event(id, ts)
    }

    fn collector(name: &str) -> (Arc<Mutex<Vec<String>>>, Arc<dyn EventHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = FnHandler::new(name, move |e: &Event| {
            sink.lock().unwrap().push(e.routing_key());
            Ok(())
        });
        (seen, Arc::new(handler))
    }

    #[test]
    fn delivers_only_to_matching_patterns() {
        let router = EventRouter::new();
        let (git, git_handler) = collector("git");
        let (all, all_handler) = collector("all");
        router.register(EventPattern::new("git.*").unwrap(), git_handler);
        router.register(EventPattern::any(), all_handler);

        router.dispatch(&event("git", "commit", "T-1", "a"));
        router.dispatch(&event("task", "created", "T-1", "a"));

        assert_eq!(*git.lock().unwrap(), vec!["git.commit"]);
        assert_eq!(*all.lock().unwrap(), vec!["git.commit", "task.created"]);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_siblings() {
        let router = EventRouter::new();
        router.register(
            EventPattern::any(),
            Arc::new(FnHandler::new("broken", |_: &Event| {
                Err(HandlerError::Rejected("nope".into()))
            })),
        );
        router.register(
            EventPattern::any(),
            Arc::new(FnHandler::new("panicky", |_: &Event| -> Result<(), HandlerError> {
                panic!("handler blew up")
            })),
        );
        let (seen, ok_handler) = collector("ok");
        router.register(EventPattern::any(), ok_handler);

        let report = router.dispatch(&event("git", "commit", "T-1", "a"));
        assert_eq!(report, DispatchReport { matched: 3, failed: 2 });
        assert_eq!(seen.lock().unwrap().len(), 1);

        let stats = router.stats();
        assert_eq!(stats["broken"].failed, 1);
        assert!(stats["panicky"]
            .last_error
            .as_deref()
            .unwrap()
            .contains("handler blew up"));
        assert_eq!(stats["ok"].delivered, 1);
    }

    #[test]
    fn filters_by_task_and_actor() {
        let router = EventRouter::new();
        let (seen, handler) = collector("t1");
        router.register_filtered(
            EventPattern::any(),
            EventFilter::new().task("T-1").actor("agent-1"),
            handler,
        );

        router.dispatch(&event("git", "commit", "T-1", "agent-1"));
        router.dispatch(&event("git", "commit", "T-2", "agent-1"));
        router.dispatch(&event("git", "commit", "T-1", "agent-2"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unregister_stops_delivery() {
        let router = EventRouter::new();
        let (seen, handler) = collector("c");
        let id = router.register(EventPattern::any(), handler);
        assert!(router.unregister(id));
        assert!(!router.unregister(id));
        router.dispatch(&event("git", "commit", "T-1", "a"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn taps_every_write_of_the_writer() {
        let dir = tempdir().unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path()).with_fsync(false));
        let router = Arc::new(EventRouter::new());
        writer.add_observer(router.clone());
        let (seen, handler) = collector("c");
        router.register(EventPattern::new("container").unwrap(), handler);

        writer
            .emit(EventDraft::new("container", "started", "agent-1"))
            .unwrap();
        writer.emit(EventDraft::new("git", "commit", "agent-1")).unwrap();
        writer
            .emit(EventDraft::new("container", "stopped", "agent-1"))
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["container.started", "container.stopped"]
        );
    }
}
