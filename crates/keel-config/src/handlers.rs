// handlers.rs — Build the configured handlers and register them on a router.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_events::EventPattern;
use keel_router::{
    EventHandler, EventRouter, HandlerError, IndexHandler, JsonlSink, MetricsHandler,
    QueuedHandler, RouteId,
};

use crate::config::{HandlerConfig, HandlerKind, KeelConfig};
use crate::error::ConfigError;

/// Handlers installed from config, kept so callers can read their state.
#[derive(Default)]
pub struct InstalledHandlers {
    pub routes: Vec<RouteId>,
    pub metrics: BTreeMap<String, Arc<MetricsHandler>>,
    pub indexes: BTreeMap<String, Arc<IndexHandler>>,
    queues: Vec<Arc<QueuedHandler>>,
}

impl InstalledHandlers {
    /// Wait until every queued handler has processed what it was given.
    pub fn flush(&self) -> Result<(), HandlerError> {
        for queue in &self.queues {
            queue.flush()?;
        }
        Ok(())
    }

    /// Remove every installed route from `router`.
    pub fn uninstall(&self, router: &EventRouter) {
        for id in &self.routes {
            router.unregister(*id);
        }
    }
}

impl KeelConfig {
    /// Register every `[[handlers]]` entry on `router`.
    pub fn install_handlers(&self, router: &EventRouter) -> Result<InstalledHandlers, ConfigError> {
        let mut installed = InstalledHandlers::default();
        for entry in &self.handlers {
            let pattern = EventPattern::new(&entry.pattern)?;
            let handler = build(entry, &mut installed)?;
            let handler: Arc<dyn EventHandler> = if entry.queued {
                let queue = Arc::new(QueuedHandler::spawn(handler));
                installed.queues.push(Arc::clone(&queue));
                queue
            } else {
                handler
            };
            installed
                .routes
                .push(router.register_filtered(pattern, entry.filter.clone(), handler));
            tracing::info!(
                handler = %entry.name,
                pattern = %entry.pattern,
                queued = entry.queued,
                "configured handler installed"
            );
        }
        Ok(installed)
    }
}

fn build(
    entry: &HandlerConfig,
    installed: &mut InstalledHandlers,
) -> Result<Arc<dyn EventHandler>, ConfigError> {
    Ok(match entry.kind {
        HandlerKind::Jsonl => {
            let path = entry.path.as_ref().ok_or_else(|| ConfigError::Invalid {
                field: format!("handlers.{}.path", entry.name),
                reason: "jsonl handlers need a path".to_string(),
            })?;
            Arc::new(JsonlSink::new(entry.name.clone(), path))
        }
        HandlerKind::Metrics => {
            let metrics = Arc::new(MetricsHandler::new(entry.name.clone()));
            installed
                .metrics
                .insert(entry.name.clone(), Arc::clone(&metrics));
            metrics
        }
        HandlerKind::Index => {
            let index = Arc::new(match entry.capacity {
                Some(capacity) => IndexHandler::with_capacity(entry.name.clone(), capacity),
                None => IndexHandler::new(entry.name.clone()),
            });
            installed.indexes.insert(entry.name.clone(), Arc::clone(&index));
            index
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_events::EventDraft;
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;

    fn config(dir: &Path) -> KeelConfig {
        KeelConfig::from_toml(
            r#"
[log]
dir = "events"
fsync = false

[[handlers]]
name = "actions"
pattern = "action.*"
kind = "jsonl"
path = "out/actions.jsonl"
queued = true

[[handlers]]
name = "counts"
kind = "metrics"

[[handlers]]
name = "agent-1"
kind = "index"
filter = { actor = "agent-1" }
"#,
            dir,
            &dir.join("keel.toml"),
        )
        .unwrap()
    }

    #[test]
    fn configured_handlers_see_appended_events() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let router = Arc::new(EventRouter::new());
        let installed = config.install_handlers(&router).unwrap();
        assert_eq!(router.route_count(), 3);

        let writer = config.writer();
        writer.add_observer(router.clone());
        writer
            .emit(
                EventDraft::new("action", "aborted", "agent-1")
                    .with_payload(json!({"domain": "git", "verb": "merge", "reason": "stop"})),
            )
            .unwrap();
        writer
            .emit(EventDraft::new("decision", "recorded", "agent-2").with_payload(json!({"summary": "s"})))
            .unwrap();
        installed.flush().unwrap();

        let sink = std::fs::read_to_string(dir.path().join("out/actions.jsonl")).unwrap();
        assert_eq!(sink.lines().count(), 1);
        assert_eq!(installed.metrics["counts"].snapshot().total, 2);
        assert_eq!(installed.indexes["agent-1"].len(), 1);

        installed.uninstall(&router);
        assert_eq!(router.route_count(), 0);
    }
}
