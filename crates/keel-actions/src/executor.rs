// executor.rs — The generic action execution wrapper.
//
// One function wraps every action. Given a request it:
//
//   1. looks the descriptor up              → UnknownAction, nothing written
//   2. validates inputs                     → InvalidInput, nothing written
//   3. writes `action.invoked`
//   4. runs the operation (cancellable, panics caught)
//   5. writes exactly one terminal event: succeeded | failed | aborted
//
// Step 5 is held by a TerminalGuard. The normal paths settle the guard
// explicitly; if the invoke future is dropped mid-flight the guard's Drop
// writes `aborted`, and a panic in the operation is recorded as `failed`
// before it is resumed. Either way an invocation has one terminal event.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use keel_events::{
    action_types, namespaces, AbortedPayload, ActionKey, Event, EventDraft, FailedPayload,
    FailureKind, InvokedPayload, SucceededPayload,
};
use keel_log::{Emitter, WriteError};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::descriptor::ActionDescriptor;
use crate::error::{ActionError, OperationError};
use crate::idempotency::{fingerprint, CachedResult, IdempotencyCache, IdempotencyKey};
use crate::registry::ActionRegistry;

const DEFAULT_ACTOR: &str = "keel";

/// What to invoke, on whose behalf.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub domain: String,
    pub verb: String,
    pub inputs: Value,
    pub actor: String,
    pub task_id: Option<String>,
    /// Generated when absent.
    pub correlation_id: Option<Uuid>,
    pub cancel: Option<CancelToken>,
}

impl InvocationRequest {
    pub fn new(domain: impl Into<String>, verb: impl Into<String>, inputs: Value) -> Self {
        Self {
            domain: domain.into(),
            verb: verb.into(),
            inputs,
            actor: DEFAULT_ACTOR.to_string(),
            task_id: None,
            correlation_id: None,
            cancel: None,
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn key(&self) -> ActionKey {
        ActionKey::new(&self.domain, &self.verb)
    }
}

/// Identity shared by every event of one invocation.
#[derive(Clone)]
struct Scope {
    emitter: Arc<dyn Emitter>,
    key: ActionKey,
    actor: String,
    task_id: Option<String>,
    correlation_id: Uuid,
}

impl Scope {
    fn draft(&self, namespace: &str, kind: &str, payload: Value) -> EventDraft {
        let draft = EventDraft::new(namespace, kind, &self.actor)
            .with_correlation(self.correlation_id)
            .with_payload(payload);
        match &self.task_id {
            Some(task) => draft.with_task(task),
            None => draft,
        }
    }

    fn emit_action(&self, kind: &str, payload: impl Serialize) -> Result<Event, WriteError> {
        let payload = serde_json::to_value(payload)?;
        self.emitter.emit(self.draft(namespaces::ACTION, kind, payload))
    }
}

/// Handle given to a running operation.
#[derive(Clone)]
pub struct ActionContext {
    scope: Scope,
    descriptor: Arc<ActionDescriptor>,
    inputs: Arc<Value>,
    cancel: CancelToken,
    violation: Arc<Mutex<Option<OperationError>>>,
}

impl ActionContext {
    pub fn correlation_id(&self) -> Uuid {
        self.scope.correlation_id
    }

    pub fn key(&self) -> &ActionKey {
        &self.scope.key
    }

    pub fn actor(&self) -> &str {
        &self.scope.actor
    }

    pub fn task_id(&self) -> Option<&str> {
        self.scope.task_id.as_deref()
    }

    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    /// Cooperative cancellation check for long-running operations.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Emit one of the action's declared side-effect events, correlated
    /// with this invocation.
    ///
    /// An undeclared side effect is not written and fails the invocation,
    /// even if the operation swallows the returned error.
    pub fn side_effect(
        &self,
        namespace: &str,
        kind: &str,
        payload: Value,
    ) -> Result<Event, OperationError> {
        let routing_key = format!("{}.{}", namespace, kind);
        if !self.descriptor.declares(&routing_key) {
            let error = OperationError::with_failure(
                format!("undeclared side effect '{}'", routing_key),
                FailureKind::UndeclaredSideEffect,
            );
            tracing::warn!(
                action = %self.scope.key,
                correlation_id = %self.scope.correlation_id,
                side_effect = %routing_key,
                "operation attempted an undeclared side effect"
            );
            self.violation
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_or_insert_with(|| error.clone());
            return Err(error);
        }
        self.scope
            .emitter
            .emit(self.scope.draft(namespace, kind, payload))
            .map_err(|e| {
                OperationError::with_failure(
                    format!("failed to record side effect '{}': {}", routing_key, e),
                    FailureKind::SideEffectWrite,
                )
            })
    }

    fn take_violation(&self) -> Option<OperationError> {
        self.violation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Owes the log one terminal event for an invocation.
struct TerminalGuard {
    scope: Scope,
    started: Instant,
    settled: bool,
}

impl TerminalGuard {
    fn new(scope: Scope) -> Self {
        Self {
            scope,
            started: Instant::now(),
            settled: false,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn succeed(&mut self, output: Value, deduplicated_from: Option<Uuid>) -> Result<Event, WriteError> {
        self.settled = true;
        let payload = SucceededPayload {
            domain: self.scope.key.domain.clone(),
            verb: self.scope.key.verb.clone(),
            output,
            duration_ms: self.elapsed_ms(),
            deduplicated_from,
        };
        self.scope.emit_action(action_types::SUCCEEDED, payload)
    }

    fn fail(&mut self, error: &str, failure: FailureKind) -> Result<Event, WriteError> {
        self.settled = true;
        let payload = FailedPayload {
            domain: self.scope.key.domain.clone(),
            verb: self.scope.key.verb.clone(),
            error: error.to_string(),
            failure,
            duration_ms: self.elapsed_ms(),
        };
        self.scope.emit_action(action_types::FAILED, payload)
    }

    fn abort(&mut self, reason: &str) -> Result<Event, WriteError> {
        self.settled = true;
        let payload = AbortedPayload {
            domain: self.scope.key.domain.clone(),
            verb: self.scope.key.verb.clone(),
            reason: reason.to_string(),
            duration_ms: self.elapsed_ms(),
        };
        self.scope.emit_action(action_types::ABORTED, payload)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let result = if std::thread::panicking() {
            self.fail("invocation panicked", FailureKind::Panic)
        } else {
            self.abort("invocation dropped before completion")
        };
        match result {
            Ok(event) => tracing::warn!(
                action = %self.scope.key,
                correlation_id = %self.scope.correlation_id,
                outcome = %event.kind,
                "invocation ended without settling; terminal event recorded"
            ),
            Err(e) => tracing::error!(
                action = %self.scope.key,
                correlation_id = %self.scope.correlation_id,
                error = %e,
                "failed to record terminal event for abandoned invocation"
            ),
        }
    }
}

enum Outcome {
    Finished(Result<Value, OperationError>),
    Panicked(Box<dyn Any + Send>),
    Cancelled(String),
}

/// Runs registered actions with the full event lifecycle.
#[derive(Clone)]
pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    emitter: Arc<dyn Emitter>,
    cache: Arc<IdempotencyCache>,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ActionRegistry>, emitter: Arc<dyn Emitter>) -> Self {
        Self {
            registry,
            emitter,
            cache: Arc::new(IdempotencyCache::new()),
        }
    }

    /// Share an existing (for example pre-seeded) idempotency cache.
    pub fn with_cache(mut self, cache: Arc<IdempotencyCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &IdempotencyCache {
        &self.cache
    }

    /// Invoke `operation` as the action named by `request`.
    ///
    /// A panic inside the operation is recorded as `action.failed` and
    /// then resumed on the caller.
    pub async fn invoke<F, Fut>(
        &self,
        request: InvocationRequest,
        operation: F,
    ) -> Result<Value, ActionError>
    where
        F: FnOnce(ActionContext) -> Fut,
        Fut: Future<Output = Result<Value, OperationError>>,
    {
        let key = request.key();
        let action = self
            .registry
            .get(&key)
            .ok_or_else(|| ActionError::UnknownAction { key: key.clone() })?;
        action
            .check_input(&request.inputs)
            .map_err(|errors| ActionError::InvalidInput {
                key: key.clone(),
                errors,
            })?;

        let descriptor = action.descriptor();
        let correlation_id = request.correlation_id.unwrap_or_else(Uuid::new_v4);
        let scope = Scope {
            emitter: Arc::clone(&self.emitter),
            key: key.clone(),
            actor: request.actor.clone(),
            task_id: request.task_id.clone(),
            correlation_id,
        };
        let idempotency_key = IdempotencyKey {
            action: key.clone(),
            target: descriptor.target_of(&request.inputs),
            fingerprint: fingerprint(&request.inputs),
        };

        scope
            .emit_action(
                action_types::INVOKED,
                InvokedPayload {
                    domain: key.domain.clone(),
                    verb: key.verb.clone(),
                    inputs: request.inputs.clone(),
                    input_fingerprint: idempotency_key.fingerprint.clone(),
                    target: idempotency_key.target.clone(),
                },
            )
            .map_err(|source| ActionError::Write {
                key: key.clone(),
                source,
            })?;
        let mut guard = TerminalGuard::new(scope.clone());

        let cached = if descriptor.idempotent {
            self.cache.get(&idempotency_key)
        } else {
            None
        };
        if let Some(cached) = cached {
            tracing::info!(
                action = %key,
                correlation_id = %correlation_id,
                original = %cached.correlation_id,
                "idempotent invocation answered from earlier result"
            );
            guard
                .succeed(cached.output.clone(), Some(cached.correlation_id))
                .map_err(|source| ActionError::TerminalWrite {
                    key: key.clone(),
                    correlation_id,
                    source,
                })?;
            return Ok(cached.output);
        }

        let cancel = request.cancel.clone().unwrap_or_default();
        let ctx = ActionContext {
            scope,
            descriptor: Arc::new(descriptor.clone()),
            inputs: Arc::new(request.inputs.clone()),
            cancel: cancel.clone(),
            violation: Arc::new(Mutex::new(None)),
        };
        let run_ctx = ctx.clone();
        // The closure itself runs inside the catch so a panic while
        // building the future is caught too.
        let run = AssertUnwindSafe(async move { operation(run_ctx).await }).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled(
                cancel.reason().unwrap_or_else(|| "cancelled by caller".to_string()),
            ),
            result = run => match result {
                Ok(result) => Outcome::Finished(result),
                Err(payload) => Outcome::Panicked(payload),
            },
        };

        let terminal_write = |source: WriteError| ActionError::TerminalWrite {
            key: key.clone(),
            correlation_id,
            source,
        };

        match outcome {
            Outcome::Finished(result) => {
                let result = match (result, ctx.take_violation()) {
                    (Ok(_), Some(violation)) => Err(violation),
                    (result, _) => result,
                };
                match result {
                    Ok(output) => {
                        if let Err(errors) = action.check_output(&output) {
                            let message = format!("output rejected: {}", errors.join("; "));
                            guard
                                .fail(&message, FailureKind::OutputSchema)
                                .map_err(terminal_write)?;
                            return Err(ActionError::Failed {
                                key,
                                correlation_id,
                                failure: FailureKind::OutputSchema,
                                message,
                            });
                        }
                        guard
                            .succeed(output.clone(), None)
                            .map_err(terminal_write)?;
                        if descriptor.idempotent {
                            self.cache.insert(
                                idempotency_key,
                                CachedResult {
                                    correlation_id,
                                    output: output.clone(),
                                },
                            );
                        }
                        Ok(output)
                    }
                    Err(error) => {
                        guard
                            .fail(&error.message, error.failure)
                            .map_err(terminal_write)?;
                        Err(ActionError::Failed {
                            key,
                            correlation_id,
                            failure: error.failure,
                            message: error.message,
                        })
                    }
                }
            }
            Outcome::Cancelled(reason) => {
                guard.abort(&reason).map_err(terminal_write)?;
                Err(ActionError::Aborted {
                    key,
                    correlation_id,
                    reason,
                })
            }
            Outcome::Panicked(payload) => {
                let message = panic_message(payload.as_ref());
                if let Err(e) = guard.fail(&message, FailureKind::Panic) {
                    tracing::error!(
                        action = %key,
                        correlation_id = %correlation_id,
                        error = %e,
                        "failed to record panicked invocation"
                    );
                }
                std::panic::resume_unwind(payload)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("operation panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("operation panicked: {}", s)
    } else {
        "operation panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::descriptor::ActionDescriptor;
    use keel_events::EventIdGenerator;
    use serde_json::json;

    /// Keeps emitted events in memory.
    #[derive(Default)]
    struct Recorder {
        ids: Mutex<EventIdGenerator>,
        events: Mutex<Vec<Event>>,
    }

    impl Emitter for Recorder {
        fn emit(&self, draft: EventDraft) -> Result<Event, WriteError> {
            let (id, ts) = self.ids.lock().unwrap().next(chrono::Utc::now());
            let event = draft.into_event(id, ts);
            self.events.lock().unwrap().push(event.clone());
            Ok(event)
        }
    }

    impl Recorder {
        fn kinds(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(Event::routing_key)
                .collect()
        }
    }

    fn executor() -> (Arc<Recorder>, ActionExecutor) {
        let recorder = Arc::new(Recorder::default());
        let registry = catalog::standard_builder()
            .unwrap()
            .with(ActionDescriptor::new("test", "echo").idempotent())
            .unwrap()
            .build();
        let executor = ActionExecutor::new(Arc::new(registry), recorder.clone());
        (recorder, executor)
    }

    #[tokio::test]
    async fn unknown_action_writes_nothing() {
        let (recorder, executor) = executor();
        let err = executor
            .invoke(InvocationRequest::new("task", "teleport", json!({})), |_| async {
                Ok(json!(null))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::UnknownAction { .. }));
        assert!(recorder.kinds().is_empty());
    }

    #[tokio::test]
    async fn output_schema_violation_is_a_failure() {
        let (recorder, executor) = executor();
        let err = executor
            .invoke(
                InvocationRequest::new("git", "commit", json!({"branch": "b", "message": "m"})),
                |_| async { Ok(json!({"sha": "abc"})) },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::Failed {
                failure: FailureKind::OutputSchema,
                ..
            }
        ));
        assert_eq!(recorder.kinds(), vec!["action.invoked", "action.failed"]);
    }

    #[tokio::test]
    async fn declared_side_effects_share_the_correlation_id() {
        let (recorder, executor) = executor();
        let request = InvocationRequest::new("git", "commit", json!({"branch": "b", "message": "m"}))
            .actor("agent-1")
            .task("T-1");
        executor
            .invoke(request, |ctx| async move {
                ctx.side_effect("git", "committed", json!({"sha": "abcdef1"}))?;
                Ok::<_, OperationError>(json!({"sha": "abcdef1"}))
            })
            .await
            .unwrap();

        let events = recorder.events.lock().unwrap();
        let kinds: Vec<String> = events.iter().map(Event::routing_key).collect();
        assert_eq!(kinds, vec!["action.invoked", "git.committed", "action.succeeded"]);
        assert!(events
            .iter()
            .all(|e| e.correlation_id == events[0].correlation_id
                && e.task_id.as_deref() == Some("T-1")));
    }

    #[tokio::test]
    async fn swallowed_undeclared_side_effect_still_fails() {
        let (recorder, executor) = executor();
        let err = executor
            .invoke(
                InvocationRequest::new("decision", "record", json!({"summary": "use sqlite"})),
                |ctx| async move {
                    let _ = ctx.side_effect("git", "committed", json!({}));
                    Ok(json!(null))
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::Failed {
                failure: FailureKind::UndeclaredSideEffect,
                ..
            }
        ));
        assert_eq!(recorder.kinds(), vec!["action.invoked", "action.failed"]);
    }

    #[tokio::test]
    async fn cancellation_yields_aborted() {
        let (recorder, executor) = executor();
        let token = CancelToken::new();
        let canceller = token.clone();
        let request = InvocationRequest::new("security", "scan", json!({"target": "repo"}))
            .cancel_token(token);

        let err = executor
            .invoke(request, |_| async move {
                canceller.cancel_with("operator stop");
                std::future::pending::<Result<Value, OperationError>>().await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Aborted { ref reason, .. } if reason == "operator stop"));
        assert_eq!(recorder.kinds(), vec!["action.invoked", "action.aborted"]);
    }

    #[tokio::test]
    async fn dropped_invocation_records_aborted() {
        let (recorder, executor) = executor();
        let request = InvocationRequest::new("security", "scan", json!({"target": "repo"}));
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            executor.invoke(request, |_| std::future::pending()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(recorder.kinds(), vec!["action.invoked", "action.aborted"]);
    }

    #[tokio::test]
    async fn idempotent_repeat_is_answered_from_cache() {
        let (recorder, executor) = executor();
        let runs = Arc::new(Mutex::new(0));
        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            let output = executor
                .invoke(
                    InvocationRequest::new("test", "echo", json!({"n": 1})),
                    |_| async move {
                        *runs.lock().unwrap() += 1;
                        Ok(json!({"n": 1}))
                    },
                )
                .await
                .unwrap();
            assert_eq!(output, json!({"n": 1}));
        }
        assert_eq!(*runs.lock().unwrap(), 1);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        let replayed: SucceededPayload = serde_json::from_value(events[3].payload.clone()).unwrap();
        assert_eq!(replayed.deduplicated_from, Some(events[0].correlation_id));
    }

    #[tokio::test]
    async fn seeded_cache_skips_execution() {
        let (recorder, executor) = executor();
        executor
            .invoke(
                InvocationRequest::new("test", "echo", json!({"n": 2})),
                |_| async { Ok(json!("first")) },
            )
            .await
            .unwrap();
        let history = recorder.events.lock().unwrap().clone();

        let (_, fresh) = executor_with_history(&history);
        let output = fresh
            .invoke(
                InvocationRequest::new("test", "echo", json!({"n": 2})),
                |_| async { Err(OperationError::new("must not run")) },
            )
            .await
            .unwrap();
        assert_eq!(output, json!("first"));
    }

    fn executor_with_history(history: &[Event]) -> (Arc<Recorder>, ActionExecutor) {
        let (recorder, executor) = executor();
        let cache = Arc::new(IdempotencyCache::new());
        assert_eq!(cache.seed_from_events(executor.registry(), history), 1);
        (recorder, executor.with_cache(cache))
    }
}
