// graph.rs — Followup graph evaluation.
//
// The graph is advisory. The execution wrapper never consults it; callers
// and tooling ask it whether an action makes sense given where a task is.

use std::collections::BTreeSet;

use keel_actions::ActionRegistry;
use keel_events::ActionKey;
use keel_replay::{TaskPhase, TaskRecord};
use serde::Serialize;

use crate::error::FollowupError;
use crate::rules::RuleSet;

/// Where a task stands, as far as sequencing is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FollowupState {
    pub phase: TaskPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ActionKey>,
}

impl FollowupState {
    pub fn new(phase: TaskPhase) -> Self {
        Self {
            phase,
            last_action: None,
        }
    }

    pub fn after(mut self, key: ActionKey) -> Self {
        self.last_action = Some(key);
        self
    }
}

impl From<&TaskRecord> for FollowupState {
    fn from(task: &TaskRecord) -> Self {
        Self {
            phase: task.phase,
            last_action: task.last_action.clone(),
        }
    }
}

/// How the graph judges a proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    /// Permitted, but off the usual path.
    Unusual,
    Rejected,
}

impl Verdict {
    pub fn permits(self) -> bool {
        !matches!(self, Verdict::Rejected)
    }
}

#[derive(Debug, Clone)]
pub struct FollowupGraph {
    rules: RuleSet,
    registered: BTreeSet<ActionKey>,
}

impl FollowupGraph {
    /// Build a graph, checking that every action the rules name is
    /// registered.
    pub fn new(registry: &ActionRegistry, rules: RuleSet) -> Result<Self, FollowupError> {
        for rule in &rules.rules {
            if let Some(key) = rule.actions().find(|key| !registry.contains(key)) {
                return Err(FollowupError::UnknownAction {
                    key: key.clone(),
                    phase: rule.phase,
                });
            }
            if let Some(key) = rule.allowed.intersection(&rule.unusual).next() {
                return Err(FollowupError::Contradictory {
                    key: key.clone(),
                    phase: rule.phase,
                });
            }
        }
        if let Some(key) = rules.always.iter().find(|key| !registry.contains(key)) {
            return Err(FollowupError::UnknownAlwaysAllowed { key: key.clone() });
        }

        Ok(Self {
            rules,
            registered: registry.keys().cloned().collect(),
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Judge `action` without logging.
    pub fn classify(&self, state: &FollowupState, action: &ActionKey) -> Verdict {
        if !self.registered.contains(action) {
            return Verdict::Rejected;
        }
        if self.rules.always.contains(action) {
            return Verdict::Allowed;
        }
        let mut verdict = Verdict::Rejected;
        for rule in self.applicable(state) {
            if rule.allowed.contains(action) {
                return Verdict::Allowed;
            }
            if rule.unusual.contains(action) {
                verdict = Verdict::Unusual;
            }
        }
        verdict
    }

    /// Whether `action` may follow `state`. Unusual-but-allowed actions
    /// return true and are logged.
    pub fn is_allowed(&self, state: &FollowupState, action: &ActionKey) -> bool {
        let verdict = self.classify(state, action);
        if verdict == Verdict::Unusual {
            tracing::warn!(
                phase = %state.phase,
                last_action = ?state.last_action.as_ref().map(ToString::to_string),
                action = %action,
                "unusual followup sequence"
            );
        }
        verdict.permits()
    }

    /// Every registered action that may follow `state`, unusual ones
    /// included.
    pub fn allowed_next(&self, state: &FollowupState) -> BTreeSet<ActionKey> {
        let mut next: BTreeSet<ActionKey> = self.rules.always.clone();
        for rule in self.applicable(state) {
            next.extend(rule.allowed.iter().cloned());
            next.extend(rule.unusual.iter().cloned());
        }
        next
    }

    /// Actions in `allowed_next` that are unusual from `state`.
    pub fn unusual_next(&self, state: &FollowupState) -> BTreeSet<ActionKey> {
        self.allowed_next(state)
            .into_iter()
            .filter(|key| self.classify(state, key) == Verdict::Unusual)
            .collect()
    }

    /// Registered actions that would be rejected from `state`.
    pub fn violations_for(&self, state: &FollowupState) -> BTreeSet<ActionKey> {
        let allowed = self.allowed_next(state);
        self.registered.difference(&allowed).cloned().collect()
    }

    fn applicable<'a>(
        &'a self,
        state: &'a FollowupState,
    ) -> impl Iterator<Item = &'a crate::rules::FollowupRule> + 'a {
        self.rules
            .rules
            .iter()
            .filter(move |rule| rule.applies(state.phase, state.last_action.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{standard, FollowupRule};
    use keel_actions::catalog;

    fn graph() -> FollowupGraph {
        FollowupGraph::new(&catalog::standard().unwrap(), standard()).unwrap()
    }

    fn key(s: &str) -> ActionKey {
        s.parse().unwrap()
    }

    #[test]
    fn operate_from_specified_is_rejected() {
        let graph = graph();
        let state = FollowupState::new(TaskPhase::Specified);
        assert!(!graph.is_allowed(&state, &key("task.operate")));
        assert!(graph.violations_for(&state).contains(&key("task.operate")));
    }

    #[test]
    fn unusual_is_allowed_but_flagged() {
        let graph = graph();
        let state = FollowupState::new(TaskPhase::Verifying);
        assert_eq!(graph.classify(&state, &key("task.operate")), Verdict::Unusual);
        assert!(graph.is_allowed(&state, &key("task.operate")));
        assert_eq!(
            graph.unusual_next(&state),
            BTreeSet::from([key("task.operate")])
        );
    }

    #[test]
    fn always_allowed_actions_are_permitted_everywhere() {
        let graph = graph();
        for phase in TaskPhase::ALL {
            let state = FollowupState::new(phase);
            assert!(graph.is_allowed(&state, &key("task.abandon")));
            assert!(graph.is_allowed(&state, &key("decision.record")));
        }
    }

    #[test]
    fn merge_during_verification_needs_a_scan_first() {
        let graph = graph();
        let verifying = FollowupState::new(TaskPhase::Verifying);
        assert!(!graph.is_allowed(&verifying, &key("git.merge")));
        let scanned = verifying.after(key("security.scan"));
        assert!(graph.is_allowed(&scanned, &key("git.merge")));
    }

    #[test]
    fn allowed_and_violations_partition_the_registry() {
        let registry = catalog::standard().unwrap();
        let graph = FollowupGraph::new(&registry, standard()).unwrap();
        let state = FollowupState::new(TaskPhase::Planned);
        let allowed = graph.allowed_next(&state);
        let violations = graph.violations_for(&state);
        assert!(allowed.is_disjoint(&violations));
        assert_eq!(allowed.len() + violations.len(), registry.len());
        assert!(allowed.contains(&key("task.operate")));
    }

    #[test]
    fn unregistered_actions_in_rules_are_refused() {
        let registry = catalog::standard().unwrap();
        let rules = RuleSet::new().rule(
            FollowupRule::new(TaskPhase::Operating).allow(key("deploy.release")),
        );
        let err = FollowupGraph::new(&registry, rules).unwrap_err();
        assert_eq!(
            err,
            FollowupError::UnknownAction {
                key: key("deploy.release"),
                phase: TaskPhase::Operating,
            }
        );
    }

    #[test]
    fn state_follows_the_replayed_task() {
        use keel_events::{EventDraft, EventIdGenerator};
        use serde_json::json;

        let mut ids = EventIdGenerator::with_origin(7);
        let now = chrono::Utc::now();
        let events: Vec<_> = [
            EventDraft::new("task", "created", "human")
                .with_task("T-9")
                .with_payload(json!({"title": "Harden login"})),
            EventDraft::new("task", "state_changed", "agent-1")
                .with_task("T-9")
                .with_payload(json!({"to": "verifying"})),
        ]
        .into_iter()
        .map(|draft| {
            let (id, ts) = ids.next(now);
            draft.into_event(id, ts)
        })
        .collect();
        let replayed = keel_replay::replay_events(&events).state;
        let state = FollowupState::from(replayed.task("T-9").unwrap());

        assert_eq!(state, FollowupState::new(TaskPhase::Verifying));
        assert!(graph().is_allowed(&state, &key("task.complete")));
    }

    #[test]
    fn contradictory_rule_is_refused() {
        let registry = catalog::standard().unwrap();
        let rules = RuleSet::new().rule(
            FollowupRule::new(TaskPhase::Specified)
                .allow(key("task.design"))
                .unusual(key("task.design")),
        );
        assert!(matches!(
            FollowupGraph::new(&registry, rules),
            Err(FollowupError::Contradictory { .. })
        ));
    }
}
