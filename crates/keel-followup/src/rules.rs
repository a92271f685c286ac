// rules.rs — Followup rules: which actions may follow a task's phase and
// last action.
//
// A rule applies to one phase, optionally narrowed to the action that last
// succeeded on the task. Each rule lists actions that are allowed outright
// and actions that are allowed but unusual (logged when taken). Actions in
// the always set are allowed in every phase.

use std::collections::BTreeSet;

use keel_events::ActionKey;
use keel_replay::TaskPhase;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowupRule {
    pub phase: TaskPhase,
    /// Only applies when this was the task's last successful action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<ActionKey>,
    pub allowed: BTreeSet<ActionKey>,
    pub unusual: BTreeSet<ActionKey>,
}

impl FollowupRule {
    pub fn new(phase: TaskPhase) -> Self {
        Self {
            phase,
            after: None,
            allowed: BTreeSet::new(),
            unusual: BTreeSet::new(),
        }
    }

    pub fn after(mut self, key: ActionKey) -> Self {
        self.after = Some(key);
        self
    }

    pub fn allow(mut self, key: ActionKey) -> Self {
        self.allowed.insert(key);
        self
    }

    pub fn unusual(mut self, key: ActionKey) -> Self {
        self.unusual.insert(key);
        self
    }

    /// Every action this rule mentions, including `after`.
    pub fn actions(&self) -> impl Iterator<Item = &ActionKey> {
        self.allowed
            .iter()
            .chain(self.unusual.iter())
            .chain(self.after.iter())
    }

    pub(crate) fn applies(&self, phase: TaskPhase, last_action: Option<&ActionKey>) -> bool {
        self.phase == phase
            && match &self.after {
                None => true,
                Some(after) => last_action == Some(after),
            }
    }
}

/// A complete followup table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    pub rules: Vec<FollowupRule>,
    pub always: BTreeSet<ActionKey>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: FollowupRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn always(mut self, key: ActionKey) -> Self {
        self.always.insert(key);
        self
    }
}

fn task(verb: &str) -> ActionKey {
    ActionKey::new("task", verb)
}

/// The default table for the standard action catalogue.
///
/// ```text
/// Specified  → task.design            (task.plan unusual)
/// Designed   → task.plan              (task.design unusual)
/// Planned    → task.operate, git.branch
/// Operating  → task.verify, git.*, container.*, security.scan
/// Verifying  → task.complete, security.scan  (task.operate unusual)
///              git.merge only right after security.scan
/// Done       → task.reopen
/// Abandoned  → task.reopen
/// any phase  → task.abandon, decision.record
/// ```
pub fn standard() -> RuleSet {
    let scan = ActionKey::new("security", "scan");
    let merge = ActionKey::new("git", "merge");

    RuleSet::new()
        .rule(
            FollowupRule::new(TaskPhase::Specified)
                .allow(task("design"))
                .unusual(task("plan")),
        )
        .rule(
            FollowupRule::new(TaskPhase::Designed)
                .allow(task("plan"))
                .unusual(task("design")),
        )
        .rule(
            FollowupRule::new(TaskPhase::Planned)
                .allow(task("operate"))
                .allow(ActionKey::new("git", "branch")),
        )
        .rule(
            FollowupRule::new(TaskPhase::Operating)
                .allow(task("verify"))
                .allow(ActionKey::new("git", "branch"))
                .allow(ActionKey::new("git", "commit"))
                .allow(merge.clone())
                .allow(ActionKey::new("container", "start"))
                .allow(ActionKey::new("container", "stop"))
                .allow(scan.clone()),
        )
        .rule(
            FollowupRule::new(TaskPhase::Verifying)
                .allow(task("complete"))
                .allow(scan.clone())
                .unusual(task("operate")),
        )
        .rule(
            FollowupRule::new(TaskPhase::Verifying)
                .after(scan)
                .allow(merge),
        )
        .rule(FollowupRule::new(TaskPhase::Done).allow(task("reopen")))
        .rule(FollowupRule::new(TaskPhase::Abandoned).allow(task("reopen")))
        .always(task("abandon"))
        .always(ActionKey::new("decision", "record"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowed_rule_applies_only_after_its_action() {
        let rule = FollowupRule::new(TaskPhase::Verifying)
            .after(ActionKey::new("security", "scan"))
            .allow(ActionKey::new("git", "merge"));
        assert!(rule.applies(TaskPhase::Verifying, Some(&ActionKey::new("security", "scan"))));
        assert!(!rule.applies(TaskPhase::Verifying, None));
        assert!(!rule.applies(TaskPhase::Operating, Some(&ActionKey::new("security", "scan"))));
    }

    #[test]
    fn standard_table_covers_every_phase() {
        let table = standard();
        for phase in TaskPhase::ALL {
            assert!(
                table.rules.iter().any(|r| r.phase == phase),
                "no rule for {}",
                phase
            );
        }
    }
}
