//! Orchestration state machine: an explicit transition table over the loop history.
//!
//! Each iteration the loop asks [`LoopState::next_rule`] which rule applies.
//! Rules are checked top to bottom and the first match wins, so forced
//! transitions always take precedence over the vote, which is only consulted
//! by the final catch-all row:
//!
//! ```text
//! rule               history pattern                       directive
//! ─────────────────  ────────────────────────────────────  ──────────────────
//! test-passed        last step test_skill, succeeded       finish (complete)
//! vote-settled       any test_skill succeeded              settle complete @1.0
//! bootstrap-plan     empty                                 force plan_skill
//! bootstrap-write    [plan_skill], artifact present        force write_skill
//! bootstrap-replan   [plan_skill], no artifact             force plan_skill
//! test-after-write   ≥2 steps, last write_skill succeeded  force test_skill
//! write-after-plan   ≥2 steps, last plan_skill, artifact   force write_skill
//! vote               anything else                         vote
//! ```
//!
//! The first two rows both end the run after a passing test. The loop also
//! checks once more after the final iteration, so a test passing on the last
//! iteration still completes.

use std::fmt;

use coordination::Action;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actions::ActionOutcome;

/// Hard bound on loop iterations.
pub const MAX_ITERATIONS: u32 = 12;

/// One executed action and what it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub action: Action,
    pub outcome: ActionOutcome,
}

impl Step {
    fn is(&self, action: Action) -> bool {
        self.action == action
    }

    fn succeeded(&self, action: Action) -> bool {
        self.is(action) && self.outcome.is_success()
    }
}

/// Shape of the history a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPattern {
    LastTestPassed,
    AnyTestPassed,
    Empty,
    OnlyPlan { artifact: bool },
    LastWriteSucceeded,
    LastPlanWithArtifact,
    Any,
}

impl HistoryPattern {
    pub fn matches(self, history: &[Step], has_artifact: bool) -> bool {
        let last = history.last();
        match self {
            Self::LastTestPassed => last.is_some_and(|s| s.succeeded(Action::TestSkill)),
            Self::AnyTestPassed => history.iter().any(|s| s.succeeded(Action::TestSkill)),
            Self::Empty => history.is_empty(),
            Self::OnlyPlan { artifact } => {
                history.len() == 1 && history[0].is(Action::PlanSkill) && has_artifact == artifact
            }
            Self::LastWriteSucceeded => {
                history.len() >= 2 && last.is_some_and(|s| s.succeeded(Action::WriteSkill))
            }
            Self::LastPlanWithArtifact => {
                history.len() >= 2 && has_artifact && last.is_some_and(|s| s.is(Action::PlanSkill))
            }
            Self::Any => true,
        }
    }
}

/// What the loop does once a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// End the run as complete without executing anything.
    Finish,
    /// Take the action as if every voter had chosen it.
    Settle(Action),
    Force(Action),
    Vote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub name: &'static str,
    pub pattern: HistoryPattern,
    pub directive: Directive,
}

pub const TRANSITIONS: &[Rule] = &[
    Rule {
        name: "test-passed",
        pattern: HistoryPattern::LastTestPassed,
        directive: Directive::Finish,
    },
    Rule {
        name: "vote-settled",
        pattern: HistoryPattern::AnyTestPassed,
        directive: Directive::Settle(Action::Complete),
    },
    Rule {
        name: "bootstrap-plan",
        pattern: HistoryPattern::Empty,
        directive: Directive::Force(Action::PlanSkill),
    },
    Rule {
        name: "bootstrap-write",
        pattern: HistoryPattern::OnlyPlan { artifact: true },
        directive: Directive::Force(Action::WriteSkill),
    },
    Rule {
        name: "bootstrap-replan",
        pattern: HistoryPattern::OnlyPlan { artifact: false },
        directive: Directive::Force(Action::PlanSkill),
    },
    Rule {
        name: "test-after-write",
        pattern: HistoryPattern::LastWriteSucceeded,
        directive: Directive::Force(Action::TestSkill),
    },
    Rule {
        name: "write-after-plan",
        pattern: HistoryPattern::LastPlanWithArtifact,
        directive: Directive::Force(Action::WriteSkill),
    },
    Rule {
        name: "vote",
        pattern: HistoryPattern::Any,
        directive: Directive::Vote,
    },
];

/// First rule in [`TRANSITIONS`] matching the history.
pub fn lookup(history: &[Step], has_artifact: bool) -> &'static Rule {
    TRANSITIONS
        .iter()
        .find(|rule| rule.pattern.matches(history, has_artifact))
        .unwrap_or(&TRANSITIONS[TRANSITIONS.len() - 1])
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Per-run loop state. Created fresh for every task and dropped at the end.
#[derive(Debug, Default)]
pub struct LoopState {
    iteration: u32,
    history: Vec<Step>,
    artifact: Option<String>,
}

impl LoopState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the next iteration; `None` once the budget is spent.
    pub fn begin_iteration(&mut self) -> Option<u32> {
        if self.iteration >= MAX_ITERATIONS {
            return None;
        }
        self.iteration += 1;
        Some(self.iteration)
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn history(&self) -> &[Step] {
        &self.history
    }

    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    pub fn has_artifact(&self) -> bool {
        self.artifact.as_deref().is_some_and(|a| !a.is_empty())
    }

    pub fn next_rule(&self) -> &'static Rule {
        let rule = lookup(&self.history, self.has_artifact());
        debug!(iteration = self.iteration, rule = rule.name, "Transition rule");
        rule
    }

    /// Append a step; a successful outcome carrying an artifact replaces the
    /// current one.
    pub fn record(&mut self, action: Action, outcome: ActionOutcome) {
        if let Some(artifact) = outcome.artifact() {
            self.artifact = Some(artifact.to_string());
        }
        self.history.push(Step { action, outcome });
    }

    pub fn last_test_passed(&self) -> bool {
        HistoryPattern::LastTestPassed.matches(&self.history, self.has_artifact())
    }

    pub fn into_artifact(self) -> Option<String> {
        self.artifact
    }
}
