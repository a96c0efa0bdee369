//! The closed action vocabulary and the free-text parser for it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One step the orchestration loop can take.
///
/// Declaration order is the vocabulary order: it decides which action a
/// response mentioning several names parses to, and which leader wins a
/// tied vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    PlanSkill,
    WriteSkill,
    TestSkill,
    AnalyzeResults,
    Complete,
    Failed,
    DirectAnswer,
    RetryPlan,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Self::PlanSkill,
        Self::WriteSkill,
        Self::TestSkill,
        Self::AnalyzeResults,
        Self::Complete,
        Self::Failed,
        Self::DirectAnswer,
        Self::RetryPlan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanSkill => "plan_skill",
            Self::WriteSkill => "write_skill",
            Self::TestSkill => "test_skill",
            Self::AnalyzeResults => "analyze_results",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::DirectAnswer => "direct_answer",
            Self::RetryPlan => "retry_plan",
        }
    }

    /// Best-effort classification of a model reply.
    ///
    /// Returns the first action, in vocabulary order, whose name appears in
    /// `text` ignoring case, either as written or with underscores replaced by
    /// spaces. Anything else is [`Action::PlanSkill`].
    pub fn parse(text: &str) -> Action {
        let text = text.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|action| {
                let name = action.as_str();
                text.contains(name) || text.contains(&name.replace('_', " "))
            })
            .unwrap_or(Self::PlanSkill)
    }

    /// Whether executing this action ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse of an exact action name.
impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}
