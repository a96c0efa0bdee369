//! Vote tallying.
//!
//! Pure: turns a list of raw voter replies into a [`VoteResult`]. The
//! concurrent fan-out that produces those replies lives in
//! [`voter`](super::voter).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::Action;
use crate::catalog::BackendId;

/// Confidence reported when no voter answered and a single router call decided.
pub const DEGRADED_CONFIDENCE: f64 = 0.5;

/// One usable voter reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterResponse {
    pub backend: BackendId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    pub chosen: Action,
    /// Share of usable replies that agreed with `chosen`, in `[0, 1]`.
    pub confidence: f64,
    /// Parsed action → count. Counts sum to `raw_responses.len()` unless the
    /// result came from a fallback.
    pub histogram: BTreeMap<Action, usize>,
    pub raw_responses: Vec<VoterResponse>,
}

impl VoteResult {
    /// Majority over `responses`.
    ///
    /// The highest count wins; tied leaders resolve to the one listed first
    /// in the vocabulary. With no responses the result is `plan_skill` at
    /// confidence 0 with an empty histogram.
    pub fn tally(responses: Vec<VoterResponse>) -> Self {
        let mut histogram: BTreeMap<Action, usize> = BTreeMap::new();
        for response in &responses {
            *histogram.entry(Action::parse(&response.text)).or_insert(0) += 1;
        }

        // BTreeMap iterates in vocabulary order; keep the first strict maximum.
        let mut winner: Option<(Action, usize)> = None;
        for (action, count) in &histogram {
            if winner.map_or(true, |(_, best)| *count > best) {
                winner = Some((*action, *count));
            }
        }

        let total = responses.len();
        let (chosen, confidence) = match winner {
            Some((action, count)) => (action, count as f64 / total as f64),
            None => (Action::PlanSkill, 0.0),
        };

        Self {
            chosen,
            confidence,
            histogram,
            raw_responses: responses,
        }
    }

    /// Result of the single-router fallback used when nobody answered.
    pub fn degraded(chosen: Action) -> Self {
        Self {
            chosen,
            confidence: DEGRADED_CONFIDENCE,
            histogram: BTreeMap::from([(chosen, 1)]),
            raw_responses: Vec::new(),
        }
    }

    /// Certain `complete`, for when the outcome is already known.
    pub fn settled(chosen: Action) -> Self {
        Self {
            chosen,
            confidence: 1.0,
            histogram: BTreeMap::new(),
            raw_responses: Vec::new(),
        }
    }

    pub fn usable_responses(&self) -> usize {
        self.raw_responses.len()
    }
}
