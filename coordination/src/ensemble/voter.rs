//! Parallel voter: fan a prompt out to several backends and tally the replies.
//!
//! ```text
//!            ┌── chat(voter 1) ── timeout(per_call) ──┐
//! prompt ────┼── chat(voter 2) ── timeout(per_call) ──┼── tally ──► VoteResult
//!            └── chat(voter N) ── timeout(per_call) ──┘
//!                 collection bounded by per_call + 10s
//! ```
//!
//! Each call returns `Result<String, CallError>`. Failed, timed-out and
//! aborted calls are logged and dropped; only successes reach the tally. If
//! nothing usable comes back, a single quick vote on the router decides at
//! confidence 0.5.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::action::Action;
use super::voting::{VoteResult, VoterResponse};
use crate::backend::{CallError, ChatMessage, ChatOptions, InferenceBackend};
use crate::catalog::BackendId;

/// Extra time granted on top of the per-call timeout to collect replies.
pub const COLLECTION_GRACE: Duration = Duration::from_secs(10);

/// Default per-call timeout.
pub const DEFAULT_VOTE_TIMEOUT: Duration = Duration::from_secs(10);

fn vote_options() -> ChatOptions {
    ChatOptions::new(0.3).with_max_output_tokens(20)
}

fn quick_vote_options() -> ChatOptions {
    ChatOptions::new(0.1).with_max_output_tokens(10)
}

pub struct Voter {
    backend: Arc<dyn InferenceBackend>,
    router: BackendId,
}

impl Voter {
    /// `router` answers quick votes and the no-response fallback.
    pub fn new(backend: Arc<dyn InferenceBackend>, router: impl Into<BackendId>) -> Self {
        Self {
            backend,
            router: router.into(),
        }
    }

    pub fn router(&self) -> &str {
        &self.router
    }

    /// Poll every backend in `voters` concurrently and return the majority.
    pub async fn vote(
        &self,
        prompt: &str,
        voters: &[BackendId],
        per_call_timeout: Duration,
    ) -> VoteResult {
        let mut calls = JoinSet::new();
        for (index, id) in voters.iter().enumerate() {
            let backend = Arc::clone(&self.backend);
            let id = id.clone();
            let messages = vec![ChatMessage::user(prompt)];
            calls.spawn(async move {
                let reply = tokio::time::timeout(
                    per_call_timeout,
                    backend.chat(&id, &messages, vote_options()),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(CallError::TimedOut {
                        backend: id.clone(),
                        seconds: per_call_timeout.as_secs_f64(),
                    })
                });
                (index, id, reply)
            });
        }

        let mut collected: Vec<(usize, VoterResponse)> = Vec::with_capacity(voters.len());
        let gather = async {
            while let Some(joined) = calls.join_next().await {
                match joined {
                    Ok((index, backend, Ok(text))) => {
                        debug!(backend = %backend, reply = %text.trim(), "Voter replied");
                        collected.push((index, VoterResponse { backend, text }));
                    }
                    Ok((_, backend, Err(e))) => {
                        debug!(backend = %backend, error = %e, "Dropping voter");
                    }
                    Err(e) => {
                        let e = CallError::Aborted(e.to_string());
                        warn!(error = %e, "Dropping voter");
                    }
                }
            }
        };
        let bound = per_call_timeout + COLLECTION_GRACE;
        if tokio::time::timeout(bound, gather).await.is_err() {
            warn!(
                bound_secs = bound.as_secs_f64(),
                "Vote collection bound elapsed, abandoning stragglers"
            );
            calls.abort_all();
        }

        if collected.is_empty() {
            warn!(router = %self.router, "No usable voter replies, asking the router");
            let chosen = match self.quick_vote(prompt).await {
                Ok(action) => action,
                Err(e) => {
                    warn!(error = %e, "Router quick vote failed");
                    Action::PlanSkill
                }
            };
            return VoteResult::degraded(chosen);
        }

        collected.sort_by_key(|(index, _)| *index);
        let result = VoteResult::tally(collected.into_iter().map(|(_, r)| r).collect());
        info!(
            action = %result.chosen,
            confidence = result.confidence,
            replies = result.usable_responses(),
            polled = voters.len(),
            "Vote decided"
        );
        result
    }

    /// One low-temperature, short call to the router.
    pub async fn quick_vote(&self, prompt: &str) -> Result<Action, CallError> {
        let reply = self
            .backend
            .chat(&self.router, &[ChatMessage::user(prompt)], quick_vote_options())
            .await?;
        Ok(Action::parse(&reply))
    }
}
