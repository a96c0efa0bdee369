//! The orchestrator: routes a goal to chat or to the bounded plan/write/test loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use coordination::{
    Action, BackendId, ChatOptions, InferenceBackend, Selector, VoteResult, Voter,
};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::actions::{self, ActionOutcome, FailureKind, TestRunner};
use crate::analyzer;
use crate::config::SwarmConfig;
use crate::conversation::ConversationStore;
use crate::intent::{self, Intent};
use crate::state_machine::{Directive, LoopState, Step, MAX_ITERATIONS};
use crate::telemetry::{self, RunTelemetry};

pub const REASON_EXHAUSTED: &str = "max iterations reached";
pub const REASON_FAILED: &str = "explicit failure action";

/// Outcome of one `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    pub mode: Intent,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Chat-mode reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl RunReport {
    fn task(
        success: bool,
        iterations: u32,
        artifact: Option<String>,
        reason: Option<&str>,
    ) -> Self {
        Self {
            success,
            mode: Intent::Task,
            iterations,
            artifact,
            reason: reason.map(str::to_string),
            answer: None,
        }
    }
}

/// Voter and pool for one task, built on the first vote.
struct Ballot {
    voter: Voter,
    voters: Vec<BackendId>,
}

pub struct Orchestrator {
    backend: Arc<dyn InferenceBackend>,
    selector: Arc<Selector>,
    runner: Arc<dyn TestRunner>,
    config: SwarmConfig,
    conversation: ConversationStore,
    run_log: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        selector: Arc<Selector>,
        runner: Arc<dyn TestRunner>,
        config: SwarmConfig,
    ) -> Self {
        let conversation =
            ConversationStore::open(config.conversation_path.clone(), config.max_history);
        Self {
            backend,
            selector,
            runner,
            config,
            conversation,
            run_log: None,
        }
    }

    /// Append a JSON line per finished task run to `path`.
    pub fn with_run_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_log = Some(path.into());
        self
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    pub fn clear_history(&mut self) -> std::io::Result<()> {
        self.conversation.clear()
    }

    /// Handle `goal`. `mode` forces chat or task; otherwise the router model
    /// (with `model_intent` set) or the intent rules decide. `offline` is
    /// combined with the configured offline mode.
    pub async fn run(&mut self, goal: &str, offline: bool, mode: Option<Intent>) -> RunReport {
        let offline = offline || self.config.offline_mode;
        let mode = match mode {
            Some(mode) => mode,
            None if self.config.model_intent => {
                intent::classify_with_backend(&*self.backend, &self.config.router_model, goal)
                    .await
            }
            None => intent::classify(goal),
        };
        info!(%mode, offline, "Handling request");
        match mode {
            Intent::Chat => self.chat(goal, offline).await,
            Intent::Task => {
                let span = info_span!("task", goal = %actions::truncate(goal, 80));
                self.run_task(goal, offline).instrument(span).await
            }
        }
    }

    /// One router call over the stored transcript. Never enters the loop.
    pub async fn chat(&mut self, question: &str, offline: bool) -> RunReport {
        let router = self.selector.select_router(offline).await;
        if let Err(e) = self.conversation.add("user", question) {
            warn!(error = %e, "Failed to persist user turn");
        }
        let messages = self.conversation.messages(true);
        match self
            .backend
            .chat(&router, &messages, ChatOptions::new(0.7))
            .await
        {
            Ok(answer) => {
                let answer = answer.trim().to_string();
                if let Err(e) = self.conversation.add("assistant", &answer) {
                    warn!(error = %e, "Failed to persist assistant turn");
                }
                info!(backend = %router, chars = answer.len(), "Chat answered");
                RunReport {
                    success: true,
                    mode: Intent::Chat,
                    iterations: 1,
                    artifact: None,
                    reason: None,
                    answer: Some(answer),
                }
            }
            Err(e) => {
                warn!(backend = %router, error = %e, "Chat call failed");
                RunReport {
                    success: false,
                    mode: Intent::Chat,
                    iterations: 1,
                    artifact: None,
                    reason: Some(format!("chat backend failed: {e}")),
                    answer: None,
                }
            }
        }
    }

    async fn run_task(&self, goal: &str, offline: bool) -> RunReport {
        let mut telemetry = RunTelemetry::new(goal);
        let report = self.task_loop(goal, offline, &mut telemetry).await;
        info!(
            success = report.success,
            iterations = report.iterations,
            reason = report.reason.as_deref().unwrap_or("-"),
            "Task finished"
        );
        if let Some(path) = &self.run_log {
            telemetry::append_run_log(&telemetry.finalize(&report), path);
        }
        report
    }

    async fn task_loop(
        &self,
        goal: &str,
        offline: bool,
        telemetry: &mut RunTelemetry,
    ) -> RunReport {
        let analysis = analyzer::analyze(&*self.backend, &self.config.router_model, goal).await;
        info!(
            kind = %analysis.kind,
            complexity = ?analysis.complexity,
            needs_reasoning = analysis.needs_reasoning,
            "Task analysed"
        );

        let coder = match self.selector.select_coder(analysis.complexity, offline).await {
            Ok(selection) => {
                info!(
                    backend = %selection.id(),
                    fallback = selection.is_fallback(),
                    "Coder selected"
                );
                selection.into_id()
            }
            Err(e) => {
                warn!(error = %e, "No coder backend");
                let reason = format!("no coder backend: {e}");
                return RunReport::task(false, 0, None, Some(reason.as_str()));
            }
        };

        let mut state = LoopState::new();
        let mut ballot: Option<Ballot> = None;

        while let Some(iteration) = state.begin_iteration() {
            telemetry.start_iteration();
            let rule = state.next_rule();
            let (action, confidence) = match rule.directive {
                Directive::Finish => {
                    info!(iteration, rule = rule.name, "Test passed, complete");
                    telemetry.finish_iteration(
                        iteration,
                        rule.name,
                        Action::Complete,
                        None,
                        true,
                        "complete",
                    );
                    return RunReport::task(true, iteration, state.into_artifact(), None);
                }
                Directive::Force(action) => (action, None),
                Directive::Settle(action) => (action, Some(VoteResult::settled(action).confidence)),
                Directive::Vote => {
                    let current = match ballot.take() {
                        Some(current) => current,
                        None => self.open_ballot(offline).await,
                    };
                    let prompt = vote_prompt(goal, iteration, &state);
                    let result = current
                        .voter
                        .vote(&prompt, &current.voters, self.vote_timeout())
                        .await;
                    ballot = Some(current);
                    (result.chosen, Some(result.confidence))
                }
            };
            info!(iteration, %action, rule = rule.name, confidence = ?confidence, "Iteration");

            match action {
                Action::Complete => {
                    telemetry.finish_iteration(
                        iteration,
                        rule.name,
                        action,
                        confidence,
                        true,
                        "complete",
                    );
                    return RunReport::task(true, iteration, state.into_artifact(), None);
                }
                Action::Failed => {
                    telemetry.finish_iteration(
                        iteration,
                        rule.name,
                        action,
                        confidence,
                        false,
                        REASON_FAILED,
                    );
                    let artifact = state.into_artifact();
                    return RunReport::task(false, iteration, artifact, Some(REASON_FAILED));
                }
                _ => {}
            }

            let outcome = self.execute(action, goal, &coder, &state).await;
            if outcome.is_success() {
                info!(iteration, %action, message = %outcome.message(), "Action succeeded");
            } else {
                warn!(iteration, %action, message = %outcome.message(), "Action failed");
            }
            telemetry.finish_iteration(
                iteration,
                rule.name,
                action,
                confidence,
                outcome.is_success(),
                outcome.message(),
            );
            state.record(action, outcome);
        }

        if state.last_test_passed() {
            return RunReport::task(true, MAX_ITERATIONS, state.into_artifact(), None);
        }
        warn!(max = MAX_ITERATIONS, "Iteration budget exhausted");
        RunReport::task(false, MAX_ITERATIONS, state.into_artifact(), Some(REASON_EXHAUSTED))
    }

    async fn open_ballot(&self, offline: bool) -> Ballot {
        let router = self.selector.select_router(offline).await;
        let voters = self
            .selector
            .select_configured_voters(&self.config.voter_models, offline)
            .await;
        Ballot {
            voter: Voter::new(Arc::clone(&self.backend), router),
            voters,
        }
    }

    fn vote_timeout(&self) -> Duration {
        Duration::from_secs(self.config.vote_timeout_secs.max(1))
    }

    async fn execute(
        &self,
        action: Action,
        goal: &str,
        coder: &str,
        state: &LoopState,
    ) -> ActionOutcome {
        match action {
            Action::PlanSkill => actions::plan_skill(&*self.backend, coder, goal).await,
            Action::WriteSkill => {
                actions::write_skill(&self.config.workspace, state.artifact()).await
            }
            Action::TestSkill => actions::test_skill(&*self.runner, state.artifact()).await,
            other => ActionOutcome::err(
                FailureKind::UnknownAction,
                format!("Unknown action: {other}"),
            ),
        }
    }
}

/// Prompt shown to every voter.
pub fn vote_prompt(goal: &str, iteration: u32, state: &LoopState) -> String {
    let history = state.history();
    let recent = if history.is_empty() {
        "Starting".to_string()
    } else {
        history[history.len().saturating_sub(3)..]
            .iter()
            .map(|Step { action, outcome }| format!("- {action}: {}", outcome.message()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let has_code = if state.has_artifact() { "yes" } else { "no" };
    format!(
        "Decide next action for this task.\n\n\
         Task: {goal}\n\
         Iteration: {iteration}/{MAX_ITERATIONS}\n\
         History: {recent}\n\
         Has code: {has_code}\n\n\
         Reply with ONE action:\n\
         - plan_skill (generate code)\n\
         - write_skill (save code)\n\
         - test_skill (test code)\n\
         - complete (if working)\n\n\
         Action:"
    )
}
