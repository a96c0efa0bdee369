//! Executing loop actions: plan, write and test a skill.
//!
//! Every action returns an [`ActionOutcome`]; nothing here propagates an
//! error to the loop.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{ChatMessage, ChatOptions, InferenceBackend};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Wall-clock limit for one skill test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Characters of stderr kept in a failure message.
pub const STDERR_LIMIT: usize = 200;
/// Characters of stdout kept from a passing test.
pub const STDOUT_LIMIT: usize = 500;

/// Where `write_skill` puts the artifact, relative to the workspace.
pub fn skill_path(workspace: &Path) -> PathBuf {
    workspace.join("skills").join("swarm_skill.py")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// `write_skill` / `test_skill` before anything was planned.
    NoArtifact,
    /// The coder backend produced nothing.
    Inference,
    Io,
    /// Ran and exited non-zero.
    TestFailed,
    TimedOut,
    /// The test program could not be started.
    Spawn,
    /// A voted action the loop does not execute.
    UnknownAction,
}

/// Result of one executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Ok {
        message: String,
        /// New artifact, replacing the current one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
        /// Captured program output, truncated.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Err {
        kind: FailureKind,
        message: String,
    },
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
            artifact: None,
            output: None,
        }
    }

    pub fn err(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Err {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Ok { message, .. } | Self::Err { message, .. } => message,
        }
    }

    pub fn artifact(&self) -> Option<&str> {
        match self {
            Self::Ok { artifact, .. } => artifact.as_deref(),
            Self::Err { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("could not stage artifact: {0}")]
    Stage(#[source] std::io::Error),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {seconds}s")]
    TimedOut { seconds: u64 },
}

/// Captured result of running an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl TestRun {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl From<Output> for TestRun {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Runs a text artifact as a standalone program.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, artifact: &str) -> Result<TestRun, ExecError>;
}

/// Writes the artifact to a temp `.py` file and runs it with `python3`.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    interpreter: String,
    timeout: Duration,
}

impl PythonRunner {
    pub fn new() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout: TEST_TIMEOUT,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestRunner for PythonRunner {
    async fn run(&self, artifact: &str) -> Result<TestRun, ExecError> {
        // Removed when `script` drops, after the child has exited or been killed.
        let script = tempfile::Builder::new()
            .prefix("swarm_skill_")
            .suffix(".py")
            .tempfile()
            .map_err(ExecError::Stage)?;
        tokio::fs::write(script.path(), artifact)
            .await
            .map_err(ExecError::Stage)?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script.path()).kill_on_drop(true);
        // Own process group, so a timeout also takes down anything the skill spawned.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(interpreter = %self.interpreter, bytes = artifact.len(), "Running skill");
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output.into()),
            Ok(Err(source)) => Err(ExecError::Spawn {
                command: self.interpreter.clone(),
                source,
            }),
            Err(_) => Err(ExecError::TimedOut {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

/// First `limit` characters of `text`.
pub fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Keep the body of the first fenced block, minus a `python` language tag.
/// Text without fences is returned trimmed.
pub fn strip_fences(reply: &str) -> String {
    let mut parts = reply.split("```");
    let before = parts.next().unwrap_or_default();
    let body = match parts.next() {
        Some(body) => body.strip_prefix("python").unwrap_or(body),
        None => before,
    };
    body.trim().to_string()
}

pub fn plan_prompt(goal: &str) -> String {
    format!(
        "Write Python code for this task. Output ONLY the code.\n\n\
         Task: {goal}\n\n\
         CRITICAL RULES:\n\
         - NO input() calls - code must run without user interaction\n\
         - In __main__, use hardcoded test values and print results\n\
         - Example: if __name__ == \"__main__\": result = function(10); print(result)\n\n\
         Code:"
    )
}

/// Ask the coder for a fresh artifact.
pub async fn plan_skill(backend: &dyn InferenceBackend, coder: &str, goal: &str) -> ActionOutcome {
    let options = ChatOptions::new(0.7).with_max_output_tokens(1000);
    match backend
        .chat(coder, &[ChatMessage::user(plan_prompt(goal))], options)
        .await
    {
        Ok(reply) => {
            let code = strip_fences(&reply);
            ActionOutcome::Ok {
                message: format!("Generated {} chars", code.chars().count()),
                artifact: Some(code),
                output: None,
            }
        }
        Err(e) => ActionOutcome::err(FailureKind::Inference, format!("Planning failed: {e}")),
    }
}

/// Persist the current artifact to [`skill_path`].
pub async fn write_skill(workspace: &Path, artifact: Option<&str>) -> ActionOutcome {
    let Some(code) = artifact.filter(|c| !c.is_empty()) else {
        return ActionOutcome::err(FailureKind::NoArtifact, "No code to write");
    };
    let path = skill_path(workspace);
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ActionOutcome::err(
                FailureKind::Io,
                format!("Could not create {}: {e}", parent.display()),
            );
        }
    }
    match tokio::fs::write(&path, code).await {
        Ok(()) => ActionOutcome::ok(format!("Saved to {}", path.display())),
        Err(e) => ActionOutcome::err(
            FailureKind::Io,
            format!("Could not write {}: {e}", path.display()),
        ),
    }
}

/// Run the current artifact; success iff it exits zero.
pub async fn test_skill(runner: &dyn TestRunner, artifact: Option<&str>) -> ActionOutcome {
    let Some(code) = artifact.filter(|c| !c.is_empty()) else {
        return ActionOutcome::err(FailureKind::NoArtifact, "No code to test");
    };
    match runner.run(code).await {
        Ok(run) if run.passed() => ActionOutcome::Ok {
            message: "Test passed".to_string(),
            artifact: None,
            output: Some(truncate(&run.stdout, STDOUT_LIMIT).to_string()),
        },
        Ok(run) => ActionOutcome::err(
            FailureKind::TestFailed,
            format!("Test failed: {}", truncate(&run.stderr, STDERR_LIMIT)),
        ),
        Err(ExecError::TimedOut { .. }) => {
            ActionOutcome::err(FailureKind::TimedOut, "Test timed out")
        }
        Err(e @ ExecError::Spawn { .. }) => {
            ActionOutcome::err(FailureKind::Spawn, format!("Test error: {e}"))
        }
        Err(e @ ExecError::Stage(_)) => {
            ActionOutcome::err(FailureKind::Io, format!("Test error: {e}"))
        }
    }
}
