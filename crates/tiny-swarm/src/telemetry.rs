//! Logging setup and the per-run telemetry log.
//!
//! Every finished run is appended as one JSON line to `runs.jsonl` next to the
//! config, with the decision taken on each iteration.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use coordination::Action;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::orchestrator::RunReport;

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean. Filter from `RUST_LOG`, default `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// What happened on one loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// Name of the transition rule that fired.
    pub rule: String,
    pub action: Action,
    /// Vote confidence; absent for forced actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub success: bool,
    pub message: String,
    pub elapsed_ms: u64,
}

/// One finished run, as written to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub goal: String,
    #[serde(flatten)]
    pub report: RunReport,
    pub elapsed_ms: u64,
    pub iterations_detail: Vec<IterationRecord>,
    pub timestamp: String,
}

/// Accumulates iteration records while a run is in flight.
#[derive(Debug)]
pub struct RunTelemetry {
    goal: String,
    started: Instant,
    iteration_started: Instant,
    iterations: Vec<IterationRecord>,
}

impl RunTelemetry {
    pub fn new(goal: &str) -> Self {
        let now = Instant::now();
        Self {
            goal: goal.to_string(),
            started: now,
            iteration_started: now,
            iterations: Vec::new(),
        }
    }

    pub fn start_iteration(&mut self) {
        self.iteration_started = Instant::now();
    }

    pub fn finish_iteration(
        &mut self,
        iteration: u32,
        rule: &str,
        action: Action,
        confidence: Option<f64>,
        success: bool,
        message: &str,
    ) {
        self.iterations.push(IterationRecord {
            iteration,
            rule: rule.to_string(),
            action,
            confidence,
            success,
            message: message.to_string(),
            elapsed_ms: self.iteration_started.elapsed().as_millis() as u64,
        });
    }

    pub fn iterations(&self) -> &[IterationRecord] {
        &self.iterations
    }

    pub fn finalize(self, report: &RunReport) -> RunRecord {
        RunRecord {
            goal: self.goal,
            report: report.clone(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            iterations_detail: self.iterations,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Append `record` as one line to the JSONL log at `path`. Failures are
/// logged, never returned.
pub fn append_run_log(record: &RunRecord, path: &Path) {
    let json = match serde_json::to_string(record) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize run record: {e}");
            return;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), "Failed to create run log directory: {e}");
            return;
        }
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{json}") {
                warn!("Failed to append run log: {e}");
            } else {
                info!(path = %path.display(), "Appended run record");
            }
        }
        Err(e) => warn!("Failed to open run log: {e}"),
    }
}
