//! Local small-model swarm: the concrete adapters, configuration, and the
//! orchestration loop built on the `coordination` engines.

pub mod actions;
pub mod analyzer;
pub mod config;
pub mod conversation;
pub mod intent;
pub mod ollama;
pub mod orchestrator;
pub mod probe;
pub mod state_machine;
pub mod telemetry;

pub use actions::{ActionOutcome, FailureKind, PythonRunner, TestRun, TestRunner};
pub use config::SwarmConfig;
pub use intent::Intent;
pub use orchestrator::{Orchestrator, RunReport};
