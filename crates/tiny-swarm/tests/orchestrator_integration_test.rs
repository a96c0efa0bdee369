//! Integration tests for the Orchestrator
//!
//! Drives full runs against fake inference, package and test-runner
//! capabilities: the forced plan/write/test path, vote-driven iterations,
//! the iteration bound, selection and acquisition, and chat mode.

mod common;

use common::{harness, harness_configured, harness_with, FakeBackend, FakePackages, ScriptedRunner};
use coordination::ProfileName;
use tiny_swarm::actions::skill_path;
use tiny_swarm::orchestrator::{REASON_EXHAUSTED, REASON_FAILED};
use tiny_swarm::state_machine::MAX_ITERATIONS;
use tiny_swarm::Intent;

const GOAL: &str = "write a function that adds two numbers";

/// Test: passing artifact completes on the iteration after the test, no vote
#[tokio::test]
async fn test_happy_path_completes_without_voting() {
    let mut h = harness(FakeBackend::new(), ScriptedRunner::new(&[0]), ProfileName::Moderate);

    let report = h.orchestrator.run(GOAL, false, None).await;

    assert!(report.success, "report: {report:?}");
    assert_eq!(report.mode, Intent::Task);
    assert_eq!(report.iterations, 4);
    assert_eq!(report.artifact.as_deref(), Some("print(1 + 1)"));
    assert_eq!(h.backend.calls_containing("Decide next action"), 0);
    assert_eq!(h.runner.run_count(), 1);

    let saved = std::fs::read_to_string(skill_path(&h.orchestrator.config().workspace)).unwrap();
    assert_eq!(saved, "print(1 + 1)");
}

/// Test: an always-plan voter with failing tests still stops at the bound
#[tokio::test]
async fn test_adversarial_voter_terminates_at_bound() {
    let mut h = harness(
        FakeBackend::new().voting("plan_skill"),
        ScriptedRunner::new(&[1]),
        ProfileName::Moderate,
    );

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert!(!report.success);
    assert_eq!(report.iterations, MAX_ITERATIONS);
    assert_eq!(report.reason.as_deref(), Some(REASON_EXHAUSTED));
    // plan, write, test, then (vote→plan, write, test) three more times
    assert_eq!(h.runner.run_count(), 4);
    // three configured voters polled on iterations 4, 7 and 10
    assert_eq!(h.backend.calls_containing("Decide next action"), 9);
    // phi3:mini is pulled once, when the first ballot opens
    assert_eq!(*h.packages.pulls.lock().unwrap(), vec!["phi3:mini".to_string()]);
}

/// Test: the configured voter list decides who is polled
#[tokio::test]
async fn test_configured_voters_are_polled() {
    let mut h = harness_configured(
        FakeBackend::new().voting("plan_skill"),
        ScriptedRunner::new(&[1]),
        ProfileName::Moderate,
        FakePackages::with_resident(&["qwen2.5:0.5b", "tinyllama", "qwen2.5-coder:1.5b"]),
        |config| config.voter_models = vec!["tinyllama".to_string()],
    );

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert_eq!(report.iterations, MAX_ITERATIONS);
    let voters: Vec<String> = h
        .backend
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, m)| m[0].content.contains("Decide next action"))
        .map(|(id, _)| id.clone())
        .collect();
    assert_eq!(voters, vec!["tinyllama".to_string(); 3]);
    assert!(h.packages.pulls.lock().unwrap().is_empty());
}

/// Test: a voted retest that passes completes on the next iteration
#[tokio::test]
async fn test_voted_retest_completes() {
    let mut h = harness(
        FakeBackend::new().voting("I think test_skill"),
        ScriptedRunner::new(&[1, 0]),
        ProfileName::Moderate,
    );

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert!(report.success);
    assert_eq!(report.iterations, 5);
    assert_eq!(h.runner.run_count(), 2);
}

/// Test: a plan that strips to nothing is re-planned instead of written
#[tokio::test]
async fn test_empty_plan_is_replanned() {
    let mut h = harness(
        FakeBackend::new().coding_first(&["```python\n```"]),
        ScriptedRunner::new(&[0]),
        ProfileName::Moderate,
    );

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert!(report.success, "report: {report:?}");
    assert_eq!(report.iterations, 5);
    assert_eq!(report.artifact.as_deref(), Some("print(1 + 1)"));
    assert_eq!(h.backend.calls_containing("Write Python code"), 2);
    assert_eq!(h.backend.calls_containing("Decide next action"), 0);

    let log = std::fs::read_to_string(h.dir.path().join("runs.jsonl")).unwrap();
    let record: serde_json::Value = serde_json::from_str(log.trim()).unwrap();
    let detail = record["iterations_detail"].as_array().unwrap();
    assert_eq!(detail[0]["message"], "Generated 0 chars");
    assert_eq!(detail[1]["rule"], "bootstrap-replan");
    assert_eq!(detail[1]["action"], "plan_skill");
    assert_eq!(detail[2]["rule"], "write-after-plan");
    assert_eq!(detail[2]["action"], "write_skill");
}

/// Test: an explicit failure vote ends the run immediately
#[tokio::test]
async fn test_failed_vote_ends_run() {
    let mut h = harness(
        FakeBackend::new().voting("failed"),
        ScriptedRunner::new(&[1]),
        ProfileName::Moderate,
    );

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert!(!report.success);
    assert_eq!(report.iterations, 4);
    assert_eq!(report.reason.as_deref(), Some(REASON_FAILED));
    assert!(report.artifact.is_some());
}

/// Test: actions the loop cannot execute are non-fatal and logged per iteration
#[tokio::test]
async fn test_unknown_action_is_non_fatal() {
    let mut h = harness(
        FakeBackend::new().voting("analyze_results"),
        ScriptedRunner::new(&[1]),
        ProfileName::Moderate,
    );

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert!(!report.success);
    assert_eq!(report.iterations, MAX_ITERATIONS);
    assert_eq!(h.runner.run_count(), 1);

    let log = std::fs::read_to_string(h.dir.path().join("runs.jsonl")).unwrap();
    let record: serde_json::Value = serde_json::from_str(log.trim()).unwrap();
    let detail = record["iterations_detail"].as_array().unwrap();
    assert_eq!(detail.len(), MAX_ITERATIONS as usize);
    assert_eq!(detail[3]["rule"], "vote");
    assert_eq!(detail[3]["message"], "Unknown action: analyze_results");
    assert_eq!(detail[0]["rule"], "bootstrap-plan");
}

/// Test: no coder within the profile's tier cap fails before the loop
#[tokio::test]
async fn test_no_coder_within_tier_cap() {
    let backend = FakeBackend::new()
        .with_analysis(r#"{"type":"code","complexity":"complex","needs_reasoning":true}"#);
    let mut h = harness(backend, ScriptedRunner::new(&[0]), ProfileName::Minimal);

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert!(!report.success);
    assert_eq!(report.iterations, 0);
    assert!(report.reason.unwrap().starts_with("no coder backend"));
    assert_eq!(h.backend.calls_containing("Write Python code"), 0);
}

/// Test: a missing coder is pulled and tracked as swarm-acquired
#[tokio::test]
async fn test_missing_coder_is_acquired() {
    let mut h = harness_with(
        FakeBackend::new(),
        ScriptedRunner::new(&[0]),
        ProfileName::Moderate,
        FakePackages::with_resident(&["qwen2.5:0.5b", "tinyllama"]),
    );

    let report = h.orchestrator.run(GOAL, false, Some(Intent::Task)).await;

    assert!(report.success);
    assert_eq!(
        *h.packages.pulls.lock().unwrap(),
        vec!["qwen2.5-coder:1.5b".to_string()]
    );
    assert!(h.registry.is_swarm_acquired("qwen2.5-coder:1.5b"));
    let (coder, _) = h
        .backend
        .calls
        .lock()
        .unwrap()
        .iter()
        .find(|(_, m)| m[0].content.contains("Write Python code"))
        .cloned()
        .unwrap();
    assert_eq!(coder, "qwen2.5-coder:1.5b");
}

/// Test: offline runs never pull and fall back to a resident backend
#[tokio::test]
async fn test_offline_never_pulls() {
    let mut h = harness_with(
        FakeBackend::new(),
        ScriptedRunner::new(&[0]),
        ProfileName::Moderate,
        FakePackages::with_resident(&["qwen2.5:0.5b", "tinyllama"]),
    );

    let report = h.orchestrator.run(GOAL, true, Some(Intent::Task)).await;

    assert!(report.success);
    assert!(h.packages.pulls.lock().unwrap().is_empty());
}

/// Test: with model intent on, the router's label overrides the keyword rules
#[tokio::test]
async fn test_model_intent_routes_through_router() {
    let mut h = harness_configured(
        FakeBackend::new().labelling_intent("Task."),
        ScriptedRunner::new(&[0]),
        ProfileName::Moderate,
        FakePackages::with_resident(&["qwen2.5:0.5b", "tinyllama", "qwen2.5-coder:1.5b"]),
        |config| config.model_intent = true,
    );

    // the keyword rules alone would answer this as chat
    let report = h.orchestrator.run("What is a closure?", false, None).await;

    assert_eq!(report.mode, Intent::Task);
    assert!(report.success);
    let calls = h.backend.calls.lock().unwrap();
    let (model, _) = &calls[0];
    assert_eq!(model, "qwen2.5:0.5b");
    assert!(calls[0].1[0].content.contains("Classify this input"));
}

/// Test: an unclear label falls back to the keyword rules
#[tokio::test]
async fn test_model_intent_unclear_label_uses_rules() {
    let mut h = harness_configured(
        FakeBackend::new().labelling_intent("not sure"),
        ScriptedRunner::new(&[0]),
        ProfileName::Moderate,
        FakePackages::with_resident(&["qwen2.5:0.5b", "tinyllama", "qwen2.5-coder:1.5b"]),
        |config| config.model_intent = true,
    );

    let report = h.orchestrator.run("What is a closure?", false, None).await;

    assert_eq!(report.mode, Intent::Chat);
    assert_eq!(h.backend.calls_containing("Classify this input"), 1);
}

/// Test: chat mode answers from the transcript and never enters the loop
#[tokio::test]
async fn test_chat_uses_transcript() {
    let mut h = harness(FakeBackend::new(), ScriptedRunner::new(&[0]), ProfileName::Moderate);

    let first = h.orchestrator.run("What is a closure?", false, None).await;
    assert!(first.success);
    assert_eq!(first.mode, Intent::Chat);
    assert_eq!(first.iterations, 1);
    assert_eq!(
        first.answer.as_deref(),
        Some("A closure captures its environment.")
    );

    h.orchestrator
        .run("And in Rust?", false, Some(Intent::Chat))
        .await;
    let (router, messages) = h.backend.last_call().unwrap();
    assert_eq!(router, "qwen2.5:0.5b");
    // preamble, first question, first answer, second question
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[3].content, "And in Rust?");

    assert_eq!(h.orchestrator.conversation().len(), 4);
    assert_eq!(h.runner.run_count(), 0);
    assert!(!h.dir.path().join("runs.jsonl").exists());

    h.orchestrator.clear_history().unwrap();
    assert!(h.orchestrator.conversation().is_empty());
}
