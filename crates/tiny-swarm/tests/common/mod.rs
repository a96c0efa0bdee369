//! Fakes shared by the orchestrator integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coordination::{
    Acquirer, BackendId, CallError, Catalog, ChatMessage, ChatOptions, HardwareProbe,
    HardwareProfile, HardwareSnapshot, InferenceBackend, PackageError, PackageManager,
    ProfileName, ResourceRegistry, Selector, StaticProbe,
};
use tiny_swarm::actions::{ExecError, TestRun, TestRunner};
use tiny_swarm::{Orchestrator, SwarmConfig};

pub const SIMPLE_ANALYSIS: &str =
    r#"{"type":"code","complexity":"simple","needs_reasoning":false}"#;

/// Backend that answers by prompt kind and records every call.
pub struct FakeBackend {
    pub analysis: String,
    pub code: String,
    pub code_script: Mutex<VecDeque<String>>,
    pub chat_reply: String,
    /// Reply to intent classification; `None` answers like chat.
    pub intent_label: Option<String>,
    /// Vote reply per backend id; missing ids answer `default_vote`.
    pub votes: HashMap<String, String>,
    pub default_vote: String,
    pub calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            analysis: SIMPLE_ANALYSIS.to_string(),
            code: "```python\nprint(1 + 1)\n```".to_string(),
            code_script: Mutex::new(VecDeque::new()),
            chat_reply: "A closure captures its environment.".to_string(),
            intent_label: None,
            votes: HashMap::new(),
            default_vote: "plan_skill".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn voting(mut self, reply: &str) -> Self {
        self.default_vote = reply.to_string();
        self
    }

    pub fn labelling_intent(mut self, label: &str) -> Self {
        self.intent_label = Some(label.to_string());
        self
    }

    /// Answer the first code prompts with `replies`, then with `code`.
    pub fn coding_first(self, replies: &[&str]) -> Self {
        *self.code_script.lock().unwrap() = replies.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_analysis(mut self, analysis: &str) -> Self {
        self.analysis = analysis.to_string();
        self
    }

    /// Calls whose prompt contains `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, messages)| messages.iter().any(|m| m.content.contains(needle)))
            .count()
    }

    pub fn last_call(&self) -> Option<(String, Vec<ChatMessage>)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn chat(
        &self,
        backend: &str,
        messages: &[ChatMessage],
        _options: ChatOptions,
    ) -> Result<String, CallError> {
        self.calls
            .lock()
            .unwrap()
            .push((backend.to_string(), messages.to_vec()));
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let reply = if prompt.contains("Analyze this coding task") {
            self.analysis.clone()
        } else if prompt.contains("Decide next action") {
            self.votes
                .get(backend)
                .cloned()
                .unwrap_or_else(|| self.default_vote.clone())
        } else if prompt.contains("Classify this input") {
            self.intent_label
                .clone()
                .unwrap_or_else(|| self.chat_reply.clone())
        } else if prompt.contains("Write Python code") {
            self.code_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.code.clone())
        } else {
            self.chat_reply.clone()
        };
        Ok(reply)
    }
}

/// Package manager over an in-memory resident set.
#[derive(Default)]
pub struct FakePackages {
    pub resident: Mutex<BTreeSet<String>>,
    pub pulls: Mutex<Vec<String>>,
}

impl FakePackages {
    pub fn with_resident(ids: &[&str]) -> Self {
        Self {
            resident: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            pulls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PackageManager for FakePackages {
    async fn list(&self) -> Result<Vec<BackendId>, PackageError> {
        Ok(self.resident.lock().unwrap().iter().cloned().collect())
    }

    async fn pull(&self, id: &str) -> Result<(), PackageError> {
        self.pulls.lock().unwrap().push(id.to_string());
        self.resident.lock().unwrap().insert(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), PackageError> {
        self.resident.lock().unwrap().remove(id);
        Ok(())
    }
}

/// Runner that replays scripted exit codes, repeating the last one.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<i32>>,
    last: Mutex<i32>,
    pub runs: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(exit_codes: &[i32]) -> Self {
        Self {
            script: Mutex::new(exit_codes.iter().copied().collect()),
            last: Mutex::new(exit_codes.last().copied().unwrap_or(0)),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl TestRunner for ScriptedRunner {
    async fn run(&self, artifact: &str) -> Result<TestRun, ExecError> {
        self.runs.lock().unwrap().push(artifact.to_string());
        let code = match self.script.lock().unwrap().pop_front() {
            Some(code) => {
                *self.last.lock().unwrap() = code;
                code
            }
            None => *self.last.lock().unwrap(),
        };
        Ok(TestRun {
            exit_code: Some(code),
            stdout: "2\n".to_string(),
            stderr: if code == 0 {
                String::new()
            } else {
                "Traceback: boom".to_string()
            },
        })
    }
}

pub const HOST: HardwareSnapshot = HardwareSnapshot {
    total_ram_mb: 16_384,
    available_ram_mb: 8_000,
    free_disk_mb: 50_000,
    cpu_cores: 8,
};

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub backend: Arc<FakeBackend>,
    pub packages: Arc<FakePackages>,
    pub runner: Arc<ScriptedRunner>,
    pub registry: Arc<ResourceRegistry>,
    pub orchestrator: Orchestrator,
}

pub fn config_in(dir: &std::path::Path) -> SwarmConfig {
    SwarmConfig {
        workspace: dir.join("workspace"),
        registry_path: dir.join("registry.json"),
        conversation_path: dir.join("conversation.json"),
        vote_timeout_secs: 1,
        ..SwarmConfig::default()
    }
}

/// Orchestrator wired to fakes under `profile`, with the default voters and
/// the 1.5b coder already resident.
pub fn harness(backend: FakeBackend, runner: ScriptedRunner, profile: ProfileName) -> Harness {
    harness_with(
        backend,
        runner,
        profile,
        FakePackages::with_resident(&["qwen2.5:0.5b", "tinyllama", "qwen2.5-coder:1.5b"]),
    )
}

pub fn harness_with(
    backend: FakeBackend,
    runner: ScriptedRunner,
    profile: ProfileName,
    packages: FakePackages,
) -> Harness {
    harness_configured(backend, runner, profile, packages, |_| {})
}

/// Like [`harness_with`], with a hook to adjust the config first.
pub fn harness_configured(
    backend: FakeBackend,
    runner: ScriptedRunner,
    profile: ProfileName,
    packages: FakePackages,
    adjust: impl FnOnce(&mut SwarmConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    adjust(&mut config);
    let backend = Arc::new(backend);
    let packages = Arc::new(packages);
    let runner = Arc::new(runner);

    let catalog = Arc::new(Catalog::builtin());
    let probe: Arc<dyn HardwareProbe> = Arc::new(StaticProbe(HOST));
    let registry = Arc::new(ResourceRegistry::open(
        config.registry_path.clone(),
        packages.clone(),
    ));
    let acquirer = Arc::new(Acquirer::new(catalog.clone(), registry.clone(), true));
    let selector = Arc::new(Selector::new(
        catalog,
        registry.clone(),
        acquirer,
        probe,
        HardwareProfile::for_name(profile),
    ));
    let orchestrator = Orchestrator::new(backend.clone(), selector, runner.clone(), config)
        .with_run_log(dir.path().join("runs.jsonl"));

    Harness {
        dir,
        backend,
        packages,
        runner,
        registry,
        orchestrator,
    }
}
