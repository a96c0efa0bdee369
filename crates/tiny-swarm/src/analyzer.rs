//! Task analysis: type and complexity of a goal, from the router or keywords.

use std::sync::LazyLock;

use coordination::{ChatMessage, ChatOptions, Complexity, InferenceBackend};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    /// `code`, `debug`, `test`, `review` or `general`.
    pub kind: String,
    pub complexity: Complexity,
    pub needs_reasoning: bool,
}

/// Shape the router is asked to reply with.
#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    needs_reasoning: bool,
}

fn default_kind() -> String {
    "code".to_string()
}

const COMPLEX_KEYWORDS: &[&str] = &[
    "algorithm",
    "optimize",
    "architecture",
    "system",
    "multiple",
    "integrate",
    "api",
    "database",
    "complex",
];

const SIMPLE_KEYWORDS: &[&str] = &["simple", "basic", "hello", "add", "print", "return"];

/// Keyword guess: any complex keyword wins, then any simple one, else medium.
pub fn estimate_complexity(goal: &str) -> Complexity {
    let goal = goal.to_lowercase();
    if COMPLEX_KEYWORDS.iter().any(|kw| goal.contains(kw)) {
        Complexity::Complex
    } else if SIMPLE_KEYWORDS.iter().any(|kw| goal.contains(kw)) {
        Complexity::Simple
    } else {
        Complexity::Medium
    }
}

/// Keyword-only analysis used when the router cannot help.
pub fn fallback_analysis(goal: &str) -> TaskAnalysis {
    TaskAnalysis {
        kind: default_kind(),
        complexity: estimate_complexity(goal),
        needs_reasoning: true,
    }
}

static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]+\}").expect("JSON_OBJECT_RE regex should compile"));

/// Pull the first flat JSON object out of a reply and read it.
///
/// An unknown complexity label is replaced by the keyword estimate.
pub fn parse_reply(reply: &str, goal: &str) -> Option<TaskAnalysis> {
    let object = JSON_OBJECT_RE.find(reply)?;
    let raw: RawAnalysis = serde_json::from_str(object.as_str()).ok()?;
    let complexity = raw
        .complexity
        .as_deref()
        .and_then(Complexity::from_label)
        .unwrap_or_else(|| estimate_complexity(goal));
    Some(TaskAnalysis {
        kind: raw.kind,
        complexity,
        needs_reasoning: raw.needs_reasoning,
    })
}

/// Ask `model` to analyse `goal`; any failure degrades to [`fallback_analysis`].
pub async fn analyze(backend: &dyn InferenceBackend, model: &str, goal: &str) -> TaskAnalysis {
    let prompt = format!(
        "Analyze this coding task. Reply with ONLY a JSON object.\n\n\
         Task: \"{goal}\"\n\n\
         Required format (NO other text):\n\
         {{\"type\":\"code\",\"complexity\":\"simple\",\"needs_reasoning\":false}}\n\n\
         Rules:\n\
         - type: code, debug, test, review, or general\n\
         - complexity: simple, medium, or complex\n\
         - needs_reasoning: true or false\n\n\
         JSON only:"
    );
    let options = ChatOptions::new(0.1).with_max_output_tokens(50);
    match backend
        .chat(model, &[ChatMessage::user(prompt)], options)
        .await
    {
        Ok(reply) => match parse_reply(&reply, goal) {
            Some(analysis) => return analysis,
            None => debug!(reply = %reply.trim(), "Analyzer reply had no usable JSON"),
        },
        Err(e) => debug!(error = %e, "Analyzer unavailable"),
    }
    fallback_analysis(goal)
}
