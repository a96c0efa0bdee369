//! Task vs. chat classification of a user goal.

use std::fmt;

use coordination::{ChatMessage, ChatOptions, InferenceBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Build something: run the plan/write/test loop.
    Task,
    /// Answer directly from the router.
    Chat,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

const ACTION_VERBS: &[&str] = &[
    "create", "make", "build", "write", "generate", "implement", "fix", "debug", "refactor",
    "optimize", "delete", "remove", "add", "update", "modify", "change", "convert", "transform",
    "develop", "code", "program", "script", "design", "construct", "edit", "patch", "solve",
    "automate", "deploy", "set up",
];

const QUESTION_STARTERS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "can you", "could you", "would you",
    "explain", "tell me", "describe", "help me understand", "what's", "what is", "is there",
    "are there", "do you", "does",
];

const GREETINGS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "thanks",
    "thank you",
];

const CODE_REQUESTS: &[&str] = &[
    "function that",
    "script that",
    "program that",
    "code that",
    "class that",
    "module that",
    "api that",
];

/// Keyword rules, checked in order; the first hit decides.
///
/// 1. An action verb followed by a space, or at the very start → task.
/// 2. A question starter at the start → chat.
/// 3. A greeting (whole input or first words) → chat.
/// 4. A "<thing> that" code request anywhere → task.
/// 5. Otherwise chat.
pub fn classify(text: &str) -> Intent {
    let text = text.trim().to_lowercase();

    if ACTION_VERBS
        .iter()
        .any(|verb| text.contains(&format!("{verb} ")) || text.starts_with(verb))
    {
        return Intent::Task;
    }
    if QUESTION_STARTERS.iter().any(|q| text.starts_with(q)) {
        return Intent::Chat;
    }
    if GREETINGS
        .iter()
        .any(|g| text == *g || text.starts_with(&format!("{g} ")))
    {
        return Intent::Chat;
    }
    if CODE_REQUESTS.iter().any(|p| text.contains(p)) {
        return Intent::Task;
    }
    Intent::Chat
}

/// Ask `model` for a one-word label, falling back to [`classify`] when the
/// call fails or the reply names neither label.
pub async fn classify_with_backend(
    backend: &dyn InferenceBackend,
    model: &str,
    text: &str,
) -> Intent {
    let prompt = format!(
        "Classify this input. Reply with ONLY \"task\" or \"chat\".\n\n\
         Input: \"{text}\"\n\n\
         Rules:\n\
         - task: wants code created, modified, debugged, or file operations\n\
         - chat: asking questions, explanations, or general conversation\n\n\
         Classification:"
    );
    let options = ChatOptions::new(0.1).with_max_output_tokens(5);
    match backend
        .chat(model, &[ChatMessage::user(prompt)], options)
        .await
    {
        Ok(reply) => {
            let reply = reply.to_lowercase();
            if reply.contains("task") {
                return Intent::Task;
            }
            if reply.contains("chat") {
                return Intent::Chat;
            }
            debug!(reply = %reply.trim(), "Unclear intent label, using rules");
        }
        Err(e) => debug!(error = %e, "Intent model unavailable, using rules"),
    }
    classify(text)
}
