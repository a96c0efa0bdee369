//! Capability seams to the outside world.
//!
//! The engines in this crate never talk to a model server or a package
//! manager directly. They go through these traits so the application can
//! plug in Ollama (or anything else) and tests can plug in fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::BackendId;

/// One entry of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Generation knobs passed with each call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: f32,
    /// `None` lets the backend decide.
    pub max_output_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature,
            max_output_tokens: None,
        }
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }
}

/// Why a single backend call produced no usable text.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("backend {backend} unreachable: {message}")]
    Unavailable { backend: BackendId, message: String },

    #[error("backend {backend} returned an error: {message}")]
    Backend { backend: BackendId, message: String },

    #[error("backend {backend} timed out after {seconds:.1}s")]
    TimedOut { backend: BackendId, seconds: f64 },

    #[error("malformed response from {backend}: {message}")]
    Malformed { backend: BackendId, message: String },

    #[error("call task aborted: {0}")]
    Aborted(String),
}

/// Opaque inference capability. Must tolerate concurrent independent calls.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn chat(
        &self,
        backend: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<String, CallError>;
}

/// A package-manager operation that did not succeed.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {seconds}s")]
    TimedOut { command: String, seconds: u64 },
}

/// External package manager holding the resident backend set.
///
/// Calls are assumed to be serialised by the package manager itself.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Ids currently resident on the host.
    async fn list(&self) -> Result<Vec<BackendId>, PackageError>;

    /// Make `id` resident.
    async fn pull(&self, id: &str) -> Result<(), PackageError>;

    /// Remove `id` from the host.
    async fn remove(&self, id: &str) -> Result<(), PackageError>;
}

/// Strip a `:tag` suffix, so `phi3:mini` and `phi3:latest` share `phi3`.
pub fn base_name(id: &str) -> &str {
    id.split(':').next().unwrap_or(id)
}
