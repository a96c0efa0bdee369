//! Ollama adapters: `/api/chat` over HTTP and the `ollama` CLI as package manager.

use std::time::Duration;

use async_trait::async_trait;
use coordination::{
    BackendId, CallError, ChatMessage, ChatOptions, InferenceBackend, PackageError,
    PackageManager,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// `ollama list` timeout.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);
/// `ollama rm` timeout. Pulls are unbounded.
pub const REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat client for a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    base_url: String,
    client: Client,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: RequestOptions,
}

#[derive(Serialize)]
struct RequestOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn chat(
        &self,
        backend: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<String, CallError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: backend,
            messages,
            stream: false,
            options: RequestOptions {
                temperature: options.temperature,
                num_predict: options.max_output_tokens,
            },
        };
        debug!(backend, messages = messages.len(), "Ollama chat");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Unavailable {
                backend: backend.to_string(),
                message: if e.is_connect() {
                    format!(
                        "Ollama not reachable at {} (is `ollama serve` running?)",
                        self.base_url
                    )
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(CallError::Backend {
                backend: backend.to_string(),
                message: format!("{status}: {message}"),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| CallError::Malformed {
            backend: backend.to_string(),
            message: e.to_string(),
        })?;
        Ok(parsed.message.content)
    }
}

/// Package manager backed by the `ollama` binary.
///
/// The CLI has no library interface we can link against, so we shell out.
#[derive(Debug, Clone)]
pub struct OllamaCli {
    bin: String,
}

impl OllamaCli {
    pub fn new() -> Self {
        Self::with_binary("ollama")
    }

    pub fn with_binary(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str], limit: Option<Duration>) -> Result<String, PackageError> {
        let command = format!("{} {}", self.bin, args.join(" "));
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).kill_on_drop(true);

        let output = match limit {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| PackageError::TimedOut {
                    command: command.clone(),
                    seconds: limit.as_secs(),
                })?,
            None => cmd.output().await,
        }
        .map_err(|source| PackageError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(PackageError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for OllamaCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PackageManager for OllamaCli {
    async fn list(&self) -> Result<Vec<BackendId>, PackageError> {
        let stdout = self.run(&["list"], Some(LIST_TIMEOUT)).await?;
        Ok(parse_list(&stdout))
    }

    async fn pull(&self, id: &str) -> Result<(), PackageError> {
        self.run(&["pull", id], None).await.map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<(), PackageError> {
        self.run(&["rm", id], Some(REMOVE_TIMEOUT)).await.map(|_| ())
    }
}

/// Model names from `ollama list` output: first column, header skipped.
pub fn parse_list(stdout: &str) -> Vec<BackendId> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
