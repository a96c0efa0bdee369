//! Chat-mode transcript persisted as JSON.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use coordination::ChatMessage;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Preamble sent ahead of the transcript in chat mode.
pub const SYSTEM_PREAMBLE: &str = "You are a helpful AI assistant. Be concise and helpful.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Rolling transcript capped at `max_history` entries.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    max_history: usize,
    entries: Vec<Entry>,
}

impl ConversationStore {
    /// Open the transcript at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>, max_history: usize) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable transcript");
                Vec::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read transcript");
                Vec::new()
            }
        };
        Self {
            path,
            max_history,
            entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one turn and persist.
    pub fn add(&mut self, role: &str, content: &str) -> io::Result<()> {
        self.entries.push(Entry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        self.save()
    }

    /// Transcript as chat messages, optionally led by [`SYSTEM_PREAMBLE`].
    pub fn messages(&self, include_system: bool) -> Vec<ChatMessage> {
        let preamble = include_system.then(|| ChatMessage::system(SYSTEM_PREAMBLE));
        preamble
            .into_iter()
            .chain(
                self.entries
                    .iter()
                    .map(|e| ChatMessage::new(e.role.clone(), e.content.clone())),
            )
            .collect()
    }

    pub fn last_n(&self, n: usize) -> &[Entry] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    pub fn clear(&mut self) -> io::Result<()> {
        self.entries.clear();
        self.save()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&mut self) -> io::Result<()> {
        let excess = self.entries.len().saturating_sub(self.max_history);
        self.entries.drain(..excess);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(io::Error::other)?;
        std::fs::write(&self.path, json)
    }
}
