//! User configuration: `~/.swarm-config/config.toml` plus `SWARM_*` overrides.

use std::path::{Path, PathBuf};

use coordination::{HardwareProfile, ProfileName, DEFAULT_ROUTER_MODEL, VOTER_MODELS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// `default_model` value that defers to the hardware profile.
pub const AUTO_MODEL: &str = "auto";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config at {} is not valid TOML: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not serialise config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown config key `{0}`")]
    UnknownKey(String),

    #[error("invalid value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },
}

/// Top-level swarm configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Coder backend id, or `"auto"` for the profile's recommendation.
    pub default_model: String,
    /// Backend used for task analysis and intent classification.
    pub router_model: String,
    /// Backends polled on each vote, in order. Entries above the profile's
    /// tier cap or that cannot be made resident are skipped.
    pub voter_models: Vec<String>,
    /// Ask the router model for the intent instead of the keyword rules.
    pub model_intent: bool,
    /// Never pull backends.
    pub offline_mode: bool,
    /// Where generated skills are written.
    pub workspace: PathBuf,
    /// Free disk through the evictor before pulling.
    pub auto_cleanup: bool,
    pub auto_download: bool,
    /// Skip RAM detection and use this profile.
    pub hardware_profile: Option<ProfileName>,
    pub ollama_url: String,
    /// Per-voter timeout.
    pub vote_timeout_secs: u64,
    pub registry_path: PathBuf,
    pub conversation_path: PathBuf,
    /// Chat transcript entries kept on disk.
    pub max_history: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        let config_dir = config_dir();
        Self {
            default_model: AUTO_MODEL.to_string(),
            router_model: DEFAULT_ROUTER_MODEL.to_string(),
            voter_models: VOTER_MODELS.iter().map(|s| s.to_string()).collect(),
            model_intent: false,
            offline_mode: false,
            workspace: config_dir.join("workspace"),
            auto_cleanup: true,
            auto_download: true,
            hardware_profile: None,
            ollama_url: "http://localhost:11434".to_string(),
            vote_timeout_secs: 10,
            registry_path: home_dir().join(".swarm").join("model_registry.json"),
            conversation_path: config_dir.join("conversation_history.json"),
            max_history: 20,
        }
    }
}

impl SwarmConfig {
    /// Load `path`, writing defaults there first if it does not exist.
    /// Environment overrides are applied after loading and never persisted.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "Wrote default config");
            config
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_toml()?).map_err(io_err)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `SWARM_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SWARM_AUTO_DOWNLOAD").and_then(|v| parse_flag(&v)) {
            self.auto_download = v;
        }
        if let Some(v) = lookup("SWARM_OFFLINE").and_then(|v| parse_flag(&v)) {
            self.offline_mode = v;
        }
        if let Some(v) = lookup("SWARM_MODEL_INTENT").and_then(|v| parse_flag(&v)) {
            self.model_intent = v;
        }
        if let Some(url) = lookup("SWARM_OLLAMA_URL") {
            self.ollama_url = url;
        }
        if let Some(dir) = lookup("SWARM_WORKSPACE") {
            self.workspace = PathBuf::from(dir);
        }
        debug!(
            auto_download = self.auto_download,
            offline = self.offline_mode,
            ollama_url = %self.ollama_url,
            "Config resolved"
        );
    }

    /// Set one key from its command-line text form.
    ///
    /// `true`/`false` become booleans, digit strings integers, dotted digit
    /// strings floats, anything else a string. The result must still
    /// deserialise as a `SwarmConfig`.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let mut table = match toml::Value::try_from(&*self)? {
            toml::Value::Table(table) => table,
            _ => toml::Table::new(),
        };
        // `None` fields are omitted when serialised.
        if !table.contains_key(key) && key != "hardware_profile" {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        table.insert(key.to_string(), parse_value(raw));
        *self = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.message().to_string(),
            })?;
        Ok(())
    }

    /// Coder for a run under `profile`.
    pub fn coder_model(&self, profile: &HardwareProfile) -> String {
        if self.default_model == AUTO_MODEL {
            profile.recommended_model.clone()
        } else {
            self.default_model.clone()
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_value(raw: &str) -> toml::Value {
    let lower = raw.to_ascii_lowercase();
    if lower == "true" {
        return toml::Value::Boolean(true);
    }
    if lower == "false" {
        return toml::Value::Boolean(false);
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = raw.parse::<i64>() {
            return toml::Value::Integer(n);
        }
    }
    if raw.contains('.') && raw.chars().all(|c| c.is_ascii_digit() || c == '.') {
        if let Ok(f) = raw.parse::<f64>() {
            return toml::Value::Float(f);
        }
    }
    toml::Value::String(raw.to_string())
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `~/.swarm-config`.
pub fn config_dir() -> PathBuf {
    home_dir().join(".swarm-config")
}

/// `~/.swarm-config/config.toml`.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
