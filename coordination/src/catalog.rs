//! Backend catalog: static descriptors, task templates and defaults.
//!
//! The catalog is pure data. Selection, acquisition and eviction all read it
//! but never mutate it; a run builds one `Catalog` (usually
//! [`Catalog::builtin`]) and shares it behind an `Arc`.
//!
//! ```text
//! tier 0  qwen2.5:0.5b  tinyllama            routing, voting, classification
//! tier 1  qwen2.5-coder:1.5b                 code_generation, debugging
//! tier 2  qwen2.5-coder:3b  phi3:mini        code_generation, reasoning, review
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an inference backend (an Ollama model tag, e.g. `"tinyllama"`).
pub type BackendId = String;

/// Highest tier any backend can declare.
pub const MAX_TIER: u8 = 2;

/// Coder used when nothing better can be selected.
pub const DEFAULT_CODER_MODEL: &str = "qwen2.5-coder:1.5b";
/// Router used for quick votes, chat and the last-resort fallback.
pub const DEFAULT_ROUTER_MODEL: &str = "qwen2.5:0.5b";
/// Default voter pool, in preference order.
pub const VOTER_MODELS: &[&str] = &["qwen2.5:0.5b", "tinyllama", "phi3:mini"];

/// Immutable description of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    /// On-disk size once pulled.
    pub size_mb: u64,
    /// Resident memory needed to serve requests.
    pub ram_mb: u64,
    /// Capability/cost class, `0..=MAX_TIER`.
    pub tier: u8,
    pub capabilities: BTreeSet<String>,
    pub speed_rating: u8,
    pub code_quality: u8,
    pub reasoning_quality: u8,
    /// Pinned: never evicted regardless of usage.
    pub always_keep: bool,
}

impl BackendDescriptor {
    /// Whether this backend declares every capability in `required`.
    pub fn covers<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> bool {
        required.into_iter().all(|cap| self.capabilities.contains(cap))
    }
}

/// Kind of job a requirement template describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Routing,
    CodeGeneration,
    SimpleCode,
    Voting,
    Review,
    Debugging,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routing => write!(f, "routing"),
            Self::CodeGeneration => write!(f, "code_generation"),
            Self::SimpleCode => write!(f, "simple_code"),
            Self::Voting => write!(f, "voting"),
            Self::Review => write!(f, "review"),
            Self::Debugging => write!(f, "debugging"),
        }
    }
}

/// Coarse task complexity label produced by the task analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    /// Lenient parse of an analyzer label; unknown labels are `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "medium" => Some(Self::Medium),
            "complex" => Some(Self::Complex),
            _ => None,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Medium => write!(f, "medium"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// What a job needs from a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequirement {
    pub capabilities: BTreeSet<String>,
    pub min_tier: u8,
    pub preferred_tier: u8,
    /// Complexity label → minimum tier for that complexity.
    #[serde(default)]
    pub complexity_upgrade: BTreeMap<Complexity, u8>,
    #[serde(default)]
    pub voter_count: Option<usize>,
}

impl TaskRequirement {
    pub fn new<I, S>(capabilities: I, min_tier: u8) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            min_tier,
            preferred_tier: min_tier,
            complexity_upgrade: BTreeMap::new(),
            voter_count: None,
        }
    }

    pub fn with_upgrade(mut self, complexity: Complexity, tier: u8) -> Self {
        self.complexity_upgrade.insert(complexity, tier);
        self
    }

    pub fn with_voter_count(mut self, count: usize) -> Self {
        self.voter_count = Some(count);
        self
    }

    /// Lowest admissible tier once the complexity upgrade is applied.
    ///
    /// The upgrade table can only raise the floor, never lower it.
    pub fn effective_min_tier(&self, complexity: Option<Complexity>) -> u8 {
        complexity
            .and_then(|c| self.complexity_upgrade.get(&c).copied())
            .map_or(self.min_tier, |upgraded| upgraded.max(self.min_tier))
    }
}

/// The static backend table plus task templates.
///
/// Descriptor order is significant: it is the stable tie-break when two
/// backends have the same size.
#[derive(Debug, Clone)]
pub struct Catalog {
    backends: Vec<BackendDescriptor>,
    requirements: BTreeMap<TaskKind, TaskRequirement>,
}

impl Catalog {
    pub fn new(
        backends: Vec<BackendDescriptor>,
        requirements: BTreeMap<TaskKind, TaskRequirement>,
    ) -> Self {
        Self {
            backends,
            requirements,
        }
    }

    /// The stock table of small Ollama models the swarm knows how to use.
    pub fn builtin() -> Self {
        let backends = vec![
            descriptor(
                "qwen2.5:0.5b",
                (397, 500, 0),
                &["classification", "voting", "simple_code", "routing"],
                (5, 2, 2),
                true,
            ),
            descriptor(
                "tinyllama",
                (637, 800, 0),
                &["classification", "voting", "review", "routing"],
                (5, 2, 3),
                false,
            ),
            descriptor(
                "qwen2.5-coder:1.5b",
                (986, 1200, 1),
                &["code_generation", "debugging", "refactoring"],
                (3, 4, 3),
                false,
            ),
            descriptor(
                "qwen2.5-coder:3b",
                (1900, 2500, 2),
                &[
                    "code_generation",
                    "debugging",
                    "complex_code",
                    "architecture",
                    "reasoning",
                ],
                (2, 4, 4),
                false,
            ),
            descriptor(
                "phi3:mini",
                (2200, 2800, 2),
                &["reasoning", "review", "analysis"],
                (2, 3, 4),
                false,
            ),
        ];

        let mut requirements = BTreeMap::new();
        requirements.insert(
            TaskKind::Routing,
            TaskRequirement::new(["classification"], 0),
        );
        requirements.insert(
            TaskKind::CodeGeneration,
            TaskRequirement::new(["code_generation"], 1)
                .with_upgrade(Complexity::Medium, 1)
                .with_upgrade(Complexity::Complex, 2),
        );
        requirements.insert(
            TaskKind::SimpleCode,
            TaskRequirement::new(["simple_code"], 0),
        );
        requirements.insert(
            TaskKind::Voting,
            TaskRequirement::new(["voting"], 0).with_voter_count(VOTER_MODELS.len()),
        );
        requirements.insert(TaskKind::Review, TaskRequirement::new(["review"], 0));
        requirements.insert(
            TaskKind::Debugging,
            TaskRequirement::new(["debugging"], 1),
        );

        Self::new(backends, requirements)
    }

    /// Look up a descriptor by exact id.
    pub fn get(&self, id: &str) -> Option<&BackendDescriptor> {
        self.backends.iter().find(|b| b.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Whether `id` is pinned. Unknown ids are never pinned.
    pub fn is_always_keep(&self, id: &str) -> bool {
        self.get(id).is_some_and(|b| b.always_keep)
    }

    /// Descriptors in catalog order.
    pub fn backends(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    pub fn requirement(&self, kind: TaskKind) -> Option<&TaskRequirement> {
        self.requirements.get(&kind)
    }

    /// Backends whose tier lies in `[min_tier, max_tier]` and that cover
    /// `capabilities`, smallest first (stable on catalog order).
    pub fn candidates<'a>(
        &'a self,
        capabilities: &BTreeSet<String>,
        min_tier: u8,
        max_tier: u8,
    ) -> Vec<&'a BackendDescriptor> {
        let mut candidates: Vec<&BackendDescriptor> = self
            .backends
            .iter()
            .filter(|b| b.tier >= min_tier && b.tier <= max_tier)
            .filter(|b| b.covers(capabilities))
            .collect();
        // sort_by_key is stable, so equal sizes keep catalog order.
        candidates.sort_by_key(|b| b.size_mb);
        candidates
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn descriptor(
    id: &str,
    (size_mb, ram_mb, tier): (u64, u64, u8),
    capabilities: &[&str],
    (speed_rating, code_quality, reasoning_quality): (u8, u8, u8),
    always_keep: bool,
) -> BackendDescriptor {
    BackendDescriptor {
        id: id.to_string(),
        size_mb,
        ram_mb,
        tier,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        speed_rating,
        code_quality,
        reasoning_quality,
        always_keep,
    }
}
