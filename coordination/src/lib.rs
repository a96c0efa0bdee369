//! Swarm coordination engines
//!
//! Deterministic building blocks for running a swarm of small local models:
//!
//! - [`catalog`]: backend descriptors, task templates and defaults
//! - [`hardware`]: profile ladder and host snapshot figures
//! - [`backend`]: inference and package-manager capability traits
//! - [`registry`]: resident set, swarm-acquired set and usage counters
//! - [`lifecycle`]: acquisition and eviction against disk budgets
//! - [`router`]: capability-tier backend selection
//! - [`ensemble`]: parallel voting consensus over a closed action vocabulary
//!
//! Nothing here performs concrete I/O beyond the registry's own JSON record.
//! Model servers, package managers and host probes are supplied by the
//! application through the traits in [`backend`] and [`hardware`].

pub mod backend;
pub mod catalog;
pub mod ensemble;
pub mod hardware;
pub mod lifecycle;
pub mod registry;
pub mod router;

pub use backend::{
    base_name, CallError, ChatMessage, ChatOptions, InferenceBackend, PackageError, PackageManager,
};
pub use catalog::{
    BackendDescriptor, BackendId, Catalog, Complexity, TaskKind, TaskRequirement,
    DEFAULT_CODER_MODEL, DEFAULT_ROUTER_MODEL, MAX_TIER, VOTER_MODELS,
};
pub use ensemble::{Action, VoteResult, Voter, VoterResponse};
pub use hardware::{
    HardwareProbe, HardwareProfile, HardwareSnapshot, ProfileName, StaticProbe,
    RAM_SAFETY_FRACTION,
};
pub use lifecycle::{Acquirer, Evictor, DISK_MARGIN_MB, MIN_USES_TO_KEEP};
pub use registry::{RegistryError, RegistryRecord, ResidentSet, ResourceRegistry};
pub use router::{SelectError, Selection, Selector};
