//! Backend lifecycle: bringing backends onto the host and taking them off.
//!
//! - [`Acquirer`] makes a named backend resident through the package manager
//!   and records swarm acquisitions in the registry.
//! - [`Evictor`] removes swarm-acquired, rarely used, unpinned backends to
//!   stay inside the disk budget.
//!
//! Neither ever raises: failures come back as `false` / `None` and are logged.

pub mod acquirer;
pub mod evictor;

pub use acquirer::Acquirer;
pub use evictor::{Evictor, DISK_MARGIN_MB, MIN_USES_TO_KEEP};
