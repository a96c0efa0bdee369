//! Capability-tier routing: which backend should serve a job.
//!
//! "Use the smallest model that can do the job": candidates are filtered by
//! tier window and capabilities, then tried smallest first, resident before
//! acquirable, with a fallback that never leaves the caller empty-handed
//! unless the tier window itself is empty.

pub mod selector;

pub use selector::{SelectError, Selection, Selector};
