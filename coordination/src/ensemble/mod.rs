//! Parallel voting consensus.
//!
//! - [`action`]: the closed action vocabulary and its free-text parser
//! - [`voting`]: pure majority tally with vocabulary-order tie-break
//! - [`voter`]: concurrent fan-out with per-call and collection timeouts

pub mod action;
pub mod voter;
pub mod voting;

pub use action::Action;
pub use voter::{Voter, COLLECTION_GRACE, DEFAULT_VOTE_TIMEOUT};
pub use voting::{VoteResult, VoterResponse, DEGRADED_CONFIDENCE};
