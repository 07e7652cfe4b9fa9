//! Strategies for loading discovered leaves.
//!
//! The strategies are not interchangeable:
//!
//! * [phased] waits for the scan to finish, tries every leaf once, then retries the failures in
//!   a bounded number of rounds. Leaves still failing afterwards are given up on.
//! * [overlapped] starts loading while the scan is still running and never gives up on a leaf.
//!   Instead, the caller bounds the whole load with a deadline.
//! * [concurrent] waits for the scan to finish, then keeps a bounded number of reads in flight.
//!   Leaves failing their retry budget are given up on.
//!
//! What happens to a leaf that is given up on is decided by the [Policy].

use crate::{state::LoadState, Error};
use tracing::warn;

pub mod concurrent;
pub mod overlapped;
pub mod phased;

/// What to do with leaves that could not be loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Policy {
    /// Assemble the document without them and report them as missing.
    #[default]
    BestEffort,

    /// Fail the load with [Error::Incomplete].
    Strict,
}

/// How leaves are scheduled for loading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    Phased(phased::Config),
    Overlapped(overlapped::Config),
    Concurrent(concurrent::Config),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Phased(phased::Config::default())
    }
}

/// Applies `policy` to the leaves `state` gave up on.
pub(crate) fn settle(state: &LoadState, policy: Policy) -> Result<(), Error> {
    let missing = state.failed();
    if missing == 0 {
        return Ok(());
    }
    let total = state.scanned();
    warn!(missing, total, failures = ?state.failures(), "unable to load chunks");
    match policy {
        Policy::BestEffort => Ok(()),
        Policy::Strict => Err(Error::Incomplete { missing, total }),
    }
}
