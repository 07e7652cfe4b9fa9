//! Load leaves with a bounded number of reads in flight.
//!
//! Leaves are issued in index order, at most `concurrency` at a time, each with the full
//! `profile`. Completions are applied to the [LoadState] by the calling task as they arrive, in
//! whatever order they finish. Leaves that exhaust their budget are settled by the [Policy].

use super::{settle, Policy};
use crate::{
    retry::{self, Profile},
    state::LoadState,
    Error, Monitor, Phase, Reader,
};
use commonware_runtime::Clock;
use futures::{stream::FuturesUnordered, StreamExt};
use rand::Rng;
use std::num::NonZeroUsize;
use tracing::debug;

/// Configuration for the concurrent strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of leaves loading at once.
    pub concurrency: NonZeroUsize,

    /// Retry profile of each leaf.
    pub profile: Profile,

    /// What to do with leaves that exhaust their budget.
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: NonZeroUsize::new(8).expect("concurrency must be non-zero"),
            profile: Profile::RESILIENT,
            policy: Policy::BestEffort,
        }
    }
}

/// Loads every leaf in `state`.
pub async fn load<E: Clock + Rng, R: Reader, M: Monitor>(
    context: &E,
    reader: &R,
    cfg: &Config,
    state: &mut LoadState,
    monitor: &mut M,
) -> Result<(), Error> {
    let total = state.scanned();
    let mut next = 0;
    let mut inflight = FuturesUnordered::new();
    monitor.progress(state.progress(Phase::Loading));
    loop {
        // Fill the window
        while next < total && inflight.len() < cfg.concurrency.get() {
            let index = next;
            next += 1;
            let address = state.start(index);
            let mut context = context.clone();
            let reader = reader.clone();
            let profile = cfg.profile;
            inflight.push(async move {
                let result = retry::read(&mut context, &reader, address, &profile).await;
                (index, result)
            });
        }

        // Apply the next completion
        let Some((index, result)) = inflight.next().await else {
            break;
        };
        match result {
            Ok(payload) => state.complete(index, payload),
            Err(err) => {
                debug!(index, ?err, "giving up on chunk");
                state.fail(index);
            }
        }
        monitor.progress(state.progress(Phase::Loading));
    }
    settle(state, cfg.policy)
}
