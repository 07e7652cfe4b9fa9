//! Load every leaf once, then retry failures in rounds.
//!
//! The first pass tries each leaf with the `light` profile. Each following round `r` (starting
//! at one) waits `round_delay * r` and then retries every leaf still failing with the
//! `resilient` profile, waiting `pacing` between consecutive leaves. Leaves still failing after
//! the last round are settled by the [Policy].

use super::{settle, Policy};
use crate::{
    retry::{self, Profile},
    state::LoadState,
    Error, Monitor, Phase, Reader,
};
use commonware_runtime::Clock;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the phased strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Retry profile of the first pass.
    pub light: Profile,

    /// Retry profile of each retry round.
    pub resilient: Profile,

    /// Maximum number of retry rounds.
    pub rounds: u32,

    /// Delay before the first retry round (multiplied by the round number for later ones).
    pub round_delay: Duration,

    /// Delay between consecutive leaves of a retry round.
    pub pacing: Duration,

    /// What to do with leaves still failing after the last round.
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            light: Profile::LIGHT,
            resilient: Profile::RESILIENT,
            rounds: 5,
            round_delay: Duration::from_millis(500),
            pacing: Duration::from_millis(100),
            policy: Policy::BestEffort,
        }
    }
}

/// Loads every leaf in `state`.
pub async fn load<E: Clock + Rng, R: Reader, M: Monitor>(
    context: &mut E,
    reader: &R,
    cfg: &Config,
    state: &mut LoadState,
    monitor: &mut M,
) -> Result<(), Error> {
    // First pass
    monitor.progress(state.progress(Phase::Loading));
    for index in 0..state.scanned() {
        let address = state.start(index);
        match retry::read(context, reader, address, &cfg.light).await {
            Ok(payload) => state.complete(index, payload),
            Err(_) => {
                debug!(index, ?address, "deferring chunk");
                state.fail(index);
            }
        }
        monitor.progress(state.progress(Phase::Loading));
    }

    // Retry rounds
    for round in 1..=cfg.rounds {
        let failures = state.failures();
        if failures.is_empty() {
            break;
        }
        let phase = Phase::Retrying { round };
        info!(round, remaining = failures.len(), "retrying chunks");
        monitor.progress(state.progress(phase));
        context.sleep(cfg.round_delay.saturating_mul(round)).await;

        for (position, index) in failures.into_iter().enumerate() {
            if position > 0 {
                context.sleep(cfg.pacing).await;
            }
            let address = state.start(index);
            match retry::read(context, reader, address, &cfg.resilient).await {
                Ok(payload) => state.complete(index, payload),
                Err(_) => state.fail(index),
            }
            monitor.progress(state.progress(phase));
        }
    }
    settle(state, cfg.policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembler::assemble,
        mocks::{Failure, Recorder, Remote},
        Address, Leaf,
    };
    use bytes::Bytes;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    /// Stores `n` leaves (failing those in `failing`) and discovers them.
    fn setup(remote: &Remote, n: u64, failing: &[u64], failure: Failure) -> LoadState {
        let mut state = LoadState::new();
        for index in 0..n {
            let address: Address = remote.leaf(format!("<{index}>"));
            if failing.contains(&index) {
                remote.fail(address, failure);
            }
            state.discover(Leaf { index, address });
        }
        state
    }

    #[test_traced]
    fn test_best_effort() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            let mut state = setup(&remote, 10, &[3, 7], Failure::Always);
            let cfg = Config::default();
            let mut recorder = Recorder::new();

            load(&mut context, &remote, &cfg, &mut state, &mut recorder)
                .await
                .unwrap();
            assert_eq!(state.loaded(), 8);
            assert_eq!(state.failed(), 2);
            assert_eq!(state.failures(), vec![3, 7]);

            // Every round retried both leaves with the full budget
            let failing = state.chunk(3).unwrap().address;
            let expected = cfg.light.max_attempts + cfg.rounds * cfg.resilient.max_attempts;
            assert_eq!(remote.reads(&failing), expected);

            // The failed leaves are left out of the document
            let total = state.scanned();
            let assembly = assemble(state.take_payloads(), total);
            assert_eq!(assembly.missing(), &[3, 7]);
            let full: usize = (0..10).map(|i| format!("<{i}>").len()).sum();
            assert!(assembly.len() < full);
            assert!(!assembly.buffer().windows(3).any(|w| w == b"<3>"));

            // Progress went through every round
            let last = recorder.last().unwrap();
            assert_eq!(last.phase, Phase::Retrying { round: cfg.rounds });
            assert_eq!((last.scanned, last.loaded, last.failed), (10, 8, 2));
        });
    }

    #[test_traced]
    fn test_strict() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            let mut state = setup(&remote, 10, &[0, 9], Failure::Always);
            let cfg = Config {
                policy: Policy::Strict,
                ..Config::default()
            };

            let result = load(&mut context, &remote, &cfg, &mut state, &mut ()).await;
            assert_eq!(
                result,
                Err(Error::Incomplete {
                    missing: 2,
                    total: 10
                })
            );
        });
    }

    #[test_traced]
    fn test_recovers_in_first_round() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            let cfg = Config::default();

            // Outlasts the first pass but not the first round
            let mut state = setup(
                &remote,
                4,
                &[1, 2],
                Failure::First(cfg.light.max_attempts + 1),
            );
            let mut recorder = Recorder::new();

            let start = context.current();
            load(&mut context, &remote, &cfg, &mut state, &mut recorder)
                .await
                .unwrap();
            let elapsed = context.current().duration_since(start).unwrap();
            assert!(state.is_complete());
            assert_eq!(state.failed(), 0);
            assert!(elapsed >= cfg.round_delay + cfg.pacing);

            // No second round
            let phases: Vec<Phase> = recorder.updates().iter().map(|p| p.phase).collect();
            assert!(phases.contains(&Phase::Retrying { round: 1 }));
            assert!(!phases.contains(&Phase::Retrying { round: 2 }));

            let assembly = assemble(state.take_payloads(), 4);
            assert_eq!(assembly.buffer(), &Bytes::from("<0><1><2><3>"));
        });
    }

    #[test_traced]
    fn test_no_leaves() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            let mut state = LoadState::new();
            load(&mut context, &remote, &Config::default(), &mut state, &mut ())
                .await
                .unwrap();
            assert!(state.is_complete());
        });
    }
}
