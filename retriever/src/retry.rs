//! Bounded retry with exponential backoff.
//!
//! Attempt `i` (0-indexed) that fails is followed by a wait of
//! `min(base_delay * 2^i + jitter, max_delay)` before attempt `i + 1`. No wait precedes the
//! first attempt and no wait follows the last one.

use crate::{Address, Error, Reader};
use bytes::Bytes;
use commonware_runtime::Clock;
use rand::Rng;
use std::{fmt::Debug, future::Future, time::Duration};
use tracing::debug;

/// Retry budget for a single remote operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Profile {
    /// Maximum number of attempts (values below one are treated as one).
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound on any single delay (jitter included).
    pub max_delay: Duration,

    /// Upper bound on the random delay added to each backoff.
    pub jitter: Duration,
}

impl Profile {
    /// Small budget for bulk loading, where a failing item is requeued by a scheduler anyway.
    pub const LIGHT: Self = Self {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter: Duration::ZERO,
    };

    /// Larger budget with jitter, for the scan's critical path and scheduler requeues.
    pub const RESILIENT: Self = Self {
        max_attempts: 6,
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
        jitter: Duration::from_millis(100),
    };

    /// Returns the number of attempts this profile allows.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns how long to wait after failed attempt `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let mut delay = self.base_delay.saturating_mul(factor);
        if !self.jitter.is_zero() {
            let jitter = rng.gen_range(0..=self.jitter.as_millis() as u64);
            delay = delay.saturating_add(Duration::from_millis(jitter));
        }
        delay.min(self.max_delay)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::RESILIENT
    }
}

/// Runs `operation` until it succeeds or `profile` is exhausted.
///
/// `operation` receives the 0-indexed attempt number. On exhaustion, the error of the last
/// attempt is returned.
pub async fn retry<E, T, Err, F, Fut>(
    context: &mut E,
    profile: &Profile,
    mut operation: F,
) -> Result<T, Err>
where
    E: Clock + Rng,
    Err: Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Err>>,
{
    let attempts = profile.attempts();
    let mut attempt = 0;
    loop {
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt + 1 >= attempts {
            return Err(err);
        }
        let delay = profile.delay(attempt, &mut *context);
        debug!(attempt, ?delay, ?err, "attempt failed");
        context.sleep(delay).await;
        attempt += 1;
    }
}

/// Reads the payload at `address`, retrying according to `profile`.
///
/// Returns [Error::FetchFailed] once the profile is exhausted.
pub async fn read<E: Clock + Rng, R: Reader>(
    context: &mut E,
    reader: &R,
    address: Address,
    profile: &Profile,
) -> Result<Bytes, Error> {
    retry(context, profile, |_| {
        let mut reader = reader.clone();
        async move { reader.read(address).await }
    })
    .await
    .map_err(|err| {
        debug!(?address, ?err, "read exhausted");
        Error::FetchFailed(address)
    })
}
