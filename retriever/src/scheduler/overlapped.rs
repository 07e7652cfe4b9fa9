//! Load leaves while the scan is still discovering them.
//!
//! Two tasks are spawned: a scanner that pushes every leaf onto a pending queue as soon as it is
//! discovered, and a single worker that drains the queue, reading each leaf with the `profile`.
//! A leaf that exhausts its budget is put back at the tail of the queue, so no leaf is ever
//! given up on (it is read again after `requeue_delay`). The load instead ends when every leaf
//! has loaded or when the deadline expires.
//!
//! Both tasks report to the caller over a single channel, and only the caller updates the
//! [LoadState]. Dropping the load (or hitting the deadline) aborts both tasks, releasing the
//! queue and any backoff in progress.

use crate::{
    retry::{self, Profile},
    scanner::Scanner,
    state::LoadState,
    Directory, Error, Leaf, Monitor, Phase, Reader, Site,
};
use bytes::Bytes;
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt,
};
use rand::Rng;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info, warn};

/// Configuration for the overlapped strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Retry profile of each attempt to load a leaf.
    pub profile: Profile,

    /// Maximum duration of the whole load, scan included.
    pub timeout: Duration,

    /// Wait before reading a requeued leaf again.
    pub requeue_delay: Duration,
}

impl Config {
    /// Creates a configuration bounding the load by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            profile: Profile::RESILIENT,
            timeout,
            requeue_delay: Duration::from_millis(500),
        }
    }
}

/// Reports sent to the coordinating task.
enum Event {
    /// The scanner discovered a leaf.
    Discovered(Leaf),

    /// The scanner discovered every leaf.
    Scanned(u64),

    /// The scanner failed.
    ScanFailed(Error),

    /// The worker started loading a leaf.
    Loading(u64),

    /// The worker loaded a leaf.
    Loaded(u64, Bytes),

    /// The worker exhausted its budget on a leaf and put it back in the queue.
    Requeued(u64),
}

/// Aborts the spawned tasks when dropped.
struct Aborter(Vec<Handle<()>>);

impl Drop for Aborter {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Discovers the leaves of `site` and loads them into `state`.
///
/// Returns [Error::Timeout] if every leaf has not loaded by the deadline.
#[allow(clippy::too_many_arguments)]
pub async fn load<E, D, R, M>(
    context: E,
    site: Site,
    directory: D,
    reader: R,
    scan: Profile,
    cfg: &Config,
    state: &mut LoadState,
    monitor: &mut M,
) -> Result<(), Error>
where
    E: Clock + Spawner + Metrics + Rng,
    D: Directory,
    R: Reader,
    M: Monitor,
{
    let deadline = context.current() + cfg.timeout;
    let (events, mut receiver) = mpsc::unbounded();
    let (queue, pending) = mpsc::unbounded();

    // Start the worker before the scanner so no leaf waits on it
    let worker = context.with_label("worker").spawn({
        let events = events.clone();
        let profile = cfg.profile;
        let requeue_delay = cfg.requeue_delay;
        let reader = reader.clone();
        move |context| work(context, reader, profile, requeue_delay, pending, events)
    });
    let scanner = context.with_label("scanner").spawn(move |context| async move {
        let mut scanner = Scanner::new(context, reader, scan);
        let result = scanner
            .discover(&site, &directory, |leaf| {
                // Announce the leaf before the worker can pick it up
                let _ = events.unbounded_send(Event::Discovered(leaf));
                let _ = queue.unbounded_send(leaf);
            })
            .await;
        let event = match result {
            Ok(total) => Event::Scanned(total),
            Err(err) => Event::ScanFailed(err),
        };
        let _ = events.unbounded_send(event);
    });
    let _aborter = Aborter(vec![worker, scanner]);

    let mut total = None;
    let mut phase = Phase::Scanning;
    monitor.progress(state.progress(phase));
    loop {
        if total.is_some_and(|total| state.loaded() == total) {
            info!(total = state.loaded(), "loaded all chunks");
            return Ok(());
        }
        select! {
            event = receiver.next() => {
                let Some(event) = event else {
                    warn!("tasks exited early");
                    return Err(Error::Canceled);
                };
                match event {
                    Event::Discovered(leaf) => state.discover(leaf),
                    Event::Scanned(count) => {
                        debug!(count, "scan complete");
                        total = Some(count);
                        phase = Phase::Loading;
                    }
                    Event::ScanFailed(err) => return Err(err),
                    Event::Loading(index) => {
                        state.start(index);
                    }
                    Event::Loaded(index, payload) => state.complete(index, payload),
                    Event::Requeued(index) => state.requeue(index),
                }
                monitor.progress(state.progress(phase));
            },
            _ = context.sleep_until(deadline) => {
                let total = total.unwrap_or_else(|| state.scanned());
                warn!(loaded = state.loaded(), total, "deadline expired");
                return Err(Error::Timeout {
                    loaded: state.loaded(),
                    total,
                });
            },
        }
    }
}

/// Drains `pending` until the scanner is done and every leaf has loaded.
async fn work<E: Clock + Rng, R: Reader>(
    mut context: E,
    reader: R,
    profile: Profile,
    requeue_delay: Duration,
    mut pending: UnboundedReceiver<Leaf>,
    events: UnboundedSender<Event>,
) {
    // Each entry records whether the leaf was requeued
    let mut queue = VecDeque::new();
    loop {
        // Collect newly discovered leaves without waiting
        while let Ok(leaf) = pending.try_recv() {
            queue.push_back((leaf, false));
        }
        let (leaf, requeued) = match queue.pop_front() {
            Some(entry) => entry,
            None => match pending.next().await {
                Some(leaf) => (leaf, false),
                None => return,
            },
        };
        if requeued {
            context.sleep(requeue_delay).await;
        }

        let _ = events.unbounded_send(Event::Loading(leaf.index));
        match retry::read(&mut context, &reader, leaf.address, &profile).await {
            Ok(payload) => {
                let _ = events.unbounded_send(Event::Loaded(leaf.index, payload));
            }
            Err(_) => {
                debug!(index = leaf.index, address = ?leaf.address, "requeueing chunk");
                let _ = events.unbounded_send(Event::Requeued(leaf.index));
                queue.push_back((leaf, true));
            }
        }
    }
}
