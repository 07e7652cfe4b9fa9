//! Per-load bookkeeping of chunks and progress.

use crate::{metrics::Metrics, Address, Error, Leaf};
use bytes::Bytes;

/// Lifecycle of a chunk.
///
/// Statuses only advance `Pending -> Scanned -> Loading -> (Loaded | Failed)`. A `Failed`
/// chunk may re-enter `Loading` when it is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Scanned,
    Loading,
    Loaded,
    Failed,
}

impl Status {
    /// Returns whether a chunk in this status may move to `next`.
    pub fn can_advance(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Scanned)
                | (Status::Scanned, Status::Loading)
                | (Status::Loading, Status::Loaded)
                | (Status::Loading, Status::Failed)
                | (Status::Failed, Status::Loading)
        )
    }
}

/// A discovered leaf and (once loaded) its payload.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub index: u64,
    pub address: Address,
    pub payload: Option<Bytes>,
    pub status: Status,
}

impl Chunk {
    fn advance(&mut self, next: Status) {
        assert!(
            self.status.can_advance(next),
            "invalid transition for chunk {}: {:?} -> {:?}",
            self.index,
            self.status,
            next
        );
        self.status = next;
    }
}

/// Stage of a load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    Scanning,
    Loading,
    Retrying { round: u32 },
    Assembling,
    Decoding,
    Complete,
}

/// Snapshot of a load's progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub scanned: u64,
    pub loaded: u64,
    pub failed: u64,
}

/// Interface notified as a load progresses.
///
/// Rendering progress (or a failure) is left entirely to the implementer.
pub trait Monitor: Send + 'static {
    /// Called whenever the counts or the phase of the load change.
    fn progress(&mut self, progress: Progress);

    /// Called once if the load fails.
    fn failed(&mut self, _error: &Error) {}
}

impl Monitor for () {
    fn progress(&mut self, _progress: Progress) {}
}

/// Chunks of a single load, indexed by their position in the document.
///
/// Owned by whichever scheduler drives the load and discarded after assembly.
#[derive(Default)]
pub struct LoadState {
    chunks: Vec<Chunk>,
    loaded: u64,
    failed: u64,
    metrics: Metrics,
}

impl LoadState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_metrics(metrics: Metrics) -> Self {
        Self {
            metrics,
            ..Self::default()
        }
    }

    /// Records a newly discovered leaf.
    ///
    /// Panics if leaves are not discovered in index order.
    pub fn discover(&mut self, leaf: Leaf) {
        assert_eq!(
            leaf.index,
            self.chunks.len() as u64,
            "leaves must be discovered in order"
        );
        let mut chunk = Chunk {
            index: leaf.index,
            address: leaf.address,
            payload: None,
            status: Status::Pending,
        };
        chunk.advance(Status::Scanned);
        self.chunks.push(chunk);
        self.metrics.scanned.inc();
    }

    /// Marks the chunk at `index` as loading and returns its address.
    pub fn start(&mut self, index: u64) -> Address {
        let chunk = self.chunk_mut(index);
        let retried = chunk.status == Status::Failed;
        chunk.advance(Status::Loading);
        let address = chunk.address;
        if retried {
            self.failed -= 1;
            self.metrics.failed.set(self.failed as i64);
        }
        address
    }

    /// Stores the payload of the chunk at `index`.
    pub fn complete(&mut self, index: u64, payload: Bytes) {
        let chunk = self.chunk_mut(index);
        chunk.advance(Status::Loaded);
        chunk.payload = Some(payload);
        self.loaded += 1;
        self.metrics.loaded.inc();
    }

    /// Marks the chunk at `index` as failed.
    pub fn fail(&mut self, index: u64) {
        self.chunk_mut(index).advance(Status::Failed);
        self.failed += 1;
        self.metrics.failed.set(self.failed as i64);
    }

    /// Records that a failed chunk was put back in the queue.
    pub(crate) fn requeue(&mut self, index: u64) {
        self.fail(index);
        self.metrics.requeued.inc();
    }

    /// Returns the chunk at `index`, if discovered.
    pub fn chunk(&self, index: u64) -> Option<&Chunk> {
        self.chunks.get(index as usize)
    }

    /// Returns the indices of all chunks currently failed, in ascending order.
    pub fn failures(&self) -> Vec<u64> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.status == Status::Failed)
            .map(|chunk| chunk.index)
            .collect()
    }

    /// Number of chunks discovered.
    pub fn scanned(&self) -> u64 {
        self.chunks.len() as u64
    }

    /// Number of chunks loaded.
    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    /// Number of chunks currently failed.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Returns whether every discovered chunk is loaded.
    pub fn is_complete(&self) -> bool {
        self.loaded == self.scanned()
    }

    /// Returns a snapshot of the counts tagged with `phase`.
    pub fn progress(&self, phase: Phase) -> Progress {
        Progress {
            phase,
            scanned: self.scanned(),
            loaded: self.loaded,
            failed: self.failed,
        }
    }

    /// Moves every loaded payload out of the state, paired with its index.
    pub fn take_payloads(&mut self) -> Vec<(u64, Bytes)> {
        self.chunks
            .iter_mut()
            .filter_map(|chunk| chunk.payload.take().map(|payload| (chunk.index, payload)))
            .collect()
    }

    fn chunk_mut(&mut self, index: u64) -> &mut Chunk {
        self.chunks
            .get_mut(index as usize)
            .unwrap_or_else(|| panic!("unknown chunk {index}"))
    }
}
