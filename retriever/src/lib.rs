//! Reassemble a document scattered across remotely readable chunks.
//!
//! A document is split into many small records ("chunks") stored behind a read-only remote
//! interface. Chunks are the leaves of a tree of fixed-width [Address]es: every internal node
//! stores the concatenation of its children's addresses and every leaf stores content. A
//! [Loader] resolves the [Site] describing the tree, walks it to discover every leaf in
//! left-to-right order, fetches every leaf under a configurable [scheduler::Strategy],
//! reassembles the payloads by index, and decodes the result to text.
//!
//! # Failure Handling
//!
//! Every remote call goes through a bounded exponential backoff ([retry::Profile]). An
//! unreadable internal node is fatal ([Error::ScanFailed]) because it hides a subtree of
//! unknown size. An unreadable leaf is absorbed by the scheduling strategy: the phased and
//! concurrent strategies give up on it after their retry budget (and, under
//! [scheduler::Policy::BestEffort], assemble the document without it), while the overlapped
//! strategy requeues it until the caller's deadline expires ([Error::Timeout]).
//!
//! # Status
//!
//! `commonware-retriever` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

use bytes::Bytes;
use std::{fmt::Debug, future::Future};
use thiserror::Error;

pub mod address;
pub mod assembler;
pub mod encoding;
pub mod jsonrpc;
pub mod loader;
mod metrics;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod retry;
pub mod scanner;
pub mod scheduler;
pub mod site;
pub mod state;

pub use address::Address;
pub use loader::{Config, Document, Loader};
pub use state::{Monitor, Phase, Progress};

/// Errors that can occur when loading a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("site unavailable")]
    SiteUnavailable,
    #[error("scan failed: unable to read node {0}")]
    ScanFailed(Address),
    #[error("scan failed: unable to resolve chunk {0}")]
    Unresolved(u64),
    #[error("malformed node {address}: {len} bytes is not a multiple of the address width")]
    MalformedNode { address: Address, len: usize },
    #[error("fetch failed: {0}")]
    FetchFailed(Address),
    #[error("timeout: loaded {loaded} of {total} chunks")]
    Timeout { loaded: u64, total: u64 },
    #[error("incomplete: {missing} of {total} chunks missing")]
    Incomplete { missing: u64, total: u64 },
    #[error("canceled")]
    Canceled,
}

/// Describes a document stored as a tree of chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Address of the root node.
    pub root: Address,

    /// Number of internal-node hops from the root to the leaves.
    ///
    /// A depth of zero means the root is itself the only leaf.
    pub depth: u32,

    /// Expected size of the document in bytes.
    ///
    /// This value is advisory: the assembled document may legitimately differ.
    pub total_size: u64,
}

/// Describes how the chunks of a document are addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Site {
    /// Chunks are the leaves of a tree of addresses.
    Tree(Descriptor),

    /// Chunks are addressed by index through [Directory::resolve].
    Flat { count: u64 },
}

/// A discovered chunk and the position its payload takes in the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leaf {
    /// Position of the chunk in the document.
    pub index: u64,

    /// Address of the chunk.
    pub address: Address,
}

/// Interface responsible for reading records from the remote.
pub trait Reader: Clone + Send + Sync + 'static {
    /// Error returned by a failed read.
    type Error: Debug + Send;

    /// Read the payload stored at `address`.
    ///
    /// A single call is a single attempt. Retries are handled by the caller.
    fn read(&mut self, address: Address) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;
}

/// Interface responsible for describing where the chunks of a document live.
pub trait Directory: Clone + Send + Sync + 'static {
    /// Error returned by a failed lookup.
    type Error: Debug + Send;

    /// Returns the [Site] of the document.
    fn site(&mut self) -> impl Future<Output = Result<Site, Self::Error>> + Send;

    /// Returns the address of the chunk at `index` (only used by [Site::Flat]).
    fn resolve(&mut self, index: u64) -> impl Future<Output = Result<Address, Self::Error>> + Send;
}
