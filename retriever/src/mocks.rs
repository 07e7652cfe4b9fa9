//! In-memory remote and monitor for testing.

use crate::{Address, Descriptor, Directory, Monitor, Progress, Reader, Site};
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;

/// Errors returned by [Remote].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unreachable: {0}")]
    Unreachable(Address),
    #[error("missing: {0}")]
    Missing(Address),
    #[error("site unreachable")]
    SiteUnreachable,
    #[error("no site")]
    NoSite,
    #[error("index out of range: {0}")]
    OutOfRange(u64),
}

/// How reads of an address misbehave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// Every read fails.
    Always,

    /// The first `n` reads fail.
    First(u32),
}

#[derive(Default)]
struct Inner {
    next: u64,
    records: HashMap<Address, Bytes>,
    failures: HashMap<Address, Failure>,
    reads: HashMap<Address, u32>,
    site: Option<Site>,
    site_failures: u32,
    site_reads: u32,
    flat: Vec<Address>,
}

impl Inner {
    fn read(&mut self, address: Address) -> Result<Bytes, Error> {
        let reads = self.reads.entry(address).or_default();
        *reads += 1;
        match self.failures.get(&address) {
            Some(Failure::Always) => return Err(Error::Unreachable(address)),
            Some(Failure::First(n)) if *reads <= *n => return Err(Error::Unreachable(address)),
            _ => {}
        }
        self.records
            .get(&address)
            .cloned()
            .ok_or(Error::Missing(address))
    }

    fn site(&mut self) -> Result<Site, Error> {
        self.site_reads += 1;
        if self.site_reads <= self.site_failures {
            return Err(Error::SiteUnreachable);
        }
        self.site.ok_or(Error::NoSite)
    }
}

/// A remote that serves records from memory and can be told to fail.
#[derive(Clone, Default)]
pub struct Remote {
    inner: Arc<Mutex<Inner>>,
}

impl Remote {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh address.
    pub fn address(&self) -> Address {
        let mut inner = self.inner.lock().unwrap();
        let next = inner.next;
        inner.next += 1;
        let mut bytes = [0xAAu8; Address::SIZE];
        bytes[Address::SIZE - 8..].copy_from_slice(&next.to_be_bytes());
        Address::new(bytes)
    }

    /// Store `payload` at `address`.
    pub fn insert(&self, address: Address, payload: impl Into<Bytes>) {
        self.inner
            .lock()
            .unwrap()
            .records
            .insert(address, payload.into());
    }

    /// Store a leaf and return its address.
    pub fn leaf(&self, payload: impl Into<Bytes>) -> Address {
        let address = self.address();
        self.insert(address, payload);
        address
    }

    /// Store an internal node referencing `children` and return its address.
    pub fn node(&self, children: &[Address]) -> Address {
        let mut payload = Vec::with_capacity(children.len() * Address::SIZE);
        for child in children {
            payload.extend_from_slice(child);
        }
        self.leaf(payload)
    }

    /// Store a balanced tree over `payloads` and return its root and depth.
    ///
    /// The returned depth is always at least one.
    pub fn tree<P: Into<Bytes> + Clone>(&self, payloads: &[P], fanout: usize) -> (Address, u32) {
        assert!(fanout > 0, "fanout must be positive");
        let mut level: Vec<Address> = payloads
            .iter()
            .map(|payload| self.leaf(payload.clone()))
            .collect();
        let mut depth = 0;
        loop {
            level = level.chunks(fanout).map(|chunk| self.node(chunk)).collect();
            depth += 1;
            if level.len() <= 1 {
                break;
            }
        }
        let root = level.pop().unwrap_or_else(|| self.node(&[]));
        (root, depth)
    }

    /// Store a balanced tree over `payloads` and publish it as the site.
    pub fn publish<P: Into<Bytes> + Clone>(&self, payloads: &[P], fanout: usize) -> Descriptor {
        let total_size = payloads
            .iter()
            .map(|payload| Into::<Bytes>::into(payload.clone()).len() as u64)
            .sum();
        let (root, depth) = self.tree(payloads, fanout);
        let descriptor = Descriptor {
            root,
            depth,
            total_size,
        };
        self.set_site(Site::Tree(descriptor));
        descriptor
    }

    /// Publish `addresses` as a flat site.
    pub fn publish_flat(&self, addresses: Vec<Address>) {
        let count = addresses.len() as u64;
        let mut inner = self.inner.lock().unwrap();
        inner.flat = addresses;
        inner.site = Some(Site::Flat { count });
    }

    /// Set the site returned by [Directory::site].
    pub fn set_site(&self, site: Site) {
        self.inner.lock().unwrap().site = Some(site);
    }

    /// Make the first `n` site lookups fail.
    pub fn fail_site(&self, n: u32) {
        self.inner.lock().unwrap().site_failures = n;
    }

    /// Make reads of `address` fail.
    pub fn fail(&self, address: Address, failure: Failure) {
        self.inner.lock().unwrap().failures.insert(address, failure);
    }

    /// Number of reads of `address` so far.
    pub fn reads(&self, address: &Address) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .reads
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Number of site lookups so far.
    pub fn site_reads(&self) -> u32 {
        self.inner.lock().unwrap().site_reads
    }
}

impl Reader for Remote {
    type Error = Error;

    async fn read(&mut self, address: Address) -> Result<Bytes, Error> {
        self.inner.lock().unwrap().read(address)
    }
}

impl Directory for Remote {
    type Error = Error;

    async fn site(&mut self) -> Result<Site, Error> {
        self.inner.lock().unwrap().site()
    }

    async fn resolve(&mut self, index: u64) -> Result<Address, Error> {
        self.inner
            .lock()
            .unwrap()
            .flat
            .get(index as usize)
            .copied()
            .ok_or(Error::OutOfRange(index))
    }
}

#[derive(Default)]
struct Record {
    progress: Vec<Progress>,
    failures: Vec<crate::Error>,
}

/// A [Monitor] that records everything it is told.
#[derive(Clone, Default)]
pub struct Recorder {
    record: Arc<Mutex<Record>>,
}

impl Recorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every progress update so far, in order.
    pub fn updates(&self) -> Vec<Progress> {
        self.record.lock().unwrap().progress.clone()
    }

    /// The most recent progress update.
    pub fn last(&self) -> Option<Progress> {
        self.record.lock().unwrap().progress.last().copied()
    }

    /// Every reported failure so far.
    pub fn failures(&self) -> Vec<crate::Error> {
        self.record.lock().unwrap().failures.clone()
    }
}

impl Monitor for Recorder {
    fn progress(&mut self, progress: Progress) {
        self.record.lock().unwrap().progress.push(progress);
    }

    fn failed(&mut self, error: &crate::Error) {
        self.record.lock().unwrap().failures.push(error.clone());
    }
}
