//! Discover the leaves of a document in assembly order.
//!
//! Tree sites are walked depth-first, left-to-right, with an explicit work-list: every
//! internal node is read (under the scan's retry [Profile]) and split into fixed-width child
//! addresses, and every address at depth zero is a leaf that takes the next index. Flat sites
//! are enumerated by resolving each index in turn.
//!
//! Discovery is all-or-nothing. A node that cannot be read or that is malformed hides a subtree
//! of unknown size, so no partial leaf set can be trusted and the whole scan fails.

use crate::{
    retry::{self, Profile},
    Address, Directory, Error, Leaf, Reader, Site,
};
use commonware_runtime::Clock;
use rand::Rng;
use tracing::{debug, trace, warn};

/// Depth-first traversal state.
struct Traversal {
    /// Nodes still to visit, with the rightmost sibling at the bottom.
    stack: Vec<(Address, u32)>,

    /// Index assigned to the next leaf.
    next: u64,
}

impl Traversal {
    fn new(root: Address, depth: u32) -> Self {
        Self {
            stack: vec![(root, depth)],
            next: 0,
        }
    }

    fn leaf(&mut self, address: Address) -> Leaf {
        let index = self.next;
        self.next += 1;
        Leaf { index, address }
    }
}

/// Walks sites to discover their leaves.
pub struct Scanner<E: Clock + Rng, R: Reader> {
    context: E,
    reader: R,
    profile: Profile,
}

impl<E: Clock + Rng, R: Reader> Scanner<E, R> {
    /// Creates a scanner that reads nodes with `profile`.
    pub fn new(context: E, reader: R, profile: Profile) -> Self {
        Self {
            context,
            reader,
            profile,
        }
    }

    /// Discovers every leaf of `site`, handing each to `sink` as soon as it is found.
    ///
    /// Returns the number of leaves discovered.
    pub async fn discover<D: Directory>(
        &mut self,
        site: &Site,
        directory: &D,
        sink: impl FnMut(Leaf) + Send,
    ) -> Result<u64, Error> {
        match site {
            Site::Tree(descriptor) => self.walk(descriptor.root, descriptor.depth, sink).await,
            Site::Flat { count } => self.enumerate(directory, *count, sink).await,
        }
    }

    /// Returns the leaves below `root` in assembly order.
    pub async fn scan(&mut self, root: Address, depth: u32) -> Result<Vec<Leaf>, Error> {
        let mut leaves = Vec::new();
        self.walk(root, depth, |leaf| leaves.push(leaf)).await?;
        Ok(leaves)
    }

    /// Walks the tree below `root`, handing each leaf to `sink` in assembly order.
    ///
    /// Returns the number of leaves discovered.
    pub async fn walk(
        &mut self,
        root: Address,
        depth: u32,
        mut sink: impl FnMut(Leaf) + Send,
    ) -> Result<u64, Error> {
        let mut traversal = Traversal::new(root, depth);
        while let Some((address, depth)) = traversal.stack.pop() {
            if depth == 0 {
                let leaf = traversal.leaf(address);
                trace!(index = leaf.index, ?address, "discovered leaf");
                sink(leaf);
                continue;
            }

            // Read the node
            let payload = retry::read(&mut self.context, &self.reader, address, &self.profile)
                .await
                .map_err(|_| {
                    warn!(?address, depth, "unable to read node");
                    Error::ScanFailed(address)
                })?;
            let children = Address::split(&payload).ok_or(Error::MalformedNode {
                address,
                len: payload.len(),
            })?;
            debug!(?address, depth, children = children.len(), "expanded node");

            // Push in reverse so the leftmost child is visited first
            traversal
                .stack
                .extend(children.into_iter().rev().map(|child| (child, depth - 1)));
        }
        Ok(traversal.next)
    }

    /// Resolves the addresses of chunks `0..count`, handing each leaf to `sink` in order.
    pub async fn enumerate<D: Directory>(
        &mut self,
        directory: &D,
        count: u64,
        mut sink: impl FnMut(Leaf) + Send,
    ) -> Result<u64, Error> {
        for index in 0..count {
            let address = retry::retry(&mut self.context, &self.profile, |_| {
                let mut directory = directory.clone();
                async move { directory.resolve(index).await }
            })
            .await
            .map_err(|err| {
                warn!(index, ?err, "unable to resolve chunk");
                Error::Unresolved(index)
            })?;
            trace!(index, ?address, "resolved chunk");
            sink(Leaf { index, address });
        }
        Ok(count)
    }
}
