//! Reassemble loaded chunks into a single buffer.
//!
//! Payloads are concatenated in ascending index order, without padding or separators, no
//! matter the order in which they were loaded. Chunks that never loaded are left out of the
//! buffer and reported by [Assembly::missing].

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;

/// A reassembled document.
#[derive(Clone, Debug)]
pub struct Assembly {
    buffer: Bytes,

    /// Index and starting offset of every included chunk, by ascending offset.
    offsets: Vec<(u64, usize)>,

    /// Indices below `total` without a payload.
    missing: Vec<u64>,

    total: u64,
}

impl Assembly {
    /// The reassembled bytes.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// Consumes the assembly, returning the reassembled bytes.
    pub fn into_buffer(self) -> Bytes {
        self.buffer
    }

    /// Length of the reassembled buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns whether the reassembled buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Indices of chunks left out of the buffer.
    pub fn missing(&self) -> &[u64] {
        &self.missing
    }

    /// Number of chunks the document was expected to have.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns whether every expected chunk is in the buffer.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Returns the index of the chunk that supplied the byte at `offset`.
    ///
    /// This is the chunk whose cumulative payload length (over ascending index) first exceeds
    /// `offset`.
    pub fn locate(&self, offset: usize) -> Option<u64> {
        if offset >= self.buffer.len() {
            return None;
        }
        let position = self.offsets.partition_point(|(_, start)| *start <= offset);
        self.offsets.get(position.checked_sub(1)?).map(|(index, _)| *index)
    }
}

/// Concatenates `chunks` in ascending index order.
///
/// `total` is the number of chunks the document is expected to have: any index below it
/// without a payload is reported as missing. If an index is supplied more than once, the last
/// payload wins.
pub fn assemble(chunks: impl IntoIterator<Item = (u64, Bytes)>, total: u64) -> Assembly {
    let ordered: BTreeMap<u64, Bytes> = chunks.into_iter().collect();
    let missing = (0..total)
        .filter(|index| !ordered.contains_key(index))
        .collect();

    let size = ordered.values().map(Bytes::len).sum();
    let mut buffer = BytesMut::with_capacity(size);
    let mut offsets = Vec::with_capacity(ordered.len());
    for (index, payload) in ordered {
        offsets.push((index, buffer.len()));
        buffer.extend_from_slice(&payload);
    }

    Assembly {
        buffer: buffer.freeze(),
        offsets,
        missing,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(order: &[u64]) -> Vec<(u64, Bytes)> {
        let payloads = ["AB", "CD", "EF"];
        order
            .iter()
            .map(|&index| (index, Bytes::from(payloads[index as usize])))
            .collect()
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let orders: [&[u64]; 6] = [
            &[0, 1, 2],
            &[0, 2, 1],
            &[1, 0, 2],
            &[1, 2, 0],
            &[2, 0, 1],
            &[2, 1, 0],
        ];
        for order in orders {
            let assembly = assemble(chunks(order), 3);
            assert_eq!(assembly.buffer(), &Bytes::from("ABCDEF"));
            assert!(assembly.is_complete());
        }
    }

    #[test]
    fn test_missing_reported() {
        let assembly = assemble(chunks(&[2, 0]), 3);
        assert_eq!(assembly.buffer(), &Bytes::from("ABEF"));
        assert_eq!(assembly.missing(), &[1]);
        assert_eq!(assembly.total(), 3);
        assert!(!assembly.is_complete());

        // Trailing chunks count too
        let assembly = assemble(chunks(&[0]), 3);
        assert_eq!(assembly.missing(), &[1, 2]);
    }

    #[test]
    fn test_empty() {
        let assembly = assemble(Vec::new(), 0);
        assert!(assembly.is_empty());
        assert!(assembly.is_complete());
        assert_eq!(assembly.locate(0), None);
    }

    #[test]
    fn test_locate() {
        let assembly = assemble(
            vec![
                (0, Bytes::from("abc")),
                (1, Bytes::new()),
                (2, Bytes::from("d")),
                (3, Bytes::from("efgh")),
            ],
            4,
        );
        assert_eq!(assembly.locate(0), Some(0));
        assert_eq!(assembly.locate(2), Some(0));

        // Empty chunks own no bytes
        assert_eq!(assembly.locate(3), Some(2));
        assert_eq!(assembly.locate(4), Some(3));
        assert_eq!(assembly.locate(7), Some(3));
        assert_eq!(assembly.locate(8), None);
    }
}
