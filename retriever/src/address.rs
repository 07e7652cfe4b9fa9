//! Fixed-width identifiers of remotely readable records.

use commonware_utils::{from_hex_formatted, hex};
use std::{fmt, ops::Deref, str::FromStr};
use thiserror::Error;

/// Errors that can occur when constructing an [Address].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex")]
    InvalidHex,
}

/// Names a remotely readable record.
///
/// A record is either an internal node (its payload is a concatenation of child
/// [Address]es) or a leaf (its payload is content).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; Address::SIZE]);

impl Address {
    /// Width of an encoded address in bytes.
    pub const SIZE: usize = 20;

    /// Creates an address from raw bytes.
    pub const fn new(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    /// Splits a node payload into the child addresses it concatenates.
    ///
    /// Returns `None` if the payload length is not a multiple of [Address::SIZE].
    pub fn split(payload: &[u8]) -> Option<Vec<Address>> {
        if payload.len() % Self::SIZE != 0 {
            return None;
        }
        let children = payload
            .chunks_exact(Self::SIZE)
            .map(|chunk| {
                let mut bytes = [0u8; Self::SIZE];
                bytes.copy_from_slice(chunk);
                Address(bytes)
            })
            .collect();
        Some(children)
    }
}

impl From<[u8; Address::SIZE]> for Address {
    fn from(bytes: [u8; Address::SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; Self::SIZE] = value.try_into().map_err(|_| Error::InvalidLength {
            expected: Self::SIZE,
            actual: value.len(),
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = from_hex_formatted(s).ok_or(Error::InvalidHex)?;
        Self::try_from(bytes.as_slice())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Address {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}
