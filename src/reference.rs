//! Typed storage references
//!
//! A reference is the opaque identifier a chunk store hands back for a
//! saved blob: exactly 32 bytes for plain content, 64 for encrypted content
//! (reference + decryption key). The trie never interprets the bytes beyond
//! their length.

use crate::error::{Error, Result};
use std::fmt;

/// Byte length of a plain reference
pub const REFERENCE_SIZE: usize = 32;

/// Byte length of an encrypted reference
pub const ENCRYPTED_REFERENCE_SIZE: usize = 64;

/// Opaque 32- or 64-byte storage reference
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Reference(Vec<u8>);

impl Reference {
    /// Create a reference, validating its length.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        match bytes.len() {
            REFERENCE_SIZE | ENCRYPTED_REFERENCE_SIZE => Ok(Self(bytes)),
            len => Err(Error::InvalidReference(len)),
        }
    }

    /// Create a reference from a borrowed slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes.to_vec())
    }

    /// Length in bytes: 32 or 64.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for clippy's `len` convention.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether this reference points at encrypted content (64 bytes).
    pub fn is_encrypted(&self) -> bool {
        self.0.len() == ENCRYPTED_REFERENCE_SIZE
    }

    /// The raw bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for Reference {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Reference {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl TryFrom<Vec<u8>> for Reference {
    type Error = Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::new(bytes)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", hex::encode(&self.0))
    }
}
