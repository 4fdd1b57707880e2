//! Chunk storage traits
//!
//! This module defines the storage seam the trie talks through. Apps
//! implement these traits over their chunk store; the traits are
//! runtime-agnostic and use `async_trait` for async support.
//!
//! ## Traits
//!
//! - `ChunkLoad`: fetch a previously saved node blob by reference
//! - `ChunkSave`: persist a node blob, getting back an opaque reference
//! - `ChunkStorage`: marker trait combining both capabilities
//!
//! The trie issues independent storage calls for independent subtrees; the
//! store must therefore tolerate concurrent calls (`Send + Sync`).

use crate::bytes::keccak256;
use crate::error::{Error, Result};
use crate::reference::Reference;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

/// Read side of a chunk store
#[async_trait]
pub trait ChunkLoad: Debug + Send + Sync {
    /// Fetch the bytes previously saved under `reference`.
    ///
    /// Returns [`Error::NotFound`] if nothing is stored there.
    async fn load(&self, reference: &Reference) -> Result<Vec<u8>>;
}

/// Write side of a chunk store
#[async_trait]
pub trait ChunkSave: Debug + Send + Sync {
    /// Persist `data` and return the reference it can be fetched under.
    ///
    /// The returned reference is opaque to the trie; for content-addressed
    /// stores the write is idempotent.
    async fn save(&self, data: &[u8]) -> Result<Reference>;
}

/// Full chunk storage capability marker
pub trait ChunkStorage: ChunkLoad + ChunkSave {}
impl<T: ChunkLoad + ChunkSave> ChunkStorage for T {}

// ============================================================================
// MemoryChunkStore
// ============================================================================

/// A content-addressed in-memory chunk store for tests
///
/// References are the keccak-256 digest of the stored bytes, so identical
/// content maps to identical references and re-saving an unchanged subtree
/// is a no-op at the map level. Interior mutability (`Arc<RwLock<...>>`)
/// lets the store be shared and written through `&self`.
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    chunks: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryChunkStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunks held
    pub fn len(&self) -> usize {
        self.chunks.read().expect("RwLock poisoned").len()
    }

    /// True when no chunk is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a chunk exists under `reference`
    pub fn contains(&self, reference: &Reference) -> bool {
        self.chunks
            .read()
            .expect("RwLock poisoned")
            .contains_key(reference.as_slice())
    }
}

#[async_trait]
impl ChunkLoad for MemoryChunkStore {
    async fn load(&self, reference: &Reference) -> Result<Vec<u8>> {
        self.chunks
            .read()
            .expect("RwLock poisoned")
            .get(reference.as_slice())
            .cloned()
            .ok_or_else(|| Error::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl ChunkSave for MemoryChunkStore {
    async fn save(&self, data: &[u8]) -> Result<Reference> {
        let digest = keccak256(&[data]);
        let reference = Reference::from_slice(&digest)?;
        self.chunks
            .write()
            .expect("RwLock poisoned")
            .insert(digest.to_vec(), data.to_vec());
        Ok(reference)
    }
}

// ============================================================================
// Tests
// ============================================================================
