//! # Mantaray
//!
//! A content-addressed, compressed radix trie binding arbitrary byte paths
//! to chunk references. Every node is itself a chunk: serialized,
//! optionally XOR-obfuscated, and stored under an opaque 32- or 64-byte
//! reference produced by the storage layer. Saving a tree yields one root
//! reference that transitively fixes every descendant; loading a reference
//! materializes a single node and fetches children lazily.
//!
//! Two wire formats are supported: v0.2 (legacy) and v1.0 (current). Both
//! are produced bit-exactly; see the [`format`] module docs for the layouts.
//!
//! ## Quick start
//!
//! ```ignore
//! use mantaray::{init_manifest_node, ForkAttributes, ManifestOptions, MemoryChunkStore, Reference};
//!
//! let storage = MemoryChunkStore::new();
//! let mut manifest = init_manifest_node(ManifestOptions::default());
//!
//! let entry = Reference::new(vec![0x7d; 32])?;
//! manifest.add_fork(b"img/1.png", &ForkAttributes::with_entry(entry))?;
//!
//! let root = manifest.save(&storage).await?;
//! let reloaded = mantaray::Manifest::load(&storage, &root).await?;
//! ```
//!
//! ## Modules
//!
//! - [`node`]: the two node variants, trie operations, and the
//!   cross-version [`Manifest`] surface
//! - [`format`]: bit-exact marshal/unmarshal for both wire formats
//! - [`storage`]: the async chunk-store seam and an in-memory test store
//! - [`bytes`], [`bitmap`], [`metadata`], [`reference`]: building blocks

pub mod bitmap;
pub mod bytes;
pub mod error;
pub mod format;
pub mod metadata;
pub mod node;
pub mod reference;
pub mod storage;

pub use bitmap::ForkIndex;
pub use error::{Error, Result};
pub use format::FormatVersion;
pub use metadata::Metadata;
pub use node::{
    equal_manifests, equal_nodes_v0, equal_nodes_v1, init_manifest_node, FixedKeySource,
    ForkAttributes, ForkV0, ForkV1, Manifest, ManifestFork, ManifestOptions, NodeV0, NodeV1,
    ObfuscationKeySource, RandomKeySource,
};
pub use reference::Reference;
pub use storage::{ChunkLoad, ChunkSave, ChunkStorage, MemoryChunkStore};
