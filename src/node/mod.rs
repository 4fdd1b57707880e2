//! Manifest nodes
//!
//! The two format variants share most operations but differ in flag
//! encoding, prefix ceiling, metadata placement, and the existence of
//! continuous nodes, so each is a concrete type ([`NodeV0`], [`NodeV1`])
//! and the cross-version surface is the [`Manifest`] tagged union returned
//! by the [`init_manifest_node`] factory.

use crate::bytes::{OBFUSCATION_KEY_SIZE, ZERO_OBFUSCATION_KEY};
use crate::error::{Error, Result};
use crate::format::{peek_version, FormatVersion};
use crate::metadata::Metadata;
use crate::reference::Reference;
use crate::storage::ChunkStorage;
use rand::RngCore;

pub mod v0;
pub mod v1;

pub use v0::{equal_nodes_v0, ForkV0, NodeV0};
pub use v1::{equal_nodes_v1, ForkV1, NodeV1};

/// The byte the advisory v0.2 path-separator flag looks for
pub const PATH_SEPARATOR: u8 = b'/';

// ============================================================================
// Obfuscation key sources
// ============================================================================

/// Supplier of fresh 32-byte obfuscation keys for newly allocated descendants
///
/// v1.0 trees with a non-zero root key give every node its own key; the
/// source is passed by the caller on mutation so the library holds no
/// process-wide key state.
pub trait ObfuscationKeySource: Send + Sync {
    /// Produce a key for one new node.
    fn generate(&self) -> [u8; OBFUSCATION_KEY_SIZE];
}

/// Key source drawing from the thread-local CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomKeySource;

impl ObfuscationKeySource for RandomKeySource {
    fn generate(&self) -> [u8; OBFUSCATION_KEY_SIZE] {
        let mut key = [0u8; OBFUSCATION_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }
}

/// Key source handing out one fixed key, for deterministic tests
#[derive(Debug, Clone, Copy)]
pub struct FixedKeySource(pub [u8; OBFUSCATION_KEY_SIZE]);

impl ObfuscationKeySource for FixedKeySource {
    fn generate(&self) -> [u8; OBFUSCATION_KEY_SIZE] {
        self.0
    }
}

// ============================================================================
// Fork attributes
// ============================================================================

/// What to install at the end of an `add_fork` path
///
/// v1.0 distinguishes node-level from fork-level metadata; v0.2 carries a
/// single mapping and consumes `fork_metadata` first (its metadata is
/// serialized at fork level), falling back to `node_metadata`.
#[derive(Clone, Default)]
pub struct ForkAttributes<'a> {
    /// Entry reference for the target node
    pub entry: Option<Reference>,
    /// Metadata serialized on the target node itself (v1.0)
    pub node_metadata: Option<Metadata>,
    /// Metadata serialized in the parent's edge record slot
    pub fork_metadata: Option<Metadata>,
    /// Key source for freshly allocated descendants (v1.0, required when the
    /// tree's keys are non-zero)
    pub key_source: Option<&'a dyn ObfuscationKeySource>,
}

impl<'a> ForkAttributes<'a> {
    /// Empty attribute set
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes carrying just an entry reference
    pub fn with_entry(entry: Reference) -> Self {
        Self {
            entry: Some(entry),
            ..Self::default()
        }
    }

    /// Add node-level metadata
    pub fn node_metadata(mut self, metadata: Metadata) -> Self {
        self.node_metadata = Some(metadata);
        self
    }

    /// Add fork-level metadata
    pub fn fork_metadata(mut self, metadata: Metadata) -> Self {
        self.fork_metadata = Some(metadata);
        self
    }

    /// Attach an obfuscation key source
    pub fn key_source(mut self, source: &'a dyn ObfuscationKeySource) -> Self {
        self.key_source = Some(source);
        self
    }

    /// The single metadata mapping the v0.2 variant consumes
    pub(crate) fn flat_metadata(&self) -> Option<&Metadata> {
        self.fork_metadata.as_ref().or(self.node_metadata.as_ref())
    }
}

// ============================================================================
// Factory & cross-version surface
// ============================================================================

/// Options for [`init_manifest_node`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestOptions {
    /// Wire format of the new root; defaults to v1.0
    pub version: FormatVersion,
    /// Obfuscation key for the root; defaults to all-zero (obfuscation off)
    pub obfuscation_key: Option<[u8; OBFUSCATION_KEY_SIZE]>,
}

/// Construct a fresh manifest root.
pub fn init_manifest_node(options: ManifestOptions) -> Manifest {
    let key = options.obfuscation_key.unwrap_or(ZERO_OBFUSCATION_KEY);
    match options.version {
        FormatVersion::V0_2 => Manifest::V0(NodeV0::new(key)),
        FormatVersion::V1_0 => Manifest::V1(NodeV1::new(key)),
    }
}

/// A manifest node of either format version
#[derive(Debug, Clone)]
pub enum Manifest {
    /// Legacy v0.2 node
    V0(NodeV0),
    /// Current v1.0 node
    V1(NodeV1),
}

/// Borrowed view of a fork in either format
#[derive(Debug)]
pub enum ManifestFork<'a> {
    /// Fork of a v0.2 node
    V0(&'a ForkV0),
    /// Fork of a v1.0 node
    V1(&'a ForkV1),
}

impl ManifestFork<'_> {
    /// The edge prefix bytes
    pub fn prefix(&self) -> &[u8] {
        match self {
            ManifestFork::V0(fork) => fork.prefix(),
            ManifestFork::V1(fork) => fork.prefix(),
        }
    }

    /// The child node's entry reference, if any
    pub fn entry(&self) -> Option<&Reference> {
        match self {
            ManifestFork::V0(fork) => fork.node().entry(),
            ManifestFork::V1(fork) => fork.node().entry(),
        }
    }
}

impl Manifest {
    /// The wire format of this node
    pub fn version(&self) -> FormatVersion {
        match self {
            Manifest::V0(_) => FormatVersion::V0_2,
            Manifest::V1(_) => FormatVersion::V1_0,
        }
    }

    /// The v0.2 node, if this is one
    pub fn as_v0(&self) -> Option<&NodeV0> {
        match self {
            Manifest::V0(node) => Some(node),
            Manifest::V1(_) => None,
        }
    }

    /// The v0.2 node, mutably
    pub fn as_v0_mut(&mut self) -> Option<&mut NodeV0> {
        match self {
            Manifest::V0(node) => Some(node),
            Manifest::V1(_) => None,
        }
    }

    /// The v1.0 node, if this is one
    pub fn as_v1(&self) -> Option<&NodeV1> {
        match self {
            Manifest::V0(_) => None,
            Manifest::V1(node) => Some(node),
        }
    }

    /// The v1.0 node, mutably
    pub fn as_v1_mut(&mut self) -> Option<&mut NodeV1> {
        match self {
            Manifest::V0(_) => None,
            Manifest::V1(node) => Some(node),
        }
    }

    /// Bind `path` to the given attributes, splitting edges as needed.
    pub fn add_fork(&mut self, path: &[u8], attributes: &ForkAttributes<'_>) -> Result<()> {
        match self {
            Manifest::V0(node) => node.add_fork(path, attributes),
            Manifest::V1(node) => node.add_fork(path, attributes),
        }
    }

    /// Walk to the fork ending exactly at `path`.
    pub fn get_fork_at_path(&self, path: &[u8]) -> Result<ManifestFork<'_>> {
        match self {
            Manifest::V0(node) => node.get_fork_at_path(path).map(ManifestFork::V0),
            Manifest::V1(node) => node.get_fork_at_path(path).map(ManifestFork::V1),
        }
    }

    /// Remove the fork ending exactly at `path`, dropping its subtree.
    pub fn remove_path(&mut self, path: &[u8]) -> Result<()> {
        match self {
            Manifest::V0(node) => node.remove_path(path),
            Manifest::V1(node) => node.remove_path(path),
        }
    }

    /// Persist every dirty node in the subtree; returns the root reference.
    pub async fn save<S: ChunkStorage + ?Sized>(&mut self, storage: &S) -> Result<Reference> {
        match self {
            Manifest::V0(node) => node.save(storage).await,
            Manifest::V1(node) => node.save(storage).await,
        }
    }

    /// Fetch `reference` and materialize its node, detecting the version.
    pub async fn load<S: ChunkStorage + ?Sized>(
        storage: &S,
        reference: &Reference,
    ) -> Result<Manifest> {
        let data = storage.load(reference).await?;
        let manifest = match peek_version(&data)? {
            FormatVersion::V0_2 => {
                let mut node = crate::format::v0::unmarshal(&data)?;
                node.set_content_address(reference.clone());
                Manifest::V0(node)
            }
            FormatVersion::V1_0 => {
                let mut node = crate::format::v1::unmarshal(&data, reference.len())?;
                node.set_content_address(reference.clone());
                Manifest::V1(node)
            }
        };
        Ok(manifest)
    }

    /// Depth-first load of every descendant still represented as a stub.
    pub async fn load_all<S: ChunkStorage + ?Sized>(&mut self, storage: &S) -> Result<()> {
        match self {
            Manifest::V0(node) => node.load_all(storage).await,
            Manifest::V1(node) => node.load_all(storage).await,
        }
    }

    /// Serialize this node to its wire form.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            Manifest::V0(node) => node.serialize(),
            Manifest::V1(node) => node.serialize(),
        }
    }

    /// Reconstruct a node from its wire form, detecting the version.
    pub fn deserialize(data: &[u8]) -> Result<Manifest> {
        match peek_version(data)? {
            FormatVersion::V0_2 => Ok(Manifest::V0(NodeV0::deserialize(data)?)),
            FormatVersion::V1_0 => Ok(Manifest::V1(NodeV1::deserialize(data)?)),
        }
    }

    /// Whether this node must be rewritten on the next save
    pub fn is_dirty(&self) -> bool {
        match self {
            Manifest::V0(node) => node.is_dirty(),
            Manifest::V1(node) => node.is_dirty(),
        }
    }

    /// Forget the cached content address, forcing a rewrite on save.
    pub fn make_dirty(&mut self) {
        match self {
            Manifest::V0(node) => node.make_dirty(),
            Manifest::V1(node) => node.make_dirty(),
        }
    }

    /// The reference this node was last saved or loaded under
    pub fn content_address(&self) -> Option<&Reference> {
        match self {
            Manifest::V0(node) => node.content_address(),
            Manifest::V1(node) => node.content_address(),
        }
    }

    /// Whether this node has children
    pub fn is_edge(&self) -> bool {
        match self {
            Manifest::V0(node) => node.is_edge(),
            Manifest::V1(node) => node.is_edge(),
        }
    }

    /// The node's own entry reference, if any
    pub fn entry(&self) -> Option<&Reference> {
        match self {
            Manifest::V0(node) => node.entry(),
            Manifest::V1(node) => node.entry(),
        }
    }
}

/// Structural equality across the cross-version surface.
///
/// Nodes of different versions never compare equal.
pub fn equal_manifests(a: &Manifest, b: &Manifest) -> Result<()> {
    match (a, b) {
        (Manifest::V0(a), Manifest::V0(b)) => equal_nodes_v0(a, b),
        (Manifest::V1(a), Manifest::V1(b)) => equal_nodes_v1(a, b),
        _ => Err(Error::mismatch("format versions differ")),
    }
}
