//! v0.2 manifest nodes
//!
//! The legacy variant: a `node_type` flag byte, a 30-byte prefix ceiling,
//! and metadata carried in the parent's fork record behind a 2-byte
//! big-endian length. The root's own flags are not persisted; they are
//! re-inferred at load time from the fork bitmap and entry bytes.

use crate::bytes::common_prefix_len;
use crate::error::{display_path, Error, Result};
use crate::format::v0 as wire;
use crate::metadata::Metadata;
use crate::reference::{Reference, REFERENCE_SIZE};
use crate::storage::ChunkStorage;
use futures::future::{try_join_all, BoxFuture};
use std::collections::BTreeMap;

use super::{ForkAttributes, PATH_SEPARATOR};

/// Node holds an entry reference
pub const TYPE_VALUE: u8 = 2;
/// Node has children
pub const TYPE_EDGE: u8 = 4;
/// The path leading here spans a `/` (advisory)
pub const TYPE_WITH_PATH_SEPARATOR: u8 = 8;
/// The parent's fork record carries metadata for this node
pub const TYPE_WITH_METADATA: u8 = 16;

/// Flags owned by the parent's edge record rather than the node's own bytes
const FORK_RECORD_TYPES: u8 = TYPE_WITH_PATH_SEPARATOR | TYPE_WITH_METADATA;

/// A v0.2 edge: branch prefix plus the child it leads to
#[derive(Debug, Clone)]
pub struct ForkV0 {
    pub(crate) prefix: Vec<u8>,
    pub(crate) node: NodeV0,
}

impl ForkV0 {
    pub(crate) fn new(prefix: Vec<u8>, node: NodeV0) -> Self {
        Self { prefix, node }
    }

    /// The edge prefix bytes (1..=30)
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// The child node
    pub fn node(&self) -> &NodeV0 {
        &self.node
    }

    /// The child node, mutably
    pub fn node_mut(&mut self) -> &mut NodeV0 {
        &mut self.node
    }
}

/// A v0.2 manifest node
#[derive(Debug, Clone)]
pub struct NodeV0 {
    pub(crate) obfuscation_key: [u8; 32],
    pub(crate) node_type: u8,
    pub(crate) ref_bytes_size: u8,
    pub(crate) entry: Option<Reference>,
    pub(crate) metadata: Option<Metadata>,
    pub(crate) forks: BTreeMap<u8, ForkV0>,
    pub(crate) content_address: Option<Reference>,
}

impl NodeV0 {
    /// Create an empty dirty node keyed with `obfuscation_key`.
    pub fn new(obfuscation_key: [u8; 32]) -> Self {
        Self {
            obfuscation_key,
            node_type: 0,
            ref_bytes_size: REFERENCE_SIZE as u8,
            entry: None,
            metadata: None,
            forks: BTreeMap::new(),
            content_address: None,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The raw `node_type` flag byte
    pub fn node_type(&self) -> u8 {
        self.node_type
    }

    /// Whether this node carries an entry
    pub fn is_value(&self) -> bool {
        self.node_type & TYPE_VALUE != 0
    }

    /// Whether this node has children
    pub fn is_edge(&self) -> bool {
        self.node_type & TYPE_EDGE != 0
    }

    /// Whether the advisory path-separator flag is set
    pub fn is_with_path_separator(&self) -> bool {
        self.node_type & TYPE_WITH_PATH_SEPARATOR != 0
    }

    /// Whether this node carries metadata (serialized at fork level)
    pub fn has_metadata(&self) -> bool {
        self.node_type & TYPE_WITH_METADATA != 0
    }

    /// The entry reference, if any
    pub fn entry(&self) -> Option<&Reference> {
        self.entry.as_ref()
    }

    /// The metadata mapping, if any
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// The fork map, keyed by each prefix's first byte
    pub fn forks(&self) -> &BTreeMap<u8, ForkV0> {
        &self.forks
    }

    /// This node's obfuscation key
    pub fn obfuscation_key(&self) -> &[u8; 32] {
        &self.obfuscation_key
    }

    /// The reference this node was last saved or loaded under
    pub fn content_address(&self) -> Option<&Reference> {
        self.content_address.as_ref()
    }

    /// A dirty node has no cached content address
    pub fn is_dirty(&self) -> bool {
        self.content_address.is_none()
    }

    /// Forget the cached content address.
    pub fn make_dirty(&mut self) {
        self.content_address = None;
    }

    pub(crate) fn set_content_address(&mut self, reference: Reference) {
        self.content_address = Some(reference);
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// Set the entry reference; its length becomes the node's reference size.
    pub fn set_entry(&mut self, entry: Reference) {
        self.ref_bytes_size = entry.len() as u8;
        self.entry = Some(entry);
        self.node_type |= TYPE_VALUE;
        self.make_dirty();
    }

    /// Set the metadata mapping (serialized in the parent's fork record).
    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = Some(metadata);
        self.node_type |= TYPE_WITH_METADATA;
        self.make_dirty();
    }

    /// Replace the obfuscation key used when this node is serialized.
    pub fn set_obfuscation_key(&mut self, key: [u8; 32]) {
        self.obfuscation_key = key;
        self.make_dirty();
    }

    fn update_with_path_separator(&mut self, path: &[u8]) {
        if path.contains(&PATH_SEPARATOR) {
            self.node_type |= TYPE_WITH_PATH_SEPARATOR;
        } else {
            self.node_type &= !TYPE_WITH_PATH_SEPARATOR;
        }
    }

    fn apply_attributes(&mut self, attributes: &ForkAttributes<'_>) {
        if let Some(entry) = &attributes.entry {
            self.set_entry(entry.clone());
        }
        if let Some(metadata) = attributes.flat_metadata() {
            self.set_metadata(metadata.clone());
        }
        self.make_dirty();
    }

    // ------------------------------------------------------------------
    // Trie operations
    // ------------------------------------------------------------------

    /// Bind `path` to the given attributes, splitting edges as needed.
    ///
    /// New descendants inherit this node's obfuscation key. Prefixes longer
    /// than 30 bytes are chained through intermediate single-fork nodes.
    pub fn add_fork(&mut self, path: &[u8], attributes: &ForkAttributes<'_>) -> Result<()> {
        if path.is_empty() {
            self.apply_attributes(attributes);
            return Ok(());
        }

        if !self.forks.contains_key(&path[0]) {
            let mut child = NodeV0::new(self.obfuscation_key);
            let fork = if path.len() > wire::PREFIX_MAX_SIZE {
                child.add_fork(&path[wire::PREFIX_MAX_SIZE..], attributes)?;
                ForkV0::new(path[..wire::PREFIX_MAX_SIZE].to_vec(), child)
            } else {
                child.apply_attributes(attributes);
                child.update_with_path_separator(path);
                ForkV0::new(path.to_vec(), child)
            };
            self.forks.insert(path[0], fork);
            self.node_type |= TYPE_EDGE;
            self.make_dirty();
            return Ok(());
        }

        let common = {
            let fork = &self.forks[&path[0]];
            common_prefix_len(&fork.prefix, path)
        };

        if common == self.forks[&path[0]].prefix.len() {
            // path continues through (or ends at) the existing fork
            if let Some(fork) = self.forks.get_mut(&path[0]) {
                let rest = &path[common..];
                if rest.is_empty() {
                    fork.node.apply_attributes(attributes);
                    fork.node.update_with_path_separator(path);
                } else {
                    fork.node.add_fork(rest, attributes)?;
                }
            }
            self.make_dirty();
            return Ok(());
        }

        // partial match: split the edge at the divergence point
        let removed = self
            .forks
            .remove(&path[0])
            .expect("fork presence checked above");
        let ForkV0 {
            prefix: old_prefix,
            node: old_child,
        } = removed;

        let mut intermediate = NodeV0::new(self.obfuscation_key);
        intermediate.update_with_path_separator(&old_prefix[..common]);
        intermediate
            .forks
            .insert(old_prefix[common], ForkV0::new(old_prefix[common..].to_vec(), old_child));
        intermediate.node_type |= TYPE_EDGE;
        intermediate.add_fork(&path[common..], attributes)?;

        self.forks
            .insert(path[0], ForkV0::new(old_prefix[..common].to_vec(), intermediate));
        self.make_dirty();
        Ok(())
    }

    /// Walk to the fork ending exactly at `path`.
    pub fn get_fork_at_path(&self, path: &[u8]) -> Result<&ForkV0> {
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }
        let fork = self
            .forks
            .get(&path[0])
            .ok_or_else(|| Error::not_found(path))?;
        if !path.starts_with(&fork.prefix) {
            return Err(Error::not_found(path));
        }
        let rest = &path[fork.prefix.len()..];
        if rest.is_empty() {
            Ok(fork)
        } else {
            fork.node.get_fork_at_path(rest)
        }
    }

    /// Remove the fork ending exactly at `path`, dropping its subtree.
    ///
    /// No up-merge is performed; a parent left with a single fork keeps its
    /// shape.
    pub fn remove_path(&mut self, path: &[u8]) -> Result<()> {
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }
        let prefix_len = {
            let fork = self
                .forks
                .get(&path[0])
                .ok_or_else(|| Error::not_found(path))?;
            if !path.starts_with(&fork.prefix) {
                return Err(Error::not_found(path));
            }
            fork.prefix.len()
        };

        if path.len() == prefix_len {
            self.forks.remove(&path[0]);
            if self.forks.is_empty() {
                self.node_type &= !TYPE_EDGE;
            }
        } else if let Some(fork) = self.forks.get_mut(&path[0]) {
            fork.node.remove_path(&path[prefix_len..])?;
        }
        self.make_dirty();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Persist every dirty node in this subtree, children first; returns the
    /// reference of this node.
    ///
    /// Clean subtrees are not rewritten. Children of one parent are saved
    /// concurrently and awaited as a group before the parent serializes,
    /// since each fork record embeds its child's saved reference.
    pub fn save<'a, S: ChunkStorage + ?Sized>(
        &'a mut self,
        storage: &'a S,
    ) -> BoxFuture<'a, Result<Reference>> {
        Box::pin(async move {
            if let Some(address) = &self.content_address {
                return Ok(address.clone());
            }
            if self.entry.is_none() && self.forks.is_empty() {
                return Err(Error::DirtyWithoutPayload(
                    "dirty node with no entry and no forks".into(),
                ));
            }

            let children: Vec<_> = self
                .forks
                .values_mut()
                .map(|fork| fork.node.save(storage))
                .collect();
            try_join_all(children).await?;

            let data = self.serialize()?;
            let reference = storage.save(&data).await?;
            tracing::debug!(
                reference = %reference,
                bytes = data.len(),
                forks = self.forks.len(),
                "saved v0.2 manifest node"
            );
            self.content_address = Some(reference.clone());
            Ok(reference)
        })
    }

    /// Replace this node's state from the chunk stored under `reference`.
    ///
    /// Shallow: children become stubs holding their chunk reference in the
    /// entry slot until loaded themselves. Metadata and the fork-record
    /// flags live in the parent's edge record, not in our own bytes, so
    /// they survive the reload.
    pub async fn load<S: ChunkStorage + ?Sized>(
        &mut self,
        storage: &S,
        reference: &Reference,
    ) -> Result<()> {
        let data = storage.load(reference).await?;
        let mut node = wire::unmarshal(&data)?;
        node.metadata = self.metadata.take();
        node.node_type |= self.node_type & FORK_RECORD_TYPES;
        node.content_address = Some(reference.clone());
        tracing::trace!(reference = %reference, bytes = data.len(), "loaded v0.2 manifest node");
        *self = node;
        Ok(())
    }

    /// Depth-first load of every descendant still represented as a stub.
    pub fn load_all<'a, S: ChunkStorage + ?Sized>(
        &'a mut self,
        storage: &'a S,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let loads: Vec<_> = self
                .forks
                .values_mut()
                .map(|fork| {
                    let node = &mut fork.node;
                    async move {
                        if node.content_address.is_none() {
                            if let Some(reference) = node.entry.clone() {
                                node.load(storage, &reference).await?;
                            }
                        }
                        node.load_all(storage).await
                    }
                })
                .collect();
            try_join_all(loads).await?;
            Ok(())
        })
    }

    /// Serialize this node to its wire form.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        wire::marshal(self)
    }

    /// Reconstruct a node from its wire form.
    pub fn deserialize(data: &[u8]) -> Result<NodeV0> {
        wire::unmarshal(data)
    }
}

/// Structural equality with accumulated-path diagnostics.
pub fn equal_nodes_v0(a: &NodeV0, b: &NodeV0) -> Result<()> {
    equal_at(a, b, &mut Vec::new())
}

fn equal_at(a: &NodeV0, b: &NodeV0, path: &mut Vec<u8>) -> Result<()> {
    if a.node_type != b.node_type {
        return Err(Error::mismatch(format!(
            "node types {:#04x} vs {:#04x} at '{}'",
            a.node_type,
            b.node_type,
            display_path(path)
        )));
    }
    if a.metadata != b.metadata {
        return Err(Error::mismatch(format!(
            "metadata differs at '{}'",
            display_path(path)
        )));
    }
    if a.entry != b.entry {
        return Err(Error::mismatch(format!(
            "entries differ at '{}'",
            display_path(path)
        )));
    }
    let a_keys: Vec<u8> = a.forks.keys().copied().collect();
    let b_keys: Vec<u8> = b.forks.keys().copied().collect();
    if a_keys != b_keys {
        return Err(Error::mismatch(format!(
            "fork keys differ at '{}'",
            display_path(path)
        )));
    }
    for (key, fork_a) in &a.forks {
        let fork_b = &b.forks[key];
        if fork_a.prefix != fork_b.prefix {
            return Err(Error::mismatch(format!(
                "fork prefixes differ for key {:#04x} at '{}'",
                key,
                display_path(path)
            )));
        }
        path.extend_from_slice(&fork_a.prefix);
        equal_at(&fork_a.node, &fork_b.node, path)?;
        path.truncate(path.len() - fork_a.prefix.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::ZERO_OBFUSCATION_KEY;

    fn reference(fill: u8) -> Reference {
        Reference::new(vec![fill; 32]).unwrap()
    }

    fn attrs(fill: u8) -> ForkAttributes<'static> {
        ForkAttributes::with_entry(reference(fill))
    }

    #[test]
    fn three_way_split_shapes_the_trie() {
        let mut root = NodeV0::new(ZERO_OBFUSCATION_KEY);
        root.add_fork(b"path1/valami/elso", &attrs(1)).unwrap();
        root.add_fork(b"path1/valami/masodik", &attrs(2)).unwrap();
        root.add_fork(b"path1/valami/masodik.ext", &attrs(3)).unwrap();

        // the root forks only on 'p'
        let keys: Vec<u8> = root.forks.keys().copied().collect();
        assert_eq!(keys, vec![b'p']);

        let common = &root.forks[&b'p'];
        assert_eq!(common.prefix, b"path1/valami/");

        let mid = &common.node;
        assert!(mid.is_edge());
        let mid_keys: Vec<u8> = mid.forks.keys().copied().collect();
        assert_eq!(mid_keys, vec![b'e', b'm']);

        // the 'm' subtree forks again on '.'
        let masodik = &mid.forks[&b'm'];
        assert_eq!(masodik.prefix, b"masodik");
        assert_eq!(masodik.node.entry(), Some(&reference(2)));
        let ext_keys: Vec<u8> = masodik.node.forks.keys().copied().collect();
        assert_eq!(ext_keys, vec![b'.']);
    }

    #[test]
    fn get_fork_walks_prefixes() {
        let mut root = NodeV0::new(ZERO_OBFUSCATION_KEY);
        root.add_fork(b"path1/valami/elso", &attrs(1)).unwrap();
        root.add_fork(b"path1/valami/masodik", &attrs(2)).unwrap();

        let fork = root.get_fork_at_path(b"path1/valami/elso").unwrap();
        assert_eq!(fork.node().entry(), Some(&reference(1)));

        assert!(matches!(
            root.get_fork_at_path(b"path1/valami/harmadik"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(root.get_fork_at_path(b""), Err(Error::EmptyPath)));
    }

    #[test]
    fn removal_tolerates_single_child_shape() {
        let mut root = NodeV0::new(ZERO_OBFUSCATION_KEY);
        root.add_fork(b"path1/valami/elso", &attrs(1)).unwrap();
        root.add_fork(b"path1/valami/masodik", &attrs(2)).unwrap();
        root.add_fork(b"path1/valami/masodik.ext", &attrs(3)).unwrap();

        root.remove_path(b"path1/valami/masodik").unwrap();

        let mid = &root.forks[&b'p'].node;
        let keys: Vec<u8> = mid.forks.keys().copied().collect();
        assert_eq!(keys, vec![b'e']);
        assert!(root.get_fork_at_path(b"path1/valami/masodik.ext").is_err());
    }

    #[test]
    fn long_paths_chain_through_intermediate_nodes() {
        let mut root = NodeV0::new(ZERO_OBFUSCATION_KEY);
        let path = [b'a'; 45];
        root.add_fork(&path, &attrs(9)).unwrap();

        let fork = &root.forks[&b'a'];
        assert_eq!(fork.prefix.len(), 30);
        let tail = &fork.node.forks[&b'a'];
        assert_eq!(tail.prefix.len(), 15);
        assert_eq!(tail.node.entry(), Some(&reference(9)));
    }

    #[test]
    fn mutation_marks_the_whole_path_dirty() {
        let mut root = NodeV0::new(ZERO_OBFUSCATION_KEY);
        root.add_fork(b"dir/one", &attrs(1)).unwrap();
        root.add_fork(b"dir/two", &attrs(2)).unwrap();

        // pretend the tree was saved
        root.set_content_address(reference(0xaa));
        assert!(!root.is_dirty());

        root.add_fork(b"dir/three", &attrs(3)).unwrap();
        assert!(root.is_dirty());
    }

    #[test]
    fn children_inherit_the_obfuscation_key() {
        let key = crate::bytes::keccak256(&[b"parent key"]);
        let mut root = NodeV0::new(key);
        root.add_fork(b"child", &attrs(1)).unwrap();
        assert_eq!(root.forks[&b'c'].node.obfuscation_key(), &key);
    }

    #[test]
    fn path_separator_flag_is_advisory() {
        let mut root = NodeV0::new(ZERO_OBFUSCATION_KEY);
        root.add_fork(b"with/sep", &attrs(1)).unwrap();
        root.add_fork(b"plain", &attrs(2)).unwrap();

        assert!(root.forks[&b'w'].node.is_with_path_separator());
        assert!(!root.forks[&b'p'].node.is_with_path_separator());
    }

    #[test]
    fn equality_reports_the_divergent_path() {
        let mut a = NodeV0::new(ZERO_OBFUSCATION_KEY);
        a.add_fork(b"dir/one", &attrs(1)).unwrap();
        let mut b = NodeV0::new(ZERO_OBFUSCATION_KEY);
        b.add_fork(b"dir/one", &attrs(2)).unwrap();

        let err = equal_nodes_v0(&a, &b).unwrap_err();
        assert!(err.to_string().contains("dir/one"));
    }
}
