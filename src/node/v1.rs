//! v1.0 manifest nodes
//!
//! The current variant: explicit `has_entry`/`enc_entry`/`is_edge` feature
//! bits, a 31-byte prefix ceiling with continuous-node overflow chaining,
//! fork metadata in fixed parent-declared slots, and node-level metadata
//! trailing the buffer.
//!
//! A continuous node is a synthetic intermediate that exists only because
//! its parent's edge record could not hold the whole prefix: it has exactly
//! one outgoing fork carrying the overflow bytes, and neither entry nor
//! metadata.

use crate::bytes::{common_prefix_len, ZERO_OBFUSCATION_KEY};
use crate::error::{display_path, Error, Result};
use crate::format::v1 as wire;
use crate::metadata::{segments_needed, serialize_metadata, Metadata, MAX_SEGMENTS, SEGMENT_SIZE};
use crate::reference::{Reference, REFERENCE_SIZE};
use crate::storage::ChunkStorage;
use futures::future::{try_join_all, BoxFuture};
use std::collections::BTreeMap;

use super::{ForkAttributes, ObfuscationKeySource};

/// A v1.0 edge: branch prefix plus the child it leads to
#[derive(Debug, Clone)]
pub struct ForkV1 {
    pub(crate) prefix: Vec<u8>,
    pub(crate) node: NodeV1,
}

impl ForkV1 {
    pub(crate) fn new(prefix: Vec<u8>, node: NodeV1) -> Self {
        Self { prefix, node }
    }

    /// The edge prefix bytes (1..=31)
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// The child node
    pub fn node(&self) -> &NodeV1 {
        &self.node
    }

    /// The child node, mutably
    pub fn node_mut(&mut self) -> &mut NodeV1 {
        &mut self.node
    }
}

/// A v1.0 manifest node
#[derive(Debug, Clone)]
pub struct NodeV1 {
    pub(crate) obfuscation_key: [u8; 32],
    pub(crate) entry: Option<Reference>,
    pub(crate) node_metadata: Option<Metadata>,
    /// Owned by the parent's edge record slot on wire; carried here in
    /// memory so it survives rearrangements.
    pub(crate) fork_metadata: Option<Metadata>,
    pub(crate) fork_metadata_segment_size: u8,
    pub(crate) forks: BTreeMap<u8, ForkV1>,
    pub(crate) content_address: Option<Reference>,
    pub(crate) is_continuous_node: bool,
}

impl NodeV1 {
    /// Create an empty dirty node keyed with `obfuscation_key`.
    pub fn new(obfuscation_key: [u8; 32]) -> Self {
        Self {
            obfuscation_key,
            entry: None,
            node_metadata: None,
            fork_metadata: None,
            fork_metadata_segment_size: 0,
            forks: BTreeMap::new(),
            content_address: None,
            is_continuous_node: false,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Whether this node carries an entry
    pub fn has_entry(&self) -> bool {
        self.entry.is_some()
    }

    /// Whether the entry is a 64-byte encrypted reference
    pub fn has_encrypted_entry(&self) -> bool {
        self.entry.as_ref().is_some_and(Reference::is_encrypted)
    }

    /// Whether this node has children
    pub fn is_edge(&self) -> bool {
        !self.forks.is_empty()
    }

    /// Whether this node only chains an over-long parent prefix
    pub fn is_continuous_node(&self) -> bool {
        self.is_continuous_node
    }

    /// The entry reference, if any
    pub fn entry(&self) -> Option<&Reference> {
        self.entry.as_ref()
    }

    /// Metadata serialized on this node itself
    pub fn node_metadata(&self) -> Option<&Metadata> {
        self.node_metadata.as_ref()
    }

    /// Metadata serialized in the parent's edge record slot
    pub fn fork_metadata(&self) -> Option<&Metadata> {
        self.fork_metadata.as_ref()
    }

    /// Slot size, in 32-byte segments, of every fork record under this node
    pub fn fork_metadata_segment_size(&self) -> u8 {
        self.fork_metadata_segment_size
    }

    /// The fork map, keyed by each prefix's first byte
    pub fn forks(&self) -> &BTreeMap<u8, ForkV1> {
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

    /// Set the entry reference.
    pub fn set_entry(&mut self, entry: Reference) {
        self.entry = Some(entry);
        self.make_dirty();
    }

    /// Set the metadata serialized on this node itself.
    pub fn set_node_metadata(&mut self, metadata: Metadata) {
        self.node_metadata = Some(metadata);
        self.make_dirty();
    }

    /// Set the metadata serialized in the parent's edge record slot.
    ///
    /// The parent must declare a slot large enough
    /// ([`Self::set_fork_metadata_segment_size`] or an `add_fork` that
    /// reserves one), or serializing the parent fails with a metadata
    /// overflow.
    pub fn set_fork_metadata(&mut self, metadata: Metadata) {
        self.fork_metadata = Some(metadata);
        self.make_dirty();
    }

    /// Declare the fork-record slot size for every fork under this node.
    pub fn set_fork_metadata_segment_size(&mut self, segments: u8) -> Result<()> {
        if segments as usize > MAX_SEGMENTS {
            return Err(Error::malformed(format!(
                "fork metadata segment size {segments} exceeds {MAX_SEGMENTS}"
            )));
        }
        self.fork_metadata_segment_size = segments;
        self.make_dirty();
        Ok(())
    }

    /// Replace the obfuscation key used when this node is serialized.
    pub fn set_obfuscation_key(&mut self, key: [u8; 32]) {
        self.obfuscation_key = key;
        self.make_dirty();
    }

    fn apply_attributes(&mut self, attributes: &ForkAttributes<'_>) {
        if attributes.entry.is_some()
            || attributes.node_metadata.is_some()
            || attributes.fork_metadata.is_some()
        {
            // a node carrying its own payload is no longer a pure
            // prefix-continuation link
            self.is_continuous_node = false;
        }
        if let Some(entry) = &attributes.entry {
            self.set_entry(entry.clone());
        }
        if let Some(metadata) = &attributes.node_metadata {
            self.set_node_metadata(metadata.clone());
        }
        if let Some(metadata) = &attributes.fork_metadata {
            self.set_fork_metadata(metadata.clone());
        }
        self.make_dirty();
    }

    /// Allocate a child: zero-key trees stay zero-keyed, non-zero trees draw
    /// a fresh key from the caller's source.
    fn new_child(&self, key_source: Option<&dyn ObfuscationKeySource>) -> Result<NodeV1> {
        if self.obfuscation_key == ZERO_OBFUSCATION_KEY {
            return Ok(NodeV1::new(ZERO_OBFUSCATION_KEY));
        }
        let source = key_source.ok_or_else(|| {
            Error::MissingKeySource("non-zero parent key and no generator for new nodes".into())
        })?;
        Ok(NodeV1::new(source.generate()))
    }

    /// Make sure this node's fork slot can hold `metadata`: grow from zero,
    /// fail on a declared slot that is too small.
    fn reserve_fork_slot(&mut self, metadata: &Metadata) -> Result<()> {
        let need_bytes = serialize_metadata(metadata)?.len();
        let need = segments_needed(metadata)?;
        let slot = self.fork_metadata_segment_size as usize;
        if slot == 0 {
            if need > MAX_SEGMENTS {
                return Err(Error::MetadataOverflow {
                    need: need_bytes,
                    slot: MAX_SEGMENTS * SEGMENT_SIZE,
                });
            }
            self.fork_metadata_segment_size = need as u8;
        } else if need > slot {
            return Err(Error::MetadataOverflow {
                need: need_bytes,
                slot: slot * SEGMENT_SIZE,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trie operations
    // ------------------------------------------------------------------

    /// Bind `path` to the given attributes, splitting edges as needed.
    ///
    /// Prefixes longer than 31 bytes are chained through continuous nodes;
    /// splitting a fork that owns such a chain redistributes the prefix
    /// bytes so every link stays a single-fork continuous node.
    pub fn add_fork(&mut self, path: &[u8], attributes: &ForkAttributes<'_>) -> Result<()> {
        if path.is_empty() {
            self.apply_attributes(attributes);
            return Ok(());
        }

        if !self.forks.contains_key(&path[0]) {
            let mut child = self.new_child(attributes.key_source)?;
            let fork = if path.len() > wire::PREFIX_MAX_SIZE {
                child.is_continuous_node = true;
                child.add_fork(&path[wire::PREFIX_MAX_SIZE..], attributes)?;
                ForkV1::new(path[..wire::PREFIX_MAX_SIZE].to_vec(), child)
            } else {
                if let Some(metadata) = &attributes.fork_metadata {
                    self.reserve_fork_slot(metadata)?;
                }
                child.apply_attributes(attributes);
                ForkV1::new(path.to_vec(), child)
            };
            self.forks.insert(path[0], fork);
            if self.is_continuous_node && self.forks.len() > 1 {
                // a second branch point means this is a real radix node now
                self.is_continuous_node = false;
            }
            self.make_dirty();
            return Ok(());
        }

        let common = {
            let fork = &self.forks[&path[0]];
            common_prefix_len(&fork.prefix, path)
        };

        if common == self.forks[&path[0]].prefix.len() {
            // path continues through (or ends at) the existing fork
            let rest_empty = path.len() == common;
            if rest_empty {
                if let Some(metadata) = &attributes.fork_metadata {
                    self.reserve_fork_slot(metadata)?;
                }
            }
            if let Some(fork) = self.forks.get_mut(&path[0]) {
                if rest_empty {
                    fork.node.apply_attributes(attributes);
                } else {
                    fork.node.add_fork(&path[common..], attributes)?;
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
        let ForkV1 {
            prefix: old_prefix,
            node: old_child,
        } = removed;

        // collapse any continuous chain below the old fork so its logical
        // suffix can be re-chunked from the new intermediate down
        let (suffix, terminal) = collapse_chain(old_prefix[common..].to_vec(), old_child);

        let mut intermediate = self.new_child(attributes.key_source)?;
        intermediate.attach_chain(suffix, terminal, attributes.key_source)?;
        intermediate.add_fork(&path[common..], attributes)?;

        // the intermediate itself may have received fork metadata (empty
        // remainder); its slot lives in our edge record
        if let Some(metadata) = intermediate.fork_metadata.clone() {
            self.reserve_fork_slot(&metadata)?;
        }
        self.forks
            .insert(path[0], ForkV1::new(old_prefix[..common].to_vec(), intermediate));
        self.make_dirty();
        Ok(())
    }

    /// Hang `node` below this one under `prefix`, chaining through
    /// continuous links wherever the prefix exceeds the edge-record ceiling.
    fn attach_chain(
        &mut self,
        prefix: Vec<u8>,
        mut node: NodeV1,
        key_source: Option<&dyn ObfuscationKeySource>,
    ) -> Result<()> {
        if prefix.is_empty() {
            return Err(Error::EmptyPath);
        }
        if prefix.len() <= wire::PREFIX_MAX_SIZE {
            // a re-homed child keeps its fork metadata; it now occupies one
            // of our slots
            if let Some(metadata) = node.fork_metadata.clone() {
                self.reserve_fork_slot(&metadata)?;
            }
            node.is_continuous_node = false;
            self.forks.insert(prefix[0], ForkV1::new(prefix, node));
        } else {
            let mut link = self.new_child(key_source)?;
            link.is_continuous_node = true;
            link.attach_chain(prefix[wire::PREFIX_MAX_SIZE..].to_vec(), node, key_source)?;
            self.forks.insert(
                prefix[0],
                ForkV1::new(prefix[..wire::PREFIX_MAX_SIZE].to_vec(), link),
            );
        }
        Ok(())
    }

    /// Walk to the fork ending exactly at `path`.
    pub fn get_fork_at_path(&self, path: &[u8]) -> Result<&ForkV1> {
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
                "saved v1.0 manifest node"
            );
            self.content_address = Some(reference.clone());
            Ok(reference)
        })
    }

    /// Replace this node's state from the chunk stored under `reference`.
    ///
    /// Shallow: children stay stubs carrying only their chunk reference
    /// until loaded themselves. The continuous flag and fork metadata live
    /// in the parent's edge record, not in our own bytes, so they survive
    /// the reload.
    pub async fn load<S: ChunkStorage + ?Sized>(
        &mut self,
        storage: &S,
        reference: &Reference,
    ) -> Result<()> {
        let data = storage.load(reference).await?;
        let mut node = wire::unmarshal(&data, reference.len())?;
        node.fork_metadata = self.fork_metadata.take();
        node.is_continuous_node = self.is_continuous_node;
        node.content_address = Some(reference.clone());
        tracing::trace!(reference = %reference, bytes = data.len(), "loaded v1.0 manifest node");
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
                        if node.entry.is_none() && node.forks.is_empty() {
                            if let Some(reference) = node.content_address.clone() {
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

    /// Reconstruct a node from its wire form, assuming plain 32-byte fork
    /// references.
    pub fn deserialize(data: &[u8]) -> Result<NodeV1> {
        wire::unmarshal(data, REFERENCE_SIZE)
    }
}

/// Strip a continuous chain down to its logical suffix and terminal node.
fn collapse_chain(mut suffix: Vec<u8>, mut node: NodeV1) -> (Vec<u8>, NodeV1) {
    while node.is_continuous_node {
        let Some(key) = node.forks.keys().next().copied() else {
            break;
        };
        let Some(fork) = node.forks.remove(&key) else {
            break;
        };
        suffix.extend_from_slice(&fork.prefix);
        node = fork.node;
    }
    (suffix, node)
}

/// Structural equality with accumulated-path diagnostics.
pub fn equal_nodes_v1(a: &NodeV1, b: &NodeV1) -> Result<()> {
    equal_at(a, b, &mut Vec::new())
}

fn equal_at(a: &NodeV1, b: &NodeV1, path: &mut Vec<u8>) -> Result<()> {
    let flags = |n: &NodeV1| {
        (
            n.has_entry(),
            n.has_encrypted_entry(),
            n.is_edge(),
            n.is_continuous_node,
            n.fork_metadata_segment_size,
        )
    };
    if flags(a) != flags(b) {
        return Err(Error::mismatch(format!(
            "node flags differ at '{}'",
            display_path(path)
        )));
    }
    if a.node_metadata != b.node_metadata || a.fork_metadata != b.fork_metadata {
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
    use crate::node::FixedKeySource;
    use serde_json::json;

    fn reference(fill: u8) -> Reference {
        Reference::new(vec![fill; 32]).unwrap()
    }

    fn attrs(fill: u8) -> ForkAttributes<'static> {
        ForkAttributes::with_entry(reference(fill))
    }

    fn metadata(key: &str, value: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(key.into(), json!(value));
        metadata
    }

    #[test]
    fn long_path_builds_a_continuous_chain() {
        let mut root = NodeV1::new(ZERO_OBFUSCATION_KEY);
        let path: Vec<u8> = (0u8..66).collect();
        root.add_fork(&path, &attrs(9)).unwrap();

        let first = &root.forks[&0];
        assert_eq!(first.prefix, &path[..31]);
        let link = &first.node;
        assert!(link.is_continuous_node());
        assert_eq!(link.forks.len(), 1);
        assert!(link.entry().is_none());

        let second = &link.forks[&path[31]];
        assert_eq!(second.prefix, &path[31..62]);
        assert!(second.node.is_continuous_node());

        let tail = &second.node.forks[&path[62]];
        assert_eq!(tail.prefix, &path[62..]);
        assert!(!tail.node.is_continuous_node());
        assert_eq!(tail.node.entry(), Some(&reference(9)));
    }

    #[test]
    fn splitting_a_continuous_fork_rehomes_the_overflow() {
        let mut root = NodeV1::new(ZERO_OBFUSCATION_KEY);
        let long: Vec<u8> = (0u8..40).collect();
        root.add_fork(&long, &attrs(1)).unwrap();

        // diverge at byte 10
        let mut short: Vec<u8> = long[..10].to_vec();
        short.push(200);
        root.add_fork(&short, &attrs(2)).unwrap();

        let top = &root.forks[&0];
        assert_eq!(top.prefix, &long[..10]);
        let intermediate = &top.node;
        assert!(!intermediate.is_continuous_node());

        // the displaced 30-byte suffix now fits a single edge record
        let displaced = &intermediate.forks[&long[10]];
        assert_eq!(displaced.prefix, &long[10..]);
        assert!(!displaced.node.is_continuous_node());
        assert_eq!(displaced.node.entry(), Some(&reference(1)));

        let added = &intermediate.forks[&200];
        assert_eq!(added.node.entry(), Some(&reference(2)));
    }

    #[test]
    fn rehomed_overflow_rechunks_when_still_too_long() {
        let mut root = NodeV1::new(ZERO_OBFUSCATION_KEY);
        let long: Vec<u8> = (0u8..40).collect();
        root.add_fork(&long, &attrs(1)).unwrap();

        // diverge at byte 2: the displaced suffix is 38 bytes, over the ceiling
        let short = vec![0u8, 1, 250];
        root.add_fork(&short, &attrs(2)).unwrap();

        let intermediate = &root.forks[&0].node;
        let displaced = &intermediate.forks[&long[2]];
        assert_eq!(displaced.prefix, &long[2..33]);
        assert!(displaced.node.is_continuous_node());

        let tail = &displaced.node.forks[&long[33]];
        assert_eq!(tail.prefix, &long[33..]);
        assert_eq!(tail.node.entry(), Some(&reference(1)));

        // the full logical prefix still spells the original path
        assert_eq!(
            root.get_fork_at_path(&long).unwrap().node().entry(),
            Some(&reference(1))
        );
    }

    #[test]
    fn branching_at_a_chain_boundary_clears_the_continuous_mark() {
        let mut root = NodeV1::new(ZERO_OBFUSCATION_KEY);
        let a: Vec<u8> = (0u8..66).collect();
        root.add_fork(&a, &attrs(1)).unwrap();

        // diverge exactly where the first chain link starts
        let mut b: Vec<u8> = a[..31].to_vec();
        b.extend_from_slice(&[210, 211]);
        root.add_fork(&b, &attrs(2)).unwrap();

        let link = &root.forks[&0].node;
        assert_eq!(link.forks.len(), 2);
        assert!(!link.is_continuous_node());

        assert_eq!(
            root.get_fork_at_path(&a).unwrap().node().entry(),
            Some(&reference(1))
        );
        assert_eq!(
            root.get_fork_at_path(&b).unwrap().node().entry(),
            Some(&reference(2))
        );
    }

    #[test]
    fn fork_slot_grows_from_zero_and_rejects_overflow() {
        let mut root = NodeV1::new(ZERO_OBFUSCATION_KEY);
        let small = ForkAttributes::with_entry(reference(1)).fork_metadata(metadata("m", "x"));
        root.add_fork(b"one", &small).unwrap();
        assert_eq!(root.fork_metadata_segment_size(), 1);

        // declared slot too small for sixty bytes of value
        let mut constrained = NodeV1::new(ZERO_OBFUSCATION_KEY);
        constrained.set_fork_metadata_segment_size(1).unwrap();
        let big = ForkAttributes::with_entry(reference(2))
            .fork_metadata(metadata("k", &"x".repeat(60)));
        let err = constrained.add_fork(b"two", &big).unwrap_err();
        assert!(matches!(err, Error::MetadataOverflow { slot: 32, .. }));
    }

    #[test]
    fn non_zero_key_requires_a_source_for_new_nodes() {
        let key = crate::bytes::keccak256(&[b"root key"]);
        let mut root = NodeV1::new(key);

        let err = root.add_fork(b"child", &attrs(1)).unwrap_err();
        assert!(matches!(err, Error::MissingKeySource(_)));

        let child_key = crate::bytes::keccak256(&[b"child key"]);
        let source = FixedKeySource(child_key);
        let ok = ForkAttributes::with_entry(reference(1)).key_source(&source);
        root.add_fork(b"child", &ok).unwrap();
        assert_eq!(root.forks[&b'c'].node.obfuscation_key(), &child_key);
    }

    #[test]
    fn removal_drops_the_whole_subtree() {
        let mut root = NodeV1::new(ZERO_OBFUSCATION_KEY);
        root.add_fork(b"path1/valami/elso", &attrs(1)).unwrap();
        root.add_fork(b"path1/valami/masodik", &attrs(2)).unwrap();
        root.add_fork(b"path1/valami/masodik.ext", &attrs(3)).unwrap();

        root.remove_path(b"path1/valami/masodik").unwrap();

        let mid = &root.forks[&b'p'].node;
        let keys: Vec<u8> = mid.forks.keys().copied().collect();
        assert_eq!(keys, vec![b'e']);
        assert!(matches!(
            root.get_fork_at_path(b"path1/valami/masodik.ext"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn equality_compares_flags_and_metadata() {
        let mut a = NodeV1::new(ZERO_OBFUSCATION_KEY);
        a.add_fork(b"dir/one", &attrs(1)).unwrap();
        let mut b = a.clone();
        assert!(equal_nodes_v1(&a, &b).is_ok());

        b.add_fork(
            b"dir/one",
            &ForkAttributes::new().node_metadata(metadata("m", "x")),
        )
        .unwrap();
        let err = equal_nodes_v1(&a, &b).unwrap_err();
        assert!(err.to_string().contains("dir/one"));
    }
}
