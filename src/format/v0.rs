//! v0.2 node wire format
//!
//! ```text
//! 0        32  obfuscation key
//! 32       31  version tag ("0.2")
//! 63        1  reference size byte (32 or 64)
//! 64      ref  entry (zero-filled when absent)
//! +0       32  fork index bitmap
//! +32       .  fork records, ascending first-byte order
//! ```
//!
//! Fork record: node type (1) + prefix length (1) + zero-padded prefix (30)
//! + reference + optional 2-byte big-endian metadata length + JSON. The
//! reference slot carries the child's saved address when it has one (the
//! save path guarantees it), else the child's entry, else zeros.
//!
//! XOR obfuscation covers everything from offset 32 onward.

use crate::bitmap::{ForkIndex, FORK_INDEX_SIZE};
use crate::bytes::{is_all_zero, xor_keystream, OBFUSCATION_KEY_SIZE};
use crate::error::{Error, Result};
use crate::metadata::{serialize_metadata, Metadata};
use crate::node::v0::{ForkV0, NodeV0, TYPE_WITH_METADATA};
use crate::reference::{Reference, ENCRYPTED_REFERENCE_SIZE, REFERENCE_SIZE};
use std::collections::BTreeMap;

use super::{
    ensure_len, read_slice, read_u8, NODE_HEADER_SIZE, OBFUSCATION_OFFSET, VERSION_TAG_0_2,
};

/// Prefix ceiling of one v0.2 edge record
pub const PREFIX_MAX_SIZE: usize = 30;

/// Fixed part of a fork record: node type + prefix length + padded prefix
const FORK_HEADER_SIZE: usize = 2 + PREFIX_MAX_SIZE;

/// Big-endian length frame in front of fork metadata
const METADATA_LEN_SIZE: usize = 2;

pub(crate) fn marshal(node: &NodeV0) -> Result<Vec<u8>> {
    if node.entry.is_none() && node.forks.is_empty() {
        return Err(Error::DirtyWithoutPayload("no entry and no forks".into()));
    }
    let ref_size = node.ref_bytes_size as usize;
    if ref_size != REFERENCE_SIZE && ref_size != ENCRYPTED_REFERENCE_SIZE {
        return Err(Error::malformed(format!("reference size byte {ref_size}")));
    }

    let mut buf = Vec::with_capacity(
        NODE_HEADER_SIZE + ref_size + FORK_INDEX_SIZE + node.forks.len() * (FORK_HEADER_SIZE + ref_size),
    );
    buf.extend_from_slice(&node.obfuscation_key);
    buf.extend_from_slice(VERSION_TAG_0_2.as_slice());
    buf.push(node.ref_bytes_size);

    match &node.entry {
        Some(entry) => {
            if entry.len() != ref_size {
                return Err(Error::malformed(format!(
                    "entry length {} disagrees with reference size byte {ref_size}",
                    entry.len()
                )));
            }
            buf.extend_from_slice(entry.as_slice());
        }
        None => buf.resize(buf.len() + ref_size, 0),
    }

    let index: ForkIndex = node.forks.keys().copied().collect();
    buf.extend_from_slice(index.as_bytes());
    for fork in node.forks.values() {
        marshal_fork(&mut buf, fork, ref_size)?;
    }

    xor_keystream(&node.obfuscation_key, &mut buf[OBFUSCATION_OFFSET..]);
    Ok(buf)
}

fn marshal_fork(buf: &mut Vec<u8>, fork: &ForkV0, ref_size: usize) -> Result<()> {
    if fork.prefix.is_empty() || fork.prefix.len() > PREFIX_MAX_SIZE {
        return Err(Error::malformed(format!(
            "fork prefix length {}",
            fork.prefix.len()
        )));
    }
    let child = &fork.node;
    buf.push(child.node_type);
    buf.push(fork.prefix.len() as u8);
    let pad_start = buf.len();
    buf.extend_from_slice(&fork.prefix);
    buf.resize(pad_start + PREFIX_MAX_SIZE, 0);

    match child.content_address.as_ref().or(child.entry.as_ref()) {
        Some(reference) => {
            if reference.len() != ref_size {
                return Err(Error::malformed(format!(
                    "fork reference length {} disagrees with reference size byte {ref_size}",
                    reference.len()
                )));
            }
            buf.extend_from_slice(reference.as_slice());
        }
        None => buf.resize(buf.len() + ref_size, 0),
    }

    if child.node_type & TYPE_WITH_METADATA != 0 {
        let metadata = child
            .metadata
            .as_ref()
            .ok_or_else(|| Error::malformed("metadata flag set without metadata"))?;
        let encoded = serialize_metadata(metadata)?;
        if encoded.len() > u16::MAX as usize {
            return Err(Error::MetadataOverflow {
                need: encoded.len(),
                slot: u16::MAX as usize,
            });
        }
        buf.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        buf.extend_from_slice(&encoded);
    }
    Ok(())
}

pub(crate) fn unmarshal(data: &[u8]) -> Result<NodeV0> {
    ensure_len(data, 0, NODE_HEADER_SIZE, "node header")?;
    let mut obfuscation_key = [0u8; OBFUSCATION_KEY_SIZE];
    obfuscation_key.copy_from_slice(&data[..OBFUSCATION_KEY_SIZE]);

    let mut buf = data.to_vec();
    xor_keystream(&obfuscation_key, &mut buf[OBFUSCATION_OFFSET..]);
    let data = buf.as_slice();

    if &data[OBFUSCATION_OFFSET..NODE_HEADER_SIZE - 1] != VERSION_TAG_0_2.as_slice() {
        return Err(Error::malformed("version tag is not mantaray 0.2"));
    }
    let ref_size = data[NODE_HEADER_SIZE - 1] as usize;
    if ref_size != REFERENCE_SIZE && ref_size != ENCRYPTED_REFERENCE_SIZE {
        return Err(Error::malformed(format!("reference size byte {ref_size}")));
    }

    let mut pos = NODE_HEADER_SIZE;
    let entry_bytes = read_slice(data, &mut pos, ref_size, "entry")?;
    let entry = parse_reference(entry_bytes)?;

    let index_bytes = read_slice(data, &mut pos, FORK_INDEX_SIZE, "fork index")?;
    let mut index_arr = [0u8; FORK_INDEX_SIZE];
    index_arr.copy_from_slice(index_bytes);
    let index = ForkIndex::from_bytes(index_arr);

    let mut forks = BTreeMap::new();
    for key in index.iter() {
        let fork = unmarshal_fork(data, &mut pos, ref_size, &obfuscation_key)?;
        forks.insert(key, fork);
    }

    let mut node = NodeV0::new(obfuscation_key);
    node.ref_bytes_size = ref_size as u8;
    // flags are not persisted for the node itself; re-infer them
    if entry.is_some() {
        node.node_type |= crate::node::v0::TYPE_VALUE;
    }
    if !index.is_empty() {
        node.node_type |= crate::node::v0::TYPE_EDGE;
    }
    node.entry = entry;
    node.forks = forks;
    Ok(node)
}

fn unmarshal_fork(
    data: &[u8],
    pos: &mut usize,
    ref_size: usize,
    obfuscation_key: &[u8; OBFUSCATION_KEY_SIZE],
) -> Result<ForkV0> {
    let node_type = read_u8(data, pos, "fork node type")?;
    let prefix_len = read_u8(data, pos, "fork prefix length")? as usize;
    if prefix_len == 0 || prefix_len > PREFIX_MAX_SIZE {
        return Err(Error::malformed(format!("fork prefix length {prefix_len}")));
    }
    let prefix_bytes = read_slice(data, pos, PREFIX_MAX_SIZE, "fork prefix")?;
    let prefix = prefix_bytes[..prefix_len].to_vec();

    let reference_bytes = read_slice(data, pos, ref_size, "fork reference")?;
    let entry = parse_reference(reference_bytes)?;

    let metadata = if node_type & TYPE_WITH_METADATA != 0 {
        let len_bytes = read_slice(data, pos, METADATA_LEN_SIZE, "fork metadata length")?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        let json = read_slice(data, pos, len, "fork metadata")?;
        let parsed: Metadata = serde_json::from_slice(json)
            .map_err(|e| Error::invalid_metadata(format!("fork metadata: {e}")))?;
        Some(parsed)
    } else {
        None
    };

    let mut child = NodeV0::new(*obfuscation_key);
    child.node_type = node_type;
    child.ref_bytes_size = ref_size as u8;
    child.entry = entry;
    child.metadata = metadata;
    Ok(ForkV0::new(prefix, child))
}

/// A zero-filled slot means "no reference".
fn parse_reference(bytes: &[u8]) -> Result<Option<Reference>> {
    if is_all_zero(bytes) {
        Ok(None)
    } else {
        Reference::from_slice(bytes).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{keccak256, ZERO_OBFUSCATION_KEY};
    use crate::node::v0::equal_nodes_v0;
    use crate::node::ForkAttributes;
    use serde_json::json;

    fn entry_reference() -> Reference {
        let mut bytes = vec![0x7du8; 32];
        bytes[31] = 0x57;
        Reference::new(bytes).unwrap()
    }

    #[test]
    fn single_entry_roundtrip() {
        let mut node = NodeV0::new(ZERO_OBFUSCATION_KEY);
        node.set_entry(entry_reference());

        let data = node.serialize().unwrap();
        assert_eq!(data.len(), NODE_HEADER_SIZE + 32 + FORK_INDEX_SIZE);

        let restored = NodeV0::deserialize(&data).unwrap();
        assert_eq!(restored.entry(), Some(&entry_reference()));
        assert!(restored.forks().is_empty());
        assert!(restored.is_value());
        assert!(!restored.is_edge());
    }

    #[test]
    fn obfuscation_key_prefixes_the_wire_form() {
        let key: [u8; 32] = keccak256(&[b"obfuscation"]);

        let mut plain = NodeV0::new(ZERO_OBFUSCATION_KEY);
        plain.set_entry(entry_reference());
        let plain_bytes = plain.serialize().unwrap();

        let mut obfuscated = plain.clone();
        obfuscated.set_obfuscation_key(key);
        let obfuscated_bytes = obfuscated.serialize().unwrap();

        assert_eq!(&obfuscated_bytes[..32], &key);
        assert_eq!(obfuscated_bytes.len(), plain_bytes.len());
        for (i, (lhs, rhs)) in obfuscated_bytes[32..]
            .iter()
            .zip(plain_bytes[32..].iter())
            .enumerate()
        {
            assert_eq!(lhs ^ key[i % 32], *rhs);
        }

        // and it still parses back to the same node
        let restored = NodeV0::deserialize(&obfuscated_bytes).unwrap();
        assert_eq!(restored.entry(), Some(&entry_reference()));
    }

    #[test]
    fn fork_records_keep_ascending_order_and_metadata() {
        let mut node = NodeV0::new(ZERO_OBFUSCATION_KEY);
        let mut metadata = Metadata::new();
        metadata.insert("mime".into(), json!("text/plain"));

        let mut with_md = ForkAttributes::with_entry(entry_reference());
        with_md.fork_metadata = Some(metadata);
        node.add_fork(b"zeta", &with_md).unwrap();
        node.add_fork(b"alpha", &ForkAttributes::with_entry(entry_reference()))
            .unwrap();

        let data = node.serialize().unwrap();
        let restored = NodeV0::deserialize(&data).unwrap();

        let keys: Vec<u8> = restored.forks().keys().copied().collect();
        assert_eq!(keys, vec![b'a', b'z']);
        let zeta = &restored.forks()[&b'z'];
        assert_eq!(zeta.prefix(), b"zeta");
        assert!(zeta.node().has_metadata());
        assert_eq!(
            zeta.node().metadata().unwrap()["mime"],
            json!("text/plain")
        );
    }

    #[test]
    fn serialize_then_deserialize_is_structural_identity_for_leaves() {
        let mut node = NodeV0::new(ZERO_OBFUSCATION_KEY);
        node.set_entry(entry_reference());

        let restored = NodeV0::deserialize(&node.serialize().unwrap()).unwrap();
        equal_nodes_v0(&node, &restored).unwrap();
    }

    #[test]
    fn truncated_buffers_are_malformed() {
        let mut node = NodeV0::new(ZERO_OBFUSCATION_KEY);
        node.set_entry(entry_reference());
        let data = node.serialize().unwrap();

        for cut in [0, 10, NODE_HEADER_SIZE, data.len() - 1] {
            let err = NodeV0::deserialize(&data[..cut]).unwrap_err();
            assert!(matches!(err, Error::Malformed(_)), "cut at {cut}");
        }
    }

    #[test]
    fn wrong_version_tag_is_rejected() {
        let mut node = NodeV0::new(ZERO_OBFUSCATION_KEY);
        node.set_entry(entry_reference());
        let mut data = node.serialize().unwrap();
        data[40] ^= 0xff;

        let err = NodeV0::deserialize(&data).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn empty_node_has_nothing_to_serialize() {
        let node = NodeV0::new(ZERO_OBFUSCATION_KEY);
        assert!(matches!(
            node.serialize(),
            Err(Error::DirtyWithoutPayload(_))
        ));
    }
}
