//! v1.0 node wire format
//!
//! ```text
//! 0        32  obfuscation key
//! 32       31  version tag ("1.0")
//! 63        1  node features
//! 64        .  entry (absent / 32 / 64, per the feature bits)
//! +0       32  fork index bitmap (present iff is_edge)
//! +32       .  fork records, ascending first-byte order
//! end       .  node-level metadata JSON (rest of buffer)
//! ```
//!
//! The features byte packs, least significant bit up: `has_entry`,
//! `enc_entry`, `is_edge`, then the 5-bit fork-metadata segment size.
//!
//! Fork record: prefix length (1) + zero-padded prefix (31) + the child
//! node's saved reference + a `segments * 32`-byte metadata slot when the
//! parent declares one. A prefix length above 31 marks a continuous fork:
//! 31 prefix bytes here, the rest in the child's single outgoing fork.
//!
//! XOR obfuscation covers everything from offset 32 onward.

use crate::bitmap::{ForkIndex, FORK_INDEX_SIZE};
use crate::bytes::{xor_keystream, OBFUSCATION_KEY_SIZE, ZERO_OBFUSCATION_KEY};
use crate::error::{display_path, Error, Result};
use crate::metadata::{
    deserialize_metadata, pad_in_segments, serialize_metadata, MAX_SEGMENTS, SEGMENT_SIZE,
};
use crate::node::v1::{ForkV1, NodeV1};
use crate::reference::{Reference, ENCRYPTED_REFERENCE_SIZE, REFERENCE_SIZE};
use std::collections::BTreeMap;

use super::{
    ensure_len, read_slice, read_u8, NODE_HEADER_SIZE, OBFUSCATION_OFFSET, VERSION_TAG_1_0,
};

/// Prefix ceiling of one v1.0 edge record
pub const PREFIX_MAX_SIZE: usize = 31;

/// Node carries an entry reference
const FEATURE_HAS_ENTRY: u8 = 0b0000_0001;
/// The entry is a 64-byte encrypted reference
const FEATURE_ENC_ENTRY: u8 = 0b0000_0010;
/// Node has children (bitmap and fork records follow the entry)
const FEATURE_IS_EDGE: u8 = 0b0000_0100;
/// The segment-size field occupies the top five bits
const FEATURE_SEGMENT_SHIFT: u8 = 3;

pub(crate) fn marshal(node: &NodeV1) -> Result<Vec<u8>> {
    if node.entry.is_none() && node.forks.is_empty() {
        return Err(Error::DirtyWithoutPayload("no entry and no forks".into()));
    }
    let segments = node.fork_metadata_segment_size as usize;
    if segments > MAX_SEGMENTS {
        return Err(Error::malformed(format!(
            "fork metadata segment size {segments} exceeds {MAX_SEGMENTS}"
        )));
    }

    let mut features = 0u8;
    if let Some(entry) = &node.entry {
        features |= FEATURE_HAS_ENTRY;
        if entry.is_encrypted() {
            features |= FEATURE_ENC_ENTRY;
        }
    }
    if !node.forks.is_empty() {
        features |= FEATURE_IS_EDGE;
    }
    features |= node.fork_metadata_segment_size << FEATURE_SEGMENT_SHIFT;

    let mut buf = Vec::with_capacity(
        NODE_HEADER_SIZE
            + ENCRYPTED_REFERENCE_SIZE
            + FORK_INDEX_SIZE
            + node.forks.len() * (1 + PREFIX_MAX_SIZE + REFERENCE_SIZE + segments * SEGMENT_SIZE),
    );
    buf.extend_from_slice(&node.obfuscation_key);
    buf.extend_from_slice(VERSION_TAG_1_0.as_slice());
    buf.push(features);

    if let Some(entry) = &node.entry {
        buf.extend_from_slice(entry.as_slice());
    }

    if !node.forks.is_empty() {
        let index: ForkIndex = node.forks.keys().copied().collect();
        buf.extend_from_slice(index.as_bytes());
        let mut reference_len: Option<usize> = None;
        for fork in node.forks.values() {
            marshal_fork(&mut buf, fork, segments, &mut reference_len)?;
        }
    }

    if let Some(metadata) = &node.node_metadata {
        buf.extend_from_slice(&serialize_metadata(metadata)?);
    }

    xor_keystream(&node.obfuscation_key, &mut buf[OBFUSCATION_OFFSET..]);
    Ok(buf)
}

fn marshal_fork(
    buf: &mut Vec<u8>,
    fork: &ForkV1,
    segments: usize,
    reference_len: &mut Option<usize>,
) -> Result<()> {
    let child = &fork.node;
    if fork.prefix.is_empty() || fork.prefix.len() > PREFIX_MAX_SIZE {
        return Err(Error::malformed(format!(
            "fork prefix length {}",
            fork.prefix.len()
        )));
    }
    if child.is_continuous_node && fork.prefix.len() != PREFIX_MAX_SIZE {
        return Err(Error::malformed(
            "continuous fork must fill its prefix record",
        ));
    }

    // a length above the ceiling signals that the prefix continues in the
    // child's single outgoing fork
    let prefix_len_byte = if child.is_continuous_node {
        (PREFIX_MAX_SIZE + 1) as u8
    } else {
        fork.prefix.len() as u8
    };
    buf.push(prefix_len_byte);
    let pad_start = buf.len();
    buf.extend_from_slice(&fork.prefix);
    buf.resize(pad_start + PREFIX_MAX_SIZE, 0);

    let reference = child
        .content_address
        .as_ref()
        .ok_or_else(|| Error::MissingContentAddress(display_path(&fork.prefix)))?;
    match reference_len {
        None => *reference_len = Some(reference.len()),
        Some(len) if *len != reference.len() => {
            return Err(Error::malformed("mixed fork reference sizes"));
        }
        Some(_) => {}
    }
    buf.extend_from_slice(reference.as_slice());

    if segments > 0 {
        buf.extend_from_slice(&pad_in_segments(child.fork_metadata.as_ref(), segments)?);
    } else if let Some(metadata) = &child.fork_metadata {
        return Err(Error::MetadataOverflow {
            need: serialize_metadata(metadata)?.len(),
            slot: 0,
        });
    }
    Ok(())
}

pub(crate) fn unmarshal(data: &[u8], reference_len: usize) -> Result<NodeV1> {
    ensure_len(data, 0, NODE_HEADER_SIZE, "node header")?;
    let mut obfuscation_key = [0u8; OBFUSCATION_KEY_SIZE];
    obfuscation_key.copy_from_slice(&data[..OBFUSCATION_KEY_SIZE]);

    let mut buf = data.to_vec();
    xor_keystream(&obfuscation_key, &mut buf[OBFUSCATION_OFFSET..]);
    let data = buf.as_slice();

    if &data[OBFUSCATION_OFFSET..NODE_HEADER_SIZE - 1] != VERSION_TAG_1_0.as_slice() {
        return Err(Error::malformed("version tag is not mantaray 1.0"));
    }

    let features = data[NODE_HEADER_SIZE - 1];
    let has_entry = features & FEATURE_HAS_ENTRY != 0;
    let enc_entry = features & FEATURE_ENC_ENTRY != 0;
    let is_edge = features & FEATURE_IS_EDGE != 0;
    let segments = (features >> FEATURE_SEGMENT_SHIFT) as usize;
    if enc_entry && !has_entry {
        return Err(Error::malformed("encrypted-entry flag without an entry"));
    }

    let mut pos = NODE_HEADER_SIZE;
    let entry = if has_entry {
        let len = if enc_entry {
            ENCRYPTED_REFERENCE_SIZE
        } else {
            REFERENCE_SIZE
        };
        Some(Reference::from_slice(read_slice(data, &mut pos, len, "entry")?)?)
    } else {
        None
    };

    let mut forks = BTreeMap::new();
    if is_edge {
        let index_bytes = read_slice(data, &mut pos, FORK_INDEX_SIZE, "fork index")?;
        let mut index_arr = [0u8; FORK_INDEX_SIZE];
        index_arr.copy_from_slice(index_bytes);
        let index = ForkIndex::from_bytes(index_arr);
        if index.is_empty() {
            return Err(Error::malformed("edge flag with an empty fork index"));
        }
        for key in index.iter() {
            let fork = unmarshal_fork(data, &mut pos, reference_len, segments)?;
            forks.insert(key, fork);
        }
    }

    let node_metadata = if pos < data.len() {
        deserialize_metadata(&data[pos..])
    } else {
        None
    };

    let mut node = NodeV1::new(obfuscation_key);
    node.entry = entry;
    node.node_metadata = node_metadata;
    node.fork_metadata_segment_size = segments as u8;
    node.forks = forks;
    Ok(node)
}

fn unmarshal_fork(
    data: &[u8],
    pos: &mut usize,
    reference_len: usize,
    segments: usize,
) -> Result<ForkV1> {
    let raw_len = read_u8(data, pos, "fork prefix length")? as usize;
    let continuous = raw_len > PREFIX_MAX_SIZE;
    let prefix_len = if continuous { PREFIX_MAX_SIZE } else { raw_len };
    if prefix_len == 0 {
        return Err(Error::malformed("zero fork prefix length"));
    }
    let prefix_bytes = read_slice(data, pos, PREFIX_MAX_SIZE, "fork prefix")?;
    let prefix = prefix_bytes[..prefix_len].to_vec();

    let reference =
        Reference::from_slice(read_slice(data, pos, reference_len, "fork reference")?)?;

    let fork_metadata = if segments > 0 {
        deserialize_metadata(read_slice(
            data,
            pos,
            segments * SEGMENT_SIZE,
            "fork metadata slot",
        )?)
    } else {
        None
    };

    // the child stays a stub until loaded through storage
    let mut child = NodeV1::new(ZERO_OBFUSCATION_KEY);
    child.content_address = Some(reference);
    child.is_continuous_node = continuous;
    child.fork_metadata = fork_metadata;
    Ok(ForkV1::new(prefix, child))
}
