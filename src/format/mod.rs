//! Wire formats for manifest nodes: v0.2 (legacy) and v1.0 (current)
//!
//! Both formats share a 63-byte plaintext-key + version-tag prelude:
//!
//! ```text
//! 0    32  obfuscation key (stored in the clear, keys the rest)
//! 32   31  version tag = keccak256("mantaray:" + version)[..31]
//! 63   ..  format-specific, XOR-obfuscated with the key
//! ```
//!
//! Codecs live in [`v0`] and [`v1`]; this module holds the version tag
//! registry and the advancing-cursor read helpers both codecs share.

use crate::bytes::{version_tag, OBFUSCATION_KEY_SIZE, VERSION_TAG_SIZE};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;

pub mod v0;
pub mod v1;

/// Offset at which XOR obfuscation (and the version tag) begins
pub const OBFUSCATION_OFFSET: usize = OBFUSCATION_KEY_SIZE;

/// Size of the shared node header: key + version tag + one flag/size byte
pub const NODE_HEADER_SIZE: usize = OBFUSCATION_KEY_SIZE + VERSION_TAG_SIZE + 1;

/// Version tag for the v0.2 format
pub static VERSION_TAG_0_2: Lazy<[u8; VERSION_TAG_SIZE]> = Lazy::new(|| version_tag("0.2"));

/// Version tag for the v1.0 format
pub static VERSION_TAG_1_0: Lazy<[u8; VERSION_TAG_SIZE]> = Lazy::new(|| version_tag("1.0"));

/// Supported wire format versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormatVersion {
    /// Legacy format, 30-byte prefix ceiling, fork-level metadata framed by
    /// a 2-byte big-endian length
    V0_2,
    /// Current format, 31-byte prefix ceiling, continuous nodes, fixed
    /// fork-metadata slots and node-level metadata
    #[default]
    V1_0,
}

impl FormatVersion {
    /// The version string hashed into the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatVersion::V0_2 => "0.2",
            FormatVersion::V1_0 => "1.0",
        }
    }

    /// The 31-byte wire tag for this version
    pub fn tag(&self) -> &'static [u8; VERSION_TAG_SIZE] {
        match self {
            FormatVersion::V0_2 => &VERSION_TAG_0_2,
            FormatVersion::V1_0 => &VERSION_TAG_1_0,
        }
    }

    /// Match a de-obfuscated tag against the supported versions
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        if tag == VERSION_TAG_0_2.as_slice() {
            Some(FormatVersion::V0_2)
        } else if tag == VERSION_TAG_1_0.as_slice() {
            Some(FormatVersion::V1_0)
        } else {
            None
        }
    }
}

/// Detect the format version of a serialized node without parsing it.
///
/// The tag sits inside the obfuscated region, so it is de-XORed against the
/// plaintext key prefix before matching.
pub fn peek_version(data: &[u8]) -> Result<FormatVersion> {
    ensure_len(data, 0, OBFUSCATION_KEY_SIZE + VERSION_TAG_SIZE, "node header")?;
    let key = &data[..OBFUSCATION_KEY_SIZE];
    let mut tag = [0u8; VERSION_TAG_SIZE];
    for (i, byte) in tag.iter_mut().enumerate() {
        *byte = data[OBFUSCATION_OFFSET + i] ^ key[i];
    }
    FormatVersion::from_tag(&tag)
        .ok_or_else(|| Error::malformed("unsupported version tag"))
}

// ============================================================================
// Cursor helpers
// ============================================================================

/// Check that `data[pos..pos+need]` is within bounds.
#[inline]
pub(crate) fn ensure_len(data: &[u8], pos: usize, need: usize, ctx: &str) -> Result<()> {
    if pos + need > data.len() {
        Err(Error::Malformed(format!(
            "truncated at {ctx} (need {need} bytes at offset {pos}, have {})",
            data.len()
        )))
    } else {
        Ok(())
    }
}

/// Read a u8 at `pos`, advancing.
#[inline]
pub(crate) fn read_u8(data: &[u8], pos: &mut usize, ctx: &str) -> Result<u8> {
    ensure_len(data, *pos, 1, ctx)?;
    let v = data[*pos];
    *pos += 1;
    Ok(v)
}

/// Read `len` bytes at `pos`, advancing.
#[inline]
pub(crate) fn read_slice<'a>(
    data: &'a [u8],
    pos: &mut usize,
    len: usize,
    ctx: &str,
) -> Result<&'a [u8]> {
    ensure_len(data, *pos, len, ctx)?;
    let slice = &data[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::xor_keystream;

    #[test]
    fn version_detection_plain_key() {
        let mut data = vec![0u8; 80];
        data[OBFUSCATION_OFFSET..OBFUSCATION_OFFSET + VERSION_TAG_SIZE]
            .copy_from_slice(VERSION_TAG_1_0.as_slice());
        assert_eq!(peek_version(&data).unwrap(), FormatVersion::V1_0);
    }

    #[test]
    fn version_detection_under_obfuscation() {
        let key: [u8; 32] = crate::bytes::keccak256(&[b"key"]);
        let mut data = vec![0u8; 80];
        data[..32].copy_from_slice(&key);
        data[OBFUSCATION_OFFSET..OBFUSCATION_OFFSET + VERSION_TAG_SIZE]
            .copy_from_slice(VERSION_TAG_0_2.as_slice());
        xor_keystream(&key, &mut data[OBFUSCATION_OFFSET..]);

        assert_eq!(peek_version(&data).unwrap(), FormatVersion::V0_2);
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let data = vec![0xaau8; 80];
        assert!(matches!(peek_version(&data), Err(Error::Malformed(_))));
    }

    #[test]
    fn short_buffer_is_malformed() {
        assert!(matches!(peek_version(&[0u8; 10]), Err(Error::Malformed(_))));
    }
}
