//! JSON metadata model and the fixed-slot codec
//!
//! Metadata is a string-keyed JSON object. It stays an opaque byte view at
//! the format boundary and a parsed map in the model; equality compares the
//! parsed maps, never the raw bytes, so key-order stability is whatever the
//! JSON encoder provides.
//!
//! On the wire, v1.0 fork metadata occupies a fixed slot of
//! `segments * 32` bytes padded with ASCII spaces (0x20); the padding is
//! valid JSON whitespace, so a padded slot trims back to the original
//! document.

use crate::error::{Error, Result};

/// String-keyed JSON metadata mapping
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Size of one metadata slot segment in bytes
pub const SEGMENT_SIZE: usize = 32;

/// Maximum fork metadata slot size in segments (5-bit field)
pub const MAX_SEGMENTS: usize = 31;

/// Slot padding byte (ASCII space)
const PAD_BYTE: u8 = 0x20;

/// Encode metadata as UTF-8 JSON.
pub fn serialize_metadata(metadata: &Metadata) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(metadata)?)
}

/// Number of 32-byte segments needed to hold the serialized metadata.
pub fn segments_needed(metadata: &Metadata) -> Result<usize> {
    let encoded = serialize_metadata(metadata)?;
    Ok(encoded.len().div_ceil(SEGMENT_SIZE))
}

/// Encode metadata into a fixed slot of `segments * 32` bytes.
///
/// An absent mapping fills the slot entirely with 0x20. Fails with
/// [`Error::MetadataOverflow`] when the JSON does not fit.
pub fn pad_in_segments(metadata: Option<&Metadata>, segments: usize) -> Result<Vec<u8>> {
    let slot = segments * SEGMENT_SIZE;
    let mut out = match metadata {
        None => Vec::new(),
        Some(metadata) => serialize_metadata(metadata)?,
    };
    if out.len() > slot {
        return Err(Error::MetadataOverflow {
            need: out.len(),
            slot,
        });
    }
    out.resize(slot, PAD_BYTE);
    Ok(out)
}

/// Decode a metadata slot: trim trailing 0x20 padding and JSON-parse.
///
/// Returns `None` for an empty slot or any parse failure; a slot that does
/// not hold a string-keyed object holds no metadata.
pub fn deserialize_metadata(bytes: &[u8]) -> Option<Metadata> {
    let end = bytes
        .iter()
        .rposition(|&b| b != PAD_BYTE)
        .map(|i| i + 1)
        .unwrap_or(0);
    let trimmed = &bytes[..end];
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_slice(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("mime".into(), json!("text/plain"));
        metadata
    }

    #[test]
    fn absent_metadata_fills_slot_with_spaces() {
        let slot = pad_in_segments(None, 2).unwrap();
        assert_eq!(slot.len(), 64);
        assert!(slot.iter().all(|&b| b == 0x20));
        assert_eq!(deserialize_metadata(&slot), None);
    }

    #[test]
    fn padded_slot_roundtrips() {
        let metadata = sample();
        let segments = segments_needed(&metadata).unwrap();
        let slot = pad_in_segments(Some(&metadata), segments).unwrap();
        assert_eq!(slot.len(), segments * SEGMENT_SIZE);
        assert_eq!(deserialize_metadata(&slot), Some(metadata));
    }

    #[test]
    fn overflow_is_rejected() {
        let mut metadata = Metadata::new();
        metadata.insert("k".into(), json!("x".repeat(60)));
        let err = pad_in_segments(Some(&metadata), 1).unwrap_err();
        assert!(matches!(
            err,
            Error::MetadataOverflow { need, slot: 32 } if need > 32
        ));
    }

    #[test]
    fn garbage_decodes_as_none() {
        assert_eq!(deserialize_metadata(b"not json   "), None);
        assert_eq!(deserialize_metadata(b"[1,2,3]"), None); // not an object
        assert_eq!(deserialize_metadata(b""), None);
    }
}
