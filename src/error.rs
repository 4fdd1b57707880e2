//! Error types for the mantaray crate

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type
///
/// Every public operation surfaces one of these to its caller; nothing is
/// swallowed on the way up. Variants carry enough context (path, offset, or
/// field name) to localize the fault.
#[derive(Error, Debug)]
pub enum Error {
    /// A path argument was required but empty
    #[error("Empty path")]
    EmptyPath,

    /// Navigation missed a fork key or a fork prefix
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reference length is not 32 (plain) or 64 (encrypted)
    #[error("Invalid reference length: {0} (expected 32 or 64)")]
    InvalidReference(usize),

    /// Metadata is not a string-keyed object, or fails to parse at load time
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Serialized metadata exceeds its fixed slot
    #[error("Metadata overflow: {need} bytes exceed {slot}-byte slot")]
    MetadataOverflow { need: usize, slot: usize },

    /// Truncated buffer, bad version tag, or inconsistent flag/length data
    #[error("Malformed node data: {0}")]
    Malformed(String),

    /// A new descendant needs a fresh obfuscation key but no source was given
    #[error("Obfuscation key source required: {0}")]
    MissingKeySource(String),

    /// Save attempted on a dirty node with neither an entry nor any forks
    #[error("Nothing to serialize: {0}")]
    DirtyWithoutPayload(String),

    /// A fork child has no content address (its subtree was never saved)
    #[error("Fork node has no content address: {0}")]
    MissingContentAddress(String),

    /// Node mismatch found by structural equality
    #[error("Nodes differ: {0}")]
    Mismatch(String),

    /// Propagated from the chunk storage backend unchanged
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON encoding error (serde_json)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a not-found error from the path bytes being navigated
    pub fn not_found(path: &[u8]) -> Self {
        Error::NotFound(display_path(path))
    }

    /// Create a malformed-format error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    /// Create an invalid-metadata error
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Error::InvalidMetadata(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a mismatch error
    pub fn mismatch(msg: impl Into<String>) -> Self {
        Error::Mismatch(msg.into())
    }
}

/// Render path bytes for diagnostics: UTF-8 where possible, hex otherwise.
pub(crate) fn display_path(path: &[u8]) -> String {
    match std::str::from_utf8(path) {
        Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
        _ => format!("0x{}", hex::encode(path)),
    }
}
