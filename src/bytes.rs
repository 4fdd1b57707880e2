//! Byte-level utilities shared by both wire formats
//!
//! Keccak-256 hashing, the 31-byte version tags, the XOR obfuscation
//! keystream, and longest-common-prefix scanning for radix splits.

use sha3::{Digest, Keccak256};

/// Size of a node obfuscation key in bytes
pub const OBFUSCATION_KEY_SIZE: usize = 32;

/// Size of the truncated version tag in bytes
pub const VERSION_TAG_SIZE: usize = 31;

/// The all-zero obfuscation key, which disables XOR obfuscation
pub const ZERO_OBFUSCATION_KEY: [u8; OBFUSCATION_KEY_SIZE] = [0u8; OBFUSCATION_KEY_SIZE];

/// Compute keccak-256 over the concatenation of `parts`.
pub fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// First 31 bytes of `keccak256("mantaray:" + version)`.
///
/// Truncation to 31 bytes (not 32) is part of the wire format: the tag sits
/// between the 32-byte obfuscation key and the single flag/size byte so that
/// the fixed header is exactly 64 bytes.
pub fn version_tag(version: &str) -> [u8; VERSION_TAG_SIZE] {
    let digest = keccak256(&[b"mantaray:", version.as_bytes()]);
    let mut tag = [0u8; VERSION_TAG_SIZE];
    tag.copy_from_slice(&digest[..VERSION_TAG_SIZE]);
    tag
}

/// XOR `data` in place with `key`, cycling the key from the start of the
/// slice.
///
/// The all-zero key is a no-op, which is how obfuscation is disabled.
/// Applying the keystream twice restores the input. Callers hand in the node
/// payload starting right after the plaintext obfuscation key prefix.
pub fn xor_keystream(key: &[u8; OBFUSCATION_KEY_SIZE], data: &mut [u8]) {
    if key == &ZERO_OBFUSCATION_KEY {
        return;
    }
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % OBFUSCATION_KEY_SIZE];
    }
}

/// Length of the maximal leading byte run equal in both slices.
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// The maximal leading byte run equal in both slices.
pub fn longest_common_prefix<'a>(a: &'a [u8], b: &[u8]) -> &'a [u8] {
    &a[..common_prefix_len(a, b)]
}

/// True when every byte is zero (used for zero-sentinel reference slots).
pub fn is_all_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}
