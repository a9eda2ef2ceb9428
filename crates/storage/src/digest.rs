//! Digest validation.
//!
//! Digests double as object names in content-addressed stores, so anything
//! that isn't plain lowercase hex is refused before it gets near a path.

use crate::error::{ErrorKind, Result};

/// Longest accepted digest (a 512-bit hash in hex).
const MAX_LEN: usize = 128;

/// Validates a digest for use as an object name.
///
/// # Examples
///
/// ```
/// use isolate_storage::validate_digest;
/// assert!(validate_digest("0123456789abcdef").is_ok());
/// assert!(validate_digest("").is_err());
/// assert!(validate_digest("../etc/passwd").is_err());
/// assert!(validate_digest("ABCDEF").is_err());
/// ```
pub fn validate(digest: &str) -> Result<&str> {
    let valid = !digest.is_empty()
        && digest.len() <= MAX_LEN
        && digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    match valid {
        true => Ok(digest),
        false => exn::bail!(ErrorKind::InvalidDigest(digest.to_string())),
    }
}

/// Hex digest of `data`, as stores compute it to verify what they receive.
pub fn of(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
