//! SHA-2 helpers.

use sha2::{Digest, Sha256, Sha384};

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-384 digest (the 48-byte size matches BLS key and signature widths).
pub fn sha384(data: &[u8]) -> [u8; 48] {
    Sha384::digest(data).into()
}
