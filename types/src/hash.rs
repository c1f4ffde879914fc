//! 32-byte hash type used for blocks, transaction roots, and vote subjects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(data);
        Self(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Merkle root over `leaves`, pairing with SHA-256 and duplicating the
/// last node on odd levels. An empty leaf set yields the zero hash.
pub fn merkle_root(leaves: &[BlockHash]) -> BlockHash {
    if leaves.is_empty() {
        return BlockHash::ZERO;
    }
    let mut level: Vec<BlockHash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_bytes());
            buf[32..].copy_from_slice(right.as_bytes());
            next.push(BlockHash::compute(&buf));
        }
        level = next;
    }
    level[0]
}

impl Default for BlockHash {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
