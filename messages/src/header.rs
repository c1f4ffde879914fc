//! The consensus message header shared by score, reduction, and agreement
//! messages.

use opal_types::encoding::{
    write_256, write_bls_pubkey, write_u64_le, write_u8, EncodingError, Reader,
};
use opal_types::{BlockHash, BlsPublicKey};

/// Identifies the `(round, step)` a consensus message belongs to, the
/// sender, and the block hash it speaks about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusHeader {
    pub round: u64,
    pub step: u8,
    pub public_key: BlsPublicKey,
    pub block_hash: BlockHash,
}

impl ConsensusHeader {
    /// The bytes a committee member signs: round, step, and block hash.
    /// The sender key is carried alongside the signature, not under it.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 1 + 32);
        write_u64_le(&mut buf, self.round);
        write_u8(&mut buf, self.step);
        write_256(&mut buf, &self.block_hash);
        buf
    }

    pub fn encode(&self, w: &mut Vec<u8>) {
        write_u64_le(w, self.round);
        write_u8(w, self.step);
        write_bls_pubkey(w, &self.public_key);
        write_256(w, &self.block_hash);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            round: r.read_u64_le()?,
            step: r.read_u8()?,
            public_key: r.read_bls_pubkey()?,
            block_hash: r.read_256()?,
        })
    }
}

/// Access to the embedded header, shared across the message variants.
pub trait ConsensusMsg {
    fn header(&self) -> &ConsensusHeader;

    fn sender(&self) -> &BlsPublicKey {
        &self.header().public_key
    }
}
