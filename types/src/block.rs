//! Blocks and headers.
//!
//! The header hash covers version, height, timestamp, previous hash, seed,
//! and transaction root; the certificate is attached after consensus and is
//! deliberately excluded from the hashable encoding.

use crate::certificate::Certificate;
use crate::encoding::{
    write_256, write_bls_signature, write_i64_le, write_u64_le, write_u8, write_varbytes,
    write_varint, EncodingError, Reader,
};
use crate::hash::{merkle_root, BlockHash};
use crate::keys::BlsSignature;
use serde::{Deserialize, Serialize};

/// Upper bound on transactions per block accepted by the decoder.
const MAX_BLOCK_TXS: u64 = 10_000;

/// Current block format version.
pub const BLOCK_VERSION: u8 = 0;

/// A transaction carried by a block. The payload format is owned by the
/// state-transition executor; the chain only hashes and transports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn hash(&self) -> BlockHash {
        BlockHash::compute(&self.payload)
    }
}

/// A block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u8,
    pub height: u64,
    pub timestamp: i64,
    pub prev_block_hash: BlockHash,
    /// BLS signature of the previous seed; drives sortition for this round.
    pub seed: BlsSignature,
    pub tx_root: BlockHash,
    pub certificate: Certificate,
    pub hash: BlockHash,
}

impl Header {
    /// Encode the fields covered by the block hash.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 8 + 8 + 32 + 48 + 32);
        write_u8(&mut buf, self.version);
        write_u64_le(&mut buf, self.height);
        write_i64_le(&mut buf, self.timestamp);
        write_256(&mut buf, &self.prev_block_hash);
        write_bls_signature(&mut buf, &self.seed);
        write_256(&mut buf, &self.tx_root);
        buf
    }

    pub fn compute_hash(&self) -> BlockHash {
        BlockHash::compute(&self.hashable_bytes())
    }
}

/// A block: header plus ordered transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, txs: Vec<Transaction>) -> Self {
        Self { header, txs }
    }

    /// Merkle root over the transaction hashes.
    pub fn compute_tx_root(&self) -> BlockHash {
        let leaves: Vec<BlockHash> = self.txs.iter().map(Transaction::hash).collect();
        merkle_root(&leaves)
    }

    /// Recompute `tx_root` and `hash` after the block contents settle.
    pub fn seal(&mut self) {
        self.header.tx_root = self.compute_tx_root();
        self.header.hash = self.header.compute_hash();
    }

    /// Encode the block for the wire.
    pub fn encode(&self, w: &mut Vec<u8>) {
        let h = &self.header;
        write_u8(w, h.version);
        write_u64_le(w, h.height);
        write_i64_le(w, h.timestamp);
        write_256(w, &h.prev_block_hash);
        write_bls_signature(w, &h.seed);
        write_256(w, &h.tx_root);
        h.certificate.encode(w);
        write_256(w, &h.hash);
        write_varint(w, self.txs.len() as u64);
        for tx in &self.txs {
            write_varbytes(w, &tx.payload);
        }
    }

    /// Decode a block from `r`.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, EncodingError> {
        let version = r.read_u8()?;
        let height = r.read_u64_le()?;
        let timestamp = r.read_i64_le()?;
        let prev_block_hash = r.read_256()?;
        let seed = r.read_bls_signature()?;
        let tx_root = r.read_256()?;
        let certificate = Certificate::decode(r)?;
        let hash = r.read_256()?;
        let tx_count = r.read_varint()?;
        if tx_count > MAX_BLOCK_TXS {
            return Err(EncodingError::LengthOutOfRange(tx_count, MAX_BLOCK_TXS));
        }
        let mut txs = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            txs.push(Transaction::new(r.read_varbytes()?));
        }
        Ok(Self {
            header: Header {
                version,
                height,
                timestamp,
                prev_block_hash,
                seed,
                tx_root,
                certificate,
                hash,
            },
            txs,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut r = Reader::new(bytes);
        Self::decode(&mut r)
    }
}
