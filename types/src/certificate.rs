//! Block certificates and aggregated step votes.
//!
//! A certificate proves that a block reached quorum in both reduction
//! phases. [`StepVotes`] is the in-flight form used by consensus messages
//! (aggregate signature + committee-slot bitset); [`CertificateVotes`]
//! is the chain-level form carried on blocks, with the signer keys spelled
//! out so the certificate can be verified without re-deriving a committee
//! ordering.

use crate::encoding::{
    write_256, write_bls_signature, write_u32_le, write_varbytes, write_varint, EncodingError,
    Reader,
};
use crate::hash::BlockHash;
use crate::keys::{BlsPublicKey, BlsSignature};
use serde::{Deserialize, Serialize};

/// Aggregated votes for one reduction step.
///
/// `bitset` marks which committee slots contributed; a member owning
/// multiple slots sets all of them. An empty `StepVotes` (zero bitset or
/// zero hash) signals that the step ended without agreement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepVotes {
    pub step: u8,
    pub signature: BlsSignature,
    pub bitset: u64,
    pub block_hash: BlockHash,
}

impl StepVotes {
    /// The empty result of a step that timed out without quorum.
    pub fn empty(step: u8) -> Self {
        Self {
            step,
            signature: BlsSignature::ZERO,
            bitset: 0,
            block_hash: BlockHash::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bitset == 0 || self.block_hash.is_zero()
    }
}

/// One reduction phase of a certificate: the batched signature, the step
/// the phase terminated at, and the public keys behind the signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateVotes {
    pub signature: BlsSignature,
    pub step: u32,
    pub signers: Vec<BlsPublicKey>,
}

impl CertificateVotes {
    pub fn empty(step: u32) -> Self {
        Self {
            signature: BlsSignature::ZERO,
            step,
            signers: Vec::new(),
        }
    }
}

/// A block certificate: the outcome of both reduction phases plus the
/// block hash the committees agreed on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub first: CertificateVotes,
    pub second: CertificateVotes,
    /// The agreed block hash both phases voted for.
    pub hash: BlockHash,
}

impl Certificate {
    /// A consensus-compatible empty certificate, used for the genesis
    /// block and the first intermediate block before it is stamped.
    pub fn empty() -> Self {
        Self {
            first: CertificateVotes::empty(0),
            second: CertificateVotes::empty(0),
            hash: BlockHash::ZERO,
        }
    }

    /// Whether this is the placeholder certificate.
    pub fn is_empty(&self) -> bool {
        self.hash.is_zero() && self.first.signers.is_empty() && self.second.signers.is_empty()
    }

    /// Encode the certificate into `w`.
    pub fn encode(&self, w: &mut Vec<u8>) {
        for phase in [&self.first, &self.second] {
            write_bls_signature(w, &phase.signature);
            write_u32_le(w, phase.step);
            write_varint(w, phase.signers.len() as u64);
            for pk in &phase.signers {
                write_varbytes(w, pk.as_bytes());
            }
        }
        write_256(w, &self.hash);
    }

    /// Decode a certificate from `r`.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, EncodingError> {
        let first = Self::decode_votes(r)?;
        let second = Self::decode_votes(r)?;
        let hash = r.read_256()?;
        Ok(Self {
            first,
            second,
            hash,
        })
    }

    fn decode_votes(r: &mut Reader<'_>) -> Result<CertificateVotes, EncodingError> {
        let signature = r.read_bls_signature()?;
        let step = r.read_u32_le()?;
        let count = r.read_varint()?;
        // A committee never exceeds 64 slots.
        if count > 64 {
            return Err(EncodingError::LengthOutOfRange(count, 64));
        }
        let mut signers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let bytes = r.read_varbytes()?;
            let arr: [u8; 48] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| EncodingError::Invalid(format!("pubkey length {}", bytes.len())))?;
            signers.push(BlsPublicKey(arr));
        }
        Ok(CertificateVotes {
            signature,
            step,
            signers,
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
