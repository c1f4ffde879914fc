//! Fundamental types for the Opal protocol.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: hashes, BLS key material, blocks and headers, certificates,
//! and the little-endian wire encoding primitives the consensus payloads
//! are built from.

pub mod block;
pub mod certificate;
pub mod encoding;
pub mod hash;
pub mod keys;
pub mod provisioners;

pub use block::{Block, Header, Transaction, BLOCK_VERSION};
pub use certificate::{Certificate, CertificateVotes, StepVotes};
pub use encoding::{EncodingError, Reader};
pub use hash::{merkle_root, BlockHash};
pub use keys::{BlsKeyPair, BlsPublicKey, BlsSecretKey, BlsSignature};
pub use provisioners::{
    Provisioner, ProvisionerError, Provisioners, VotingCommittee, MAX_COMMITTEE_SIZE,
};
