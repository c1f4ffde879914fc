//! Parameter and response payloads for RPC-bus calls.

use opal_types::{Block, BlockHash, Certificate};

use crate::CandidateMessage;

/// Parameters of a synchronous call on the RPC bus.
#[derive(Clone, Debug)]
pub enum CallParams {
    /// Fetch a candidate block by hash.
    GetCandidate(BlockHash),
    /// Fetch the chain tip.
    GetLastBlock,
    /// Fetch the most recent certificate.
    GetLastCertificate,
    /// Verify a candidate block against the intermediate block.
    VerifyCandidateBlock(Box<CandidateMessage>),
    /// Ask the wallet to clear its database (chain rebuild).
    ClearWalletDatabase,
}

/// Response of a synchronous call on the RPC bus.
#[derive(Clone, Debug)]
pub enum CallResponse {
    Candidate(Box<CandidateMessage>),
    Block(Box<Block>),
    Certificate(Box<Certificate>),
    Empty,
}
