use opal_types::BlsPublicKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid signature from {0}")]
    InvalidSignature(BlsPublicKey),

    #[error("{0} is not a committee member for round {1} step {2}")]
    NotCommitteeMember(BlsPublicKey, u64, u8),

    #[error("message for past round {got} (current {current})")]
    PastRound { got: u64, current: u64 },

    #[error("score proof rejected")]
    InvalidScoreProof,

    #[error("prover failure: {0}")]
    Prover(String),

    #[error("round cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}
