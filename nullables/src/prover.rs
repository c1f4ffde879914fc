//! Deterministic score prover.

use opal_consensus::{Bid, Prover, ScoreProof};
use opal_messages::ScoreMessage;
use opal_types::BlockHash;

/// A prover whose "proof" is a hash commitment over its inputs.
///
/// Scores are uniform over the hash space, so independent nodes produce
/// distinct, comparable scores; verification recomputes the commitment.
#[derive(Default)]
pub struct NullProver;

impl NullProver {
    pub fn new() -> Self {
        Self
    }

    fn commitment(seed: &[u8], round: u64, d: &[u8; 32]) -> BlockHash {
        let mut input = Vec::with_capacity(seed.len() + 8 + 32);
        input.extend_from_slice(seed);
        input.extend_from_slice(&round.to_le_bytes());
        input.extend_from_slice(d);
        BlockHash::compute(&input)
    }
}

impl Prover for NullProver {
    fn generate_score(&self, seed: &[u8], round: u64, bid: &Bid) -> Result<ScoreProof, String> {
        let score = Self::commitment(seed, round, &bid.d);
        Ok(ScoreProof {
            score,
            proof: score.as_bytes().to_vec(),
            bid_subset: bid.k.to_vec(),
        })
    }

    fn verify_score(&self, msg: &ScoreMessage) -> bool {
        // The proof blob must restate the score commitment.
        msg.proof.as_slice() == msg.score.as_bytes()
    }
}
