//! Score generation for block generators holding a bid.
//!
//! The zero-knowledge score proof system is an external collaborator
//! behind the [`Prover`] trait. On every round update a bidding node asks
//! the prover for a proof, assembles a `Score` message, and hands it to
//! the gossip drain. A prover failure skips the round; other generators'
//! scores still arrive.

use opal_messages::{ConsensusHeader, Message, RoundUpdate, ScoreMessage};
use rand::RngCore;

use crate::round::{Emitter, SELECTION_STEP};

/// A blind bid: the secrets a generator committed on-chain.
#[derive(Clone, Debug)]
pub struct Bid {
    pub d: [u8; 32],
    pub k: [u8; 32],
}

/// Output of the external score prover.
#[derive(Clone, Debug)]
pub struct ScoreProof {
    /// 32-byte big-endian score value.
    pub score: opal_types::BlockHash,
    /// The proof blob.
    pub proof: Vec<u8>,
    /// Fingerprint of the bid-list subset the proof ranges over.
    pub bid_subset: Vec<u8>,
}

/// The external score proof system.
pub trait Prover: Send + Sync {
    /// Produce a score proof for `(seed, round, bid)`.
    fn generate_score(&self, seed: &[u8], round: u64, bid: &Bid) -> Result<ScoreProof, String>;

    /// Check the proof carried by a score message.
    fn verify_score(&self, msg: &ScoreMessage) -> bool;
}

/// Produces and gossips this node's score each round.
pub struct Generator {
    emitter: Emitter,
    bid: Option<Bid>,
    prover: std::sync::Arc<dyn Prover>,
}

impl Generator {
    pub fn new(emitter: Emitter, bid: Option<Bid>, prover: std::sync::Arc<dyn Prover>) -> Self {
        Self {
            emitter,
            bid,
            prover,
        }
    }

    /// Generate and gossip a score for the new round. No-op without a bid;
    /// logs and skips on prover failure.
    pub fn on_round_update(&self, ru: &RoundUpdate) {
        let Some(ref bid) = self.bid else {
            return;
        };

        let mut seed = vec![0u8; 33];
        rand::rngs::OsRng.fill_bytes(&mut seed);

        let proof = match self.prover.generate_score(&seed, ru.round, bid) {
            Ok(proof) => proof,
            Err(e) => {
                tracing::warn!(round = ru.round, error = %e, "score proof generation failed, skipping round");
                return;
            }
        };

        // The vote hash stands in for the candidate block produced by the
        // (external) block generator; the candidate store answers
        // GetCandidate for it.
        let mut vote_input = Vec::with_capacity(8 + 48);
        vote_input.extend_from_slice(&ru.round.to_le_bytes());
        vote_input.extend_from_slice(self.emitter.public_key().as_bytes());
        let candidate_hash = opal_types::BlockHash::compute(&vote_input);

        let msg = ScoreMessage {
            header: ConsensusHeader {
                round: ru.round,
                step: SELECTION_STEP,
                public_key: self.emitter.public_key(),
                block_hash: candidate_hash,
            },
            score: proof.score,
            proof: proof.proof,
            bid_subset: proof.bid_subset,
            seed,
        };

        tracing::debug!(round = ru.round, score = %msg.score, "gossiping score");
        self.emitter.gossip(Message::Score(msg));
    }
}
