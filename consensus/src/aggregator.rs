//! Per-step vote aggregation.
//!
//! Collects signed reduction votes for one `(round, step)`, weighting each
//! sender by its committee slot count, and seals itself on the first vote
//! that pushes any block hash to quorum.

use std::collections::{BTreeSet, HashMap};

use opal_crypto::bls;
use opal_messages::ReductionMessage;
use opal_types::{BlockHash, BlsSignature, StepVotes, VotingCommittee};

struct HashVotes {
    signature: BlsSignature,
    bitset: u64,
    weight: usize,
}

/// Vote collector for a single reduction step.
pub struct Aggregator {
    round: u64,
    step: u8,
    committee: VotingCommittee,
    quorum: usize,
    seen: BTreeSet<opal_types::BlsPublicKey>,
    votes: HashMap<BlockHash, HashVotes>,
    done: bool,
}

impl Aggregator {
    pub fn new(round: u64, step: u8, committee: VotingCommittee) -> Self {
        let quorum = committee.quorum();
        Self {
            round,
            step,
            committee,
            quorum,
            seen: BTreeSet::new(),
            votes: HashMap::new(),
            done: false,
        }
    }

    /// Collect one vote.
    ///
    /// Returns `Some(StepVotes)` on the first vote whose accumulated slot
    /// weight reaches quorum for its hash. Every later call returns `None`
    /// without mutating state. Votes from non-members, duplicate senders,
    /// or mismatched `(round, step)` are ignored.
    pub fn collect_vote(&mut self, msg: &ReductionMessage) -> Option<StepVotes> {
        if self.done {
            return None;
        }
        let header = &msg.header;
        if header.round != self.round || header.step != self.step {
            return None;
        }
        let sender = header.public_key;
        let weight = self.committee.weight(&sender);
        if weight == 0 {
            tracing::debug!(round = self.round, step = self.step, %sender, "vote from non-member");
            return None;
        }
        if !self.seen.insert(sender) {
            return None;
        }

        let entry = self
            .votes
            .entry(header.block_hash)
            .or_insert_with(|| HashVotes {
                signature: BlsSignature::ZERO,
                bitset: 0,
                weight: 0,
            });
        bls::aggregate_signatures(&mut entry.signature, &msg.signature);
        entry.bitset |= self.committee.bits(&sender);
        entry.weight += weight;

        if entry.weight >= self.quorum {
            self.done = true;
            return Some(StepVotes {
                step: self.step,
                signature: entry.signature,
                bitset: entry.bitset,
                block_hash: header.block_hash,
            });
        }
        None
    }

    /// Whether quorum has already been produced.
    pub fn is_done(&self) -> bool {
        self.done
    }
}
