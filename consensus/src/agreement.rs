//! Agreement collection and certificate assembly.
//!
//! Agreements are keyed by `(round, agreed block hash)` and weighted by
//! the sender's slots in the committee of the step the agreement was sent
//! at. The first hash to reach quorum yields a [`CertificateMessage`] with
//! the signer set and the absentee list for the reputation moderator.

use std::collections::{BTreeSet, HashMap};

use opal_crypto::bls;
use opal_messages::{
    AgreementMessage, CertificateMessage, ConsensusHeader, Message, RoundUpdate, Topic,
};
use opal_types::{
    BlockHash, BlsPublicKey, Certificate, CertificateVotes, Provisioners, StepVotes,
    VotingCommittee,
};
use tokio::sync::{broadcast, mpsc};

use crate::committee::CommitteeCache;
use crate::error::ConsensusError;
use crate::queue::Queue;
use crate::round::{cancelled, Emitter, Timeouts, AGREEMENT_STEP};

struct Entry {
    weight: usize,
    signers: Vec<BlsPublicKey>,
}

/// Accumulates agreement messages for one round.
pub struct AgreementCollector {
    round: u64,
    seen: BTreeSet<BlsPublicKey>,
    entries: HashMap<BlockHash, Entry>,
    done: bool,
}

impl AgreementCollector {
    pub fn new(round: u64) -> Self {
        Self {
            round,
            seen: BTreeSet::new(),
            entries: HashMap::new(),
            done: false,
        }
    }

    /// Collect one agreement. Returns the certificate message on the first
    /// hash reaching quorum; the collector is sealed afterwards.
    pub fn collect(
        &mut self,
        msg: &AgreementMessage,
        cache: &mut CommitteeCache,
        provisioners: &Provisioners,
    ) -> Option<CertificateMessage> {
        if self.done || msg.header.round != self.round {
            return None;
        }

        let committee = cache.committee(provisioners, msg.header.step).clone();
        let sender = msg.header.public_key;
        let weight = committee.weight(&sender);
        if weight == 0 {
            tracing::debug!(round = self.round, %sender, "agreement from non-member");
            return None;
        }
        if !bls::verify(&sender, &msg.header.signable_bytes(), &msg.signature) {
            tracing::warn!(round = self.round, %sender, "agreement with bad signature");
            return None;
        }
        if !self.votes_are_valid(msg, cache, provisioners) {
            tracing::warn!(round = self.round, %sender, "agreement with invalid step votes");
            return None;
        }
        if !self.seen.insert(sender) {
            return None;
        }

        let entry = self
            .entries
            .entry(msg.header.block_hash)
            .or_insert_with(|| Entry {
                weight: 0,
                signers: Vec::new(),
            });
        entry.weight += weight;
        entry.signers.push(sender);

        if entry.weight >= committee.quorum() {
            self.done = true;
            let certificate = build_certificate(msg, cache, provisioners);
            let signers = entry.signers.clone();
            let absentees: Vec<BlsPublicKey> = committee
                .members()
                .into_iter()
                .filter(|pk| !self.seen.contains(pk))
                .collect();
            return Some(CertificateMessage {
                round: self.round,
                block_hash: msg.header.block_hash,
                certificate,
                signers,
                absentees,
            });
        }
        None
    }

    /// Both embedded step-vote bundles must be non-empty, aggregate-valid,
    /// and carry enough slot votes for their own committees.
    fn votes_are_valid(
        &self,
        msg: &AgreementMessage,
        cache: &mut CommitteeCache,
        provisioners: &Provisioners,
    ) -> bool {
        msg.votes_per_step.iter().all(|votes| {
            !votes.is_empty() && {
                let committee = cache.committee(provisioners, votes.step).clone();
                verify_step_votes(votes, &committee, self.round)
            }
        })
    }
}

/// Verify one aggregated step-vote bundle against its committee: the
/// bitset must cover quorum slots and the aggregate signature must match
/// the bitset members.
pub fn verify_step_votes(votes: &StepVotes, committee: &VotingCommittee, round: u64) -> bool {
    if (votes.bitset.count_ones() as usize) < committee.quorum() {
        return false;
    }
    let signers = committee.members_in_bitset(votes.bitset);
    let header = ConsensusHeader {
        round,
        step: votes.step,
        public_key: BlsPublicKey::ZERO,
        block_hash: votes.block_hash,
    };
    bls::verify_aggregate(&signers, &header.signable_bytes(), &votes.signature)
}

fn build_certificate(
    msg: &AgreementMessage,
    cache: &mut CommitteeCache,
    provisioners: &Provisioners,
) -> Certificate {
    let [first, second] = &msg.votes_per_step;
    let first_signers = cache
        .committee(provisioners, first.step)
        .members_in_bitset(first.bitset);
    let second_signers = cache
        .committee(provisioners, second.step)
        .members_in_bitset(second.bitset);

    Certificate {
        first: CertificateVotes {
            signature: first.signature,
            step: first.step as u32,
            signers: first_signers,
        },
        second: CertificateVotes {
            signature: second.signature,
            step: second.step as u32,
            signers: second_signers,
        },
        hash: msg.header.block_hash,
    }
}

/// Run agreement collection for the round's remaining budget.
pub async fn run(
    emitter: &Emitter,
    queue: &mut Queue,
    agreements: &mut mpsc::Receiver<Message>,
    ru: &RoundUpdate,
    cache: &mut CommitteeCache,
    timeouts: &Timeouts,
    cancel: &mut broadcast::Receiver<()>,
) -> Result<Option<CertificateMessage>, ConsensusError> {
    tracing::trace!(round = ru.round, "collecting agreements");
    let mut collector = AgreementCollector::new(ru.round);

    for msg in queue.drain(ru.round, AGREEMENT_STEP) {
        if let Message::Agreement(agreement) = msg {
            if let Some(cert) = collector.collect(&agreement, cache, &ru.provisioners) {
                emit(emitter, &cert);
                return Ok(Some(cert));
            }
        }
    }

    let deadline = tokio::time::Instant::now() + timeouts.current();
    loop {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(ConsensusError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!(round = ru.round, "agreement budget exhausted");
                return Ok(None);
            }
            received = agreements.recv() => {
                let agreement = match received {
                    Some(Message::Agreement(agreement)) => agreement,
                    Some(_) => continue,
                    None => return Err(ConsensusError::Cancelled),
                };
                if agreement.header.round < ru.round {
                    continue;
                }
                if agreement.header.round > ru.round {
                    let round = agreement.header.round;
                    queue.put(round, AGREEMENT_STEP, Message::Agreement(agreement));
                    continue;
                }
                if let Some(cert) = collector.collect(&agreement, cache, &ru.provisioners) {
                    emit(emitter, &cert);
                    return Ok(Some(cert));
                }
            }
        }
    }
}

fn emit(emitter: &Emitter, cert: &CertificateMessage) {
    tracing::info!(round = cert.round, hash = %cert.block_hash, "agreement quorum reached");
    emitter
        .bus
        .publish(Topic::Certificate, Message::Certificate(cert.clone()));
    if !cert.absentees.is_empty() {
        emitter
            .bus
            .publish(Topic::Absentees, Message::Absentees(cert.absentees.clone()));
    }
}
