//! The two reduction phases.
//!
//! A committee member opens the step by gossiping its own signed vote on
//! the phase subject (the selection winner for the first step, the first
//! step's output for the second), then aggregates incoming votes until
//! quorum or timeout. The second step additionally gossips an agreement
//! when both bundles are non-empty.

use opal_crypto::bls;
use opal_messages::{
    AgreementMessage, ConsensusHeader, Message, ReductionMessage, RoundUpdate,
};
use opal_types::{BlockHash, StepVotes};
use tokio::sync::{broadcast, mpsc};

use crate::aggregator::Aggregator;
use crate::committee::CommitteeCache;
use crate::error::ConsensusError;
use crate::queue::Queue;
use crate::round::{
    cancelled, classify, Emitter, MsgClass, Timeouts, FIRST_REDUCTION_STEP, SECOND_REDUCTION_STEP,
};

/// Gossip this node's signed vote for `(round, step)` on `hash`.
pub fn send_reduction(emitter: &Emitter, round: u64, step: u8, hash: BlockHash) {
    let header = ConsensusHeader {
        round,
        step,
        public_key: emitter.public_key(),
        block_hash: hash,
    };
    let signature = emitter.sign_header(&header);
    emitter.gossip(Message::Reduction(ReductionMessage { header, signature }));
}

/// Check the BLS signature on a reduction vote.
pub fn verify_reduction(msg: &ReductionMessage) -> bool {
    bls::verify(
        &msg.header.public_key,
        &msg.header.signable_bytes(),
        &msg.signature,
    )
}

/// First reduction: vote on the selection winner.
#[allow(clippy::too_many_arguments)]
pub async fn run_first(
    emitter: &Emitter,
    queue: &mut Queue,
    reductions: &mut mpsc::Receiver<Message>,
    ru: &RoundUpdate,
    cache: &mut CommitteeCache,
    timeouts: &mut Timeouts,
    cancel: &mut broadcast::Receiver<()>,
    candidate: BlockHash,
) -> Result<StepVotes, ConsensusError> {
    run_step(
        emitter,
        queue,
        reductions,
        ru,
        cache,
        timeouts,
        cancel,
        FIRST_REDUCTION_STEP,
        candidate,
    )
    .await
}

/// Second reduction: vote on the first step's output and, on success,
/// gossip the agreement bundling both step votes.
#[allow(clippy::too_many_arguments)]
pub async fn run_second(
    emitter: &Emitter,
    queue: &mut Queue,
    reductions: &mut mpsc::Receiver<Message>,
    ru: &RoundUpdate,
    cache: &mut CommitteeCache,
    timeouts: &mut Timeouts,
    cancel: &mut broadcast::Receiver<()>,
    first: &StepVotes,
) -> Result<StepVotes, ConsensusError> {
    let subject = if first.is_empty() {
        BlockHash::ZERO
    } else {
        first.block_hash
    };

    let second = run_step(
        emitter,
        queue,
        reductions,
        ru,
        cache,
        timeouts,
        cancel,
        SECOND_REDUCTION_STEP,
        subject,
    )
    .await?;

    if !first.is_empty() && !second.is_empty() {
        let committee = cache.committee(&ru.provisioners, SECOND_REDUCTION_STEP);
        if committee.is_member(&emitter.public_key()) {
            send_agreement(emitter, ru.round, first, &second);
        }
    }

    Ok(second)
}

fn send_agreement(emitter: &Emitter, round: u64, first: &StepVotes, second: &StepVotes) {
    let header = ConsensusHeader {
        round,
        step: SECOND_REDUCTION_STEP,
        public_key: emitter.public_key(),
        block_hash: second.block_hash,
    };
    let signature = emitter.sign_header(&header);
    tracing::debug!(round, hash = %header.block_hash, "gossiping agreement");
    emitter.gossip(Message::Agreement(AgreementMessage {
        header,
        signature,
        votes_per_step: [*first, *second],
    }));
}

#[allow(clippy::too_many_arguments)]
async fn run_step(
    emitter: &Emitter,
    queue: &mut Queue,
    reductions: &mut mpsc::Receiver<Message>,
    ru: &RoundUpdate,
    cache: &mut CommitteeCache,
    timeouts: &mut Timeouts,
    cancel: &mut broadcast::Receiver<()>,
    step: u8,
    subject: BlockHash,
) -> Result<StepVotes, ConsensusError> {
    tracing::trace!(round = ru.round, step, "starting reduction");
    let committee = cache.committee(&ru.provisioners, step).clone();

    if committee.is_member(&emitter.public_key()) {
        send_reduction(emitter, ru.round, step, subject);
    }

    let mut aggregator = Aggregator::new(ru.round, step, committee);

    // Votes that arrived before this phase started.
    for msg in queue.drain(ru.round, step) {
        if let Message::Reduction(vote) = msg {
            if !verify_reduction(&vote) {
                tracing::warn!(sender = %vote.header.public_key, "queued vote with bad signature");
                continue;
            }
            if let Some(votes) = aggregator.collect_vote(&vote) {
                return Ok(votes);
            }
        }
    }

    let deadline = tokio::time::Instant::now() + timeouts.current();
    loop {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(ConsensusError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!(round = ru.round, step, "reduction timed out without quorum");
                timeouts.increase();
                return Ok(StepVotes::empty(step));
            }
            received = reductions.recv() => {
                let vote = match received {
                    Some(Message::Reduction(vote)) => vote,
                    Some(_) => continue,
                    None => return Err(ConsensusError::Cancelled),
                };
                match classify(vote.header.round, vote.header.step, ru.round, step) {
                    MsgClass::Past => {}
                    MsgClass::Future => {
                        let (round, step) = (vote.header.round, vote.header.step);
                        queue.put(round, step, Message::Reduction(vote));
                    }
                    MsgClass::Current => {
                        if !verify_reduction(&vote) {
                            tracing::warn!(sender = %vote.header.public_key, "vote with bad signature");
                            continue;
                        }
                        if let Some(votes) = aggregator.collect_vote(&vote) {
                            return Ok(votes);
                        }
                    }
                }
            }
        }
    }
}
