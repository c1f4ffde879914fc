//! Selection: pick the best generator score for the round.
//!
//! Scores are collected over the whole phase window. A score counts only
//! if its proof verifies and its candidate block is actually known to the
//! candidate store. Ties on the score value break toward the
//! lexicographically greater block hash.

use std::time::Duration;

use opal_messages::{CallParams, Message, RoundUpdate, ScoreMessage, Topic};
use tokio::sync::{broadcast, mpsc};

use crate::error::ConsensusError;
use crate::generator::Prover;
use crate::queue::Queue;
use crate::round::{cancelled, classify, Emitter, MsgClass, Timeouts, SELECTION_STEP};

/// How long to wait for the candidate store when checking a score.
const CANDIDATE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Collect scores for the phase window and return the best one, if any.
pub async fn run(
    emitter: &Emitter,
    queue: &mut Queue,
    scores: &mut mpsc::Receiver<Message>,
    ru: &RoundUpdate,
    timeouts: &Timeouts,
    cancel: &mut broadcast::Receiver<()>,
    prover: &dyn Prover,
) -> Result<Option<ScoreMessage>, ConsensusError> {
    tracing::trace!(round = ru.round, "starting selection");
    let mut best: Option<ScoreMessage> = None;

    for msg in queue.drain(ru.round, SELECTION_STEP) {
        if let Message::Score(score) = msg {
            consider(emitter, prover, &mut best, score).await;
        }
    }

    let deadline = tokio::time::Instant::now() + timeouts.current();
    loop {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(ConsensusError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                if let Some(ref s) = best {
                    tracing::debug!(round = ru.round, hash = %s.header.block_hash, "selection winner");
                } else {
                    tracing::debug!(round = ru.round, "selection ended with no valid score");
                }
                return Ok(best);
            }
            received = scores.recv() => {
                let score = match received {
                    Some(Message::Score(score)) => score,
                    Some(_) => continue,
                    None => return Err(ConsensusError::Cancelled),
                };
                match classify(score.header.round, SELECTION_STEP, ru.round, SELECTION_STEP) {
                    MsgClass::Past => {}
                    MsgClass::Future => {
                        let round = score.header.round;
                        queue.put(round, SELECTION_STEP, Message::Score(score));
                    }
                    MsgClass::Current => consider(emitter, prover, &mut best, score).await,
                }
            }
        }
    }
}

/// Replace `best` if `score` verifies and outranks it.
async fn consider(
    emitter: &Emitter,
    prover: &dyn Prover,
    best: &mut Option<ScoreMessage>,
    score: ScoreMessage,
) {
    if !prover.verify_score(&score) {
        tracing::debug!(sender = %score.header.public_key, "score proof rejected");
        return;
    }

    // The candidate this score votes for has to exist.
    let lookup = emitter
        .rpc
        .call(
            Topic::GetCandidate,
            CallParams::GetCandidate(score.header.block_hash),
            CANDIDATE_LOOKUP_TIMEOUT,
        )
        .await;
    if let Err(e) = lookup {
        tracing::debug!(hash = %score.header.block_hash, error = %e, "candidate not found for score");
        return;
    }

    let outranks = match best {
        None => true,
        Some(current) => {
            score.score > current.score
                || (score.score == current.score
                    && score.header.block_hash > current.header.block_hash)
        }
    };
    if outranks {
        *best = Some(score);
    }
}
