//! The round state machine.
//!
//! A round is a fixed chain of phases: selection (step 1), first reduction
//! (step 2), second reduction (step 3), and agreement collection (step 4).
//! Each phase returns its product to the trampoline in [`Consensus::spin`]
//! rather than invoking the next phase itself, so cancellation and timeout
//! accounting happen at every boundary.

use std::sync::Arc;
use std::time::Duration;

use opal_bus::{EventBus, RpcBus};
use opal_crypto::bls;
use opal_messages::{
    CertificateMessage, ConsensusHeader, Message, RoundUpdate, Topic,
};
use opal_types::{BlockHash, BlsKeyPair, BlsPublicKey, BlsSignature};
use tokio::sync::{broadcast, mpsc};

use crate::generator::Prover;
use crate::queue::Queue;
use crate::{agreement, committee::CommitteeCache, reduction, selection};

pub const SELECTION_STEP: u8 = 1;
pub const FIRST_REDUCTION_STEP: u8 = 2;
pub const SECOND_REDUCTION_STEP: u8 = 3;
pub const AGREEMENT_STEP: u8 = 4;

/// Hard ceiling on any phase timeout.
const MAX_PHASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-round phase timeout with doubling on failure.
#[derive(Clone, Debug)]
pub struct Timeouts {
    current: Duration,
}

impl Timeouts {
    pub fn new(base: Duration) -> Self {
        Self {
            current: base.min(MAX_PHASE_TIMEOUT),
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the timeout, capped at sixty seconds.
    pub fn increase(&mut self) {
        self.current = (self.current * 2).min(MAX_PHASE_TIMEOUT);
    }
}

/// Shared handles every phase needs: the buses and the node keys.
#[derive(Clone)]
pub struct Emitter {
    pub bus: EventBus,
    pub rpc: RpcBus,
    keys: Arc<BlsKeyPair>,
}

impl Emitter {
    pub fn new(bus: EventBus, rpc: RpcBus, keys: Arc<BlsKeyPair>) -> Self {
        Self { bus, rpc, keys }
    }

    pub fn public_key(&self) -> BlsPublicKey {
        self.keys.public
    }

    pub fn sign_header(&self, header: &ConsensusHeader) -> BlsSignature {
        bls::sign(&self.keys, &header.signable_bytes())
    }

    /// Hand a message to the gossip drain and loop it back locally, so the
    /// sender collects its own vote like any other committee member's.
    pub fn gossip(&self, msg: Message) {
        self.bus.publish(Topic::Gossip, msg.clone());
        self.bus.publish(msg.topic(), msg);
    }
}

/// Where an incoming message falls relative to the running phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MsgClass {
    Past,
    Current,
    Future,
}

pub(crate) fn classify(round: u64, step: u8, current_round: u64, current_step: u8) -> MsgClass {
    if round < current_round {
        return MsgClass::Past;
    }
    if round > current_round {
        return MsgClass::Future;
    }
    if step < current_step {
        MsgClass::Past
    } else if step > current_step {
        MsgClass::Future
    } else {
        MsgClass::Current
    }
}

/// Long-lived subscriptions feeding the round phases. Subscribing once at
/// startup keeps messages that arrive between rounds buffered instead of
/// lost.
pub struct ConsensusInbox {
    pub scores: mpsc::Receiver<Message>,
    pub reductions: mpsc::Receiver<Message>,
    pub agreements: mpsc::Receiver<Message>,
}

impl ConsensusInbox {
    pub fn subscribe(bus: &EventBus) -> Self {
        let (_, scores) = bus.subscribe(Topic::Score);
        let (_, reductions) = bus.subscribe(Topic::Reduction);
        let (_, agreements) = bus.subscribe(Topic::Agreement);
        Self {
            scores,
            reductions,
            agreements,
        }
    }
}

/// How a round ended.
#[derive(Debug)]
pub enum RoundOutcome {
    /// The round ran to completion; a certificate was produced if any
    /// block hash reached agreement quorum in time.
    Completed(Option<CertificateMessage>),
    /// The round was cancelled (stop-consensus or shutdown).
    Cancelled,
}

/// The consensus engine: holds what survives across rounds (timeouts and
/// the out-of-order queue) and drives one round at a time.
pub struct Consensus {
    emitter: Emitter,
    prover: Arc<dyn Prover>,
    timeouts: Timeouts,
    queue: Queue,
}

impl Consensus {
    pub fn new(emitter: Emitter, prover: Arc<dyn Prover>, base_timeout: Duration) -> Self {
        Self {
            emitter,
            prover,
            timeouts: Timeouts::new(base_timeout),
            queue: Queue::new(),
        }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Run one full round against the given round update.
    pub async fn spin(
        &mut self,
        ru: &RoundUpdate,
        inbox: &mut ConsensusInbox,
        cancel: &mut broadcast::Receiver<()>,
    ) -> RoundOutcome {
        tracing::debug!(round = ru.round, "starting consensus round");
        self.queue.drop_before(ru.round);
        let mut cache = CommitteeCache::new(ru);

        // Step 1: selection.
        let best = match selection::run(
            &self.emitter,
            &mut self.queue,
            &mut inbox.scores,
            ru,
            &self.timeouts,
            cancel,
            self.prover.as_ref(),
        )
        .await
        {
            Ok(best) => best,
            Err(_) => return RoundOutcome::Cancelled,
        };

        let candidate = best
            .as_ref()
            .map(|s| s.header.block_hash)
            .unwrap_or(BlockHash::ZERO);

        // Step 2: first reduction on the selection winner.
        let first = match reduction::run_first(
            &self.emitter,
            &mut self.queue,
            &mut inbox.reductions,
            ru,
            &mut cache,
            &mut self.timeouts,
            cancel,
            candidate,
        )
        .await
        {
            Ok(votes) => votes,
            Err(_) => return RoundOutcome::Cancelled,
        };

        // Step 3: second reduction on the first step's output; on quorum
        // the phase gossips an agreement carrying both bundles.
        let _second = match reduction::run_second(
            &self.emitter,
            &mut self.queue,
            &mut inbox.reductions,
            ru,
            &mut cache,
            &mut self.timeouts,
            cancel,
            &first,
        )
        .await
        {
            Ok(votes) => votes,
            Err(_) => return RoundOutcome::Cancelled,
        };

        // Step 4: agreement collection for the round's remaining budget.
        match agreement::run(
            &self.emitter,
            &mut self.queue,
            &mut inbox.agreements,
            ru,
            &mut cache,
            &self.timeouts,
            cancel,
        )
        .await
        {
            Ok(cert) => RoundOutcome::Completed(cert),
            Err(_) => RoundOutcome::Cancelled,
        }
    }
}

/// Await cancellation. Completes when the stop signal fires or the
/// controller goes away.
pub(crate) async fn cancelled(cancel: &mut broadcast::Receiver<()>) {
    // Lagging is as good as a delivery here: the signal fired.
    let _ = cancel.recv().await;
}
