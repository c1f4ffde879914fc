//! The chain driver event loop.
//!
//! Owns the tip, the intermediate block, the last certificate, and the
//! provisioner registry. Certificates from consensus finalize the
//! intermediate block; blocks from peers advance the tip during sync;
//! read queries are answered over the RPC bus from the same loop that
//! does the writes, so there is a single serialization order for all of
//! them.

use std::sync::Arc;
use std::time::Duration;

use opal_bus::{rpc_bus::Request, EventBus, RpcBus};
use opal_messages::{
    CallParams, CallResponse, CandidateMessage, CertificateMessage, InvMessage, Message,
    RoundUpdate, Topic,
};
use opal_store::ChainDb;
use opal_types::{Block, BlsPublicKey, Certificate, Provisioners, Transaction};
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::genesis;
use crate::sync::Synchronizer;
use crate::verifiers;
use crate::ChainError;

/// Timeout for the candidate lookup after a certificate arrives.
const CANDIDATE_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for a round-results catch-up request.
const ROUND_RESULTS_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for the wallet-clear call during a rebuild.
const WALLET_CLEAR_TIMEOUT: Duration = Duration::from_secs(1);
/// Capacity of the certificate and round-results channels; sized for
/// bursts rather than the default subscriber capacity.
const CRITICAL_CHANNEL_CAPACITY: usize = 100;

/// The state-transition executor (the VM) is an external collaborator.
pub trait Executor: Send + Sync {
    /// Execute the transactions of an accepted block, returning the
    /// updated provisioner set.
    fn execute_state_transition(
        &self,
        txs: &[Transaction],
        height: u64,
        provisioners: &Provisioners,
    ) -> Result<Provisioners, String>;

    /// Validate a candidate's transactions without committing anything.
    fn validate_state_transition(&self, txs: &[Transaction], height: u64) -> Result<(), String>;
}

struct StatusInner {
    tip_height: u64,
    highest_seen: u64,
}

/// Cheap read handle onto chain progress, for the control plane.
#[derive(Clone)]
pub struct ChainStatus {
    inner: Arc<RwLock<StatusInner>>,
}

impl ChainStatus {
    pub async fn tip_height(&self) -> u64 {
        self.inner.read().await.tip_height
    }

    pub async fn highest_seen(&self) -> u64 {
        self.inner.read().await.highest_seen
    }

    /// Sync progress as a percentage in `[0, 100]`.
    pub async fn sync_progress(&self) -> f32 {
        let inner = self.inner.read().await;
        if inner.highest_seen == 0 {
            return 0.0;
        }
        let pct = (inner.tip_height as f64 / inner.highest_seen as f64) * 100.0;
        pct.min(100.0) as f32
    }
}

struct Channels {
    certificates: mpsc::Receiver<Message>,
    blocks: mpsc::Receiver<Message>,
    highest: mpsc::Receiver<Message>,
    init: mpsc::Receiver<Message>,
    round_results_req: mpsc::Receiver<Message>,
    removals: mpsc::Receiver<Message>,
    get_last_block: mpsc::Receiver<Request>,
    get_last_certificate: mpsc::Receiver<Request>,
    verify_candidate: mpsc::Receiver<Request>,
}

/// The chain driver.
pub struct Chain {
    bus: EventBus,
    rpc: RpcBus,
    db: Arc<dyn ChainDb>,
    executor: Arc<dyn Executor>,

    provisioners: Provisioners,
    prev_block: Block,
    intermediate_block: Option<Block>,
    last_certificate: Certificate,
    last_committee: Vec<BlsPublicKey>,
    sync: Synchronizer,

    status: ChainStatus,
    channels: Option<Channels>,
}

impl Chain {
    /// Build the chain: load (or seed) the tip, install the first
    /// intermediate block when starting from genesis, and hook up every
    /// topic and RPC registration.
    pub fn new(
        bus: EventBus,
        rpc: RpcBus,
        db: Arc<dyn ChainDb>,
        executor: Arc<dyn Executor>,
        legacy_genesis: bool,
    ) -> Result<Self, ChainError> {
        let tip = match db.load_tip()? {
            Some(tip) => tip,
            None => {
                let genesis = genesis::genesis_block();
                db.append(&genesis)?;
                tracing::info!(hash = %genesis.header.hash, "seeded genesis block");
                genesis
            }
        };

        let mut provisioners = Provisioners::new();
        let (intermediate_block, last_certificate) = if tip.header.height == 0 {
            if legacy_genesis {
                genesis::legacy_bootstrap(&mut provisioners)?;
            }
            (
                Some(genesis::first_intermediate_block(&tip.header)),
                Certificate::empty(),
            )
        } else {
            // Mid-chain restart: round results are requested once the
            // node knows where the network is.
            (None, Certificate::empty())
        };

        let channels = Channels {
            certificates: bus
                .subscribe_with_capacity(Topic::Certificate, CRITICAL_CHANNEL_CAPACITY)
                .1,
            blocks: bus.subscribe(Topic::Block).1,
            highest: bus.subscribe(Topic::HighestSeen).1,
            init: bus.subscribe(Topic::Initialization).1,
            round_results_req: bus.subscribe(Topic::GetRoundResults).1,
            removals: bus.subscribe(Topic::RemoveProvisioner).1,
            get_last_block: rpc.register(Topic::GetLastBlock)?,
            get_last_certificate: rpc.register(Topic::GetLastCertificate)?,
            verify_candidate: rpc.register(Topic::VerifyCandidateBlock)?,
        };

        let status = ChainStatus {
            inner: Arc::new(RwLock::new(StatusInner {
                tip_height: tip.header.height,
                highest_seen: 0,
            })),
        };

        Ok(Self {
            bus,
            rpc,
            db,
            executor,
            provisioners,
            prev_block: tip,
            intermediate_block,
            last_certificate,
            last_committee: Vec::new(),
            sync: Synchronizer::new(),
            status,
            channels: Some(channels),
        })
    }

    /// Read handle for the control plane.
    pub fn status(&self) -> ChainStatus {
        self.status.clone()
    }

    /// Run the event loop until shutdown.
    pub async fn listen(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ch = self.channels.take().expect("listen is called once");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("chain driver shutting down");
                    return;
                }
                Some(msg) = ch.certificates.recv() => {
                    if let Message::Certificate(cert) = msg {
                        self.handle_certificate(cert).await;
                    }
                }
                Some(msg) = ch.blocks.recv() => {
                    if let Message::Block(blk) = msg {
                        self.on_network_block(*blk).await;
                    }
                }
                Some(msg) = ch.highest.recv() => {
                    if let Message::HighestSeen(height) = msg {
                        self.sync.record_highest(height);
                        self.update_status().await;
                    }
                }
                Some(_) = ch.init.recv() => {
                    self.send_round_update();
                }
                Some(msg) = ch.round_results_req.recv() => {
                    if let Message::GetRoundResults(round) = msg {
                        self.serve_round_results(round);
                    }
                }
                Some(msg) = ch.removals.recv() => {
                    if let Message::RemoveProvisioner(pk) = msg {
                        match self.provisioners.remove(&pk) {
                            Ok(()) => tracing::info!(provisioner = %pk, "provisioner removed"),
                            Err(e) => tracing::debug!(provisioner = %pk, error = %e, "removal skipped"),
                        }
                    }
                }
                Some(req) = ch.get_last_block.recv() => {
                    let block = Box::new(self.prev_block.clone());
                    let _ = req.response.send(Ok(CallResponse::Block(block)));
                }
                Some(req) = ch.get_last_certificate.recv() => {
                    let reply = if self.last_certificate.is_empty() {
                        Err("no last certificate present".to_string())
                    } else {
                        Ok(CallResponse::Certificate(Box::new(
                            self.last_certificate.clone(),
                        )))
                    };
                    let _ = req.response.send(reply);
                }
                Some(req) = ch.verify_candidate.recv() => {
                    let reply = self.verify_candidate(&req.params);
                    let _ = req.response.send(reply);
                }
            }
        }
    }

    /// Accept a block:
    /// sanity check → certificate check → state transition → append
    /// (the commit point) → advertise → notify. Nothing is mutated when
    /// any step fails.
    pub async fn accept_block(&mut self, blk: Block) -> Result<(), ChainError> {
        let height = blk.header.height;
        tracing::trace!(height, "verifying block");
        verifiers::sanity_check_block(&self.prev_block, &blk)?;

        tracing::trace!(height, "verifying block certificate");
        verifiers::check_block_certificate(&self.provisioners, &blk)?;

        tracing::debug!(height, "executing state transition");
        let provisioners = self
            .executor
            .execute_state_transition(&blk.txs, height, &self.provisioners)
            .map_err(ChainError::Executor)?;

        tracing::trace!(height, "storing block");
        self.db.append(&blk)?;

        self.provisioners = provisioners;
        self.prev_block = blk.clone();
        self.sync.on_accepted_block();
        self.update_status().await;

        tracing::trace!(height, "advertising block");
        self.bus.publish(
            Topic::Gossip,
            Message::Inv(InvMessage {
                blocks: vec![blk.header.hash],
            }),
        );

        self.bus
            .publish(Topic::AcceptedBlock, Message::AcceptedBlock(Box::new(blk)));

        tracing::info!(height, "block accepted");
        Ok(())
    }

    /// A certificate from agreement: finalize the intermediate block,
    /// promote the winning candidate, and restart consensus.
    async fn handle_certificate(&mut self, msg: CertificateMessage) {
        self.last_certificate = msg.certificate.clone();
        self.last_committee = msg.signers.clone();

        // Fetch the winning candidate; on failure the node falls back to
        // catching up through normal sync.
        let candidate = match self
            .rpc
            .call(
                Topic::GetCandidate,
                CallParams::GetCandidate(msg.block_hash),
                CANDIDATE_TIMEOUT,
            )
            .await
        {
            Ok(CallResponse::Candidate(cm)) => *cm,
            Ok(other) => {
                tracing::error!(hash = %msg.block_hash, ?other, "unexpected candidate response");
                return;
            }
            Err(e) => {
                tracing::error!(hash = %msg.block_hash, error = %e, "could not find winning candidate block");
                return;
            }
        };

        let Some(intermediate) = self.intermediate_block.clone() else {
            tracing::warn!("intermediate block is missing");
            return;
        };

        let mut finalized = intermediate;
        finalized.header.certificate = msg.certificate.clone();
        if let Err(e) = self.accept_block(finalized).await {
            tracing::error!(error = %e, "could not accept intermediate block");
            return;
        }

        self.intermediate_block = Some(candidate.block.clone());
        self.bus.publish(
            Topic::IntermediateBlock,
            Message::IntermediateBlock(Box::new(candidate.block)),
        );
        self.send_round_update();
    }

    /// A block gossiped by a peer: accept it if it directly extends the
    /// tip, then re-seed consensus with the round results once caught up.
    async fn on_network_block(&mut self, blk: Block) {
        let height = blk.header.height;
        let tip = self.prev_block.header.height;
        if height <= tip {
            tracing::trace!(height, tip, "ignoring stale block");
            return;
        }
        self.sync.record_highest(height);

        if height != tip + 1 {
            self.sync.start_sync(tip, height);
            self.update_status().await;
            tracing::debug!(height, tip, "behind the network, waiting for earlier blocks");
            return;
        }

        self.bus.publish(Topic::StopConsensus, Message::StopConsensus);
        if let Err(e) = self.accept_block(blk).await {
            tracing::debug!(error = %e, "could not accept network block");
            return;
        }

        if !self.sync.is_syncing() {
            let round = self.prev_block.header.height + 1;
            match self.request_round_results(round).await {
                Ok((block, certificate)) => {
                    self.intermediate_block = Some(block);
                    self.last_certificate = certificate;
                    self.send_round_update();
                }
                Err(e) => {
                    tracing::debug!(round, error = %e, "round results unavailable, catching up later");
                }
            }
        }
    }

    /// Ask the network for the intermediate block and certificate of
    /// `round`, accepting the first well-formed response within five
    /// seconds.
    pub async fn request_round_results(
        &mut self,
        round: u64,
    ) -> Result<(Block, Certificate), ChainError> {
        let (sub_id, mut responses) = self
            .bus
            .subscribe_with_capacity(Topic::RoundResults, CRITICAL_CHANNEL_CAPACITY);
        self.bus
            .publish(Topic::Gossip, Message::GetRoundResults(round));

        let deadline = tokio::time::Instant::now() + ROUND_RESULTS_TIMEOUT;
        let result = loop {
            let received = match tokio::time::timeout_at(deadline, responses.recv()).await {
                Err(_) => break Err(ChainError::RoundResultsTimeout),
                Ok(None) => break Err(ChainError::Other("round results channel closed".into())),
                Ok(Some(msg)) => msg,
            };
            let Message::RoundResults(cm) = received else {
                continue;
            };

            if let Err(e) = verifiers::sanity_check_block(&self.prev_block, &cm.block) {
                tracing::debug!(error = %e, "round results block failed sanity check");
                continue;
            }
            if let Err(e) = self
                .executor
                .validate_state_transition(&cm.block.txs, cm.block.header.height)
            {
                tracing::debug!(error = %e, "round results block failed state validation");
                continue;
            }
            // The certificate decided this block; its committees are
            // seeded by our current tip.
            if let Err(e) = verifiers::check_certificate(
                &self.provisioners,
                &self.prev_block.header.seed,
                cm.block.header.height,
                &cm.certificate,
            ) {
                tracing::debug!(error = %e, "round results certificate invalid");
                continue;
            }

            break Ok((cm.block, cm.certificate));
        };

        self.bus.unsubscribe(Topic::RoundResults, sub_id);
        result
    }

    /// Serve a peer's round-results request for our intermediate round.
    fn serve_round_results(&self, round: u64) {
        let Some(ref intermediate) = self.intermediate_block else {
            return;
        };
        if self.last_certificate.is_empty() || intermediate.header.height != round {
            return;
        }
        self.bus.publish(
            Topic::Gossip,
            Message::RoundResults(CandidateMessage {
                block: intermediate.clone(),
                certificate: self.last_certificate.clone(),
            }),
        );
    }

    /// Wipe storage and restart from genesis. Errors past the clear are
    /// unrecoverable and abort the process.
    pub async fn rebuild_chain(&mut self) -> Result<String, ChainError> {
        self.bus.publish(Topic::StopConsensus, Message::StopConsensus);

        self.db.clear()?;

        // Beyond this point a failure leaves the node without a usable
        // state, which is answered by a panic.
        let genesis = genesis::genesis_block();
        if let Err(e) = self.db.append(&genesis) {
            panic!("rebuild: failed to reseed genesis: {e}");
        }
        let tip = match self.db.load_tip() {
            Ok(Some(tip)) => tip,
            Ok(None) => panic!("rebuild: tip missing after genesis reseed"),
            Err(e) => panic!("rebuild: tip load failed: {e}"),
        };

        self.prev_block = tip;
        self.provisioners = Provisioners::new();
        self.intermediate_block = Some(genesis::first_intermediate_block(
            &self.prev_block.header,
        ));
        self.last_certificate = Certificate::empty();
        self.last_committee.clear();
        self.sync = Synchronizer::new();
        self.update_status().await;

        if let Err(e) = self
            .rpc
            .call(
                Topic::ClearWalletDatabase,
                CallParams::ClearWalletDatabase,
                WALLET_CLEAR_TIMEOUT,
            )
            .await
        {
            panic!("rebuild: wallet database clear failed: {e}");
        }

        Ok("Blockchain deleted. Syncing from scratch...".to_string())
    }

    /// Publish the round update that re-seeds consensus.
    fn send_round_update(&self) {
        let Some(ref intermediate) = self.intermediate_block else {
            tracing::debug!("no intermediate block, round update withheld");
            return;
        };
        let header = &intermediate.header;
        let ru = RoundUpdate {
            round: header.height + 1,
            hash: header.hash,
            seed: header.seed,
            provisioners: self.provisioners.clone(),
        };
        tracing::debug!(round = ru.round, "sending round update");
        self.bus
            .publish(Topic::RoundUpdate, Message::RoundUpdate(ru));
    }

    fn verify_candidate(&self, params: &CallParams) -> Result<CallResponse, String> {
        let CallParams::VerifyCandidateBlock(cm) = params else {
            return Err("unexpected parameters".to_string());
        };
        let Some(ref intermediate) = self.intermediate_block else {
            return Err("no intermediate block hash known".to_string());
        };
        verifiers::sanity_check_block(intermediate, &cm.block).map_err(|e| e.to_string())?;
        self.executor
            .validate_state_transition(&cm.block.txs, cm.block.header.height)
            .map_err(|e| format!("block contains invalid transactions: {e}"))?;
        Ok(CallResponse::Empty)
    }

    async fn update_status(&self) {
        let mut inner = self.status.inner.write().await;
        inner.tip_height = self.prev_block.header.height;
        inner.highest_seen = self.sync.highest_seen();
    }

    // Test and wiring accessors.

    pub fn tip(&self) -> &Block {
        &self.prev_block
    }

    pub fn intermediate_block(&self) -> Option<&Block> {
        self.intermediate_block.as_ref()
    }

    pub fn provisioners(&self) -> &Provisioners {
        &self.provisioners
    }

    pub fn last_committee(&self) -> &[BlsPublicKey] {
        &self.last_committee
    }
}
