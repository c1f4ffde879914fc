//! The running Opal node: wires chain, consensus, and networking
//! together over the event and RPC buses.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use opal_bus::{EventBus, RpcBus};
use opal_chain::{Chain, ChainStatus};
use opal_consensus::{
    moderator, Bid, Consensus, ConsensusInbox, Emitter, Generator, Prover,
};
use opal_crypto::bls;
use opal_messages::{Message, Topic, MAGIC_MAINNET, MAGIC_TESTNET};
use opal_network::{
    spawn_gossip_drain, spawn_peer_reader, ConnMgrConfig, ConnectionManager, ConnectionRegistry,
    VoucherClient,
};
use opal_nullables::{NullCandidateStore, NullExecutor, NullProver, NullWallet};
use rand::RngCore;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;
use crate::NodeError;

/// Interval for refreshing the status gauges.
const METRICS_REFRESH: Duration = Duration::from_secs(5);

/// A running Opal node.
pub struct Node {
    pub config: NodeConfig,
    pub bus: EventBus,
    pub rpc: RpcBus,
    pub metrics: Arc<NodeMetrics>,
    pub shutdown: Arc<ShutdownController>,
    status: ChainStatus,
    registry: Arc<RwLock<ConnectionRegistry>>,
    magic: u32,
    task_handles: Vec<JoinHandle<()>>,
}

impl Node {
    /// Create and initialize a new node: open storage, stand up the
    /// buses, and spawn the chain, consensus, generator, moderator, and
    /// gossip tasks. Call [`start`](Self::start) to open the listen port
    /// and discover peers.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let bus = EventBus::new();
        let rpc = RpcBus::new();
        let shutdown = Arc::new(ShutdownController::new());
        let metrics = Arc::new(NodeMetrics::new());
        let mut task_handles = Vec::new();

        let db = opal_store::open_driver(
            &config.database.driver,
            Path::new(&config.database.dir),
        )?;

        // External collaborators run as nullables until real services
        // are attached: wallet, candidate store, executor, prover.
        task_handles.push(NullWallet::spawn(&rpc)?);
        let candidate_store = NullCandidateStore::new();
        task_handles.push(candidate_store.spawn(&rpc)?);
        let executor = Arc::new(NullExecutor::new());
        let prover: Arc<dyn Prover> = Arc::new(NullProver::new());

        // Node identity. A transient key per run; production deployments
        // load it from provisioned key material.
        let keys = Arc::new(bls::generate_keys());
        tracing::info!(public_key = %keys.public, "node consensus identity");

        // Chain driver.
        let chain = Chain::new(
            bus.clone(),
            rpc.clone(),
            db,
            executor,
            config.genesis.legacy,
        )?;
        let status = chain.status();
        task_handles.push(tokio::spawn(chain.listen(shutdown.subscribe())));

        // Consensus loop.
        let emitter = Emitter::new(bus.clone(), rpc.clone(), Arc::clone(&keys));
        task_handles.push(spawn_consensus_loop(
            bus.clone(),
            emitter.clone(),
            Arc::clone(&prover),
            Duration::from_millis(config.consensus.default_timeout_ms),
            shutdown.subscribe(),
            Arc::clone(&metrics),
        ));

        // Score generator, when configured to bid.
        task_handles.push(spawn_generator(
            bus.clone(),
            emitter,
            Arc::clone(&prover),
            config.consensus.generate,
            shutdown.subscribe(),
        ));

        // Reputation moderator.
        task_handles.push(moderator::spawn(bus.clone(), shutdown.subscribe()));

        // Gossip drain to the peer sockets.
        let magic = if config.is_testnet() {
            MAGIC_TESTNET
        } else {
            MAGIC_MAINNET
        };
        let registry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        task_handles.push(spawn_gossip_drain(
            bus.clone(),
            magic,
            Arc::clone(&registry),
        ));

        // Gauges.
        task_handles.push(spawn_metrics_updater(
            bus.clone(),
            status.clone(),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            shutdown.subscribe(),
        ));

        Ok(Self {
            config,
            bus,
            rpc,
            metrics,
            shutdown,
            status,
            registry,
            magic,
            task_handles,
        })
    }

    /// Open the listen port, discover peers through the voucher seeder,
    /// and kick off the first round.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let handler = peer_handler(self.bus.clone(), self.magic, Arc::clone(&self.registry));
        let mgr = ConnectionManager::new(ConnMgrConfig {
            port: self.config.port()?,
            on_accept: Arc::clone(&handler),
            on_conn: handler,
        });
        self.task_handles.push(mgr.listen().await?);

        let voucher = VoucherClient::new(
            self.config.network.seeder.addresses.clone(),
            self.config.network.seeder.fixed.clone(),
            self.config.is_testnet(),
            self.config.network.port.clone(),
        );
        match voucher.discover_peers().await {
            Ok(peers) => {
                tracing::info!(count = peers.len(), "voucher seeder returned peers");
                for peer in peers {
                    if let Err(e) = mgr.connect(&peer).await {
                        tracing::warn!(%peer, error = %e, "could not connect to peer");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "peer discovery failed, running isolated");
            }
        }

        // The chain answers with the first round update.
        self.bus.publish(Topic::Initialization, Message::Initialization);
        Ok(())
    }

    /// Read handle onto chain progress (tip height, sync percentage).
    pub fn status(&self) -> ChainStatus {
        self.status.clone()
    }

    /// Run until an OS signal arrives, then shut every task down.
    pub async fn run(mut self) -> Result<(), NodeError> {
        self.start().await?;
        self.shutdown.wait_for_signal().await;
        for handle in &self.task_handles {
            handle.abort();
        }
        Ok(())
    }
}

fn peer_handler(
    bus: EventBus,
    magic: u32,
    registry: Arc<RwLock<ConnectionRegistry>>,
) -> opal_network::connmgr::ConnHandler {
    Arc::new(move |stream: TcpStream, addr| {
        let bus = bus.clone();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let peer_id = addr.to_string();
            let (read_half, write_half) = stream.into_split();
            {
                let mut reg = registry.write().await;
                reg.insert(peer_id.clone(), write_half);
            }
            spawn_peer_reader(peer_id, read_half, magic, bus, registry);
        });
    })
}

fn spawn_consensus_loop(
    bus: EventBus,
    emitter: Emitter,
    prover: Arc<dyn Prover>,
    base_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
    metrics: Arc<NodeMetrics>,
) -> JoinHandle<()> {
    let mut inbox = ConsensusInbox::subscribe(&bus);
    let (_, mut rounds) = bus.subscribe(Topic::RoundUpdate);
    let (_, mut stops) = bus.subscribe(Topic::StopConsensus);
    let (cancel_tx, _) = broadcast::channel(4);

    // Stop-consensus relays into the round cancellation token.
    let relay = cancel_tx.clone();
    let stop_task = tokio::spawn(async move {
        while stops.recv().await.is_some() {
            tracing::debug!("stop-consensus received, cancelling round");
            let _ = relay.send(());
        }
    });

    tokio::spawn(async move {
        let mut consensus = Consensus::new(emitter, prover, base_timeout);
        loop {
            let mut ru = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    stop_task.abort();
                    tracing::info!("consensus loop shutting down");
                    return;
                }
                msg = rounds.recv() => match msg {
                    Some(Message::RoundUpdate(ru)) => ru,
                    Some(_) => continue,
                    None => return,
                },
            };

            // Collapse a backlog of round updates to the newest one.
            while let Ok(msg) = rounds.try_recv() {
                if let Message::RoundUpdate(newer) = msg {
                    if newer.round > ru.round {
                        ru = newer;
                    }
                }
            }

            metrics.rounds_started.inc();
            let mut cancel_rx = cancel_tx.subscribe();
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    stop_task.abort();
                    return;
                }
                outcome = consensus.spin(&ru, &mut inbox, &mut cancel_rx) => {
                    tracing::debug!(round = ru.round, ?outcome, "round finished");
                }
            }
        }
    })
}

fn spawn_generator(
    bus: EventBus,
    emitter: Emitter,
    prover: Arc<dyn Prover>,
    generate: bool,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let (_, mut rounds) = bus.subscribe(Topic::RoundUpdate);
    let bid = if generate {
        let mut d = [0u8; 32];
        let mut k = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut d);
        rand::rngs::OsRng.fill_bytes(&mut k);
        Some(Bid { d, k })
    } else {
        None
    };
    let generator = Generator::new(emitter, bid, prover);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return,
                msg = rounds.recv() => match msg {
                    Some(Message::RoundUpdate(ru)) => generator.on_round_update(&ru),
                    Some(_) => {}
                    None => return,
                },
            }
        }
    })
}

fn spawn_metrics_updater(
    bus: EventBus,
    status: ChainStatus,
    registry: Arc<RwLock<ConnectionRegistry>>,
    metrics: Arc<NodeMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let (_, mut accepted) = bus.subscribe(Topic::AcceptedBlock);
    let (_, mut certificates) = bus.subscribe(Topic::Certificate);

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(METRICS_REFRESH);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return,
                Some(_) = accepted.recv() => {
                    metrics.blocks_accepted.inc();
                    metrics.tip_height.set(status.tip_height().await as i64);
                }
                Some(_) = certificates.recv() => {
                    metrics.certificates_received.inc();
                }
                _ = tick.tick() => {
                    metrics.tip_height.set(status.tip_height().await as i64);
                    metrics.highest_seen.set(status.highest_seen().await as i64);
                    let peers = registry.read().await.len();
                    metrics.peer_count.set(peers as i64);
                }
            }
        }
    })
}
