//! Candidate store stand-in.
//!
//! The real candidate store belongs to the block generator / mempool
//! surface. This one fabricates a deterministic candidate for any
//! requested hash, which is enough for selection's existence check and
//! for certificate handling in dev runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use opal_bus::RpcBus;
use opal_messages::{CallParams, CallResponse, CandidateMessage, Topic};
use opal_types::{
    Block, BlockHash, BlsSignature, Certificate, Header, BLOCK_VERSION,
};

/// Serves `GetCandidate` from an in-memory map, fabricating an entry on
/// first request for an unknown hash.
pub struct NullCandidateStore {
    candidates: Arc<Mutex<HashMap<BlockHash, Block>>>,
}

impl NullCandidateStore {
    pub fn new() -> Self {
        Self {
            candidates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pre-seed a candidate block.
    pub fn insert(&self, block: Block) {
        let mut map = self.candidates.lock().expect("candidate store lock");
        map.insert(block.header.hash, block);
    }

    /// Register on the RPC bus and serve requests.
    pub fn spawn(&self, rpc: &RpcBus) -> Result<tokio::task::JoinHandle<()>, opal_bus::BusError> {
        let mut rx = rpc.register(Topic::GetCandidate)?;
        let candidates = Arc::clone(&self.candidates);
        Ok(tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let reply = match &req.params {
                    CallParams::GetCandidate(hash) => {
                        let mut map = candidates.lock().expect("candidate store lock");
                        let block = map
                            .entry(*hash)
                            .or_insert_with(|| fabricate_candidate(*hash))
                            .clone();
                        Ok(CallResponse::Candidate(Box::new(CandidateMessage {
                            block,
                            certificate: Certificate::empty(),
                        })))
                    }
                    _ => Err("unexpected parameters".to_string()),
                };
                let _ = req.response.send(reply);
            }
        }))
    }
}

impl Default for NullCandidateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn fabricate_candidate(hash: BlockHash) -> Block {
    let mut block = Block::new(
        Header {
            version: BLOCK_VERSION,
            height: 0,
            timestamp: 0,
            prev_block_hash: BlockHash::ZERO,
            seed: BlsSignature::ZERO,
            tx_root: BlockHash::ZERO,
            certificate: Certificate::empty(),
            hash: BlockHash::ZERO,
        },
        Vec::new(),
    );
    block.seal();
    // Candidates are addressed by the hash consensus voted on.
    block.header.hash = hash;
    block
}
