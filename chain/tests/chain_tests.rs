//! Chain driver integration tests: certificate-driven finalization over
//! two rounds, round-results serving and requesting, and chain rebuild.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use opal_bus::{EventBus, RpcBus};
use opal_chain::{genesis, verifiers, Chain, ChainError, Executor};
use opal_crypto::bls::{self, keys_from_seed};
use opal_messages::{
    CallResponse, CandidateMessage, CertificateMessage, ConsensusHeader, Message, Topic,
};
use opal_store::{ChainDb, MemoryDb};
use opal_types::{
    Block, BlockHash, BlsKeyPair, BlsSignature, Certificate, CertificateVotes, Header,
    Provisioners, Transaction, BLOCK_VERSION,
};
use tokio::sync::broadcast;

struct PassThrough;

impl Executor for PassThrough {
    fn execute_state_transition(
        &self,
        _txs: &[Transaction],
        _height: u64,
        provisioners: &Provisioners,
    ) -> Result<Provisioners, String> {
        Ok(provisioners.clone())
    }

    fn validate_state_transition(&self, _txs: &[Transaction], _height: u64) -> Result<(), String> {
        Ok(())
    }
}

/// The legacy bootstrap committee keys (seeds 1..=4).
fn committee_keys() -> Vec<BlsKeyPair> {
    (0..4u8).map(|i| keys_from_seed(&[i + 1; 32])).collect()
}

fn make_block(parent: &Header, seed_byte: u8, txs: Vec<Transaction>) -> Block {
    let mut block = Block::new(
        Header {
            version: BLOCK_VERSION,
            height: parent.height + 1,
            timestamp: parent.timestamp + 10,
            prev_block_hash: parent.hash,
            seed: BlsSignature([seed_byte; 48]),
            tx_root: BlockHash::ZERO,
            certificate: Certificate::empty(),
            hash: BlockHash::ZERO,
        },
        txs,
    );
    block.seal();
    block
}

/// Build a certificate for `round` over `agreed`, with committees seeded
/// by `seed` and signed by every slot-holding committee key.
fn build_certificate(
    provisioners: &Provisioners,
    keys: &[BlsKeyPair],
    seed: &BlsSignature,
    round: u64,
    agreed: BlockHash,
) -> (Certificate, Vec<opal_types::BlsPublicKey>) {
    let mut phases = Vec::new();
    let mut signers_union = Vec::new();
    for step in [2u8, 3u8] {
        let committee = provisioners.voting_committee(seed, round, step);
        let mut signature = BlsSignature::ZERO;
        let mut signers = Vec::new();
        for k in keys {
            if committee.weight(&k.public) == 0 {
                continue;
            }
            let header = ConsensusHeader {
                round,
                step,
                public_key: k.public,
                block_hash: agreed,
            };
            bls::aggregate_signatures(&mut signature, &bls::sign(k, &header.signable_bytes()));
            signers.push(k.public);
            if !signers_union.contains(&k.public) {
                signers_union.push(k.public);
            }
        }
        phases.push(CertificateVotes {
            signature,
            step: step as u32,
            signers,
        });
    }
    let second = phases.pop().unwrap();
    let first = phases.pop().unwrap();
    (
        Certificate {
            first,
            second,
            hash: agreed,
        },
        signers_union,
    )
}

/// Register a `GetCandidate` handler serving from a fixed map.
fn serve_candidates(rpc: &RpcBus, candidates: HashMap<BlockHash, Block>) {
    let mut rx = rpc.register(Topic::GetCandidate).unwrap();
    tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            let reply = match &req.params {
                opal_messages::CallParams::GetCandidate(hash) => match candidates.get(hash) {
                    Some(block) => Ok(CallResponse::Candidate(Box::new(CandidateMessage {
                        block: block.clone(),
                        certificate: Certificate::empty(),
                    }))),
                    None => Err(format!("candidate {hash} not found")),
                },
                _ => Err("unexpected parameters".to_string()),
            };
            let _ = req.response.send(reply);
        }
    });
}

#[tokio::test]
async fn certificates_finalize_intermediate_blocks_across_rounds() {
    let bus = EventBus::new();
    let rpc = RpcBus::new();
    let db: Arc<dyn ChainDb> = Arc::new(MemoryDb::new());
    let keys = committee_keys();

    let chain = Chain::new(bus.clone(), rpc.clone(), Arc::clone(&db), Arc::new(PassThrough), true)
        .unwrap();
    let provisioners = chain.provisioners().clone();

    // The chain starts with genesis plus the first intermediate block.
    let genesis_block = genesis::genesis_block();
    let b1 = genesis::first_intermediate_block(&genesis_block.header);
    assert_eq!(chain.intermediate_block().unwrap().header.hash, b1.header.hash);

    // Candidates for rounds 2 and 3.
    let c2 = make_block(&b1.header, 5, vec![Transaction::new(b"round2".to_vec())]);
    let d3 = make_block(&c2.header, 6, Vec::new());
    serve_candidates(
        &rpc,
        HashMap::from([(c2.header.hash, c2.clone()), (d3.header.hash, d3.clone())]),
    );

    let (_, mut accepted) = bus.subscribe(Topic::AcceptedBlock);
    let (_, mut round_updates) = bus.subscribe(Topic::RoundUpdate);
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(chain.listen(shutdown_tx.subscribe()));

    // Round 2 reaches agreement on candidate c2: the intermediate b1 is
    // stamped and finalized, c2 becomes the new intermediate.
    let (cert2, signers2) =
        build_certificate(&provisioners, &keys, &b1.header.seed, 2, c2.header.hash);
    bus.publish(
        Topic::Certificate,
        Message::Certificate(CertificateMessage {
            round: 2,
            block_hash: c2.header.hash,
            certificate: cert2.clone(),
            signers: signers2,
            absentees: Vec::new(),
        }),
    );

    let first_accepted = match tokio::time::timeout(Duration::from_secs(2), accepted.recv()).await
    {
        Ok(Some(Message::AcceptedBlock(blk))) => *blk,
        other => panic!("expected accepted block, got {:?}", other),
    };
    assert_eq!(first_accepted.header.height, 1);
    assert_eq!(first_accepted.header.hash, b1.header.hash);
    assert_eq!(first_accepted.header.certificate, cert2);

    match tokio::time::timeout(Duration::from_secs(2), round_updates.recv()).await {
        Ok(Some(Message::RoundUpdate(ru))) => {
            assert_eq!(ru.round, 3);
            assert_eq!(ru.hash, c2.header.hash);
        }
        other => panic!("expected round update, got {:?}", other),
    }

    // Round 3 finalizes c2 the same way.
    let (cert3, signers3) =
        build_certificate(&provisioners, &keys, &c2.header.seed, 3, d3.header.hash);
    bus.publish(
        Topic::Certificate,
        Message::Certificate(CertificateMessage {
            round: 3,
            block_hash: d3.header.hash,
            certificate: cert3,
            signers: signers3,
            absentees: Vec::new(),
        }),
    );

    let second_accepted = match tokio::time::timeout(Duration::from_secs(2), accepted.recv()).await
    {
        Ok(Some(Message::AcceptedBlock(blk))) => *blk,
        other => panic!("expected accepted block, got {:?}", other),
    };
    // Accepted heights are strictly increasing by one.
    assert_eq!(second_accepted.header.height, 2);
    assert_eq!(second_accepted.header.hash, c2.header.hash);

    match tokio::time::timeout(Duration::from_secs(2), round_updates.recv()).await {
        Ok(Some(Message::RoundUpdate(ru))) => assert_eq!(ru.round, 4),
        other => panic!("expected round update, got {:?}", other),
    }

    // Storage holds exactly the finalized chain.
    assert_eq!(db.height().unwrap(), Some(2));
    assert_eq!(db.block_at(1).unwrap().header.hash, b1.header.hash);
    assert_eq!(db.block_at(2).unwrap().header.hash, c2.header.hash);
}

#[tokio::test]
async fn round_results_are_served_for_the_intermediate_round() {
    let bus = EventBus::new();
    let rpc = RpcBus::new();
    let db: Arc<dyn ChainDb> = Arc::new(MemoryDb::new());
    let keys = committee_keys();

    let chain = Chain::new(bus.clone(), rpc.clone(), db, Arc::new(PassThrough), true).unwrap();
    let provisioners = chain.provisioners().clone();

    let genesis_block = genesis::genesis_block();
    let b1 = genesis::first_intermediate_block(&genesis_block.header);
    let c2 = make_block(&b1.header, 5, Vec::new());
    serve_candidates(&rpc, HashMap::from([(c2.header.hash, c2.clone())]));

    let (_, mut gossip) = bus.subscribe(Topic::Gossip);
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(chain.listen(shutdown_tx.subscribe()));

    // Before any certificate: a request is silently ignored.
    bus.publish(Topic::GetRoundResults, Message::GetRoundResults(1));

    // Complete round 2 so the chain holds c2 plus its certificate.
    let (cert2, signers2) =
        build_certificate(&provisioners, &keys, &b1.header.seed, 2, c2.header.hash);
    bus.publish(
        Topic::Certificate,
        Message::Certificate(CertificateMessage {
            round: 2,
            block_hash: c2.header.hash,
            certificate: cert2.clone(),
            signers: signers2,
            absentees: Vec::new(),
        }),
    );

    // The finalization gossips an Inv; then our request must produce the
    // round results for the intermediate round (c2 at height 2).
    bus.publish(Topic::GetRoundResults, Message::GetRoundResults(2));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let msg = tokio::time::timeout_at(deadline, gossip.recv())
            .await
            .expect("round results within deadline")
            .expect("gossip open");
        if let Message::RoundResults(cm) = msg {
            assert_eq!(cm.block.header.hash, c2.header.hash);
            assert_eq!(cm.certificate, cert2);
            break;
        }
    }
}

#[tokio::test]
async fn request_round_results_validates_responses() {
    let bus = EventBus::new();
    let rpc = RpcBus::new();
    let db: Arc<dyn ChainDb> = Arc::new(MemoryDb::new());
    let keys = committee_keys();

    let mut chain =
        Chain::new(bus.clone(), rpc.clone(), db, Arc::new(PassThrough), true).unwrap();
    let provisioners = chain.provisioners().clone();

    // A responder that first sends garbage, then a valid result for
    // round 1 (a block extending genesis).
    let genesis_block = genesis::genesis_block();
    let b1 = make_block(&genesis_block.header, 3, Vec::new());
    let (cert1, _) = build_certificate(
        &provisioners,
        &keys,
        &genesis_block.header.seed,
        1,
        BlockHash::new([0x77; 32]),
    );

    let responder_bus = bus.clone();
    let bogus = make_block(&b1.header, 9, Vec::new()); // wrong parent
    let good = CandidateMessage {
        block: b1.clone(),
        certificate: cert1.clone(),
    };
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        responder_bus.publish(
            Topic::RoundResults,
            Message::RoundResults(CandidateMessage {
                block: bogus,
                certificate: Certificate::empty(),
            }),
        );
        responder_bus.publish(Topic::RoundResults, Message::RoundResults(good));
    });

    let (block, certificate) = chain.request_round_results(1).await.unwrap();
    assert_eq!(block.header.hash, b1.header.hash);
    assert_eq!(certificate, cert1);
}

#[tokio::test]
async fn request_round_results_times_out_without_responses() {
    let bus = EventBus::new();
    let rpc = RpcBus::new();
    let db: Arc<dyn ChainDb> = Arc::new(MemoryDb::new());

    let mut chain = Chain::new(bus, rpc, db, Arc::new(PassThrough), false).unwrap();
    let err = chain.request_round_results(1).await.unwrap_err();
    assert!(matches!(err, ChainError::RoundResultsTimeout));
}

#[tokio::test]
async fn rebuild_resets_to_genesis() {
    let bus = EventBus::new();
    let rpc = RpcBus::new();
    let db: Arc<dyn ChainDb> = Arc::new(MemoryDb::new());

    // A wallet that acknowledges the clear request.
    let mut wallet_rx = rpc.register(Topic::ClearWalletDatabase).unwrap();
    tokio::spawn(async move {
        while let Some(req) = wallet_rx.recv().await {
            let _ = req.response.send(Ok(CallResponse::Empty));
        }
    });

    let mut chain =
        Chain::new(bus, rpc, Arc::clone(&db), Arc::new(PassThrough), true).unwrap();

    let response = chain.rebuild_chain().await.unwrap();
    assert!(response.contains("Syncing from scratch"));
    assert_eq!(chain.tip().header.height, 0);
    assert_eq!(db.height().unwrap(), Some(0));
    // Exactly one intermediate block, linked to the new tip.
    let intermediate = chain.intermediate_block().unwrap();
    assert_eq!(intermediate.header.height, 1);
    assert_eq!(intermediate.header.prev_block_hash, chain.tip().header.hash);
    assert!(chain.provisioners().is_empty());
}

#[tokio::test]
async fn direct_accept_rejects_bad_blocks_without_state_change() {
    let bus = EventBus::new();
    let rpc = RpcBus::new();
    let db: Arc<dyn ChainDb> = Arc::new(MemoryDb::new());

    let mut chain =
        Chain::new(bus, rpc, Arc::clone(&db), Arc::new(PassThrough), true).unwrap();
    let tip_before = chain.tip().header.hash;

    // A block with a valid link but an empty certificate.
    let bad = make_block(&genesis::genesis_block().header, 4, Vec::new());
    assert!(matches!(
        chain.accept_block(bad).await,
        Err(ChainError::Certificate(_))
    ));
    assert_eq!(chain.tip().header.hash, tip_before);
    assert_eq!(db.height().unwrap(), Some(0));
}

#[test]
fn certificate_of_the_wrong_round_is_rejected() {
    let keys = committee_keys();
    let mut provisioners = Provisioners::new();
    for k in &keys {
        provisioners.add(k.public, 100_000, 0, u64::MAX).unwrap();
    }

    let agreed = BlockHash::new([0x44; 32]);
    let seed = BlsSignature([8; 48]);
    let (cert, _) = build_certificate(&provisioners, &keys, &seed, 5, agreed);

    assert!(verifiers::check_certificate(&provisioners, &seed, 5, &cert).is_ok());
    // Same certificate presented for a different round fails: the
    // committees and the signed bytes both move with the round.
    assert!(verifiers::check_certificate(&provisioners, &seed, 6, &cert).is_err());
}
