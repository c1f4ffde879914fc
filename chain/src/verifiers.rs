//! Block sanity checks and certificate verification.

use opal_crypto::bls;
use opal_messages::ConsensusHeader;
use opal_types::{Block, BlsPublicKey, CertificateVotes, Provisioners, BLOCK_VERSION};

use crate::ChainError;

/// Stateless and stateful checks of `blk` against its parent.
pub fn sanity_check_block(prev: &Block, blk: &Block) -> Result<(), ChainError> {
    let header = &blk.header;
    if header.version != BLOCK_VERSION {
        return Err(ChainError::Sanity(format!(
            "unsupported version {}",
            header.version
        )));
    }
    if header.height != prev.header.height + 1 {
        return Err(ChainError::Sanity(format!(
            "height {} does not follow parent {}",
            header.height, prev.header.height
        )));
    }
    if header.prev_block_hash != prev.header.hash {
        return Err(ChainError::Sanity("previous hash mismatch".into()));
    }
    if header.timestamp < prev.header.timestamp {
        return Err(ChainError::Sanity("timestamp before parent".into()));
    }
    if header.tx_root != blk.compute_tx_root() {
        return Err(ChainError::Sanity("transaction root mismatch".into()));
    }
    if header.hash != header.compute_hash() {
        return Err(ChainError::Sanity("header hash mismatch".into()));
    }
    Ok(())
}

/// Verify the certificate stamped on `blk` against the current
/// provisioner set.
///
/// The certificate belongs to the round that finalized this block, i.e.
/// `blk.height + 1`, whose committees are seeded by this block's own
/// seed. Both phases must be signed by committee members holding a
/// quorum of slots, over the agreed hash the certificate carries.
pub fn check_block_certificate(
    provisioners: &Provisioners,
    blk: &Block,
) -> Result<(), ChainError> {
    // Genesis carries no certificate.
    if blk.header.height == 0 {
        return Ok(());
    }
    check_certificate(
        provisioners,
        &blk.header.seed,
        blk.header.height + 1,
        &blk.header.certificate,
    )
}

/// Verify a free-standing certificate for `round`, with committees
/// derived from `seed` (the seed of the block at `round - 1`).
pub fn check_certificate(
    provisioners: &Provisioners,
    seed: &opal_types::BlsSignature,
    round: u64,
    cert: &opal_types::Certificate,
) -> Result<(), ChainError> {
    if cert.is_empty() {
        return Err(ChainError::Certificate("empty certificate".into()));
    }
    for phase in [&cert.first, &cert.second] {
        check_phase(provisioners, seed, round, phase, cert.hash)?;
    }
    Ok(())
}

fn check_phase(
    provisioners: &Provisioners,
    seed: &opal_types::BlsSignature,
    round: u64,
    phase: &CertificateVotes,
    agreed_hash: opal_types::BlockHash,
) -> Result<(), ChainError> {
    let step = u8::try_from(phase.step)
        .map_err(|_| ChainError::Certificate(format!("step {} out of range", phase.step)))?;
    let committee = provisioners.voting_committee(seed, round, step);

    let mut weight = 0usize;
    for signer in &phase.signers {
        let slots = committee.weight(signer);
        if slots == 0 {
            return Err(ChainError::Certificate(format!(
                "signer {signer} not in committee for step {step}"
            )));
        }
        weight += slots;
    }
    if weight < committee.quorum() {
        return Err(ChainError::Certificate(format!(
            "step {step} has {weight} slot votes, quorum is {}",
            committee.quorum()
        )));
    }

    let header = ConsensusHeader {
        round,
        step,
        public_key: BlsPublicKey::ZERO,
        block_hash: agreed_hash,
    };
    if !bls::verify_aggregate(&phase.signers, &header.signable_bytes(), &phase.signature) {
        return Err(ChainError::Certificate(format!(
            "step {step} aggregate signature invalid"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_crypto::bls::keys_from_seed;
    use opal_types::{
        BlockHash, BlsKeyPair, BlsSignature, Certificate, Header, Transaction,
    };

    fn linked_blocks() -> (Block, Block) {
        let mut parent = Block::new(
            Header {
                version: BLOCK_VERSION,
                height: 4,
                timestamp: 100,
                prev_block_hash: BlockHash::new([1; 32]),
                seed: BlsSignature([2; 48]),
                tx_root: BlockHash::ZERO,
                certificate: Certificate::empty(),
                hash: BlockHash::ZERO,
            },
            Vec::new(),
        );
        parent.seal();

        let mut child = Block::new(
            Header {
                version: BLOCK_VERSION,
                height: 5,
                timestamp: 150,
                prev_block_hash: parent.header.hash,
                seed: BlsSignature([3; 48]),
                tx_root: BlockHash::ZERO,
                certificate: Certificate::empty(),
                hash: BlockHash::ZERO,
            },
            vec![Transaction::new(b"tx".to_vec())],
        );
        child.seal();
        (parent, child)
    }

    #[test]
    fn linked_blocks_pass_sanity() {
        let (parent, child) = linked_blocks();
        assert!(sanity_check_block(&parent, &child).is_ok());
    }

    #[test]
    fn wrong_height_rejected() {
        let (parent, mut child) = linked_blocks();
        child.header.height = 7;
        child.seal();
        assert!(matches!(
            sanity_check_block(&parent, &child),
            Err(ChainError::Sanity(_))
        ));
    }

    #[test]
    fn wrong_prev_hash_rejected() {
        let (parent, mut child) = linked_blocks();
        child.header.prev_block_hash = BlockHash::new([9; 32]);
        child.seal();
        assert!(sanity_check_block(&parent, &child).is_err());
    }

    #[test]
    fn earlier_timestamp_rejected() {
        let (parent, mut child) = linked_blocks();
        child.header.timestamp = parent.header.timestamp - 1;
        child.seal();
        assert!(sanity_check_block(&parent, &child).is_err());
    }

    #[test]
    fn tampered_tx_root_rejected() {
        let (parent, mut child) = linked_blocks();
        child.header.tx_root = BlockHash::new([0xEE; 32]);
        child.header.hash = child.header.compute_hash();
        assert!(sanity_check_block(&parent, &child).is_err());
    }

    #[test]
    fn stale_hash_rejected() {
        let (parent, mut child) = linked_blocks();
        child.header.timestamp += 1; // hash no longer matches
        assert!(sanity_check_block(&parent, &child).is_err());
    }

    // ── Certificate checks ─────────────────────────────────────────────

    fn provisioner_keys() -> (Vec<BlsKeyPair>, Provisioners) {
        let keys: Vec<BlsKeyPair> = (0..4u8).map(|i| keys_from_seed(&[i + 1; 32])).collect();
        let mut provisioners = Provisioners::new();
        for k in &keys {
            provisioners.add(k.public, 1_000, 0, u64::MAX).unwrap();
        }
        (keys, provisioners)
    }

    /// Build a valid certificate for `blk` signed by every committee
    /// member of both reduction steps of round `blk.height + 1`.
    fn certify(blk: &mut Block, keys: &[BlsKeyPair], provisioners: &Provisioners) {
        let round = blk.header.height + 1;
        let agreed = BlockHash::new([0x77; 32]);
        let mut phases = Vec::new();
        for step in [2u8, 3u8] {
            let committee = provisioners.voting_committee(&blk.header.seed, round, step);
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
                bls::aggregate_signatures(
                    &mut signature,
                    &bls::sign(k, &header.signable_bytes()),
                );
                signers.push(k.public);
            }
            phases.push(CertificateVotes {
                signature,
                step: step as u32,
                signers,
            });
        }
        let second = phases.pop().unwrap();
        let first = phases.pop().unwrap();
        blk.header.certificate = Certificate {
            first,
            second,
            hash: agreed,
        };
    }

    #[test]
    fn valid_certificate_accepted() {
        let (keys, provisioners) = provisioner_keys();
        let (_, mut child) = linked_blocks();
        certify(&mut child, &keys, &provisioners);
        assert!(check_block_certificate(&provisioners, &child).is_ok());
    }

    #[test]
    fn empty_certificate_rejected_past_genesis() {
        let (_, provisioners) = provisioner_keys();
        let (_, child) = linked_blocks();
        assert!(matches!(
            check_block_certificate(&provisioners, &child),
            Err(ChainError::Certificate(_))
        ));
    }

    #[test]
    fn genesis_skips_certificate_check() {
        let (_, provisioners) = provisioner_keys();
        let mut genesis = Block::new(
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
        genesis.seal();
        assert!(check_block_certificate(&provisioners, &genesis).is_ok());
    }

    #[test]
    fn outsider_signer_rejected() {
        let (keys, provisioners) = provisioner_keys();
        let (_, mut child) = linked_blocks();
        certify(&mut child, &keys, &provisioners);
        child.header.certificate.first.signers[0] = keys_from_seed(&[99; 32]).public;
        assert!(check_block_certificate(&provisioners, &child).is_err());
    }

    #[test]
    fn tampered_aggregate_rejected() {
        let (keys, provisioners) = provisioner_keys();
        let (_, mut child) = linked_blocks();
        certify(&mut child, &keys, &provisioners);
        child.header.certificate.second.signature = BlsSignature([0xAA; 48]);
        assert!(check_block_certificate(&provisioners, &child).is_err());
    }

    #[test]
    fn insufficient_signers_rejected() {
        let (keys, provisioners) = provisioner_keys();
        let (_, mut child) = linked_blocks();
        certify(&mut child, &keys, &provisioners);
        // Keep only one signer in the first phase.
        child.header.certificate.first.signers.truncate(1);
        assert!(check_block_certificate(&provisioners, &child).is_err());
    }
}
