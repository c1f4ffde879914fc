//! Genesis and the first intermediate block.

use opal_crypto::bls::keys_from_seed;
use opal_types::{
    Block, BlockHash, BlsSignature, Certificate, Header, Provisioners, BLOCK_VERSION,
};

use crate::ChainError;

/// Number of provisioners seeded by the legacy test-harness bootstrap.
const LEGACY_PROVISIONER_COUNT: u8 = 4;
const LEGACY_PROVISIONER_STAKE: u64 = 100_000;

/// The deterministic genesis block.
pub fn genesis_block() -> Block {
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
    block
}

/// A consensus-compatible empty block linking to `parent`, installed as
/// the intermediate block when the chain starts from genesis. It carries
/// an empty certificate until the first round's certificate stamps it.
pub fn first_intermediate_block(parent: &Header) -> Block {
    let mut block = Block::new(
        Header {
            version: BLOCK_VERSION,
            height: parent.height + 1,
            timestamp: parent.timestamp,
            prev_block_hash: parent.hash,
            seed: parent.seed,
            tx_root: BlockHash::ZERO,
            certificate: Certificate::empty(),
            hash: BlockHash::ZERO,
        },
        Vec::new(),
    );
    block.seal();
    block
}

/// Test-harness bootstrap: seed a deterministic provisioner committee so
/// a fresh network can run consensus without on-chain staking history.
pub fn legacy_bootstrap(provisioners: &mut Provisioners) -> Result<(), ChainError> {
    for i in 0..LEGACY_PROVISIONER_COUNT {
        let keys = keys_from_seed(&[i + 1; 32]);
        provisioners
            .add(keys.public, LEGACY_PROVISIONER_STAKE, 0, u64::MAX)
            .map_err(|e| ChainError::Other(format!("legacy bootstrap: {e}")))?;
    }
    tracing::info!(
        count = LEGACY_PROVISIONER_COUNT,
        "legacy genesis bootstrap seeded provisioners"
    );
    Ok(())
}
