//! Block storage for the Opal chain.
//!
//! The chain driver depends only on the [`ChainDb`] trait: an append-only
//! sequence of blocks keyed by height with a hash→height secondary index.
//! Two drivers are provided: an in-memory store for tests and dev runs,
//! and an LMDB store for production.

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbDb;
pub use memory::MemoryDb;

use std::path::Path;
use std::sync::Arc;

use opal_types::{Block, BlockHash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block at height {0} not found")]
    HeightNotFound(u64),

    #[error("block {0} not found")]
    HashNotFound(BlockHash),

    #[error("append out of order: expected height {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("corrupt store entry: {0}")]
    Corrupt(String),

    #[error("unknown database driver: {0}")]
    UnknownDriver(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Persisted chain state: an append-only block sequence.
pub trait ChainDb: Send + Sync {
    /// The highest block, if any.
    fn load_tip(&self) -> Result<Option<Block>, StoreError>;

    /// Height of the tip, if any block is stored.
    fn height(&self) -> Result<Option<u64>, StoreError>;

    /// The block at `height`.
    fn block_at(&self, height: u64) -> Result<Block, StoreError>;

    /// The block with the given hash, via the secondary index.
    fn block_by_hash(&self, hash: &BlockHash) -> Result<Block, StoreError>;

    /// Append `block` at the tip. The block's height must be exactly
    /// tip + 1 (or anything for an empty store, which seeds the chain).
    fn append(&self, block: &Block) -> Result<(), StoreError>;

    /// Remove everything.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Open a driver by its config name.
pub fn open_driver(driver: &str, dir: &Path) -> Result<Arc<dyn ChainDb>, StoreError> {
    match driver {
        "memory" => Ok(Arc::new(MemoryDb::new())),
        "lmdb" => Ok(Arc::new(LmdbDb::open(dir)?)),
        other => Err(StoreError::UnknownDriver(other.to_string())),
    }
}
