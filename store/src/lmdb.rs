//! LMDB chain store.
//!
//! Blocks are bincode-encoded and keyed by big-endian height so the tip is
//! always the last entry; a second database maps block hash to height.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use opal_types::{Block, BlockHash};

use crate::{ChainDb, StoreError};

/// LMDB map size: 1 GiB.
const MAP_SIZE: usize = 1 << 30;
const MAX_DBS: u32 = 2;

/// A [`ChainDb`] backed by an LMDB environment.
pub struct LmdbDb {
    env: Env,
    blocks_db: Database<Bytes, Bytes>,
    hash_index_db: Database<Bytes, Bytes>,
}

impl From<heed::Error> for StoreError {
    fn from(e: heed::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl LmdbDb {
    /// Open or create the environment at `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::Backend(format!("failed to create directory: {e}")))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(MAX_DBS)
                .map_size(MAP_SIZE)
                .open(dir)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks_db = env.create_database(&mut wtxn, Some("blocks"))?;
        let hash_index_db = env.create_database(&mut wtxn, Some("hash_index"))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            blocks_db,
            hash_index_db,
        })
    }

    fn decode_block(bytes: &[u8]) -> Result<Block, StoreError> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

impl ChainDb for LmdbDb {
    fn load_tip(&self) -> Result<Option<Block>, StoreError> {
        let rtxn = self.env.read_txn()?;
        match self.blocks_db.last(&rtxn)? {
            Some((_, bytes)) => Ok(Some(Self::decode_block(bytes)?)),
            None => Ok(None),
        }
    }

    fn height(&self) -> Result<Option<u64>, StoreError> {
        let rtxn = self.env.read_txn()?;
        match self.blocks_db.last(&rtxn)? {
            Some((key, _)) => {
                let arr: [u8; 8] = key
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("height key width".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn block_at(&self, height: u64) -> Result<Block, StoreError> {
        let rtxn = self.env.read_txn()?;
        let bytes = self
            .blocks_db
            .get(&rtxn, &height.to_be_bytes())?
            .ok_or(StoreError::HeightNotFound(height))?;
        Self::decode_block(bytes)
    }

    fn block_by_hash(&self, hash: &BlockHash) -> Result<Block, StoreError> {
        let rtxn = self.env.read_txn()?;
        let height_bytes = self
            .hash_index_db
            .get(&rtxn, hash.as_bytes())?
            .ok_or(StoreError::HashNotFound(*hash))?;
        let bytes = self
            .blocks_db
            .get(&rtxn, height_bytes)?
            .ok_or_else(|| StoreError::Corrupt("dangling hash index entry".into()))?;
        Self::decode_block(bytes)
    }

    fn append(&self, block: &Block) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;

        if let Some((key, _)) = self.blocks_db.last(&wtxn)? {
            let arr: [u8; 8] = key
                .try_into()
                .map_err(|_| StoreError::Corrupt("height key width".into()))?;
            let expected = u64::from_be_bytes(arr) + 1;
            if block.header.height != expected {
                return Err(StoreError::OutOfOrder {
                    expected,
                    got: block.header.height,
                });
            }
        }

        let bytes = bincode::serialize(block).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let height_key = block.header.height.to_be_bytes();
        self.blocks_db.put(&mut wtxn, &height_key, &bytes)?;
        self.hash_index_db
            .put(&mut wtxn, block.header.hash.as_bytes(), &height_key)?;
        wtxn.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        self.blocks_db.clear(&mut wtxn)?;
        self.hash_index_db.clear(&mut wtxn)?;
        wtxn.commit()?;
        Ok(())
    }
}
