//! In-memory chain store for tests and dev runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use opal_types::{Block, BlockHash};

use crate::{ChainDb, StoreError};

#[derive(Default)]
struct Inner {
    by_height: BTreeMap<u64, Block>,
    by_hash: HashMap<BlockHash, u64>,
}

/// A [`ChainDb`] backed by process memory.
#[derive(Default)]
pub struct MemoryDb {
    inner: Mutex<Inner>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainDb for MemoryDb {
    fn load_tip(&self) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.lock().expect("memory db lock");
        Ok(inner.by_height.values().next_back().cloned())
    }

    fn height(&self) -> Result<Option<u64>, StoreError> {
        let inner = self.inner.lock().expect("memory db lock");
        Ok(inner.by_height.keys().next_back().copied())
    }

    fn block_at(&self, height: u64) -> Result<Block, StoreError> {
        let inner = self.inner.lock().expect("memory db lock");
        inner
            .by_height
            .get(&height)
            .cloned()
            .ok_or(StoreError::HeightNotFound(height))
    }

    fn block_by_hash(&self, hash: &BlockHash) -> Result<Block, StoreError> {
        let inner = self.inner.lock().expect("memory db lock");
        let height = inner
            .by_hash
            .get(hash)
            .copied()
            .ok_or(StoreError::HashNotFound(*hash))?;
        inner
            .by_height
            .get(&height)
            .cloned()
            .ok_or(StoreError::HeightNotFound(height))
    }

    fn append(&self, block: &Block) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory db lock");
        if let Some(tip) = inner.by_height.keys().next_back().copied() {
            let expected = tip + 1;
            if block.header.height != expected {
                return Err(StoreError::OutOfOrder {
                    expected,
                    got: block.header.height,
                });
            }
        }
        inner.by_hash.insert(block.header.hash, block.header.height);
        inner.by_height.insert(block.header.height, block.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory db lock");
        inner.by_height.clear();
        inner.by_hash.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_types::{BlsSignature, Certificate, Header, BLOCK_VERSION};

    fn block(height: u64) -> Block {
        let mut block = Block::new(
            Header {
                version: BLOCK_VERSION,
                height,
                timestamp: height as i64,
                prev_block_hash: BlockHash::new([height as u8; 32]),
                seed: BlsSignature([1; 48]),
                tx_root: BlockHash::ZERO,
                certificate: Certificate::empty(),
                hash: BlockHash::ZERO,
            },
            Vec::new(),
        );
        block.seal();
        block
    }

    #[test]
    fn empty_store_has_no_tip() {
        let db = MemoryDb::new();
        assert!(db.load_tip().unwrap().is_none());
        assert!(db.height().unwrap().is_none());
    }

    #[test]
    fn append_and_read_back() {
        let db = MemoryDb::new();
        let b0 = block(0);
        let b1 = block(1);
        db.append(&b0).unwrap();
        db.append(&b1).unwrap();

        assert_eq!(db.height().unwrap(), Some(1));
        assert_eq!(db.load_tip().unwrap().unwrap(), b1);
        assert_eq!(db.block_at(0).unwrap(), b0);
        assert_eq!(db.block_by_hash(&b1.header.hash).unwrap(), b1);
    }

    #[test]
    fn gap_rejected() {
        let db = MemoryDb::new();
        db.append(&block(0)).unwrap();
        let err = db.append(&block(5)).unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { expected: 1, got: 5 }));
    }

    #[test]
    fn clear_empties_everything() {
        let db = MemoryDb::new();
        let b0 = block(0);
        db.append(&b0).unwrap();
        db.clear().unwrap();
        assert!(db.load_tip().unwrap().is_none());
        assert!(db.block_by_hash(&b0.header.hash).is_err());
    }

    #[test]
    fn missing_lookups_error() {
        let db = MemoryDb::new();
        assert!(matches!(db.block_at(3), Err(StoreError::HeightNotFound(3))));
        assert!(db.block_by_hash(&BlockHash::new([9; 32])).is_err());
    }
}
