// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Buffer cache mapping block numbers to shared, lockable in-memory
//! blocks.
//!
//! Grounded on the teacher's `block_cache.rs`: a `quick_cache::sync::Cache`
//! keyed by block identity, sized by entry count rather than byte weight
//! since every block here is a fixed `block_size`. Each cached value is an
//! `Arc<parking_lot::Mutex<Block<K>>>` so a locked buffer can be cloned out
//! of the cache and held across multiple calls (see `cursor.rs`) without
//! borrowing back into it.

use crate::block::Block;
use crate::device::{BlockDevice, BlockNo};
use crate::error::Result;
use crate::key::TreeKey;
use parking_lot::Mutex;
use quick_cache::sync::{Cache, DefaultLifecycle};
use quick_cache::UnitWeighter;
use std::sync::Arc;

pub type CachedBlock<K> = Arc<Mutex<Block<K>>>;

/// Buffer cache: blocks are cached in memory after being read from the
/// device, speeding up repeated descents through hot internal levels.
pub struct BlockCache<K: TreeKey> {
    data: Cache<BlockNo, CachedBlock<K>, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl<K: TreeKey> BlockCache<K> {
    /// Creates a cache holding roughly `capacity` blocks.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        #[allow(clippy::default_trait_access)]
        let data = Cache::with(
            capacity,
            capacity as u64,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the cached buffer for `blkno`, reading it from `device` and
    /// populating the cache on a miss.
    pub fn fetch(&self, device: &dyn BlockDevice, blkno: BlockNo) -> Result<CachedBlock<K>> {
        if let Some(buf) = self.data.get(&blkno) {
            return Ok(buf);
        }

        let raw = device.read_block(blkno)?;
        let block = Block::<K>::decode(&raw)?;
        let buf: CachedBlock<K> = Arc::new(Mutex::new(block));
        self.data.insert(blkno, buf.clone());
        Ok(buf)
    }

    /// Inserts a freshly allocated or just-written block, replacing
    /// whatever was cached for its number.
    pub fn insert(&self, blkno: BlockNo, buf: CachedBlock<K>) {
        self.data.insert(blkno, buf);
    }

    /// Drops a block from the cache, e.g. after it's freed by a merge.
    pub fn evict(&self, blkno: BlockNo) {
        self.data.remove(&blkno);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::key::IntKey;

    #[test]
    fn fetch_caches_on_miss() {
        let dev = MemDevice::new(256);
        let blkno = dev.grow_by(1).unwrap();
        let block = Block::<IntKey>::new_empty(blkno, 1, 0, 256);
        dev.write_block(blkno, &block.encode()).unwrap();

        let cache = BlockCache::<IntKey>::with_capacity(8);
        assert!(cache.is_empty());
        let a = cache.fetch(&dev, blkno).unwrap();
        assert_eq!(cache.len(), 1);
        let b = cache.fetch(&dev, blkno).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
