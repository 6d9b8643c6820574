// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree configuration builder, mirroring the teacher crate's chainable
//! `Config`/`Config::open()` pattern.

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::key::TreeKey;
use crate::tree::Btree;
use std::marker::PhantomData;

/// Default number of blocks the buffer cache holds.
const DEFAULT_CACHE_CAPACITY: usize = 1_024;

/// Reclaimable-free threshold above which [`Btree::delete`] tries to
/// merge a block with a sibling. Roughly a quarter of a 4 KiB block.
const DEFAULT_FREE_LIMIT: u16 = 1_024;

/// Builder for a [`Btree`].
pub struct BtreeConfig<D: BlockDevice, K: TreeKey = crate::key::IntKey> {
    device: D,
    cache_capacity: usize,
    free_limit: u16,
    _marker: PhantomData<K>,
}

impl<D: BlockDevice, K: TreeKey> BtreeConfig<D, K> {
    /// Starts a new config over `device`, using the device's own block
    /// size and sane defaults for cache capacity and the merge threshold.
    pub fn new(device: D) -> Self {
        Self {
            device,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            free_limit: DEFAULT_FREE_LIMIT,
            _marker: PhantomData,
        }
    }

    /// Sets the block size. Only meaningful before the device has any
    /// blocks; rejected otherwise since every existing block is already
    /// sized to the device's current `block_size()`.
    #[must_use]
    pub fn block_size(self, block_size: u16) -> Self {
        debug_assert_eq!(
            block_size,
            self.device.block_size(),
            "device block_size is fixed at construction"
        );
        self
    }

    /// Sets the number of blocks the in-memory buffer cache holds.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets `FREE_LIMIT`, the reclaimable-free threshold that triggers a
    /// merge attempt on delete.
    #[must_use]
    pub fn free_limit(mut self, free_limit: u16) -> Self {
        self.free_limit = free_limit;
        self
    }

    /// Builds the tree.
    pub fn open(self) -> Result<Btree<K, D>> {
        if (self.free_limit as u32) >= self.device.block_size() as u32 {
            return Err(Error::Invalid("free_limit must be smaller than block_size"));
        }
        Btree::new(self.device, self.cache_capacity, self.free_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::key::IntKey;

    #[test]
    fn open_with_defaults() {
        let tree: Btree<IntKey, _> = BtreeConfig::new(MemDevice::new(4096)).open().unwrap();
        assert_eq!(tree.block_size(), 4096);
        assert!(tree.is_empty());
    }

    #[test]
    fn rejects_free_limit_at_least_block_size() {
        let err = BtreeConfig::<_, IntKey>::new(MemDevice::new(64))
            .free_limit(64)
            .open()
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }
}
