// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Free-block allocation.
//!
//! The kernel original hands this off to a buddy allocator spanning the
//! whole volume; this crate only needs to hand the engine fresh blocks
//! from its own device, so a bump high-water mark plus a free stack is
//! enough. Freed blocks are recycled ahead of growing the device.

use crate::device::{BlockDevice, BlockNo};
use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct FreeList {
    high_water: AtomicU64,
    free: Mutex<Vec<BlockNo>>,
}

impl FreeList {
    pub fn new(initial_high_water: u64) -> Self {
        Self {
            high_water: AtomicU64::new(initial_high_water),
            free: Mutex::new(Vec::new()),
        }
    }

    /// Hands out a block number, preferring a recycled block over growing
    /// the device.
    pub fn alloc(&self, device: &dyn BlockDevice) -> Result<BlockNo> {
        if let Some(blkno) = self.free.lock().expect("freelist lock poisoned").pop() {
            return Ok(blkno);
        }

        let blkno = self.high_water.fetch_add(1, Ordering::SeqCst);
        if blkno >= device.block_count() {
            device.grow_by((blkno - device.block_count()) + 1)?;
        }
        Ok(blkno)
    }

    /// Returns a block to the free stack for future reuse.
    pub fn free(&self, blkno: BlockNo) {
        self.free.lock().expect("freelist lock poisoned").push(blkno);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    #[test]
    fn alloc_grows_device_then_recycles() {
        let dev = MemDevice::new(64);
        let fl = FreeList::new(0);
        let a = fl.alloc(&dev).unwrap();
        let b = fl.alloc(&dev).unwrap();
        assert_ne!(a, b);
        assert_eq!(dev.block_count(), 2);

        fl.free(a);
        let c = fl.alloc(&dev).unwrap();
        assert_eq!(c, a);
        assert_eq!(dev.block_count(), 2);
    }
}
