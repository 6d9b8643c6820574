// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block storage backends.
//!
//! The engine is generic over a [`BlockDevice`] so a host filesystem can
//! supply its own backing store; this crate ships an in-memory device used
//! by tests and as a sane default, and a file-backed device for real
//! persistence.

use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

pub type BlockNo = u64;

/// A fixed-size-block storage backend.
///
/// Every block is exactly `block_size()` bytes. `grow_by` extends the
/// device and returns the block number of the first newly-available
/// block; blocks below `block_count()` are assumed already allocated or
/// free-listed by the caller.
pub trait BlockDevice: Send + Sync {
    fn block_size(&self) -> u16;
    fn block_count(&self) -> u64;
    fn read_block(&self, blkno: BlockNo) -> Result<Vec<u8>>;
    fn write_block(&self, blkno: BlockNo, data: &[u8]) -> Result<()>;

    /// Extends the device by `count` blocks, returning the blkno of the
    /// first one.
    fn grow_by(&self, count: u64) -> Result<BlockNo>;
}

/// An in-memory block device backed by a `Vec<Vec<u8>>`.
///
/// This is the default used by the test suite: no syscalls, trivially
/// inspectable, and fast enough for randomized soak tests.
pub struct MemDevice {
    block_size: u16,
    blocks: Mutex<Vec<Vec<u8>>>,
}

impl MemDevice {
    pub fn new(block_size: u16) -> Self {
        Self {
            block_size,
            blocks: Mutex::new(Vec::new()),
        }
    }
}

impl BlockDevice for MemDevice {
    fn block_size(&self) -> u16 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.blocks.lock().expect("mem device lock poisoned").len() as u64
    }

    fn read_block(&self, blkno: BlockNo) -> Result<Vec<u8>> {
        let blocks = self.blocks.lock().expect("mem device lock poisoned");
        blocks
            .get(blkno as usize)
            .cloned()
            .ok_or(Error::Internal("read of unallocated block"))
    }

    fn write_block(&self, blkno: BlockNo, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.block_size as usize);
        let mut blocks = self.blocks.lock().expect("mem device lock poisoned");
        let slot = blocks
            .get_mut(blkno as usize)
            .ok_or(Error::Internal("write of unallocated block"))?;
        slot.copy_from_slice(data);
        Ok(())
    }

    fn grow_by(&self, count: u64) -> Result<BlockNo> {
        let mut blocks = self.blocks.lock().expect("mem device lock poisoned");
        let first = blocks.len() as u64;
        blocks.resize_with(blocks.len() + count as usize, || vec![0u8; self.block_size as usize]);
        Ok(first)
    }
}

/// A block device backed by a single regular file, seeking to
/// `blkno * block_size` for each access.
pub struct FileDevice {
    block_size: u16,
    file: Mutex<std::fs::File>,
    len_blocks: Mutex<u64>,
}

impl FileDevice {
    pub fn open(path: impl AsRef<Path>, block_size: u16) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        let len_blocks = len / block_size as u64;
        Ok(Self {
            block_size,
            file: Mutex::new(file),
            len_blocks: Mutex::new(len_blocks),
        })
    }
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> u16 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        *self.len_blocks.lock().expect("file device lock poisoned")
    }

    fn read_block(&self, blkno: BlockNo) -> Result<Vec<u8>> {
        let mut file = self.file.lock().expect("file device lock poisoned");
        let mut buf = vec![0u8; self.block_size as usize];
        file.seek(SeekFrom::Start(blkno * self.block_size as u64))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&self, blkno: BlockNo, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.block_size as usize);
        let mut file = self.file.lock().expect("file device lock poisoned");
        file.seek(SeekFrom::Start(blkno * self.block_size as u64))?;
        file.write_all(data)?;
        Ok(())
    }

    fn grow_by(&self, count: u64) -> Result<BlockNo> {
        let mut len_blocks = self.len_blocks.lock().expect("file device lock poisoned");
        let first = *len_blocks;
        let mut file = self.file.lock().expect("file device lock poisoned");
        let new_len = (first + count) * self.block_size as u64;
        file.set_len(new_len)?;
        *len_blocks += count;
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_roundtrip() {
        let dev = MemDevice::new(64);
        let first = dev.grow_by(2).unwrap();
        assert_eq!(first, 0);
        assert_eq!(dev.block_count(), 2);
        dev.write_block(1, &[7u8; 64]).unwrap();
        assert_eq!(dev.read_block(1).unwrap(), vec![7u8; 64]);
    }

    #[test]
    fn file_device_roundtrip() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let dev = FileDevice::open(tmp.path(), 128).unwrap();
        let first = dev.grow_by(3).unwrap();
        assert_eq!(first, 0);
        dev.write_block(2, &[9u8; 128]).unwrap();
        assert_eq!(dev.read_block(2).unwrap(), vec![9u8; 128]);
        assert_eq!(dev.read_block(0).unwrap(), vec![0u8; 128]);
    }
}
