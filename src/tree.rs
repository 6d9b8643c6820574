// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-level tree handle and write-transaction type.

use crate::alloc::FreeList;
use crate::block::item::BlockRef;
use crate::cache::BlockCache;
use crate::device::{BlockDevice, BlockNo};
use crate::error::{Error, Result};
use crate::key::TreeKey;
use std::cell::Cell;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// The persistent root reference: a height and, for a non-empty tree, the
/// block reference of the top-most node.
///
/// `height == 0` means the tree is empty. `height == 1` means the root is
/// itself a leaf.
#[derive(Clone, Copy, Debug)]
pub struct Root {
    pub height: u8,
    pub root_ref: Option<BlockRef>,
}

impl Default for Root {
    fn default() -> Self {
        Self {
            height: 0,
            root_ref: None,
        }
    }
}

/// A write transaction: carries the sequence number stamped into every
/// block, item, and block reference dirtied under it, and tracks which
/// blocks must be flushed to the device on commit.
///
/// Dropping a `Txn` without calling [`Txn::commit`] leaves its dirtied
/// blocks only in the in-memory cache; a warning is logged, since the
/// transaction boundary is owned by the caller (see `SPEC_FULL.md` §5).
pub struct Txn<'a, K: TreeKey, D: BlockDevice> {
    pub(crate) tree: &'a Btree<K, D>,
    seq: u64,
    dirty: Mutex<HashSet<BlockNo>>,
    committed: Cell<bool>,
}

impl<'a, K: TreeKey, D: BlockDevice> Txn<'a, K, D> {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn mark_dirty(&self, blkno: BlockNo) {
        self.dirty.lock().expect("txn dirty-set lock poisoned").insert(blkno);
    }

    /// Flushes every block dirtied under this transaction to the device.
    pub fn commit(self) -> Result<()> {
        self.committed.set(true);
        let dirty = std::mem::take(&mut *self.dirty.lock().expect("txn dirty-set lock poisoned"));
        for blkno in dirty {
            let buf = self.tree.cache.fetch(&self.tree.device, blkno)?;
            let encoded = buf.lock_arc().encode();
            self.tree.device.write_block(blkno, &encoded)?;
        }
        Ok(())
    }
}

impl<K: TreeKey, D: BlockDevice> Drop for Txn<'_, K, D> {
    fn drop(&mut self) {
        if !self.committed.get() {
            log::warn!("txn seq={} dropped without being committed", self.seq);
        }
    }
}

/// A copy-on-write B-tree over fixed-width keys and variable-length
/// values, generic over the key type and the backing [`BlockDevice`].
pub struct Btree<K: TreeKey, D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) cache: BlockCache<K>,
    pub(crate) alloc: FreeList,
    pub(crate) root: RwLock<Root>,
    pub(crate) block_size: u16,
    pub(crate) free_limit: u16,
    seqno: AtomicU64,
    _marker: PhantomData<K>,
}

impl<K: TreeKey, D: BlockDevice> Btree<K, D> {
    pub(crate) fn new(device: D, cache_capacity: usize, free_limit: u16) -> Result<Self> {
        let block_size = device.block_size();
        Ok(Self {
            cache: BlockCache::with_capacity(cache_capacity),
            alloc: FreeList::new(device.block_count()),
            device,
            root: RwLock::new(Root::default()),
            block_size,
            free_limit,
            seqno: AtomicU64::new(1),
            _marker: PhantomData,
        })
    }

    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    pub fn height(&self) -> u8 {
        self.root.read().expect("root lock poisoned").height
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }

    /// Begins a write transaction, drawing a fresh sequence number.
    ///
    /// All of `insert`/`update`/`delete`/`dirty` take the resulting `Txn`
    /// by reference; call [`Txn::commit`] to flush dirtied blocks.
    pub fn begin_write(&self) -> Txn<'_, K, D> {
        let seq = self.seqno.fetch_add(1, Ordering::SeqCst);
        Txn {
            tree: self,
            seq,
            dirty: Mutex::new(HashSet::new()),
            committed: Cell::new(false),
        }
    }

    pub(crate) fn alloc_block(&self, level: u8, seq: u64) -> Result<crate::cache::CachedBlock<K>> {
        let blkno = self.alloc.alloc(&self.device)?;
        let block = crate::block::Block::<K>::new_empty(blkno, seq, level, self.block_size);
        let buf = std::sync::Arc::new(parking_lot::Mutex::new(block));
        self.cache.insert(blkno, buf.clone());
        Ok(buf)
    }

    pub(crate) fn free_block(&self, blkno: BlockNo) {
        self.cache.evict(blkno);
        self.alloc.free(blkno);
    }

    pub(crate) fn fetch(&self, blkno: BlockNo) -> Result<crate::cache::CachedBlock<K>> {
        self.cache.fetch(&self.device, blkno)
    }

    /// Looks up `key`, returning its current sequence number and a copy of
    /// its value, or [`Error::NotFound`].
    pub fn lookup(&self, key: &K) -> Result<(u64, Vec<u8>)> {
        let descent = self.descend(None, key, &crate::descent::Mode::Lookup)?;
        let leaf = descent.leaf;
        let (pos, found) = leaf.find_pos(key);
        if !found {
            return Err(Error::NotFound);
        }
        Ok((leaf.seq_at(pos), leaf.val_at(pos).to_vec()))
    }

    /// Inserts `key` with the given value under `txn`, failing with
    /// [`Error::Exists`] if the key is already present.
    pub fn insert(&self, txn: &Txn<'_, K, D>, key: &K, val: &[u8]) -> Result<()> {
        if crate::block::item::all_val_bytes::<K>(val.len()) as u32
            > self.block_size as u32 - crate::block::header::Header::LEN as u32 - 2
        {
            return Err(Error::Invalid("value too large to ever fit in an empty block"));
        }

        let descent = self.descend(
            Some(txn),
            key,
            &crate::descent::Mode::Insert { val_len: val.len() },
        )?;
        let mut leaf = descent.leaf;
        let (pos, found) = leaf.find_pos(key);
        if found {
            return Err(Error::Exists);
        }
        leaf.insert_at(pos, key, txn.seq(), val);
        txn.mark_dirty(leaf.blkno);
        Ok(())
    }

    /// Overwrites the value of an existing item, refreshing its sequence
    /// number. Fails with [`Error::NotFound`] if the key is absent.
    pub fn update(&self, txn: &Txn<'_, K, D>, key: &K, val: &[u8]) -> Result<()> {
        let descent = self.descend(Some(txn), key, &crate::descent::Mode::Dirty)?;
        let mut leaf = descent.leaf;
        let (pos, found) = leaf.find_pos(key);
        if !found {
            return Err(Error::NotFound);
        }
        leaf.update_at(pos, txn.seq(), val)?;
        txn.mark_dirty(leaf.blkno);
        Ok(())
    }

    /// Deletes `key`, failing with [`Error::NotFound`] if it is absent.
    pub fn delete(&self, txn: &Txn<'_, K, D>, key: &K) -> Result<()> {
        let descent = self.descend(Some(txn), key, &crate::descent::Mode::Delete)?;
        let mut leaf = descent.leaf;
        let (pos, found) = leaf.find_pos(key);
        if !found {
            return Err(Error::NotFound);
        }
        leaf.delete_at(pos);
        let blkno = leaf.blkno;
        let now_empty = leaf.is_empty();
        txn.mark_dirty(blkno);

        if now_empty {
            let mut root = self.root.write().expect("root lock poisoned");
            if root.root_ref.map(|r| r.blkno) == Some(blkno) {
                root.height = 0;
                root.root_ref = None;
                drop(leaf);
                self.free_block(blkno);
            }
        }
        Ok(())
    }

    /// Touches every block on the path to `key` so a subsequent `update`
    /// on the same key within this transaction cannot fail due to split
    /// or compaction. Fails with [`Error::NotFound`] if the key is absent.
    pub fn dirty(&self, txn: &Txn<'_, K, D>, key: &K) -> Result<()> {
        let descent = self.descend(Some(txn), key, &crate::descent::Mode::Dirty)?;
        let (_, found) = descent.leaf.find_pos(key);
        if !found {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}
