// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The single-pass top-down descent engine: lock cascading ("crabbing")
//! from the root down to a leaf, with proactive split (on insert) and
//! merge (on delete) performed one level ahead of the lock about to be
//! taken.
//!
//! Grounded on `btree.c`'s `btree_walk`, `try_split`, and `try_merge`.
//! `root_rw` plays the role of the virtual parent lock for the first
//! step; every step after that uses the previous level's block lock as
//! the parent. Exactly one parent lock is ever held while the child lock
//! is being acquired, and it is dropped immediately afterwards.

use crate::block::item::{all_val_bytes, BlockRef};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::key::TreeKey;
use crate::tree::{Btree, Root, Txn};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use std::sync::RwLockWriteGuard;

pub(crate) type BlockGuard<K> = ArcMutexGuard<RawMutex, crate::block::Block<K>>;

/// Descent mode. `dirty()` reports whether the mode writes to blocks.
pub(crate) enum Mode {
    Lookup,
    Insert { val_len: usize },
    Delete,
    Dirty,
    /// Plain `next` when `seq_floor` is `None`, `since` otherwise.
    Next { seq_floor: Option<u64> },
}

impl Mode {
    fn is_dirty(&self) -> bool {
        matches!(self, Mode::Insert { .. } | Mode::Delete | Mode::Dirty)
    }
}

pub(crate) struct DescentResult<K: TreeKey> {
    pub leaf: BlockGuard<K>,
    /// For `Next`: the key at which iteration should resume if the
    /// descent needs to be retried past a seq-pruned subtree.
    pub next_key: K,
}

fn encode_ref(r: &BlockRef) -> [u8; BlockRef::ENCODED_LEN] {
    let mut buf = [0u8; BlockRef::ENCODED_LEN];
    r.encode_into(&mut buf);
    buf
}

fn decode_ref(bytes: &[u8]) -> BlockRef {
    BlockRef::decode(bytes)
}

impl<K: TreeKey, D: BlockDevice> Btree<K, D> {
    /// Binary search generalized with seq-pruning: for `Next{seq_floor:
    /// Some(floor)}`, returns the first slot at or after `key` whose
    /// referenced subtree has `ref.seq >= floor`; otherwise behaves as
    /// ordinary `find_pos`.
    fn find_pos_after_seq(block: &crate::block::Block<K>, key: &K, seq_floor: Option<u64>) -> usize {
        let (mut pos, _) = block.find_pos(key);
        if let Some(floor) = seq_floor {
            while pos < block.nr_items() {
                let r = decode_ref(block.val_at(pos));
                if r.seq >= floor {
                    break;
                }
                pos += 1;
            }
        }
        pos
    }

    pub(crate) fn descend(
        &self,
        txn: Option<&Txn<'_, K, D>>,
        key: &K,
        mode: &Mode,
    ) -> Result<DescentResult<K>> {
        let dirty = mode.is_dirty();
        debug_assert_eq!(dirty, txn.is_some());
        let mut next_key = K::MAX;

        let (mut parent, mut level) = self.descend_root(txn, key, mode)?;

        // Did `descend_root` already land on the leaf (height == 1)?
        if level == 0 {
            return Ok(DescentResult { leaf: parent, next_key });
        }

        loop {
            let pos = Self::find_pos_after_seq(&parent, key, match mode {
                Mode::Next { seq_floor } => *seq_floor,
                _ => None,
            });
            if pos >= parent.nr_items() {
                return Err(if matches!(mode, Mode::Next { seq_floor: Some(_) }) {
                    Error::NotFound
                } else {
                    Error::Internal("descent ran past the right spine")
                });
            }

            if matches!(mode, Mode::Next { .. }) {
                next_key = parent.key_at(pos).inc();
            }

            let child_ref = decode_ref(parent.val_at(pos));
            let child_level = level - 1;
            let child_cached = self.fetch(child_ref.blkno)?;
            let mut child = child_cached.lock_arc();

            match mode {
                Mode::Insert { val_len } => {
                    child = self.try_split(&mut parent, pos, child, key, *val_len, child_level, txn.expect("insert carries a txn"))?;
                }
                Mode::Delete => {
                    child = self.try_merge(&mut parent, pos, child, txn.expect("delete carries a txn"))?;
                }
                _ => {}
            }

            // Stamp the block we're continuing into with this
            // transaction's seq and refresh its ref in `parent`, so the
            // new seq is visible to a `since` descent from above.
            // `find_pos` is recomputed rather than reusing `pos`, since
            // a split/merge above may have shifted or replaced the slot.
            if dirty {
                let t = txn.expect("dirty descent carries a txn");
                child.seq = t.seq();
                let (ppos, _) = parent.find_pos(key);
                parent.set_val_at(ppos, &encode_ref(&child.block_ref()));
                t.mark_dirty(parent.blkno);
            }

            let child_blkno = child.blkno;
            drop(parent);
            if dirty {
                txn.expect("dirty descent carries a txn").mark_dirty(child_blkno);
            }

            if child_level == 0 {
                return Ok(DescentResult { leaf: child, next_key });
            }
            parent = child;
            level = child_level;
        }
    }

    /// Handles the very first step of the descent: locking (or growing,
    /// or shrinking) the root, then locking the node it points to. This
    /// is the only place a `RwLock<Root>` guard, rather than a block
    /// guard, plays the role of "parent" in the crabbing protocol.
    fn descend_root(
        &self,
        txn: Option<&Txn<'_, K, D>>,
        key: &K,
        mode: &Mode,
    ) -> Result<(BlockGuard<K>, u8)> {
        let dirty = mode.is_dirty();

        if dirty {
            let mut root = self.root.write().expect("root lock poisoned");
            if root.height == 0 {
                return self.descend_root_empty(&mut root, key, mode, txn.expect("dirty descent carries a txn"));
            }

            let level = root.height - 1;
            let root_ref = root.root_ref.expect("nonzero height implies a root_ref");
            let child_cached = self.fetch(root_ref.blkno)?;
            let mut child = child_cached.lock_arc();

            // Stamp the child before it's touched so every constructor of
            // a `BlockRef` to it downstream (including `try_split_root`'s
            // own parent-growth item) sees the new seq. Tentatively
            // publish it as the root's ref; `try_split_root` overwrites
            // this if the tree actually grows a level.
            let t = txn.expect("dirty descent carries a txn");
            child.seq = t.seq();
            root.root_ref = Some(child.block_ref());

            // `Mode::Delete` needs no action here: the root's direct
            // child has no sibling to merge with, by definition. Shrink
            // is instead triggered from inside `try_merge` when the next
            // level down drains its own sibling and the root's direct
            // child is left with a single item.
            if let Mode::Insert { val_len } = mode {
                child = self.try_split_root(&mut root, child, key, *val_len, level, t)?;
            }

            let blkno = child.blkno;
            drop(root);
            t.mark_dirty(blkno);
            Ok((child, level))
        } else {
            let root = self.root.read().expect("root lock poisoned");
            if root.height == 0 {
                return Err(Error::NotFound);
            }
            let root_ref = root.root_ref.expect("nonzero height implies a root_ref");
            if let Mode::Next { seq_floor: Some(floor) } = mode {
                if root_ref.seq < *floor {
                    return Err(Error::NotFound);
                }
            }
            let level = root.height - 1;
            let child_cached = self.fetch(root_ref.blkno)?;
            let child = child_cached.lock_arc();
            drop(root);
            Ok((child, level))
        }
    }

    fn descend_root_empty(
        &self,
        root: &mut RwLockWriteGuard<'_, Root>,
        key: &K,
        mode: &Mode,
        txn: &Txn<'_, K, D>,
    ) -> Result<(BlockGuard<K>, u8)> {
        match mode {
            Mode::Insert { .. } => {
                let _ = key;
                let buf = self.alloc_block(0, txn.seq())?;
                let leaf = buf.lock_arc();
                root.height = 1;
                root.root_ref = Some(leaf.block_ref());
                txn.mark_dirty(leaf.blkno);
                Ok((leaf, 0))
            }
            _ => Err(Error::NotFound),
        }
    }

    fn try_split_root(
        &self,
        root: &mut RwLockWriteGuard<'_, Root>,
        b: BlockGuard<K>,
        key: &K,
        val_len: usize,
        level: u8,
        txn: &Txn<'_, K, D>,
    ) -> Result<BlockGuard<K>> {
        let val_len = if level > 0 { BlockRef::ENCODED_LEN } else { val_len };
        let need = all_val_bytes::<K>(val_len) as u32;
        let mut b = b;

        if b.contig_free() >= need {
            return Ok(b);
        }
        if b.reclaimable_free() >= need {
            b.compact();
            txn.mark_dirty(b.blkno);
            return Ok(b);
        }

        let p_buf = self.alloc_block(level + 1, txn.seq())?;
        let mut p = p_buf.lock_arc();
        let b_ref = b.block_ref();
        p.insert_at(0, &K::MAX, txn.seq(), &encode_ref(&b_ref));

        root.height += 1;
        root.root_ref = Some(p.block_ref());

        let l_buf = self.alloc_block(level, txn.seq())?;
        let mut l = l_buf.lock_arc();

        let budget = b.used_total() / 2;
        b.move_items(&mut l, false, budget);

        let l_ref = l.block_ref();
        let l_key = l.greatest_key().expect("split produces a nonempty left block");
        p.insert_at(0, &l_key, txn.seq(), &encode_ref(&l_ref));

        txn.mark_dirty(p.blkno);
        txn.mark_dirty(l.blkno);
        drop(p);

        if *key <= l_key {
            Ok(l)
        } else {
            drop(l);
            if b.contig_free() < need {
                b.compact();
            }
            txn.mark_dirty(b.blkno);
            Ok(b)
        }
    }

    /// Splits `b` (the child at `parent[pos]`) if it lacks room for an
    /// insert of `val_len` more bytes, returning whichever block the
    /// descent should continue into.
    fn try_split(
        &self,
        parent: &mut BlockGuard<K>,
        pos: usize,
        b: BlockGuard<K>,
        key: &K,
        val_len: usize,
        level: u8,
        txn: &Txn<'_, K, D>,
    ) -> Result<BlockGuard<K>> {
        let val_len = if level > 0 { BlockRef::ENCODED_LEN } else { val_len };
        let need = all_val_bytes::<K>(val_len) as u32;
        let mut b = b;

        if b.contig_free() >= need {
            return Ok(b);
        }
        if b.reclaimable_free() >= need {
            b.compact();
            txn.mark_dirty(b.blkno);
            return Ok(b);
        }

        let l_buf = self.alloc_block(level, txn.seq())?;
        let mut l = l_buf.lock_arc();

        let budget = b.used_total() / 2;
        b.move_items(&mut l, false, budget);

        let l_ref = l.block_ref();
        let l_key = l.greatest_key().expect("split produces a nonempty left block");
        parent.insert_at(pos, &l_key, txn.seq(), &encode_ref(&l_ref));
        txn.mark_dirty(parent.blkno);
        txn.mark_dirty(l.blkno);

        if *key <= l_key {
            drop(b);
            Ok(l)
        } else {
            drop(l);
            if b.contig_free() < need {
                b.compact();
            }
            txn.mark_dirty(b.blkno);
            Ok(b)
        }
    }

    /// Merges items from a sibling into `b` (the child at `parent[pos]`)
    /// if `b` is carrying more reclaimable free space than `free_limit`.
    fn try_merge(
        &self,
        parent: &mut BlockGuard<K>,
        pos: usize,
        b: BlockGuard<K>,
        txn: &Txn<'_, K, D>,
    ) -> Result<BlockGuard<K>> {
        let mut b = b;
        if b.reclaimable_free() <= u32::from(self.free_limit) {
            return Ok(b);
        }
        if parent.nr_items() < 2 {
            return Ok(b);
        }

        let (sib_pos, move_right) = if pos > 0 { (pos - 1, true) } else { (pos + 1, false) };
        let sib_ref = decode_ref(parent.val_at(sib_pos));
        let sib_cached = self.fetch(sib_ref.blkno)?;
        let mut sib = sib_cached.lock_arc();

        let budget = if sib.used_total() <= b.reclaimable_free() {
            sib.used_total()
        } else {
            b.reclaimable_free().saturating_sub(u32::from(self.free_limit))
        };

        if b.contig_free() < budget {
            b.compact();
        }

        sib.move_items(&mut b, move_right, budget);
        // Stamped before the root-shrink check below, which may publish
        // `b.block_ref()` as the new root ref.
        b.seq = txn.seq();
        txn.mark_dirty(b.blkno);

        if !move_right {
            let new_key = b.greatest_key().expect("b is nonempty after absorbing items");
            parent.set_key_at(pos, &new_key);
        }
        parent.set_val_at(pos, &encode_ref(&b.block_ref()));

        if sib.is_empty() {
            parent.delete_at(sib_pos);
            let sib_blkno = sib.blkno;
            drop(sib);
            self.free_block(sib_blkno);
        } else if move_right {
            sib.seq = txn.seq();
            let sib_key = sib.greatest_key().expect("sib still has items");
            parent.set_key_at(sib_pos, &sib_key);
            parent.set_val_at(sib_pos, &encode_ref(&sib.block_ref()));
            txn.mark_dirty(sib.blkno);
        }
        txn.mark_dirty(parent.blkno);

        if parent.nr_items() == 1 {
            let mut root = self.root.write().expect("root lock poisoned");
            if root.root_ref.map(|r| r.blkno) == Some(parent.blkno) {
                root.height -= 1;
                root.root_ref = Some(b.block_ref());
                let parent_blkno = parent.blkno;
                drop(root);
                self.free_block(parent_blkno);
            }
        }

        Ok(b)
    }
}
