// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Range iteration (`next`/`since`) and the `hole` scan.
//!
//! Grounded on `btree.c`'s `btree_next`: a read-only descent pins a leaf
//! buffer and scans forward within it; once the leaf is exhausted the
//! buffer is released and a fresh descent resumes from just past the
//! last key returned. Exposed here as a plain `Iterator`, mirroring the
//! `tree.range(..)` surface of the crate this engine is grounded on,
//! while every item yielded still goes through the same leaf-pinning and
//! crabbed re-descent described in `SPEC_FULL.md` §4.E.

use crate::descent::{BlockGuard, Mode};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::key::TreeKey;
use crate::tree::Btree;

/// An item yielded by [`RangeIter`]: an owned copy of a leaf item.
#[derive(Clone, Debug)]
pub struct ItemRef<K: TreeKey> {
    pub key: K,
    pub seq: u64,
    pub val: Vec<u8>,
}

/// Iterator over `[first, last]`, optionally filtered to items with
/// `seq >= floor` (the `since` variant).
pub struct RangeIter<'a, K: TreeKey, D: BlockDevice> {
    tree: &'a Btree<K, D>,
    last: K,
    seq_floor: Option<u64>,
    pinned: Option<(BlockGuard<K>, usize)>,
    resume_key: K,
    fallback_key: K,
    done: bool,
}

impl<'a, K: TreeKey, D: BlockDevice> RangeIter<'a, K, D> {
    pub(crate) fn new(tree: &'a Btree<K, D>, first: K, last: K, seq_floor: Option<u64>) -> Self {
        Self {
            tree,
            last,
            seq_floor,
            pinned: None,
            resume_key: first,
            fallback_key: K::MAX,
            done: false,
        }
    }
}

impl<'a, K: TreeKey, D: BlockDevice> Iterator for RangeIter<'a, K, D> {
    type Item = Result<ItemRef<K>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some((leaf, pos)) = &mut self.pinned {
                while *pos < leaf.nr_items() {
                    let key = leaf.key_at(*pos);
                    if key > self.last {
                        self.done = true;
                        self.pinned = None;
                        return None;
                    }
                    let seq = leaf.seq_at(*pos);
                    if let Some(floor) = self.seq_floor {
                        if seq < floor {
                            *pos += 1;
                            continue;
                        }
                    }
                    let val = leaf.val_at(*pos).to_vec();
                    self.resume_key = key.inc();
                    *pos += 1;
                    return Some(Ok(ItemRef { key, seq, val }));
                }
                self.pinned = None;
            }

            if self.resume_key > self.last {
                self.done = true;
                return None;
            }

            let mode = Mode::Next { seq_floor: self.seq_floor };
            match self.tree.descend(None, &self.resume_key, &mode) {
                Ok(descent) => {
                    self.fallback_key = descent.next_key;
                    self.pinned = Some((descent.leaf, 0));
                }
                Err(Error::NotFound) => {
                    if self.fallback_key > self.resume_key {
                        self.resume_key = self.fallback_key;
                        self.fallback_key = K::MAX;
                    } else {
                        self.done = true;
                        return None;
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<K: TreeKey, D: BlockDevice> Btree<K, D> {
    /// Iterates items with keys in `[first, last]` in ascending order.
    pub fn range(&self, first: K, last: K) -> RangeIter<'_, K, D> {
        RangeIter::new(self, first, last, None)
    }

    /// Iterates items with keys in `[first, last]` whose sequence number
    /// is at least `floor`, in ascending order.
    pub fn since(&self, first: K, last: K, floor: u64) -> RangeIter<'_, K, D> {
        RangeIter::new(self, first, last, Some(floor))
    }

    /// Finds the smallest key in `[first, last]` with no item, or
    /// [`Error::NoSpace`] if every key in the range is occupied.
    pub fn hole(&self, first: K, last: K) -> Result<K> {
        let mut candidate = first;
        for item in self.range(first, last) {
            let item = item?;
            if candidate < item.key {
                return Ok(candidate);
            }
            candidate = item.key.inc();
        }
        if candidate <= last {
            Ok(candidate)
        } else {
            Err(Error::NoSpace)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BtreeConfig;
    use crate::device::MemDevice;
    use crate::key::IntKey;

    fn open() -> Btree<IntKey, MemDevice> {
        BtreeConfig::new(MemDevice::new(256)).block_size(256).open().unwrap()
    }

    #[test]
    fn range_yields_ascending_items() {
        let tree = open();
        let txn = tree.begin_write();
        for k in [5u64, 1, 9, 3] {
            tree.insert(&txn, &IntKey(k), format!("v{k}").as_bytes()).unwrap();
        }
        txn.commit().unwrap();

        let got: Vec<u64> = tree
            .range(IntKey(0), IntKey::MAX)
            .map(|r| r.unwrap().key.0)
            .collect();
        assert_eq!(got, vec![1, 3, 5, 9]);
    }

    #[test]
    fn since_filters_by_seq() {
        let tree = open();
        let txn1 = tree.begin_write();
        tree.insert(&txn1, &IntKey(1), b"a").unwrap();
        let seq1 = txn1.seq();
        txn1.commit().unwrap();

        let txn2 = tree.begin_write();
        tree.insert(&txn2, &IntKey(2), b"b").unwrap();
        txn2.commit().unwrap();

        let got: Vec<u64> = tree
            .since(IntKey(0), IntKey::MAX, seq1 + 1)
            .map(|r| r.unwrap().key.0)
            .collect();
        assert_eq!(got, vec![2]);
    }

    #[test]
    fn hole_finds_first_gap() {
        let tree = open();
        let txn = tree.begin_write();
        for k in [0u64, 1, 2, 4, 5] {
            tree.insert(&txn, &IntKey(k), b"x").unwrap();
        }
        txn.commit().unwrap();

        let gap = tree.hole(IntKey(0), IntKey(10)).unwrap();
        assert_eq!(gap, IntKey(3));
    }

    #[test]
    fn hole_no_space_when_fully_packed() {
        let tree = open();
        let txn = tree.begin_write();
        for k in 0u64..5 {
            tree.insert(&txn, &IntKey(k), b"x").unwrap();
        }
        txn.commit().unwrap();

        assert!(matches!(tree.hole(IntKey(0), IntKey(4)), Err(Error::NoSpace)));
    }
}
