// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory representation of a single B-tree block: a header, a dense
//! sorted array of item offsets, and a payload region where item records
//! are packed from the high end of the block downward.
//!
//! Grounded on `btree.c`'s `struct scoutfs_btree_block` and its
//! `contig_free`/`reclaimable_free`/`used_total`/`find_pos`/`create_item`/
//! `delete_item`/`compact_items` family of functions. The C code aliases a
//! single `char[]` buffer as header + offsets + items and sorts `item_offs`
//! in place by walking raw pointers; this rendition keeps the same layout
//! and algorithms but never aliases memory unsafely, since the crate
//! forbids `unsafe` (see Non-goals in `SPEC_FULL.md` §9).

pub mod header;
pub mod item;

use crate::error::{Error, Result};
use crate::key::TreeKey;
use byteorder::{ByteOrder, LittleEndian};
use header::Header;
use item::{
    all_val_bytes, read_item, record_size_at, val_bytes, val_range, write_item_header, BlockRef,
    ItemView,
};
use std::cmp::Reverse;
use std::marker::PhantomData;

/// An in-memory, mutable B-tree block.
///
/// `item_offs[i]` is the byte offset (from the start of the block) of the
/// `i`-th item in key order; `item_offs` is always sorted so that
/// `key_at(i) < key_at(i + 1)`.
#[derive(Clone, Debug)]
pub struct Block<K: TreeKey> {
    pub blkno: u64,
    pub seq: u64,
    pub level: u8,
    free_end: u16,
    free_reclaim: u16,
    item_offs: Vec<u16>,
    payload: Vec<u8>,
    block_size: u16,
    _marker: PhantomData<K>,
}

impl<K: TreeKey> Block<K> {
    /// Builds a fresh, empty block of the given size.
    pub fn new_empty(blkno: u64, seq: u64, level: u8, block_size: u16) -> Self {
        Self {
            blkno,
            seq,
            level,
            free_end: block_size,
            free_reclaim: 0,
            item_offs: Vec::new(),
            payload: vec![0u8; block_size as usize],
            block_size,
            _marker: PhantomData,
        }
    }

    /// Decodes a block from its on-disk image.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let block_size = buf.len();
        if block_size > u16::MAX as usize {
            return Err(Error::Internal("block larger than u16::MAX"));
        }
        let hdr = Header::decode_from(buf)?;
        let mut item_offs = Vec::with_capacity(hdr.nr_items as usize);
        let mut pos = Header::LEN;
        for _ in 0..hdr.nr_items {
            if pos + 2 > buf.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "block too short for item_offs",
                )));
            }
            item_offs.push(LittleEndian::read_u16(&buf[pos..pos + 2]));
            pos += 2;
        }

        Ok(Self {
            blkno: hdr.blkno,
            seq: hdr.seq,
            level: hdr.level,
            free_end: hdr.free_end,
            free_reclaim: hdr.free_reclaim,
            item_offs,
            payload: buf.to_vec(),
            block_size: block_size as u16,
            _marker: PhantomData,
        })
    }

    /// Serializes the block (header, item_offs, and packed items) into its
    /// on-disk image.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.payload.clone();
        let hdr = Header {
            blkno: self.blkno,
            seq: self.seq,
            level: self.level,
            free_end: self.free_end,
            free_reclaim: self.free_reclaim,
            #[allow(clippy::cast_possible_truncation)]
            nr_items: self.item_offs.len() as u16,
        };
        hdr.encode_into(&mut buf);
        let mut pos = Header::LEN;
        for &off in &self.item_offs {
            LittleEndian::write_u16(&mut buf[pos..pos + 2], off);
            pos += 2;
        }
        buf
    }

    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn nr_items(&self) -> usize {
        self.item_offs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_offs.is_empty()
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            blkno: self.blkno,
            seq: self.seq,
        }
    }

    fn item_offs_area_len(&self) -> usize {
        Header::LEN + 2 * self.item_offs.len()
    }

    /// Bytes available for a new item without compacting first.
    ///
    /// `contig_free(B) = B.free_end - (hdr_size + 2 * B.nr_items)`.
    pub fn contig_free(&self) -> u32 {
        self.free_end as u32 - self.item_offs_area_len() as u32
    }

    /// Bytes tied up in deleted/overwritten records, recoverable by
    /// compaction.
    pub fn reclaimable_free(&self) -> u32 {
        self.free_reclaim as u32
    }

    /// Bytes available after compacting, i.e. the maximum value length
    /// this block could still accept.
    pub fn reclaimable_total(&self) -> u32 {
        self.contig_free() + self.reclaimable_free()
    }

    /// Total bytes currently used by header, item_offs, and live items.
    pub fn used_total(&self) -> u32 {
        self.block_size as u32 - self.free_end as u32 + self.item_offs_area_len() as u32
    }

    fn item(&self, pos: usize) -> ItemView<'_, K> {
        read_item::<K>(&self.payload, self.item_offs[pos] as usize)
    }

    pub fn key_at(&self, pos: usize) -> K {
        self.item(pos).key
    }

    pub fn seq_at(&self, pos: usize) -> u64 {
        self.item(pos).seq
    }

    pub fn val_at(&self, pos: usize) -> &[u8] {
        self.item(pos).val
    }

    pub fn val_len_at(&self, pos: usize) -> usize {
        self.val_at(pos).len()
    }

    pub fn greatest_key(&self) -> Option<K> {
        if self.item_offs.is_empty() {
            None
        } else {
            Some(self.key_at(self.item_offs.len() - 1))
        }
    }

    /// Binary search for `key`. Returns `(pos, true)` if found at `pos`,
    /// or `(pos, false)` if absent, where `pos` is the index at which it
    /// would need to be inserted to keep `item_offs` sorted.
    ///
    /// Grounded on `btree.c`'s `find_pos`, rewritten as a standard binary
    /// search rather than manually tracked `start`/`end`/`cmp` bookkeeping.
    pub fn find_pos(&self, key: &K) -> (usize, bool) {
        let mut lo = 0usize;
        let mut hi = self.item_offs.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match key.cmp(&self.key_at(mid)) {
                std::cmp::Ordering::Less => hi = mid,
                std::cmp::Ordering::Greater => lo = mid + 1,
                std::cmp::Ordering::Equal => return (mid, true),
            }
        }
        (lo, false)
    }

    /// True if an item of this value length could be inserted without
    /// compacting first.
    pub fn can_insert_now(&self, val_len: usize) -> bool {
        self.contig_free() as usize >= all_val_bytes::<K>(val_len)
    }

    /// True if an item of this value length could be inserted after a
    /// compaction pass.
    pub fn can_insert_after_compact(&self, val_len: usize) -> bool {
        self.reclaimable_total() as usize >= all_val_bytes::<K>(val_len)
    }

    /// Reserves space for a new item at `pos` and writes its key, seq, and
    /// value length, leaving the value bytes zeroed. The caller fills them
    /// in via [`Block::val_mut`].
    ///
    /// Caller must have already checked `can_insert_now` (compacting if
    /// necessary) and computed `pos` via `find_pos`.
    pub fn insert_reserve(&mut self, pos: usize, key: &K, seq: u64, val_len: usize) {
        debug_assert!(pos <= self.item_offs.len());
        debug_assert!(self.can_insert_now(val_len));
        let size = val_bytes::<K>(val_len);
        #[allow(clippy::cast_possible_truncation)]
        {
            self.free_end -= size as u16;
        }
        let off = self.free_end;
        write_item_header::<K>(&mut self.payload, off as usize, key, seq, val_len);
        self.item_offs.insert(pos, off);
    }

    /// Mutable view of the value bytes of the item at `pos`.
    pub fn val_mut(&mut self, pos: usize) -> &mut [u8] {
        let off = self.item_offs[pos] as usize;
        let val_len = self.val_len_at(pos);
        &mut self.payload[val_range::<K>(off, val_len)]
    }

    /// Inserts a fully-formed item at `pos` in one call.
    pub fn insert_at(&mut self, pos: usize, key: &K, seq: u64, val: &[u8]) {
        self.insert_reserve(pos, key, seq, val.len());
        self.val_mut(pos).copy_from_slice(val);
    }

    /// Removes the item at `pos`, marking its record bytes reclaimable.
    ///
    /// Grounded on `btree.c`'s `delete_item`: the slot in `item_offs` is
    /// removed immediately, but the record bytes it pointed to are only
    /// reclaimed lazily by the next [`Block::compact`].
    pub fn delete_at(&mut self, pos: usize) {
        let off = self.item_offs[pos] as usize;
        let size = record_size_at::<K>(&self.payload, off);
        self.item_offs.remove(pos);
        #[allow(clippy::cast_possible_truncation)]
        {
            self.free_reclaim += size as u16;
        }
    }

    /// Overwrites the value of an existing item in place if it fits in the
    /// same slot, otherwise deletes and re-reserves it at the same key
    /// position. Returns the (possibly unchanged) position.
    pub fn update_at(&mut self, pos: usize, seq: u64, val: &[u8]) -> Result<()> {
        let key = self.key_at(pos);
        let old_val_len = self.val_len_at(pos);
        if val.len() == old_val_len {
            let off = self.item_offs[pos] as usize;
            write_item_header::<K>(&mut self.payload, off, &key, seq, val.len());
            self.val_mut(pos).copy_from_slice(val);
            return Ok(());
        }

        self.delete_at(pos);
        if !self.can_insert_now(val.len()) {
            if !self.can_insert_after_compact(val.len()) {
                return Err(Error::NoSpace);
            }
            self.compact();
        }
        let (new_pos, found) = self.find_pos(&key);
        debug_assert!(!found);
        self.insert_at(new_pos, &key, seq, val);
        Ok(())
    }

    /// Overwrites the key of an existing item in place, without moving its
    /// slot in `item_offs`. Used when a merge shifts a parent item's
    /// covering key without changing which child it references.
    ///
    /// Caller must ensure the new key keeps `item_offs` sorted.
    pub fn set_key_at(&mut self, pos: usize, new_key: &K) {
        debug_assert!(pos == 0 || self.key_at(pos - 1) < *new_key);
        debug_assert!(pos + 1 == self.item_offs.len() || *new_key < self.key_at(pos + 1));
        let off = self.item_offs[pos] as usize;
        new_key.encode(&mut self.payload[off..off + K::ENCODED_LEN]);
    }

    /// Overwrites the value of an existing item in place, without moving
    /// its slot in `item_offs` or touching its length. Used to refresh a
    /// parent's child `BlockRef` (new seq, same blkno) after a dirty
    /// descent, where the value's encoded length never changes.
    ///
    /// Caller must ensure `val.len()` equals the item's current value
    /// length.
    pub fn set_val_at(&mut self, pos: usize, val: &[u8]) {
        debug_assert_eq!(val.len(), self.val_len_at(pos));
        let off = self.item_offs[pos] as usize;
        self.payload[val_range::<K>(off, val.len())].copy_from_slice(val);
    }

    /// Repacks all live items against the high end of the block in
    /// key-sorted order, eliminating every gap left by deletions and
    /// updates.
    ///
    /// Grounded on `btree.c`'s `compact_items`. The C code sorts a scratch
    /// array of offsets descending, walks it compacting records downward,
    /// then re-sorts by key. Since this rendition never reorders
    /// `item_offs` itself (each index keeps the key-sorted position it
    /// already had), only the offset *values* change, so the final
    /// re-sort-by-key is unnecessary: the array is sorted by key
    /// throughout.
    pub fn compact(&mut self) {
        let n = self.item_offs.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| Reverse(self.item_offs[i]));

        let mut end = self.block_size as usize;
        for i in order {
            let off = self.item_offs[i] as usize;
            let size = record_size_at::<K>(&self.payload, off);
            end -= size;
            if off != end {
                self.payload.copy_within(off..off + size, end);
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                self.item_offs[i] = end as u16;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            self.free_end = end as u16;
        }
        self.free_reclaim = 0;
    }

    /// Moves items from `self` (the source) into `dst`, stopping once at
    /// least `to_move` bytes have been transferred.
    ///
    /// When `move_right` is true, items are taken from the tail of
    /// `self` and prepended to the head of `dst` (used when merging with
    /// a left sibling). Otherwise items are taken from the head of
    /// `self` and appended to the tail of `dst` (used when splitting, and
    /// when merging with a right sibling).
    ///
    /// Grounded on `btree.c`'s `move_items`. The destination must already
    /// have enough `contig_free` (the caller compacts it first if not).
    pub fn move_items(&mut self, dst: &mut Self, move_right: bool, to_move: u32) {
        let mut moved = 0i64;
        while moved < to_move as i64 && !self.item_offs.is_empty() {
            let src_pos = if move_right { self.item_offs.len() - 1 } else { 0 };
            let view = self.item(src_pos);
            let (key, seq, val) = (view.key, view.seq, view.val.to_vec());
            let dst_pos = if move_right { 0 } else { dst.item_offs.len() };
            moved += all_val_bytes::<K>(val.len()) as i64;
            dst.insert_at(dst_pos, &key, seq, &val);
            self.delete_at(src_pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::IntKey;

    const BS: u16 = 512;

    fn mk(level: u8) -> Block<IntKey> {
        Block::new_empty(1, 1, level, BS)
    }

    #[test]
    fn insert_and_read_back() {
        let mut b = mk(0);
        let (pos, found) = b.find_pos(&IntKey(10));
        assert!(!found);
        b.insert_at(pos, &IntKey(10), 1, b"hello");
        assert_eq!(b.nr_items(), 1);
        assert_eq!(b.key_at(0), IntKey(10));
        assert_eq!(b.val_at(0), b"hello");
    }

    #[test]
    fn inserts_stay_key_sorted() {
        let mut b = mk(0);
        for k in [5u64, 1, 9, 3, 7] {
            let (pos, found) = b.find_pos(&IntKey(k));
            assert!(!found);
            b.insert_at(pos, &IntKey(k), 1, b"v");
        }
        let keys: Vec<u64> = (0..b.nr_items()).map(|i| b.key_at(i).0).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn delete_then_reinsert_reclaims_space() {
        let mut b = mk(0);
        for k in 0u64..5 {
            let (pos, _) = b.find_pos(&IntKey(k));
            b.insert_at(pos, &IntKey(k), 1, &vec![0u8; 32]);
        }
        let used_before = b.used_total();
        let (pos, found) = b.find_pos(&IntKey(2));
        assert!(found);
        b.delete_at(pos);
        assert!(b.reclaimable_free() > 0);
        b.compact();
        assert_eq!(b.reclaimable_free(), 0);
        assert!(b.used_total() < used_before);
        assert_eq!(b.nr_items(), 4);
        let keys: Vec<u64> = (0..b.nr_items()).map(|i| b.key_at(i).0).collect();
        assert_eq!(keys, vec![0, 1, 3, 4]);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut b = mk(1);
        for k in [1u64, 2, 3] {
            let (pos, _) = b.find_pos(&IntKey(k));
            b.insert_at(pos, &IntKey(k), 5, format!("val{k}").as_bytes());
        }
        let buf = b.encode();
        let decoded = Block::<IntKey>::decode(&buf).unwrap();
        assert_eq!(decoded.nr_items(), 3);
        assert_eq!(decoded.level, 1);
        for i in 0..3 {
            assert_eq!(decoded.key_at(i), b.key_at(i));
            assert_eq!(decoded.val_at(i), b.val_at(i));
        }
    }

    #[test]
    fn move_items_transfers_a_prefix_from_the_head() {
        let mut src = mk(0);
        for k in 0u64..6 {
            let (pos, _) = src.find_pos(&IntKey(k));
            src.insert_at(pos, &IntKey(k), 1, b"x");
        }
        let half = src.used_total() / 2;
        let mut dst = mk(0);
        src.move_items(&mut dst, false, half);
        let src_keys: Vec<u64> = (0..src.nr_items()).map(|i| src.key_at(i).0).collect();
        let dst_keys: Vec<u64> = (0..dst.nr_items()).map(|i| dst.key_at(i).0).collect();
        assert_eq!(src_keys.len() + dst_keys.len(), 6);
        assert!(dst_keys.iter().all(|k| src_keys.iter().all(|sk| k < sk)));
    }

    #[test]
    fn move_items_right_transfers_a_suffix_prepended() {
        let mut src = mk(0);
        for k in 0u64..6 {
            let (pos, _) = src.find_pos(&IntKey(k));
            src.insert_at(pos, &IntKey(k), 1, b"x");
        }
        let mut dst = mk(0);
        let (pos, _) = dst.find_pos(&IntKey(100));
        dst.insert_at(pos, &IntKey(100), 1, b"y");
        src.move_items(&mut dst, true, 30);
        let dst_keys: Vec<u64> = (0..dst.nr_items()).map(|i| dst.key_at(i).0).collect();
        assert_eq!(dst_keys.last(), Some(&100));
        assert!(dst_keys.windows(2).all(|w| w[0] < w[1]));
    }
}
