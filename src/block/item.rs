// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::key::TreeKey;
use byteorder::{ByteOrder, LittleEndian};

/// A reference to a child block: its block number and the sequence number
/// of that block's header at the time the reference was last updated.
///
/// Internal items store exactly one `BlockRef` as their value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockRef {
    pub blkno: u64,
    pub seq: u64,
}

impl BlockRef {
    pub const ENCODED_LEN: usize = 16;

    pub fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.blkno);
        LittleEndian::write_u64(&mut buf[8..16], self.seq);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            blkno: LittleEndian::read_u64(&buf[0..8]),
            seq: LittleEndian::read_u64(&buf[8..16]),
        }
    }
}

/// Bytes occupied by an item's fixed-size header: key, seq, val_len.
///
/// This is the `HDR` term in the spec's `val_bytes(n) = HDR + n`.
pub const fn item_header_len<K: TreeKey>() -> usize {
    K::ENCODED_LEN + 8 + 2
}

/// `val_bytes(n)`: the record's total byte size for a value of length `n`.
pub const fn val_bytes<K: TreeKey>(val_len: usize) -> usize {
    item_header_len::<K>() + val_len
}

/// `all_val_bytes(n)`: `val_bytes(n)` plus the 2-byte slot in `item_offs`.
pub const fn all_val_bytes<K: TreeKey>(val_len: usize) -> usize {
    2 + val_bytes::<K>(val_len)
}

/// An item record decoded out of a block's payload.
pub struct ItemView<'a, K: TreeKey> {
    pub key: K,
    pub seq: u64,
    pub val: &'a [u8],
}

/// Reads the item record starting at byte offset `off` within `payload`.
pub fn read_item<K: TreeKey>(payload: &[u8], off: usize) -> ItemView<'_, K> {
    let key = K::decode(&payload[off..off + K::ENCODED_LEN]);
    let seq_off = off + K::ENCODED_LEN;
    let seq = LittleEndian::read_u64(&payload[seq_off..seq_off + 8]);
    let val_len_off = seq_off + 8;
    let val_len = LittleEndian::read_u16(&payload[val_len_off..val_len_off + 2]) as usize;
    let val_off = val_len_off + 2;
    let val = &payload[val_off..val_off + val_len];
    ItemView { key, seq, val }
}

/// Writes just the key/seq/val_len fields, leaving the value bytes
/// untouched. Used when the caller fills the value in afterwards via
/// [`val_range`].
pub fn write_item_header<K: TreeKey>(
    payload: &mut [u8],
    off: usize,
    key: &K,
    seq: u64,
    val_len: usize,
) {
    key.encode(&mut payload[off..off + K::ENCODED_LEN]);
    let seq_off = off + K::ENCODED_LEN;
    LittleEndian::write_u64(&mut payload[seq_off..seq_off + 8], seq);
    let val_len_off = seq_off + 8;
    #[allow(clippy::cast_possible_truncation)]
    LittleEndian::write_u16(&mut payload[val_len_off..val_len_off + 2], val_len as u16);
}

/// Byte range occupied by an item's value, given the record's start
/// offset and its value length.
pub fn val_range<K: TreeKey>(off: usize, val_len: usize) -> std::ops::Range<usize> {
    let val_off = off + item_header_len::<K>();
    val_off..val_off + val_len
}

/// Returns the total record size (in bytes) of the item at offset `off`.
pub fn record_size_at<K: TreeKey>(payload: &[u8], off: usize) -> usize {
    let val_len_off = off + K::ENCODED_LEN + 8;
    let val_len = LittleEndian::read_u16(&payload[val_len_off..val_len_off + 2]) as usize;
    val_bytes::<K>(val_len)
}
