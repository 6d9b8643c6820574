// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteorder::{ByteOrder, LittleEndian};
use std::fmt::Debug;

/// A fixed-width, totally-ordered key usable as a B-tree item key.
///
/// Keys are never variable length (see the crate-level Non-goals): every
/// implementor has a compile-time-known encoded size, a distinguished
/// maximal value, and a successor operation. The right spine of the tree
/// relies on `MAX` comparing greater than any other value of `Self`.
pub trait TreeKey: Copy + Clone + Ord + Debug + Send + Sync + 'static {
    /// Number of bytes this key occupies in its on-disk encoding.
    const ENCODED_LEN: usize;

    /// The greatest possible key. Used as the key of the rightmost item
    /// at every internal level (the "right spine").
    const MAX: Self;

    /// Encodes `self` into `buf`, which is exactly `ENCODED_LEN` bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes a key from `buf`, which is exactly `ENCODED_LEN` bytes.
    fn decode(buf: &[u8]) -> Self;

    /// Returns the smallest key strictly greater than `self`.
    ///
    /// Saturates at `MAX` rather than wrapping, since `MAX` is already the
    /// largest representable key.
    fn inc(&self) -> Self;
}

/// The default key type used by the engine and its test suite: a plain
/// `u64`, matching the worked examples in the spec where keys are small
/// integers and `MAX_KEY = 2^64-1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntKey(pub u64);

impl From<u64> for IntKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl TreeKey for IntKey {
    const ENCODED_LEN: usize = 8;
    const MAX: Self = Self(u64::MAX);

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, self.0);
    }

    fn decode(buf: &[u8]) -> Self {
        Self(LittleEndian::read_u64(buf))
    }

    fn inc(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_key_roundtrip() {
        let mut buf = [0u8; 8];
        let k = IntKey(0x0102_0304_0506_0708);
        k.encode(&mut buf);
        assert_eq!(buf, [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(IntKey::decode(&buf), k);
    }

    #[test]
    fn int_key_inc_saturates() {
        assert_eq!(IntKey::MAX.inc(), IntKey::MAX);
        assert_eq!(IntKey(1).inc(), IntKey(2));
    }

    #[test]
    fn max_is_greatest() {
        assert!(IntKey::MAX > IntKey(12345));
    }
}
