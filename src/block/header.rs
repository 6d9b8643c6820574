// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Block metadata that precedes the `item_offs` array.
///
/// Layout (little-endian throughout, see spec §6):
/// `blkno: u64, seq: u64, level: u8, _reserved: u8, free_end: u16,
/// free_reclaim: u16, nr_items: u16`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub blkno: u64,
    pub seq: u64,
    /// 0 for a leaf, N for an internal block N levels above the leaves.
    pub level: u8,
    pub free_end: u16,
    pub free_reclaim: u16,
    pub nr_items: u16,
}

impl Header {
    /// Bytes occupied by the header, i.e. the offset of `item_offs[0]`.
    pub const LEN: usize = 8 + 8 + 1 + 1 + 2 + 2 + 2;

    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= Self::LEN);
        LittleEndian::write_u64(&mut buf[0..8], self.blkno);
        LittleEndian::write_u64(&mut buf[8..16], self.seq);
        buf[16] = self.level;
        buf[17] = 0;
        LittleEndian::write_u16(&mut buf[18..20], self.free_end);
        LittleEndian::write_u16(&mut buf[20..22], self.free_reclaim);
        LittleEndian::write_u16(&mut buf[22..24], self.nr_items);
    }

    pub fn decode_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "block too short for header",
            )));
        }

        Ok(Self {
            blkno: LittleEndian::read_u64(&buf[0..8]),
            seq: LittleEndian::read_u64(&buf[8..16]),
            level: buf[16],
            free_end: LittleEndian::read_u16(&buf[18..20]),
            free_reclaim: LittleEndian::read_u16(&buf[20..22]),
            nr_items: LittleEndian::read_u16(&buf[22..24]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = Header {
            blkno: 7,
            seq: 9,
            level: 2,
            free_end: 4096,
            free_reclaim: 0,
            nr_items: 0,
        };

        let mut buf = [0u8; Header::LEN];
        header.encode_into(&mut buf);

        let decoded = Header::decode_from(&buf).unwrap();
        assert_eq!(header, decoded);
    }
}
