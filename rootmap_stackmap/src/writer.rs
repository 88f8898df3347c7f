//! Encoder producing the exact byte layout the decoder reads.
//!
//! Reserved fields and padding are written as zero. The decoder rejects
//! anything else, so `encode(decode(bytes)) == bytes` for every stream it
//! accepts.

use crate::RECORD_ALIGNMENT;
use crate::location::Location;
use crate::record::{RawStackMapRecord, StackMap};
use rootmap_core::{Endianness, Result, RootMapError};

/// Incremental stack map encoder.
#[derive(Debug)]
pub struct StackMapWriter {
    endianness: Endianness,
    buf: Vec<u8>,
}

impl StackMapWriter {
    /// Create an encoder for the given byte order.
    #[inline]
    pub fn new(endianness: Endianness) -> Self {
        Self {
            endianness,
            buf: Vec::with_capacity(256),
        }
    }

    /// Encode a whole map.
    pub fn write_map(&mut self, map: &StackMap) -> Result<()> {
        let header = map.header()?;
        self.u8(header.version);
        self.u8(0);
        self.u16(0);
        self.u32(header.num_functions);
        self.u32(header.num_constants);
        self.u32(header.num_records);

        for func in &map.functions {
            self.u64(func.address);
            self.u64(func.stack_size);
            self.u64(func.record_count);
        }
        for &constant in &map.constants {
            self.u64(constant);
        }
        for record in &map.records {
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Encode one record, including its trailing padding.
    pub fn write_record(&mut self, record: &RawStackMapRecord) -> Result<()> {
        let num_locations = u16::try_from(record.locations.len()).map_err(|_| {
            RootMapError::invalid_argument(format!(
                "record {} has {} locations, more than a u16 can count",
                record.patch_point_id,
                record.locations.len()
            ))
        })?;
        let num_live_outs = u16::try_from(record.live_outs.len()).map_err(|_| {
            RootMapError::invalid_argument(format!(
                "record {} has {} live-outs, more than a u16 can count",
                record.patch_point_id,
                record.live_outs.len()
            ))
        })?;

        self.u64(record.patch_point_id);
        self.u32(record.instruction_offset);
        self.u16(record.flags);
        self.u16(num_locations);
        for location in &record.locations {
            self.write_location(location);
        }
        self.pad_to(RECORD_ALIGNMENT);
        self.u16(0);
        self.u16(num_live_outs);
        for live_out in &record.live_outs {
            self.u16(live_out.dwarf_reg);
            self.u8(0);
            self.u8(live_out.size);
        }
        self.pad_to(RECORD_ALIGNMENT);
        Ok(())
    }

    /// Bytes written so far.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_location(&mut self, location: &Location) {
        self.u8(location.kind as u8);
        self.u8(0);
        self.u16(location.size);
        self.u16(location.dwarf_reg);
        self.u16(0);
        let raw = self.endianness.write_i32(location.offset);
        self.buf.extend_from_slice(&raw);
    }

    #[inline]
    fn pad_to(&mut self, align: usize) {
        let aligned = (self.buf.len() + align - 1) & !(align - 1);
        self.buf.resize(aligned, 0);
    }

    #[inline]
    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    #[inline]
    fn u16(&mut self, value: u16) {
        let raw = self.endianness.write_u16(value);
        self.buf.extend_from_slice(&raw);
    }

    #[inline]
    fn u32(&mut self, value: u32) {
        let raw = self.endianness.write_u32(value);
        self.buf.extend_from_slice(&raw);
    }

    #[inline]
    fn u64(&mut self, value: u64) {
        let raw = self.endianness.write_u64(value);
        self.buf.extend_from_slice(&raw);
    }
}

/// Encode a whole map in one call.
pub fn encode(map: &StackMap, endianness: Endianness) -> Result<Vec<u8>> {
    let mut writer = StackMapWriter::new(endianness);
    writer.write_map(map)?;
    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HEADER_SIZE;
    use crate::location::LiveOut;

    #[test]
    fn test_empty_map_is_header_only() {
        let bytes = encode(&StackMap::default(), Endianness::Little).unwrap();
        assert_eq!(bytes, [3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(bytes.len(), HEADER_SIZE);
    }

    #[test]
    fn test_record_layout() {
        let record = RawStackMapRecord::new(0x0102, 0x40)
            .with_location(Location::indirect(7, 16, 8))
            .with_live_out(LiveOut::new(12, 8));
        let mut writer = StackMapWriter::new(Endianness::Little);
        writer.write_record(&record).unwrap();
        let bytes = writer.into_bytes();

        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(&bytes[0..8], &0x0102u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x40u32.to_le_bytes());
        assert_eq!(&bytes[12..14], &[0, 0]); // flags
        assert_eq!(&bytes[14..16], &[1, 0]); // one location
        // kind, reserved, size, reg, reserved, offset
        assert_eq!(&bytes[16..28], &[3, 0, 8, 0, 7, 0, 0, 0, 16, 0, 0, 0]);
        assert_eq!(&bytes[28..32], &[0, 0, 0, 0]); // pad to 8
        assert_eq!(&bytes[32..36], &[0, 0, 1, 0]); // padding, one live-out
        assert_eq!(&bytes[36..40], &[12, 0, 0, 8]);
    }
}
