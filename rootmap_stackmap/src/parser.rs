//! Streaming decoder for the native stack map section.
//!
//! [`StackMapParser::new`] validates the header and the fixed-size tables up
//! front; records are decoded lazily by [`StackMapParser::records`], which can
//! be restarted any number of times over the same borrowed buffer. The parser
//! holds no mutable state, so several readers may share one buffer.

use crate::location::{LiveOut, Location, LocationKind};
use crate::record::{RawStackMapRecord, StackMap, StackMapFunction, StackMapHeader};
use crate::{
    CONSTANT_ENTRY_SIZE, FUNCTION_ENTRY_SIZE, HEADER_SIZE, LIVE_OUT_SIZE, LOCATION_SIZE,
    RECORD_ALIGNMENT, STACK_MAP_VERSION,
};
use rootmap_core::{Endianness, Malformed, Result, RootMapError};
use smallvec::SmallVec;
use tracing::trace;

// =============================================================================
// Cursor
// =============================================================================

/// Bounds-checked reader over the stream.
#[derive(Debug, Clone, Copy)]
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    endianness: Endianness,
}

impl<'a> Cursor<'a> {
    #[inline]
    fn new(bytes: &'a [u8], pos: usize, endianness: Endianness) -> Self {
        Self {
            bytes,
            pos,
            endianness,
        }
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let available = self.bytes.len().saturating_sub(self.pos);
        let chunk = self
            .bytes
            .get(self.pos..self.pos + N)
            .and_then(|slice| <[u8; N]>::try_from(slice).ok())
            .ok_or_else(|| {
                RootMapError::malformed(
                    self.pos,
                    Malformed::Truncated {
                        needed: N,
                        available,
                    },
                )
            })?;
        self.pos += N;
        Ok(chunk)
    }

    #[inline]
    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    #[inline]
    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take()?;
        Ok(self.endianness.read_u16(bytes))
    }

    #[inline]
    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take()?;
        Ok(self.endianness.read_u32(bytes))
    }

    #[inline]
    fn i32(&mut self) -> Result<i32> {
        let bytes = self.take()?;
        Ok(self.endianness.read_i32(bytes))
    }

    #[inline]
    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take()?;
        Ok(self.endianness.read_u64(bytes))
    }

    /// Consume `len` reserved bytes, which must be zero.
    #[inline]
    fn reserved(&mut self, len: usize) -> Result<()> {
        let available = self.bytes.len().saturating_sub(self.pos);
        let Some(bytes) = self.bytes.get(self.pos..self.pos + len) else {
            return Err(RootMapError::malformed(
                self.pos,
                Malformed::Truncated {
                    needed: len,
                    available,
                },
            ));
        };
        if let Some(at) = bytes.iter().position(|&byte| byte != 0) {
            return Err(RootMapError::malformed(
                self.pos + at,
                Malformed::NonZeroReserved { value: bytes[at] },
            ));
        }
        self.pos += len;
        Ok(())
    }

    /// Skip zero padding up to the next multiple of `align` from the buffer
    /// start.
    #[inline]
    fn align_to(&mut self, align: usize) -> Result<()> {
        let aligned = (self.pos + align - 1) & !(align - 1);
        self.reserved(aligned - self.pos)
    }
}

// =============================================================================
// StackMapParser
// =============================================================================

/// Read-only view over an encoded stack map.
#[derive(Debug, Clone, Copy)]
pub struct StackMapParser<'a> {
    bytes: &'a [u8],
    endianness: Endianness,
    header: StackMapHeader,
}

impl<'a> StackMapParser<'a> {
    /// Validate the header and the fixed-size tables of `bytes`.
    ///
    /// Fails with [`RootMapError::MalformedRecordStream`] on a version other
    /// than 3, a buffer shorter than the declared tables, or per-function
    /// record counts that do not add up to the header's record count.
    pub fn new(bytes: &'a [u8], endianness: Endianness) -> Result<Self> {
        let mut cursor = Cursor::new(bytes, 0, endianness);
        let version = cursor.u8()?;
        if version != STACK_MAP_VERSION {
            return Err(RootMapError::malformed(
                0,
                Malformed::UnsupportedVersion(version),
            ));
        }
        cursor.reserved(3)?;
        let header = StackMapHeader {
            version,
            num_functions: cursor.u32()?,
            num_constants: cursor.u32()?,
            num_records: cursor.u32()?,
        };

        let parser = Self {
            bytes,
            endianness,
            header,
        };

        let tables_end = parser.records_offset();
        if tables_end > bytes.len() {
            return Err(RootMapError::malformed(
                HEADER_SIZE,
                Malformed::Truncated {
                    needed: tables_end - HEADER_SIZE,
                    available: bytes.len() - HEADER_SIZE,
                },
            ));
        }

        let declared: u64 = parser
            .functions()
            .map(|func| func.record_count)
            .fold(0u64, u64::saturating_add);
        if declared != u64::from(header.num_records) {
            return Err(RootMapError::malformed(
                HEADER_SIZE,
                Malformed::RecordCountMismatch {
                    declared,
                    actual: header.num_records,
                },
            ));
        }

        Ok(parser)
    }

    /// Header counts.
    #[inline]
    pub fn header(&self) -> &StackMapHeader {
        &self.header
    }

    /// Byte order of the stream.
    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Function table.
    #[inline]
    pub fn functions(&self) -> Functions<'a> {
        Functions {
            parser: *self,
            next: 0,
        }
    }

    /// Constant pool.
    #[inline]
    pub fn constants(&self) -> Constants<'a> {
        Constants {
            parser: *self,
            next: 0,
        }
    }

    /// Lazily decode the records, from the first one.
    #[inline]
    pub fn records(&self) -> Records<'a> {
        Records {
            parser: *self,
            pos: self.records_offset(),
            remaining: self.header.num_records,
            index: 0,
        }
    }

    /// Decode the whole stream. Any malformed record discards everything.
    ///
    /// The stream must end with its last record; trailing bytes are
    /// [`Malformed::TrailingBytes`].
    pub fn decode(&self) -> Result<StackMap> {
        let mut records = self.records();
        let decoded = records.by_ref().collect::<Result<Vec<_>>>()?;
        if records.pos < self.bytes.len() {
            return Err(RootMapError::malformed(
                records.pos,
                Malformed::TrailingBytes {
                    count: self.bytes.len() - records.pos,
                },
            ));
        }
        Ok(StackMap {
            version: self.header.version,
            functions: self.functions().collect(),
            constants: self.constants().collect(),
            records: decoded,
        })
    }

    #[inline]
    fn functions_offset(&self) -> usize {
        HEADER_SIZE
    }

    #[inline]
    fn constants_offset(&self) -> usize {
        self.functions_offset() + self.header.num_functions as usize * FUNCTION_ENTRY_SIZE
    }

    #[inline]
    fn records_offset(&self) -> usize {
        self.constants_offset() + self.header.num_constants as usize * CONSTANT_ENTRY_SIZE
    }

    fn function_at(&self, index: u32) -> Option<StackMapFunction> {
        if index >= self.header.num_functions {
            return None;
        }
        let offset = self.functions_offset() + index as usize * FUNCTION_ENTRY_SIZE;
        let mut cursor = Cursor::new(self.bytes, offset, self.endianness);
        Some(StackMapFunction {
            address: cursor.u64().ok()?,
            stack_size: cursor.u64().ok()?,
            record_count: cursor.u64().ok()?,
        })
    }

    fn constant_at(&self, index: u32) -> Option<u64> {
        if index >= self.header.num_constants {
            return None;
        }
        let offset = self.constants_offset() + index as usize * CONSTANT_ENTRY_SIZE;
        Cursor::new(self.bytes, offset, self.endianness).u64().ok()
    }

    fn record_at(&self, cursor: &mut Cursor<'a>) -> Result<RawStackMapRecord> {
        let patch_point_id = cursor.u64()?;
        let instruction_offset = cursor.u32()?;
        let flags = cursor.u16()?;
        let num_locations = cursor.u16()?;

        let needed = usize::from(num_locations) * LOCATION_SIZE;
        let available = self.bytes.len().saturating_sub(cursor.pos);
        if needed > available {
            return Err(RootMapError::malformed(
                cursor.pos,
                Malformed::Truncated { needed, available },
            ));
        }

        let mut locations = SmallVec::with_capacity(usize::from(num_locations));
        for _ in 0..num_locations {
            locations.push(self.location_at(cursor)?);
        }

        cursor.align_to(RECORD_ALIGNMENT)?;
        cursor.reserved(2)?;
        let num_live_outs = cursor.u16()?;

        let needed = usize::from(num_live_outs) * LIVE_OUT_SIZE;
        let available = self.bytes.len().saturating_sub(cursor.pos);
        if needed > available {
            return Err(RootMapError::malformed(
                cursor.pos,
                Malformed::Truncated { needed, available },
            ));
        }

        let mut live_outs = SmallVec::with_capacity(usize::from(num_live_outs));
        for _ in 0..num_live_outs {
            let dwarf_reg = cursor.u16()?;
            cursor.reserved(1)?;
            let size = cursor.u8()?;
            live_outs.push(LiveOut { dwarf_reg, size });
        }
        cursor.align_to(RECORD_ALIGNMENT)?;

        Ok(RawStackMapRecord {
            patch_point_id,
            instruction_offset,
            flags,
            locations,
            live_outs,
        })
    }

    fn location_at(&self, cursor: &mut Cursor<'a>) -> Result<Location> {
        let at = cursor.pos;
        let raw_kind = cursor.u8()?;
        let kind = LocationKind::from_u8(raw_kind)
            .ok_or_else(|| RootMapError::malformed(at, Malformed::InvalidLocationKind(raw_kind)))?;
        cursor.reserved(1)?;
        let size = cursor.u16()?;
        let dwarf_reg = cursor.u16()?;
        cursor.reserved(2)?;
        let offset = cursor.i32()?;

        let location = Location {
            kind,
            size,
            dwarf_reg,
            offset,
        };
        if let Some(index) = location.pool_index() {
            if index >= self.header.num_constants {
                return Err(RootMapError::malformed(
                    at,
                    Malformed::ConstantIndexOutOfRange {
                        index,
                        pool: self.header.num_constants,
                    },
                ));
            }
        }
        Ok(location)
    }
}

/// Decode a complete stream in one call.
pub fn decode(bytes: &[u8], endianness: Endianness) -> Result<StackMap> {
    StackMapParser::new(bytes, endianness)?.decode()
}

// =============================================================================
// Views
// =============================================================================

/// Function table view.
#[derive(Debug, Clone)]
pub struct Functions<'a> {
    parser: StackMapParser<'a>,
    next: u32,
}

impl Functions<'_> {
    /// Number of function entries.
    #[inline]
    pub fn size(&self) -> usize {
        self.parser.header.num_functions as usize
    }

    /// Entry at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<StackMapFunction> {
        u32::try_from(index)
            .ok()
            .and_then(|index| self.parser.function_at(index))
    }
}

impl Iterator for Functions<'_> {
    type Item = StackMapFunction;

    fn next(&mut self) -> Option<Self::Item> {
        let func = self.parser.function_at(self.next)?;
        self.next += 1;
        Some(func)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.parser.header.num_functions - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Functions<'_> {}

/// Constant pool view.
#[derive(Debug, Clone)]
pub struct Constants<'a> {
    parser: StackMapParser<'a>,
    next: u32,
}

impl Constants<'_> {
    /// Number of pool entries.
    #[inline]
    pub fn size(&self) -> usize {
        self.parser.header.num_constants as usize
    }

    /// Constant at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u64> {
        u32::try_from(index)
            .ok()
            .and_then(|index| self.parser.constant_at(index))
    }
}

impl Iterator for Constants<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.parser.constant_at(self.next)?;
        self.next += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.parser.header.num_constants - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Constants<'_> {}

/// Lazy record decoder. Yields at most one error, then stops.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    parser: StackMapParser<'a>,
    pos: usize,
    remaining: u32,
    index: u32,
}

impl Records<'_> {
    /// Number of records the header declares.
    #[inline]
    pub fn size(&self) -> usize {
        self.parser.header.num_records as usize
    }
}

impl Iterator for Records<'_> {
    type Item = Result<RawStackMapRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let mut cursor = Cursor::new(self.parser.bytes, self.pos, self.parser.endianness);
        match self.parser.record_at(&mut cursor) {
            Ok(record) => {
                trace!(
                    index = self.index,
                    id = record.patch_point_id,
                    offset = record.instruction_offset,
                    locations = record.locations.len(),
                    "decoded stack map record"
                );
                self.pos = cursor.pos;
                self.remaining -= 1;
                self.index += 1;
                Some(Ok(record))
            }
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

impl std::iter::FusedIterator for Records<'_> {}

// =============================================================================
// Tests
// =============================================================================
