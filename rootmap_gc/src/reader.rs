//! Loader-side decoding of emitted tables.
//!
//! A section holds one table per function, each starting at the next
//! word-aligned offset. The reader expects relocations to be applied already
//! (see [`ObjectSection::resolve`](crate::section::ObjectSection::resolve)).

use crate::table::{LiveRoots, SafepointTable, TableFormat};
use rootmap_core::{Endianness, Malformed, Result, RootMapError, TargetConfig};
use tracing::trace;

/// Iterator over the tables of one resolved section.
///
/// Yields `(section_offset, table)`. After the first error the iterator is
/// exhausted.
#[derive(Debug, Clone)]
pub struct TableReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    format: TableFormat,
    endianness: Endianness,
    alignment: usize,
    failed: bool,
}

impl<'a> TableReader<'a> {
    /// Reader over `bytes` laid out for `target` in `format`.
    pub fn new(bytes: &'a [u8], format: TableFormat, target: &TargetConfig) -> Self {
        Self {
            bytes,
            pos: 0,
            format,
            endianness: target.endianness,
            alignment: target.word_bytes(),
            failed: false,
        }
    }

    /// Decode every table, failing on the first malformed one.
    pub fn read_all(self) -> Result<Vec<SafepointTable>> {
        self.map(|entry| entry.map(|(_, table)| table)).collect()
    }
}

impl Iterator for TableReader<'_> {
    type Item = Result<(usize, SafepointTable)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let start = self.pos.next_multiple_of(self.alignment);
        if start >= self.bytes.len() {
            return None;
        }
        let mut cursor = TableCursor {
            bytes: self.bytes,
            pos: start,
            endianness: self.endianness,
        };
        match cursor.table(self.format) {
            Ok(table) => {
                trace!(offset = start, safepoints = table.safepoint_count(), "read table");
                self.pos = cursor.pos;
                Some(Ok((start, table)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Decode the single table that starts at `offset`.
pub fn read_table(
    bytes: &[u8],
    offset: usize,
    format: TableFormat,
    endianness: Endianness,
) -> Result<SafepointTable> {
    TableCursor {
        bytes,
        pos: offset,
        endianness,
    }
    .table(format)
}

struct TableCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    endianness: Endianness,
}

impl TableCursor<'_> {
    fn table(&mut self, format: TableFormat) -> Result<SafepointTable> {
        let count = self.count("safepointCount")?;

        let mut addresses = Vec::with_capacity(count);
        for index in 0..count {
            let at = self.pos;
            let address = self.u32()?;
            if addresses.last().is_some_and(|&prev| prev >= address) {
                return Err(RootMapError::malformed(
                    at,
                    Malformed::UnsortedSafepoints { index },
                ));
            }
            addresses.push(address);
        }

        let frame_size_words = self.count("stackFrameSizeWords")? as u16;
        let stack_arity = self.count("stackArity")? as u16;

        let live_roots = match format {
            TableFormat::Uniform => LiveRoots::Uniform(self.roots()?),
            TableFormat::PerSafepoint => LiveRoots::PerSafepoint(
                (0..count)
                    .map(|_| self.roots())
                    .collect::<Result<Box<[_]>>>()?,
            ),
        };

        Ok(SafepointTable::from_parts(
            addresses.into_boxed_slice(),
            frame_size_words,
            stack_arity,
            live_roots,
        ))
    }

    fn roots(&mut self) -> Result<Box<[u16]>> {
        let len = self.count("liveRootCount")?;
        (0..len)
            .map(|_| self.count("liveRootOffsetWords").map(|word| word as u16))
            .collect()
    }

    /// Read an `int16` that must not be negative.
    fn count(&mut self, field: &'static str) -> Result<usize> {
        let at = self.pos;
        let bytes = self.take::<2>()?;
        let value = self.endianness.read_i16(bytes);
        if value < 0 {
            return Err(RootMapError::malformed(
                at,
                Malformed::NegativeField { field, value },
            ));
        }
        Ok(value as usize)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take::<4>()?;
        Ok(self.endianness.read_u32(bytes))
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let available = self.bytes.len().saturating_sub(self.pos);
        let chunk = self
            .bytes
            .get(self.pos..)
            .and_then(|rest| rest.first_chunk::<N>())
            .copied()
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
}
