//! Owned stack map model.

use crate::location::{LiveOut, Location};
use crate::{LIVE_OUT_SIZE, LOCATION_SIZE, RECORD_ALIGNMENT, STACK_MAP_VERSION};
use rootmap_core::{Result, RootMapError};
use smallvec::SmallVec;

/// Header counts of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMapHeader {
    /// Format version.
    pub version: u8,
    /// Number of function entries.
    pub num_functions: u32,
    /// Number of constant pool entries.
    pub num_constants: u32,
    /// Number of call-site records.
    pub num_records: u32,
}

/// Per-function entry of the function table.
///
/// Records are grouped by function in table order: the first `record_count`
/// records belong to the first function, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackMapFunction {
    /// Address of the function's entry point.
    pub address: u64,
    /// Fixed frame size in bytes.
    pub stack_size: u64,
    /// Number of records belonging to this function.
    pub record_count: u64,
}

/// One call-site record as emitted by the code generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStackMapRecord {
    /// Patch point / statepoint ID.
    pub patch_point_id: u64,
    /// Offset of the call's return address from the function start.
    pub instruction_offset: u32,
    /// Record flags word.
    pub flags: u16,
    /// Tracked locations, in emission order.
    pub locations: SmallVec<[Location; 8]>,
    /// Registers live across the call.
    pub live_outs: SmallVec<[LiveOut; 4]>,
}

impl RawStackMapRecord {
    /// A record with no locations or live-outs.
    pub fn new(patch_point_id: u64, instruction_offset: u32) -> Self {
        Self {
            patch_point_id,
            instruction_offset,
            flags: 0,
            locations: SmallVec::new(),
            live_outs: SmallVec::new(),
        }
    }

    /// Append a location.
    pub fn with_location(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }

    /// Append a live-out register.
    pub fn with_live_out(mut self, live_out: LiveOut) -> Self {
        self.live_outs.push(live_out);
        self
    }

    /// Locations that denote addressable stack slots, with their indices.
    pub fn stack_slots(&self) -> impl Iterator<Item = (usize, &Location)> {
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, loc)| loc.is_stack_slot())
    }

    /// Encoded size in bytes, including trailing padding, for a record that
    /// starts on a [`RECORD_ALIGNMENT`] boundary.
    pub fn encoded_len(&self) -> usize {
        let locations = 16 + self.locations.len() * LOCATION_SIZE;
        let live_outs =
            align_up(locations, RECORD_ALIGNMENT) + 4 + self.live_outs.len() * LIVE_OUT_SIZE;
        align_up(live_outs, RECORD_ALIGNMENT)
    }
}

/// An entire decoded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMap {
    /// Format version.
    pub version: u8,
    /// Function table.
    pub functions: Vec<StackMapFunction>,
    /// Constant pool.
    pub constants: Vec<u64>,
    /// Records, grouped by function.
    pub records: Vec<RawStackMapRecord>,
}

impl Default for StackMap {
    fn default() -> Self {
        Self {
            version: STACK_MAP_VERSION,
            functions: Vec::new(),
            constants: Vec::new(),
            records: Vec::new(),
        }
    }
}

impl StackMap {
    /// Header describing this map.
    ///
    /// Fails with [`RootMapError::InvalidArgument`] if a table holds more
    /// than `u32::MAX` entries.
    pub fn header(&self) -> Result<StackMapHeader> {
        Ok(StackMapHeader {
            version: self.version,
            num_functions: header_count("functions", self.functions.len())?,
            num_constants: header_count("constants", self.constants.len())?,
            num_records: header_count("records", self.records.len())?,
        })
    }

    /// Append a function together with its records.
    pub fn push_function(
        &mut self,
        address: u64,
        stack_size: u64,
        records: impl IntoIterator<Item = RawStackMapRecord>,
    ) {
        let before = self.records.len();
        self.records.extend(records);
        self.functions.push(StackMapFunction {
            address,
            stack_size,
            record_count: (self.records.len() - before) as u64,
        });
    }

    /// Pair every function with the records that belong to it.
    pub fn function_records(&self) -> FunctionRecords<'_> {
        FunctionRecords {
            functions: self.functions.iter(),
            records: &self.records,
        }
    }

    /// Resolve the constant a constant-pool location refers to.
    pub fn pool_constant(&self, location: &Location) -> Option<u64> {
        location
            .pool_index()
            .and_then(|index| self.constants.get(index as usize).copied())
    }
}

/// Iterator over `(function, records)` pairs of a [`StackMap`].
#[derive(Debug, Clone)]
pub struct FunctionRecords<'a> {
    functions: std::slice::Iter<'a, StackMapFunction>,
    records: &'a [RawStackMapRecord],
}

impl<'a> Iterator for FunctionRecords<'a> {
    type Item = (&'a StackMapFunction, &'a [RawStackMapRecord]);

    fn next(&mut self) -> Option<Self::Item> {
        let function = self.functions.next()?;
        let count = usize::try_from(function.record_count)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        let (mine, rest) = self.records.split_at(count);
        self.records = rest;
        Some((function, mine))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.functions.size_hint()
    }
}

impl ExactSizeIterator for FunctionRecords<'_> {}

fn header_count(what: &str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        RootMapError::invalid_argument(format!("{len} {what} do not fit the u32 header count"))
    })
}

#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
