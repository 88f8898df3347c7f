//! Projection of decoded stack map records into builder input.
//!
//! Only `Direct` and `Indirect` locations name a stack slot. A slot becomes a
//! root when it is addressed off the stack pointer at a non-negative,
//! word-aligned byte offset.

use crate::program::Diagnostic;
use crate::safepoint::{FunctionSafepoints, SafepointRecord};
use crate::section::SymbolMap;
use rootmap_core::{Precondition, Result, RootMapError, TargetConfig};
use rootmap_stackmap::{RawStackMapRecord, StackMap, StackMapFunction};
use smallvec::SmallVec;
use tracing::trace;

/// Symbol given to a function that is only known by its address.
#[inline]
pub fn function_symbol(address: u64) -> String {
    format!("func_{address:x}")
}

/// Project one raw record using `function`'s frame shape.
pub fn project_record(
    raw: &RawStackMapRecord,
    function: &FunctionSafepoints,
    target: &TargetConfig,
) -> Result<SafepointRecord> {
    let word = target.word_bytes() as i32;
    let mut offsets: SmallVec<[i32; 8]> = SmallVec::new();

    for (index, location) in raw.stack_slots() {
        if location.dwarf_reg != target.stack_pointer_register || location.offset < 0 {
            return Err(RootMapError::precondition(
                &function.symbol,
                Precondition::UnaddressableLocation {
                    record: raw.patch_point_id,
                    location: index,
                },
            ));
        }
        if location.offset % word != 0 {
            return Err(RootMapError::precondition(
                &function.symbol,
                Precondition::MisalignedSlot {
                    record: raw.patch_point_id,
                    offset: location.offset,
                },
            ));
        }
        offsets.push(location.offset / word);
    }

    // Base and derived pointers of one object often share a slot.
    offsets.sort_unstable();
    offsets.dedup();

    Ok(SafepointRecord {
        address: raw.instruction_offset,
        frame_size_words: function.frame_size_words,
        argument_count: function.argument_count,
        live_root_offsets: offsets,
    })
}

/// Builder input for every function of a decoded stack map.
#[derive(Debug, Default)]
pub struct ProjectedStackMap {
    /// Functions whose records all projected cleanly.
    pub functions: Vec<FunctionSafepoints>,
    /// One entry per dropped function.
    pub diagnostics: Vec<Diagnostic>,
}

/// Project `map`, tagging each function with `strategy`.
///
/// The stack map does not record argument counts; `argument_count_of`
/// supplies them. A function with any unprojectable record is dropped with a
/// diagnostic and its siblings proceed.
pub fn project_stack_map<F>(
    map: &StackMap,
    target: &TargetConfig,
    strategy: &str,
    mut argument_count_of: F,
) -> ProjectedStackMap
where
    F: FnMut(&StackMapFunction) -> u32,
{
    let mut projected = ProjectedStackMap::default();
    for (entry, records) in map.function_records() {
        let symbol = function_symbol(entry.address);
        match project_function(entry, records, target, &symbol, argument_count_of(entry)) {
            Ok(function) => {
                trace!(function = %symbol, safepoints = function.records.len(), "projected");
                projected.functions.push(function.with_strategy(strategy));
            }
            Err(error) => projected.diagnostics.push(Diagnostic { symbol, error }),
        }
    }
    projected
}

fn project_function(
    entry: &StackMapFunction,
    records: &[RawStackMapRecord],
    target: &TargetConfig,
    symbol: &str,
    argument_count: u32,
) -> Result<FunctionSafepoints> {
    let words = entry.stack_size.div_ceil(target.word_bytes() as u64);
    let frame_size_words = u32::try_from(words).map_err(|_| {
        RootMapError::precondition(
            symbol,
            Precondition::FieldOverflow {
                field: "stackFrameSizeWords",
                value: words,
            },
        )
    })?;

    let mut function = FunctionSafepoints::new(symbol, frame_size_words, argument_count);
    for raw in records {
        let record = project_record(raw, &function, target)?;
        function.records.push(record);
    }
    Ok(function)
}

/// Load addresses of every function in `map`, keyed by [`function_symbol`].
pub fn symbol_map(map: &StackMap) -> SymbolMap {
    map.functions
        .iter()
        .map(|function| (function_symbol(function.address), function.address))
        .collect()
}
