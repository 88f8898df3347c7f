//! Safepoint table emission.
//!
//! The builder runs every precondition check before it writes anything, so a
//! rejected function leaves no bytes behind in the section.

use crate::safepoint::{FunctionSafepoints, SafepointRecord};
use crate::section::SectionSink;
use crate::table::{FunctionSafepointTable, LiveRoots, SafepointTable, TableFormat};
use rootmap_core::{Precondition, Result, RootMapError, TargetConfig};
use tracing::debug;

/// Largest value an `int16` table field can hold.
const INT16_MAX: u64 = i16::MAX as u64;

// =============================================================================
// SafepointTableBuilder
// =============================================================================

/// Builds and emits tables for the functions of one collector strategy.
#[derive(Debug, Clone, Copy)]
pub struct SafepointTableBuilder<'a> {
    target: &'a TargetConfig,
    strategy: &'a str,
    format: TableFormat,
}

impl<'a> SafepointTableBuilder<'a> {
    /// Builder for functions tagged `strategy`, emitting the uniform layout.
    #[inline]
    pub fn new(target: &'a TargetConfig, strategy: &'a str) -> Self {
        Self {
            target,
            strategy,
            format: TableFormat::Uniform,
        }
    }

    /// Select the table layout.
    #[inline]
    pub fn with_format(mut self, format: TableFormat) -> Self {
        self.format = format;
        self
    }

    /// Layout this builder emits.
    #[inline]
    pub fn format(&self) -> TableFormat {
        self.format
    }

    /// Validate `function` and assemble its table without emitting it.
    ///
    /// Fails with [`RootMapError::PreconditionViolation`] if the function is
    /// not tagged with this builder's strategy, a live root lies outside the
    /// frame, safepoints disagree on the frame shape or share an address, a
    /// value overflows its `int16` field, or (uniform layout only) the live
    /// roots differ between safepoints.
    pub fn build(&self, function: &FunctionSafepoints) -> Result<SafepointTable> {
        let fail = |reason: Precondition| RootMapError::precondition(&function.symbol, reason);

        if !function.uses_strategy(self.strategy) {
            return Err(fail(Precondition::StrategyMismatch {
                expected: self.strategy.to_owned(),
                found: function.strategy.clone(),
            }));
        }

        let frame_size_words = int16_field("stackFrameSizeWords", function.frame_size_words.into())
            .map_err(fail)?;
        let stack_arity = int16_field(
            "stackArity",
            self.target.stack_arity(function.argument_count).into(),
        )
        .map_err(fail)?;
        int16_field("safepointCount", function.records.len() as u64).map_err(fail)?;

        let mut records: Vec<&SafepointRecord> = function.records.iter().collect();
        records.sort_by_key(|record| record.address);

        if let Some(pair) = records.windows(2).find(|pair| pair[0].address == pair[1].address) {
            return Err(fail(Precondition::DuplicateSafepoint {
                address: pair[0].address,
            }));
        }

        for record in &records {
            if record.frame_size_words != function.frame_size_words
                || record.argument_count != function.argument_count
            {
                return Err(fail(Precondition::FrameShapeMismatch {
                    safepoint: record.address,
                }));
            }
            if let Some(&offset) = record
                .live_root_offsets
                .iter()
                .find(|&&offset| offset < 0 || offset as u32 >= function.frame_size_words)
            {
                return Err(fail(Precondition::RootOffsetOutOfFrame {
                    safepoint: record.address,
                    offset,
                    frame_size_words: function.frame_size_words,
                }));
            }
        }

        let live_roots = match self.format {
            TableFormat::Uniform => {
                if let Some((first, rest)) = records.split_first() {
                    let expected = first.root_set();
                    if let Some(odd) = rest.iter().find(|record| record.root_set() != expected) {
                        return Err(fail(Precondition::NonUniformLiveness {
                            safepoint: odd.address,
                        }));
                    }
                }
                let roots = records
                    .first()
                    .map(|record| root_words(record))
                    .unwrap_or_default();
                int16_field("liveRootCount", roots.len() as u64).map_err(fail)?;
                LiveRoots::Uniform(roots)
            }
            TableFormat::PerSafepoint => {
                let lists = records
                    .iter()
                    .map(|record| -> std::result::Result<Box<[u16]>, Precondition> {
                        int16_field("liveRootCount", record.live_root_offsets.len() as u64)?;
                        Ok(root_words(record))
                    })
                    .collect::<std::result::Result<Box<[Box<[u16]>]>, _>>()
                    .map_err(fail)?;
                LiveRoots::PerSafepoint(lists)
            }
        };

        let addresses = records.iter().map(|record| record.address).collect();
        Ok(SafepointTable::from_parts(
            addresses,
            frame_size_words,
            stack_arity,
            live_roots,
        ))
    }

    /// Validate `function`, then append its table to `sink`.
    ///
    /// The sink must use the target's byte order; a mismatch is
    /// [`RootMapError::InvalidArgument`] and nothing is written.
    pub fn emit(
        &self,
        function: &FunctionSafepoints,
        sink: &mut dyn SectionSink,
    ) -> Result<FunctionSafepointTable> {
        if sink.endianness() != self.target.endianness {
            return Err(RootMapError::invalid_argument(format!(
                "section `{}` is {:?}-endian but the target is {:?}-endian",
                sink.name(),
                sink.endianness(),
                self.target.endianness
            )));
        }
        let table = self.build(function)?;
        let section_offset = write_table(&table, &function.symbol, self.target.word_bytes(), sink);
        debug!(
            function = %function.symbol,
            section = sink.name(),
            offset = section_offset,
            safepoints = table.safepoint_count(),
            format = %self.format,
            "emitted safepoint table"
        );
        Ok(FunctionSafepointTable {
            symbol: function.symbol.clone(),
            section: sink.name().to_owned(),
            section_offset,
            table,
        })
    }
}

/// Validate `function` with the default uniform layout.
pub fn build(
    function: &FunctionSafepoints,
    target: &TargetConfig,
    strategy: &str,
) -> Result<SafepointTable> {
    SafepointTableBuilder::new(target, strategy).build(function)
}

/// Serialize a validated table, returning the offset of its first byte.
///
/// Addresses are emitted as relocations against `symbol`.
pub fn write_table(
    table: &SafepointTable,
    symbol: &str,
    alignment: usize,
    sink: &mut dyn SectionSink,
) -> usize {
    sink.align_to(alignment);
    let start = sink.position();

    sink.emit_i16(table.safepoint_count() as i16);
    for &address in table.addresses() {
        sink.emit_reloc32(symbol, address);
    }
    sink.emit_i16(table.frame_size_words() as i16);
    sink.emit_i16(table.stack_arity() as i16);

    match table.live_roots() {
        LiveRoots::Uniform(roots) => write_roots(roots, sink),
        LiveRoots::PerSafepoint(lists) => {
            for roots in lists.iter() {
                write_roots(roots, sink);
            }
        }
    }
    start
}

#[inline]
fn write_roots(roots: &[u16], sink: &mut dyn SectionSink) {
    sink.emit_i16(roots.len() as i16);
    for &word in roots {
        sink.emit_i16(word as i16);
    }
}

#[inline]
fn root_words(record: &SafepointRecord) -> Box<[u16]> {
    // Offsets were range-checked against a frame size that fits in int16.
    record
        .live_root_offsets
        .iter()
        .map(|&offset| offset as u16)
        .collect()
}

#[inline]
fn int16_field(field: &'static str, value: u64) -> std::result::Result<u16, Precondition> {
    if value > INT16_MAX {
        return Err(Precondition::FieldOverflow { field, value });
    }
    Ok(value as u16)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_table;
    use crate::section::ObjectSection;
    use rootmap_core::{Endianness, STATEPOINT_STRATEGY};

    fn f1() -> FunctionSafepoints {
        FunctionSafepoints::new("f1", 2, 2).with_strategy(STATEPOINT_STRATEGY)
    }

    fn emit_one(
        function: &FunctionSafepoints,
        format: TableFormat,
    ) -> (Result<FunctionSafepointTable>, ObjectSection) {
        let target = TargetConfig::x86_64_sysv();
        let mut section = ObjectSection::new(".gc_tables", Endianness::Little);
        let result = SafepointTableBuilder::new(&target, STATEPOINT_STRATEGY)
            .with_format(format)
            .emit(function, &mut section);
        (result, section)
    }

    #[test]
    fn test_single_safepoint_layout() {
        let function = f1().with_safepoint(0x100, [1]);
        let (result, section) = emit_one(&function, TableFormat::Uniform);
        let emitted = result.unwrap();
        assert_eq!(emitted.section_offset, 0);
        assert_eq!(
            section.data(),
            &[
                1, 0, // safepointCount
                0, 0, 0, 0, // address (relocated)
                2, 0, // stackFrameSizeWords
                0, 0, // stackArity
                1, 0, // liveRootCount
                1, 0, // liveRootOffsetWords[0]
            ]
        );
        let reloc = &section.relocations()[0];
        assert_eq!((reloc.offset, reloc.symbol.as_str(), reloc.addend), (2, "f1", 0x100));
    }

    #[test]
    fn test_zero_safepoints() {
        let (result, section) = emit_one(&f1(), TableFormat::Uniform);
        let emitted = result.unwrap();
        assert_eq!(emitted.table.safepoint_count(), 0);
        assert_eq!(section.data(), &[0, 0, 2, 0, 0, 0, 0, 0]);
        assert!(section.relocations().is_empty());
    }

    #[test]
    fn test_rejects_offset_outside_frame() {
        for bad in [2, 7, -1] {
            let function = f1().with_safepoint(0x100, [0, bad]);
            let (result, section) = emit_one(&function, TableFormat::Uniform);
            assert!(matches!(
                result,
                Err(RootMapError::PreconditionViolation {
                    reason: Precondition::RootOffsetOutOfFrame { offset, .. },
                    ..
                }) if offset == bad
            ));
            assert!(section.is_empty(), "no bytes for rejected function");
        }
    }

    #[test]
    fn test_rejects_strategy_mismatch() {
        let function = FunctionSafepoints::new("f2", 0, 0).with_strategy("shadow-stack");
        let (result, section) = emit_one(&function, TableFormat::Uniform);
        assert_eq!(
            result.unwrap_err(),
            RootMapError::precondition(
                "f2",
                Precondition::StrategyMismatch {
                    expected: STATEPOINT_STRATEGY.into(),
                    found: Some("shadow-stack".into()),
                }
            )
        );
        assert!(section.is_empty());

        let untagged = FunctionSafepoints::new("f3", 0, 0);
        assert!(emit_one(&untagged, TableFormat::Uniform).0.is_err());
    }

    #[test]
    fn test_rejects_duplicate_address() {
        let function = f1().with_safepoint(0x20, [1]).with_safepoint(0x20, [1]);
        let (result, _) = emit_one(&function, TableFormat::Uniform);
        assert!(matches!(
            result,
            Err(RootMapError::PreconditionViolation {
                reason: Precondition::DuplicateSafepoint { address: 0x20 },
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_frame_shape_mismatch() {
        let mut function = f1().with_safepoint(0x10, [1]);
        function
            .records
            .push(SafepointRecord::new(0x20, 3, 2, [1]));
        let (result, _) = emit_one(&function, TableFormat::Uniform);
        assert!(matches!(
            result,
            Err(RootMapError::PreconditionViolation {
                reason: Precondition::FrameShapeMismatch { safepoint: 0x20 },
                ..
            })
        ));
    }

    #[test]
    fn test_uniform_rejects_varying_liveness() {
        let function = FunctionSafepoints::new("f1", 4, 0)
            .with_strategy(STATEPOINT_STRATEGY)
            .with_safepoint(0x10, [1, 2])
            .with_safepoint(0x20, [2, 1, 1])
            .with_safepoint(0x30, [3]);
        let (result, section) = emit_one(&function, TableFormat::Uniform);
        assert!(matches!(
            result,
            Err(RootMapError::PreconditionViolation {
                reason: Precondition::NonUniformLiveness { safepoint: 0x30 },
                ..
            })
        ));
        assert!(section.is_empty());

        // Same input is representable once roots are stored per safepoint.
        let (result, _) = emit_one(&function, TableFormat::PerSafepoint);
        let table = result.unwrap().table;
        assert_eq!(table.roots_of(0), Some(&[1u16, 2][..]));
        assert_eq!(table.roots_of(1), Some(&[2u16, 1, 1][..]));
        assert_eq!(table.roots_of(2), Some(&[3u16][..]));
    }

    #[test]
    fn test_sorts_addresses() {
        let function = f1()
            .with_safepoint(0x30, [1])
            .with_safepoint(0x10, [1])
            .with_safepoint(0x20, [1]);
        let (result, section) = emit_one(&function, TableFormat::Uniform);
        assert_eq!(result.unwrap().table.addresses(), &[0x10, 0x20, 0x30]);
        let addends: Vec<u32> = section.relocations().iter().map(|r| r.addend).collect();
        assert_eq!(addends, vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_stack_arity_from_register_slots() {
        let target = TargetConfig {
            register_argument_slots: 2,
            ..TargetConfig::x86_64_sysv()
        };
        let function = FunctionSafepoints::new("f1", 1, 5).with_strategy(STATEPOINT_STRATEGY);
        let table = build(&function, &target, STATEPOINT_STRATEGY).unwrap();
        assert_eq!(table.stack_arity(), 3);
    }

    #[test]
    fn test_rejects_field_overflow() {
        let function = FunctionSafepoints::new("big", 40_000, 0).with_strategy(STATEPOINT_STRATEGY);
        let err = build(&function, &TargetConfig::default(), STATEPOINT_STRATEGY).unwrap_err();
        assert!(matches!(
            err,
            RootMapError::PreconditionViolation {
                reason: Precondition::FieldOverflow {
                    field: "stackFrameSizeWords",
                    value: 40_000
                },
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_sink_byte_order_mismatch() {
        let target = TargetConfig {
            endianness: Endianness::Big,
            ..TargetConfig::x86_64_sysv()
        };
        let mut section = ObjectSection::new(".gc_tables", Endianness::Little);
        let function = f1().with_safepoint(0x100, [1]).with_safepoint(0x200, [1]);
        let result = SafepointTableBuilder::new(&target, STATEPOINT_STRATEGY)
            .emit(&function, &mut section);
        assert!(matches!(result, Err(RootMapError::InvalidArgument(_))));
        assert!(section.is_empty());
        assert!(section.relocations().is_empty());
    }

    #[test]
    fn test_big_endian_target_reads_back() {
        let target = TargetConfig {
            endianness: Endianness::Big,
            ..TargetConfig::x86_64_sysv()
        };
        let mut section = ObjectSection::new(".gc_tables", Endianness::Big);
        let function = f1().with_safepoint(0x100, [1]).with_safepoint(0x200, [1]);
        let emitted = SafepointTableBuilder::new(&target, STATEPOINT_STRATEGY)
            .emit(&function, &mut section)
            .unwrap();
        let bytes = section.resolve(&|_: &str| Some(0u64)).unwrap();
        let read = read_table(&bytes, 0, TableFormat::Uniform, target.endianness).unwrap();
        assert_eq!(read, emitted.table);
    }

    #[test]
    fn test_tables_are_pointer_aligned() {
        let target = TargetConfig {
            endianness: Endianness::Big,
            ..TargetConfig::x86_64_sysv()
        };
        let builder = SafepointTableBuilder::new(&target, STATEPOINT_STRATEGY);
        let mut section = ObjectSection::new(".gc_tables", Endianness::Big);

        let first = builder.emit(&f1().with_safepoint(0x100, [1]), &mut section).unwrap();
        let second = FunctionSafepoints::new("g", 3, 0)
            .with_strategy(STATEPOINT_STRATEGY)
            .with_safepoint(0x8, [0, 2]);
        let second = builder.emit(&second, &mut section).unwrap();

        assert_eq!(first.section_offset, 0);
        assert_eq!(second.section_offset, 16);
        assert_eq!(&section.data()[14..16], &[0, 0]); // padding
        assert_eq!(&section.data()[16..18], &[0, 1]); // big-endian count
    }
}
