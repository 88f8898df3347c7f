//! Emit, load and query tables end to end.

use proptest::prelude::*;
use rootmap_core::{Endianness, Precondition, RootMapError, STATEPOINT_STRATEGY, TargetConfig};
use rootmap_gc::{
    Frame, FrameWalker, FunctionSafepoints, LoadedTableIndex, ObjectSection,
    SAFEPOINT_TABLE_SECTION, SafepointTable, SafepointTableBuilder, StrategyRegistry,
    SymbolMap, TableFormat, TableReader, emit_program, project_stack_map, roots_at, symbol_map,
};
use rootmap_stackmap::{Location, RawStackMapRecord, StackMap, decode, encode};

fn tagged(symbol: &str, frame: u32, argc: u32) -> FunctionSafepoints {
    FunctionSafepoints::new(symbol, frame, argc).with_strategy(STATEPOINT_STRATEGY)
}

/// Emit `function` alone, resolve its symbol to `base`, and read it back.
fn round_trip(function: &FunctionSafepoints, base: u64, target: &TargetConfig) -> SafepointTable {
    let mut section = ObjectSection::new(SAFEPOINT_TABLE_SECTION, target.endianness);
    SafepointTableBuilder::new(target, STATEPOINT_STRATEGY)
        .emit(function, &mut section)
        .unwrap();
    let symbols: SymbolMap = [(function.symbol.clone(), base)].into_iter().collect();
    let bytes = section.resolve(&symbols).unwrap();
    let mut tables = TableReader::new(&bytes, TableFormat::Uniform, target)
        .read_all()
        .unwrap();
    assert_eq!(tables.len(), 1);
    tables.remove(0)
}

#[test]
fn test_single_root_round_trip() {
    let target = TargetConfig::x86_64_sysv();
    let function = tagged("f1", 2, 2).with_safepoint(0x100, [1]);
    let table = round_trip(&function, 0, &target);

    assert_eq!(table.safepoint_count(), 1);
    assert_eq!(table.addresses(), &[0x100]);
    assert_eq!(table.frame_size_words(), 2);
    assert_eq!(table.stack_arity(), 0);
    assert_eq!(roots_at(&table, 0x100).unwrap(), &[1]);
}

#[test]
fn test_zero_safepoints_round_trip() {
    let target = TargetConfig::x86_64_sysv();
    let table = round_trip(&tagged("leaf", 3, 0), 0x4000, &target);
    assert_eq!(table.safepoint_count(), 0);
    assert_eq!(table.frame_size_words(), 3);
    assert_eq!(
        roots_at(&table, 0x4000),
        Err(RootMapError::unknown_safepoint(0x4000))
    );
}

#[test]
fn test_unknown_address_is_fatal() {
    let target = TargetConfig::x86_64_sysv();
    let function = tagged("f", 4, 0)
        .with_safepoint(0x30, [0, 2])
        .with_safepoint(0x40, [2, 0]);
    let table = round_trip(&function, 0x1000, &target);

    assert_eq!(roots_at(&table, 0x1040).unwrap(), &[0, 2]);
    let err = roots_at(&table, 0x1041).unwrap_err();
    assert_eq!(err, RootMapError::unknown_safepoint(0x1041));
    assert!(err.is_fatal());
}

#[test]
fn test_out_of_frame_root_rejected_before_emission() {
    let target = TargetConfig::x86_64_sysv();
    let registry = StrategyRegistry::with_builtin(&target, TableFormat::Uniform);
    let functions = [tagged("f", 2, 0).with_safepoint(0x10, [2])];
    let program = emit_program(&functions, &registry, &target);

    assert!(program.tables.is_empty());
    assert!(matches!(
        program.diagnostics[0].error,
        RootMapError::PreconditionViolation {
            reason: Precondition::RootOffsetOutOfFrame {
                offset: 2,
                frame_size_words: 2,
                ..
            },
            ..
        }
    ));
    assert!(program.sections.iter().all(ObjectSection::is_empty));
}

#[test]
fn test_stack_map_to_frame_walk() {
    let target = TargetConfig::x86_64_sysv();
    let sp = target.stack_pointer_register;

    // Two functions, slots addressed off the stack pointer.
    let record = |id, offset, slots: &[i32]| {
        let mut raw = RawStackMapRecord::new(id, offset)
            .with_location(Location::constant(0))
            .with_location(Location::constant(0))
            .with_location(Location::constant(0));
        for &slot in slots {
            raw = raw
                .with_location(Location::indirect(sp, slot, 8))
                .with_location(Location::indirect(sp, slot, 8));
        }
        raw
    };
    let mut map = StackMap::default();
    map.push_function(0x1000, 32, [record(1, 0x10, &[8, 24]), record(2, 0x28, &[24, 8])]);
    map.push_function(0x2000, 16, [record(3, 0x8, &[])]);
    let bytes = encode(&map, Endianness::Little).unwrap();
    let map = decode(&bytes, Endianness::Little).unwrap();

    let projected = project_stack_map(&map, &target, STATEPOINT_STRATEGY, |_| 0);
    assert!(projected.diagnostics.is_empty());

    let registry = StrategyRegistry::with_builtin(&target, TableFormat::Uniform);
    let program = emit_program(&projected.functions, &registry, &target);
    assert!(program.is_clean());

    let section = program.section(SAFEPOINT_TABLE_SECTION).unwrap();
    let loaded = section.resolve(&symbol_map(&map)).unwrap();
    let tables = TableReader::new(&loaded, TableFormat::Uniform, &target)
        .read_all()
        .unwrap();

    let index = LoadedTableIndex::new();
    index.insert("module", tables).unwrap();
    assert_eq!(index.safepoint_count(), 3);

    let walker = FrameWalker::new(&index, &target);
    let frames = [
        Frame {
            return_address: 0x2008,
            frame_base: 0x7f00,
        },
        Frame {
            return_address: 0x1028,
            frame_base: 0x7f20,
        },
    ];
    let mut slots = Vec::new();
    let count = walker
        .walk_stack(frames, |slot| slots.push((slot.offset_words, slot.address)))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(slots, vec![(1, 0x7f28), (3, 0x7f38)]);
}

#[test]
fn test_per_safepoint_tables_load() {
    let target = TargetConfig::aarch64();
    let registry = StrategyRegistry::with_builtin(&target, TableFormat::PerSafepoint);
    let functions = [tagged("g", 6, 10)
        .with_safepoint(0x20, [5])
        .with_safepoint(0x10, [0, 1])];
    let program = emit_program(&functions, &registry, &target);
    let section = program.section(SAFEPOINT_TABLE_SECTION).unwrap();
    let bytes = section.resolve(&|_: &str| Some(0x9000u64)).unwrap();
    let tables = TableReader::new(&bytes, TableFormat::PerSafepoint, &target)
        .read_all()
        .unwrap();

    assert_eq!(tables[0].stack_arity(), 2);
    assert_eq!(roots_at(&tables[0], 0x9010).unwrap(), &[0, 1]);
    assert_eq!(roots_at(&tables[0], 0x9020).unwrap(), &[5]);
}

// =============================================================================
// Property tests
// =============================================================================

fn function_strategy(index: usize) -> impl Strategy<Value = FunctionSafepoints> {
    (1u32..64, 0u32..12).prop_flat_map(move |(frame, argc)| {
        (
            prop::collection::btree_set(0u32..0x1_0000, 0..16),
            prop::collection::vec(0..frame as i32, 0..8),
        )
            .prop_map(move |(addresses, roots)| {
                let mut function = tagged(&format!("fn{index}"), frame, argc);
                for address in addresses {
                    function.push_safepoint(address, roots.iter().copied());
                }
                function
            })
    })
}

fn program_strategy() -> impl Strategy<Value = Vec<FunctionSafepoints>> {
    (1usize..6).prop_flat_map(|count| {
        (0..count)
            .map(function_strategy)
            .collect::<Vec<_>>()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_property_emit_load_preserves_tables(
        functions in program_strategy(),
        big in any::<bool>(),
    ) {
        let target = TargetConfig {
            endianness: if big { Endianness::Big } else { Endianness::Little },
            ..TargetConfig::x86_64_sysv()
        };
        let registry = StrategyRegistry::with_builtin(&target, TableFormat::Uniform);
        let program = emit_program(&functions, &registry, &target);
        prop_assert!(program.is_clean());

        let bases: SymbolMap = functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.symbol.clone(), (i as u64 + 1) << 20))
            .collect();
        let section = program.section(SAFEPOINT_TABLE_SECTION).unwrap();
        let loaded = section.resolve(&bases).unwrap();
        let read: Vec<(usize, SafepointTable)> =
            TableReader::new(&loaded, TableFormat::Uniform, &target)
                .collect::<Result<_, _>>()
                .unwrap();

        prop_assert_eq!(read.len(), program.tables.len());
        for (i, ((offset, table), emitted)) in read.iter().zip(&program.tables).enumerate() {
            let base = ((i as u32) + 1) << 20;
            prop_assert_eq!(*offset, emitted.section_offset);
            prop_assert_eq!(Some(table.clone()), emitted.table.rebased(base));
        }
    }

    #[test]
    fn test_property_roots_at_is_idempotent(function in function_strategy(0)) {
        let target = TargetConfig::default();
        let table = rootmap_gc::build(&function, &target, STATEPOINT_STRATEGY).unwrap();
        for &address in table.addresses() {
            let first = roots_at(&table, address.into()).unwrap().to_vec();
            let second = roots_at(&table, address.into()).unwrap().to_vec();
            prop_assert_eq!(&first, &second);
            let expected: Vec<u16> = function.records[0]
                .live_root_offsets
                .iter()
                .map(|&o| o as u16)
                .collect();
            prop_assert_eq!(first, expected);
        }
    }
}
