//! Subcommand implementations.
//!
//! Each command renders its report into a `String` so the formatting can be
//! tested without a terminal.

use anyhow::{Context, Result, bail};
use rootmap_core::{STATEPOINT_STRATEGY, TargetConfig};
use rootmap_gc::{
    FrameWalker, LoadedTableIndex, ProgramTables, SAFEPOINT_TABLE_SECTION, SafepointTable,
    StrategyRegistry, TableFormat, TableReader, emit_program, project_stack_map, symbol_map,
};
use rootmap_stackmap::{LocationKind, StackMap, decode};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: TargetConfig,
    pub format: TableFormat,
    /// Argument count assumed for every function in the stack map.
    pub arity: u32,
}

/// Read and decode a stack map section dumped to `path`.
pub fn read_stack_map(path: &Path, settings: &Settings) -> Result<StackMap> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    debug!(path = %path.display(), len = bytes.len(), "read stack map section");
    decode(&bytes, settings.target.endianness)
        .with_context(|| format!("decoding {}", path.display()))
}

// =============================================================================
// dump
// =============================================================================

/// Describe every function, record and location in `map`.
///
/// With `raw`, print one line per location: `kind offset register` for stack
/// slots and the inline value for everything else.
pub fn render_dump(map: &StackMap, raw: bool) -> Result<String> {
    let mut out = String::new();
    if raw {
        for record in &map.records {
            for location in &record.locations {
                let _ = match location.kind {
                    LocationKind::Direct | LocationKind::Indirect => writeln!(
                        out,
                        "{} {} {}",
                        location.kind as u8, location.offset, location.dwarf_reg
                    ),
                    _ => writeln!(out, "{}", location.offset),
                };
            }
        }
        return Ok(out);
    }

    let header = map.header()?;
    let _ = writeln!(
        out,
        "stack map v{}: {} functions, {} constants, {} records",
        header.version, header.num_functions, header.num_constants, header.num_records
    );
    for (function, records) in map.function_records() {
        let _ = writeln!(
            out,
            "function {:#x}: stack size {}, {} records",
            function.address, function.stack_size, function.record_count
        );
        for record in records {
            let _ = writeln!(
                out,
                "  record {} @ +{:#x}: {} locations, {} live-outs",
                record.patch_point_id,
                record.instruction_offset,
                record.locations.len(),
                record.live_outs.len()
            );
            for (index, location) in record.locations.iter().enumerate() {
                let _ = match map.pool_constant(location) {
                    Some(value) => writeln!(out, "    [{index}] {location} = {value:#x}"),
                    None => writeln!(out, "    [{index}] {location}"),
                };
            }
            for live_out in &record.live_outs {
                let _ = writeln!(out, "    live-out r{} ({}B)", live_out.dwarf_reg, live_out.size);
            }
        }
    }
    Ok(out)
}

// =============================================================================
// build
// =============================================================================

/// Project `map` and emit tables with the built-in strategy.
///
/// Functions the projection rejects are reported alongside the emitter's
/// diagnostics.
pub fn build_tables(map: &StackMap, settings: &Settings) -> ProgramTables {
    let projected = project_stack_map(map, &settings.target, STATEPOINT_STRATEGY, |_| {
        settings.arity
    });
    let registry = StrategyRegistry::with_builtin(&settings.target, settings.format);
    let mut program = emit_program(&projected.functions, &registry, &settings.target);
    let mut diagnostics = projected.diagnostics;
    diagnostics.append(&mut program.diagnostics);
    program.diagnostics = diagnostics;
    program
}

/// Resolve the table section of `program` against the functions of `map`.
pub fn load_tables(
    map: &StackMap,
    program: &ProgramTables,
    settings: &Settings,
) -> Result<(Vec<u8>, Vec<SafepointTable>)> {
    let Some(section) = program.section(SAFEPOINT_TABLE_SECTION) else {
        return Ok((Vec::new(), Vec::new()));
    };
    let bytes = section
        .resolve(&symbol_map(map))
        .context("applying table relocations")?;
    let tables = TableReader::new(&bytes, settings.format, &settings.target)
        .read_all()
        .context("reading emitted tables")?;
    Ok((bytes, tables))
}

/// Summarize the tables of `program`.
pub fn render_build(program: &ProgramTables) -> String {
    let mut out = String::new();
    for emitted in &program.tables {
        let table = &emitted.table;
        let _ = writeln!(
            out,
            "{} @ {}+{:#x}: {} safepoints, frame {} words, stack arity {}",
            emitted.symbol,
            emitted.section,
            emitted.section_offset,
            table.safepoint_count(),
            table.frame_size_words(),
            table.stack_arity()
        );
        for (address, roots) in table.safepoints() {
            let _ = writeln!(out, "  +{address:#x}: roots {roots:?}");
        }
    }
    out
}

/// `rootmap build`: emit tables and optionally write the loaded section.
/// One `warning:` line per rejected function.
pub fn render_diagnostics(program: &ProgramTables) -> String {
    let mut out = String::new();
    for diagnostic in &program.diagnostics {
        let _ = writeln!(out, "warning: {diagnostic}");
    }
    out
}

pub fn build(input: &Path, output: Option<&Path>, settings: &Settings) -> Result<String> {
    let map = read_stack_map(input, settings)?;
    let program = build_tables(&map, settings);
    eprint!("{}", render_diagnostics(&program));

    let (bytes, _) = load_tables(&map, &program, settings)?;
    if let Some(output) = output {
        fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    }

    if !program.is_clean() {
        bail!("{} function(s) rejected", program.diagnostics.len());
    }
    Ok(render_build(&program))
}

// =============================================================================
// roots
// =============================================================================

/// `rootmap roots`: answer a root query for one return address.
pub fn roots(
    input: &Path,
    return_address: u64,
    frame_base: Option<u64>,
    settings: &Settings,
) -> Result<String> {
    let map = read_stack_map(input, settings)?;
    let program = build_tables(&map, settings);
    eprint!("{}", render_diagnostics(&program));
    let (_, tables) = load_tables(&map, &program, settings)?;

    let index = LoadedTableIndex::new();
    index.insert(input.display().to_string(), tables)?;
    render_roots(&index, return_address, frame_base, settings)
}

/// Look `return_address` up in `index` and describe its roots.
pub fn render_roots(
    index: &LoadedTableIndex,
    return_address: u64,
    frame_base: Option<u64>,
    settings: &Settings,
) -> Result<String> {
    let safepoint = index.roots_at(return_address)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{return_address:#x}: roots {:?} (frame {} words)",
        safepoint.roots(),
        safepoint.table().frame_size_words()
    );
    if let Some(base) = frame_base {
        let walker = FrameWalker::new(index, &settings.target);
        for slot in walker.roots_in_frame(safepoint.table(), return_address, base)? {
            let _ = writeln!(out, "  slot {slot:#x}");
        }
    }
    Ok(out)
}
