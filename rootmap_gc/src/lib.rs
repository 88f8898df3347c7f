//! Safepoint root tables for a precise, relocating collector.
//!
//! # Architecture
//!
//! ```text
//!  code generator                    loader / collector
//! ┌──────────────┐  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐
//! │ stack map    │─►│ projection │─►│   builder    │─►│  ObjectSection   │
//! │ (raw records)│  └────────────┘  │ (per function│  │  + relocations   │
//! └──────────────┘                  │  strategy)   │  └────────┬─────────┘
//!                                   └──────────────┘           │ resolve
//!                                                     ┌────────▼─────────┐
//!   return address ─► LoadedTableIndex ─► roots_at ◄──│   TableReader    │
//!                          FrameWalker                └──────────────────┘
//! ```
//!
//! - [`builder`]: validates one function's safepoints and emits its table
//! - [`reader`]: decodes the tables of a loaded section
//! - [`roots`]: exact-match root lookup and frame walking
//! - [`strategy`] / [`program`]: per-strategy emission over a whole program
//! - [`projection`]: turns decoded stack map records into builder input
//!
//! # Usage
//!
//! ```ignore
//! use rootmap_gc::{FunctionSafepoints, StrategyRegistry, TableFormat, emit_program};
//!
//! let target = TargetConfig::x86_64_sysv();
//! let registry = StrategyRegistry::with_builtin(&target, TableFormat::Uniform);
//! let f = FunctionSafepoints::new("f", 2, 2)
//!     .with_strategy(STATEPOINT_STRATEGY)
//!     .with_safepoint(0x100, [1]);
//! let program = emit_program([&f], &registry, &target);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod program;
pub mod projection;
pub mod reader;
pub mod roots;
pub mod safepoint;
pub mod section;
pub mod strategy;
pub mod table;

pub use builder::{SafepointTableBuilder, build, write_table};
pub use program::{Diagnostic, ProgramTables, emit_program};
pub use projection::{
    ProjectedStackMap, function_symbol, project_record, project_stack_map, symbol_map,
};
pub use reader::{TableReader, read_table};
pub use roots::{Frame, FrameWalker, LoadedTableIndex, RootSlot, SafepointRef, roots_at};
pub use safepoint::{FunctionSafepoints, SafepointRecord};
pub use section::{ObjectSection, Relocation, SectionSink, SymbolMap, SymbolResolver};
pub use strategy::{
    SAFEPOINT_TABLE_SECTION, SafepointTableEmitter, Strategy, StrategyRegistry, TableEmitter,
};
pub use table::{FunctionSafepointTable, LiveRoots, SafepointTable, TableFormat};
