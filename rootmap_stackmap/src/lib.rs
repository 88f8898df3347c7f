//! Codec for the code generator's native stack map section.
//!
//! The code generator emits one record per call site into a well-known
//! section (`.llvm_stackmaps`). Each record names the patch point, the call's
//! instruction offset within its function, and a typed location for every
//! value the safepoint transformation asked to be tracked.
//!
//! # Layout (version 3)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header      u8 version │ u8 0 │ u16 0                        │
//! │             u32 functions │ u32 constants │ u32 records      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Functions   { u64 address, u64 stack size, u64 record count }│
//! ├──────────────────────────────────────────────────────────────┤
//! │ Constants   { u64 }                                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Records     u64 id │ u32 offset │ u16 flags │ u16 locations  │
//! │             { u8 kind, u8 0, u16 size, u16 reg, u16 0,       │
//! │               i32 offset or small constant }                 │
//! │             pad(8) │ u16 0 │ u16 live-outs                   │
//! │             { u16 reg, u8 0, u8 size } │ pad(8)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every multi-byte integer in one stream uses the same byte order, supplied
//! by the caller.
//!
//! This crate is purely a codec: it never decides which locations hold
//! collector-managed pointers. That needs type information only the table
//! builder has.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod location;
pub mod parser;
pub mod record;
pub mod writer;

pub use location::{LiveOut, Location, LocationKind, LocationValue};
pub use parser::{Constants, Functions, Records, StackMapParser, decode};
pub use record::{FunctionRecords, RawStackMapRecord, StackMap, StackMapFunction, StackMapHeader};
pub use writer::{StackMapWriter, encode};

/// Name of the section the code generator emits stack maps into.
pub const STACK_MAP_SECTION: &str = ".llvm_stackmaps";

/// The only stack map format version this crate reads and writes.
pub const STACK_MAP_VERSION: u8 = 3;

/// Encoded size of the fixed header.
pub const HEADER_SIZE: usize = 16;

/// Encoded size of one function entry.
pub const FUNCTION_ENTRY_SIZE: usize = 24;

/// Encoded size of one constant pool entry.
pub const CONSTANT_ENTRY_SIZE: usize = 8;

/// Encoded size of one location.
pub const LOCATION_SIZE: usize = 12;

/// Encoded size of one live-out entry.
pub const LIVE_OUT_SIZE: usize = 4;

/// Alignment of each record's start and of its live-out block.
pub const RECORD_ALIGNMENT: usize = 8;
