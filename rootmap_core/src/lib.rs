//! Core definitions shared by every rootmap crate.
//!
//! - [`error`]: the error taxonomy used across decoding, emission and lookup
//! - [`types`]: the pointer-shaped type model and the managed-pointer policy
//! - [`config`]: per-target platform policy (pointer width, byte order,
//!   argument registers, frame base register)
//!
//! Nothing in this crate allocates on the lookup path or holds global state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, Endianness, PointerWidth, TargetConfig};
pub use error::{Malformed, Precondition, Result, RootMapError};
pub use types::{
    AddressSpace, AddressSpaceClassifier, FunctionType, ManagedPointerType, PointerClassifier,
    PointerType, Type,
};

/// Address space reserved for collector-managed pointers unless the
/// embedding system configures another one.
pub const DEFAULT_MANAGED_ADDRESS_SPACE: AddressSpace = AddressSpace(1);

/// Name of the built-in statepoint collector strategy.
pub const STATEPOINT_STRATEGY: &str = "statepoint-example";
