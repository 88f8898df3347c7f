//! Exit code handling.

use rootmap_core::RootMapError;
use std::process::ExitCode;

// =============================================================================
// Exit Codes
// =============================================================================

/// Successful execution.
pub const EXIT_SUCCESS: u8 = 0;
/// Bad input, rejected functions, I/O failures.
pub const EXIT_ERROR: u8 = 1;
/// Command-line usage error (bad flags, missing args).
pub const EXIT_USAGE_ERROR: u8 = 2;
/// A return address matched no safepoint. A collector seeing this must stop.
pub const EXIT_COLLECTOR_INTEGRITY: u8 = 70;

/// Print `error` with its context chain to stderr and pick the exit code.
pub fn report(error: &anyhow::Error) -> ExitCode {
    eprintln!("error: {error:#}");
    ExitCode::from(exit_code_for_error(error))
}

/// Map an error to its exit code.
#[inline]
pub fn exit_code_for_error(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<RootMapError>() {
        Some(err) if err.is_fatal() => EXIT_COLLECTOR_INTEGRITY,
        _ => EXIT_ERROR,
    }
}
