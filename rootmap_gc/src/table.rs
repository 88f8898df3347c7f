//! The per-function safepoint table and its persisted layout.
//!
//! # Layout
//!
//! Each function's table starts at a section offset aligned to the pointer
//! width. All fields use the target byte order.
//!
//! ```text
//! int16  safepointCount
//! int32  safepointAddress[safepointCount]   relocated against the function symbol
//! int16  stackFrameSizeWords
//! int16  stackArity
//!
//! Uniform (version 1):
//!   int16  liveRootCount
//!   int16  liveRootOffsetWords[liveRootCount]
//!
//! PerSafepoint (version 2):
//!   repeat safepointCount:
//!     int16  liveRootCount
//!     int16  liveRootOffsetWords[liveRootCount]
//! ```
//!
//! Addresses are strictly increasing so the collector can binary search them.

use std::fmt;

/// Versioned table layout. Builder and reader must agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TableFormat {
    /// One function-wide live-root list (version 1).
    #[default]
    Uniform,
    /// One live-root list per safepoint (version 2).
    PerSafepoint,
}

impl TableFormat {
    /// Layout version number.
    #[inline]
    pub const fn version(self) -> u8 {
        match self {
            TableFormat::Uniform => 1,
            TableFormat::PerSafepoint => 2,
        }
    }

    /// Layout for a version number.
    #[inline]
    pub const fn from_version(version: u8) -> Option<Self> {
        match version {
            1 => Some(TableFormat::Uniform),
            2 => Some(TableFormat::PerSafepoint),
            _ => None,
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFormat::Uniform => f.write_str("uniform"),
            TableFormat::PerSafepoint => f.write_str("per-safepoint"),
        }
    }
}

/// Live-root lists of a table, in words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveRoots {
    /// Shared by every safepoint of the function.
    Uniform(Box<[u16]>),
    /// One list per safepoint, parallel to the address list.
    PerSafepoint(Box<[Box<[u16]>]>),
}

impl LiveRoots {
    /// The layout these roots serialize to.
    #[inline]
    pub fn format(&self) -> TableFormat {
        match self {
            LiveRoots::Uniform(_) => TableFormat::Uniform,
            LiveRoots::PerSafepoint(_) => TableFormat::PerSafepoint,
        }
    }
}

// =============================================================================
// SafepointTable
// =============================================================================

/// Immutable root table for one function.
///
/// Shared by the builder (addresses are code offsets from the function symbol)
/// and the loader (addresses are relocated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafepointTable {
    addresses: Box<[u32]>,
    frame_size_words: u16,
    stack_arity: u16,
    live_roots: LiveRoots,
}

impl SafepointTable {
    /// Assemble a table from already-validated parts.
    ///
    /// `addresses` must be strictly increasing and, for
    /// [`LiveRoots::PerSafepoint`], parallel to the root lists.
    pub(crate) fn from_parts(
        addresses: Box<[u32]>,
        frame_size_words: u16,
        stack_arity: u16,
        live_roots: LiveRoots,
    ) -> Self {
        debug_assert!(addresses.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(match &live_roots {
            LiveRoots::Uniform(_) => true,
            LiveRoots::PerSafepoint(lists) => lists.len() == addresses.len(),
        });
        Self {
            addresses,
            frame_size_words,
            stack_arity,
            live_roots,
        }
    }

    /// Safepoint addresses, strictly increasing.
    #[inline]
    pub fn addresses(&self) -> &[u32] {
        &self.addresses
    }

    /// Number of safepoints.
    #[inline]
    pub fn safepoint_count(&self) -> usize {
        self.addresses.len()
    }

    /// Frame size in words.
    #[inline]
    pub fn frame_size_words(&self) -> u16 {
        self.frame_size_words
    }

    /// Arguments passed on the stack.
    #[inline]
    pub fn stack_arity(&self) -> u16 {
        self.stack_arity
    }

    /// Live-root lists.
    #[inline]
    pub fn live_roots(&self) -> &LiveRoots {
        &self.live_roots
    }

    /// Layout this table serializes to.
    #[inline]
    pub fn format(&self) -> TableFormat {
        self.live_roots.format()
    }

    /// Index of the safepoint at exactly `address`.
    #[inline]
    pub fn position(&self, address: u32) -> Option<usize> {
        self.addresses.binary_search(&address).ok()
    }

    /// Roots of the safepoint at `index`.
    #[inline]
    pub fn roots_of(&self, index: usize) -> Option<&[u16]> {
        if index >= self.addresses.len() {
            return None;
        }
        match &self.live_roots {
            LiveRoots::Uniform(roots) => Some(roots),
            LiveRoots::PerSafepoint(lists) => lists.get(index).map(|roots| &roots[..]),
        }
    }

    /// Iterate over `(address, roots)` for every safepoint.
    pub fn safepoints(&self) -> impl ExactSizeIterator<Item = (u32, &[u16])> + '_ {
        self.addresses.iter().enumerate().map(|(idx, &addr)| {
            let roots: &[u16] = match &self.live_roots {
                LiveRoots::Uniform(roots) => roots,
                LiveRoots::PerSafepoint(lists) => &lists[idx],
            };
            (addr, roots)
        })
    }

    /// Copy of this table with every address moved by `base`.
    ///
    /// Returns `None` if an address would not fit in 32 bits.
    pub fn rebased(&self, base: u32) -> Option<Self> {
        let addresses = self
            .addresses
            .iter()
            .map(|&addr| addr.checked_add(base))
            .collect::<Option<Box<[u32]>>>()?;
        Some(Self {
            addresses,
            ..self.clone()
        })
    }

    /// Encoded size in bytes, excluding leading alignment padding.
    pub fn encoded_len(&self) -> usize {
        let fixed = 2 + 4 * self.addresses.len() + 2 + 2;
        match &self.live_roots {
            LiveRoots::Uniform(roots) => fixed + 2 + 2 * roots.len(),
            LiveRoots::PerSafepoint(lists) => {
                fixed + lists.iter().map(|roots| 2 + 2 * roots.len()).sum::<usize>()
            }
        }
    }
}

// =============================================================================
// FunctionSafepointTable
// =============================================================================

/// A table the builder emitted, together with where it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSafepointTable {
    /// Function symbol the addresses are relative to.
    pub symbol: String,
    /// Section the table was appended to.
    pub section: String,
    /// Offset of the table's first byte within the section.
    pub section_offset: usize,
    /// The table, with function-relative addresses.
    pub table: SafepointTable,
}
