//! Error taxonomy for decoding, table emission and root lookup.
//!
//! Every fallible operation in the workspace returns [`RootMapError`]. The
//! variants fall into two groups:
//!
//! - per-function diagnostics ([`RootMapError::InvalidArgument`],
//!   [`RootMapError::PreconditionViolation`],
//!   [`RootMapError::MalformedRecordStream`] and the relocation errors): the
//!   offending function or record is dropped and its siblings proceed;
//! - [`RootMapError::UnknownSafepoint`]: fatal to the collection cycle. A frame
//!   that cannot be identified cannot be scanned, and a partial root set
//!   corrupts the heap on relocation.

use thiserror::Error;

/// Result alias used throughout rootmap.
pub type Result<T> = std::result::Result<T, RootMapError>;

// =============================================================================
// RootMapError
// =============================================================================

/// Errors produced by the rootmap crates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RootMapError {
    /// The classifier was handed a type that is not pointer-shaped, or a
    /// component was configured with an impossible value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Builder input violates a frame-shape, offset or strategy precondition.
    #[error("precondition violated in `{function}`: {reason}")]
    PreconditionViolation {
        /// Symbol of the function whose table was rejected.
        function: String,
        /// What was wrong with the input.
        reason: Precondition,
    },

    /// The raw record stream is truncated or contains out-of-range data.
    #[error("malformed record stream at byte {offset}: {reason}")]
    MalformedRecordStream {
        /// Byte offset into the buffer where decoding stopped.
        offset: usize,
        /// What was wrong with the bytes.
        reason: Malformed,
    },

    /// A return address does not match any safepoint in the table consulted.
    #[error("no safepoint recorded at return address {address:#x}")]
    UnknownSafepoint {
        /// The queried instruction address.
        address: u64,
    },

    /// A relocation names a symbol the loader could not resolve.
    #[error("unresolved symbol `{symbol}`")]
    UnresolvedSymbol {
        /// The missing symbol.
        symbol: String,
    },

    /// A resolved relocation does not fit its 32-bit field.
    #[error("relocation against `{symbol}` does not fit in 32 bits ({value:#x})")]
    RelocationOverflow {
        /// The relocated symbol.
        symbol: String,
        /// The full resolved value.
        value: u64,
    },
}

impl RootMapError {
    /// Create an [`RootMapError::InvalidArgument`].
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a [`RootMapError::PreconditionViolation`] for `function`.
    #[inline]
    pub fn precondition(function: impl Into<String>, reason: Precondition) -> Self {
        Self::PreconditionViolation {
            function: function.into(),
            reason,
        }
    }

    /// Create a [`RootMapError::MalformedRecordStream`] at byte `offset`.
    #[inline]
    pub fn malformed(offset: usize, reason: Malformed) -> Self {
        Self::MalformedRecordStream { offset, reason }
    }

    /// Create a [`RootMapError::UnknownSafepoint`].
    #[inline]
    pub fn unknown_safepoint(address: u64) -> Self {
        Self::UnknownSafepoint { address }
    }

    /// Whether the error must abort the current collection cycle.
    ///
    /// Only [`RootMapError::UnknownSafepoint`] is fatal; everything else is a
    /// diagnostic scoped to one function or record.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownSafepoint { .. })
    }
}

// =============================================================================
// Precondition
// =============================================================================

/// Reasons the table builder refuses a function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    /// The function is not associated with the emitter's collector strategy.
    #[error("function uses strategy {found:?}, emitter handles `{expected}`")]
    StrategyMismatch {
        /// Strategy the emitter serves.
        expected: String,
        /// Strategy tag found on the function.
        found: Option<String>,
    },

    /// A live-root offset lies outside `[0, frame_size_words)`.
    #[error(
        "live root at word {offset} of safepoint {safepoint:#x} outside frame of {frame_size_words} words"
    )]
    RootOffsetOutOfFrame {
        /// Safepoint address (code offset).
        safepoint: u32,
        /// The rejected offset, in words.
        offset: i32,
        /// The function's frame size, in words.
        frame_size_words: u32,
    },

    /// A safepoint reports a frame shape different from its function's.
    #[error("safepoint {safepoint:#x} reports a frame shape different from its function")]
    FrameShapeMismatch {
        /// Safepoint address (code offset).
        safepoint: u32,
    },

    /// Two safepoints share one address.
    #[error("duplicate safepoint address {address:#x}")]
    DuplicateSafepoint {
        /// The repeated address.
        address: u32,
    },

    /// A count or size does not fit its `int16` table field.
    #[error("{field} = {value} does not fit a 16-bit table field")]
    FieldOverflow {
        /// Name of the table field.
        field: &'static str,
        /// The value that overflowed.
        value: u64,
    },

    /// The live-root set at a safepoint differs from the first safepoint's,
    /// which the uniform table format cannot represent.
    #[error("live roots at safepoint {safepoint:#x} differ from the first safepoint")]
    NonUniformLiveness {
        /// Safepoint address (code offset).
        safepoint: u32,
    },

    /// A stack-slot location is not relative to the frame base register.
    #[error("location {location} of record {record} is not addressable from the frame base")]
    UnaddressableLocation {
        /// Patch point ID of the raw record.
        record: u64,
        /// Index of the location within the record.
        location: usize,
    },

    /// A stack-slot offset is negative or not a multiple of the pointer width.
    #[error("slot offset {offset} of record {record} is not a word-aligned frame offset")]
    MisalignedSlot {
        /// Patch point ID of the raw record.
        record: u64,
        /// The byte offset.
        offset: i32,
    },
}

// =============================================================================
// Malformed
// =============================================================================

/// Reasons the raw record decoder rejects a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformed {
    /// The buffer ends before a declared structure does.
    #[error("need {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the structure being read.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// The header declares a format version this decoder does not speak.
    #[error("unsupported stack map version {0}")]
    UnsupportedVersion(u8),

    /// A location kind byte is outside the known discriminant range.
    #[error("invalid location kind {0}")]
    InvalidLocationKind(u8),

    /// A constant-index location points past the constant pool.
    #[error("constant index {index} outside pool of {pool} constants")]
    ConstantIndexOutOfRange {
        /// The referenced index.
        index: u32,
        /// Size of the constant pool.
        pool: u32,
    },

    /// Per-function record counts do not add up to the header's count.
    #[error("functions declare {declared} records, header declares {actual}")]
    RecordCountMismatch {
        /// Sum of function record counts.
        declared: u64,
        /// Record count from the header.
        actual: u32,
    },

    /// A reserved or padding byte is not zero.
    #[error("reserved byte holds {value:#04x}, expected zero")]
    NonZeroReserved {
        /// The byte found.
        value: u8,
    },

    /// Bytes follow the last declared record.
    #[error("{count} bytes after the last record")]
    TrailingBytes {
        /// Number of leftover bytes.
        count: usize,
    },

    /// A stored table field holds a negative count or size.
    #[error("table field {field} holds negative value {value}")]
    NegativeField {
        /// Name of the table field.
        field: &'static str,
        /// Raw value read.
        value: i16,
    },

    /// Stored safepoint addresses are not strictly increasing, so the table
    /// cannot be binary searched.
    #[error("safepoint address {index} is not greater than its predecessor")]
    UnsortedSafepoints {
        /// Index of the first out-of-order address.
        index: usize,
    },
}
