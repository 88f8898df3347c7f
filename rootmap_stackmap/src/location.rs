//! Typed value locations.

use std::fmt;

// =============================================================================
// LocationKind
// =============================================================================

/// Discriminant of a location, as stored in the kind byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    /// Value held in a register.
    Register = 1,
    /// Value is the address `reg + offset` (a stack slot itself).
    Direct = 2,
    /// Value is stored in memory at `reg + offset` (a spill slot).
    Indirect = 3,
    /// Value is a small constant stored inline.
    Constant = 4,
    /// Value is an entry of the constant pool.
    ConstantIndex = 5,
}

impl LocationKind {
    /// Decode a kind byte. `None` for unknown discriminants.
    #[inline]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Register),
            2 => Some(Self::Direct),
            3 => Some(Self::Indirect),
            4 => Some(Self::Constant),
            5 => Some(Self::ConstantIndex),
            _ => None,
        }
    }

    /// Whether the kind denotes an addressable stack slot.
    #[inline]
    pub const fn is_stack_slot(self) -> bool {
        matches!(self, Self::Direct | Self::Indirect)
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Register => "register",
            Self::Direct => "direct",
            Self::Indirect => "indirect",
            Self::Constant => "constant",
            Self::ConstantIndex => "constant-index",
        })
    }
}

// =============================================================================
// Location
// =============================================================================

/// One location of a record.
///
/// Fields are kept as stored so a decoded stream re-encodes byte for byte;
/// [`Location::value`] gives the interpreted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    /// Kind discriminant.
    pub kind: LocationKind,
    /// Size of the value in bytes.
    pub size: u16,
    /// DWARF register number (unused by constants).
    pub dwarf_reg: u16,
    /// Stack offset, small constant or constant pool index, depending on kind.
    pub offset: i32,
}

/// Interpreted location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationValue {
    /// In register `reg`.
    Register {
        /// DWARF register number.
        reg: u16,
    },
    /// At address `reg + offset`.
    Direct {
        /// DWARF register number.
        reg: u16,
        /// Byte offset.
        offset: i32,
    },
    /// Loaded from `[reg + offset]`.
    Indirect {
        /// DWARF register number.
        reg: u16,
        /// Byte offset.
        offset: i32,
    },
    /// Inline constant.
    Constant(i32),
    /// Index into the constant pool.
    ConstantIndex(u32),
}

impl Location {
    /// Value held in `reg`.
    #[inline]
    pub const fn register(reg: u16, size: u16) -> Self {
        Self {
            kind: LocationKind::Register,
            size,
            dwarf_reg: reg,
            offset: 0,
        }
    }

    /// Stack slot whose address is the value.
    #[inline]
    pub const fn direct(reg: u16, offset: i32, size: u16) -> Self {
        Self {
            kind: LocationKind::Direct,
            size,
            dwarf_reg: reg,
            offset,
        }
    }

    /// Spill slot holding the value.
    #[inline]
    pub const fn indirect(reg: u16, offset: i32, size: u16) -> Self {
        Self {
            kind: LocationKind::Indirect,
            size,
            dwarf_reg: reg,
            offset,
        }
    }

    /// Inline constant.
    #[inline]
    pub const fn constant(value: i32) -> Self {
        Self {
            kind: LocationKind::Constant,
            size: 8,
            dwarf_reg: 0,
            offset: value,
        }
    }

    /// Constant pool reference.
    #[inline]
    pub const fn constant_index(index: u32) -> Self {
        Self {
            kind: LocationKind::ConstantIndex,
            size: 8,
            dwarf_reg: 0,
            offset: index as i32,
        }
    }

    /// Interpret the stored fields according to the kind.
    #[inline]
    pub const fn value(&self) -> LocationValue {
        match self.kind {
            LocationKind::Register => LocationValue::Register {
                reg: self.dwarf_reg,
            },
            LocationKind::Direct => LocationValue::Direct {
                reg: self.dwarf_reg,
                offset: self.offset,
            },
            LocationKind::Indirect => LocationValue::Indirect {
                reg: self.dwarf_reg,
                offset: self.offset,
            },
            LocationKind::Constant => LocationValue::Constant(self.offset),
            LocationKind::ConstantIndex => LocationValue::ConstantIndex(self.offset as u32),
        }
    }

    /// The inline constant, for [`LocationKind::Constant`].
    #[inline]
    pub const fn small_constant(&self) -> Option<i32> {
        match self.kind {
            LocationKind::Constant => Some(self.offset),
            _ => None,
        }
    }

    /// The constant pool index, for [`LocationKind::ConstantIndex`].
    #[inline]
    pub const fn pool_index(&self) -> Option<u32> {
        match self.kind {
            LocationKind::ConstantIndex => Some(self.offset as u32),
            _ => None,
        }
    }

    /// Whether this location is an addressable stack slot.
    #[inline]
    pub const fn is_stack_slot(&self) -> bool {
        self.kind.is_stack_slot()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            LocationValue::Register { reg } => write!(f, "r{reg} ({}B)", self.size),
            LocationValue::Direct { reg, offset } => {
                write!(f, "r{reg}{offset:+} ({}B)", self.size)
            }
            LocationValue::Indirect { reg, offset } => {
                write!(f, "[r{reg}{offset:+}] ({}B)", self.size)
            }
            LocationValue::Constant(value) => write!(f, "#{value}"),
            LocationValue::ConstantIndex(index) => write!(f, "#pool[{index}]"),
        }
    }
}

// =============================================================================
// LiveOut
// =============================================================================

/// A register live across the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveOut {
    /// DWARF register number.
    pub dwarf_reg: u16,
    /// Width of the live part in bytes.
    pub size: u8,
}

impl LiveOut {
    /// Create a live-out entry.
    #[inline]
    pub const fn new(dwarf_reg: u16, size: u8) -> Self {
        Self { dwarf_reg, size }
    }
}
