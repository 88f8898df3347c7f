//! Target platform policy.
//!
//! Everything here is decided by the target, not by the table format: how wide
//! a machine word is, which byte order the tables use, how many arguments are
//! passed in registers before spilling to the stack, and which DWARF register
//! frame offsets are measured from.

use crate::DEFAULT_MANAGED_ADDRESS_SPACE;
use crate::error::RootMapError;
use crate::types::AddressSpace;
use thiserror::Error;

// =============================================================================
// PointerWidth
// =============================================================================

/// Machine word size.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 32-bit targets.
    Four = 4,
    /// 64-bit targets.
    Eight = 8,
}

impl PointerWidth {
    /// Width in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

// =============================================================================
// Endianness
// =============================================================================

/// Byte order of a stream or table. One stream never mixes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endianness {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

macro_rules! endian_codec {
    ($($read:ident / $write:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Decode a `", stringify!($ty), "`.")]
            #[inline]
            pub fn $read(self, bytes: [u8; std::mem::size_of::<$ty>()]) -> $ty {
                match self {
                    Endianness::Little => <$ty>::from_le_bytes(bytes),
                    Endianness::Big => <$ty>::from_be_bytes(bytes),
                }
            }

            #[doc = concat!("Encode a `", stringify!($ty), "`.")]
            #[inline]
            pub fn $write(self, value: $ty) -> [u8; std::mem::size_of::<$ty>()] {
                match self {
                    Endianness::Little => value.to_le_bytes(),
                    Endianness::Big => value.to_be_bytes(),
                }
            }
        )*
    };
}

impl Endianness {
    /// Byte order of the host.
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    endian_codec! {
        read_u16 / write_u16 => u16,
        read_i16 / write_i16 => i16,
        read_u32 / write_u32 => u32,
        read_i32 / write_i32 => i32,
        read_u64 / write_u64 => u64,
    }
}

// =============================================================================
// TargetConfig
// =============================================================================

/// Platform policy consumed by the builder, the reader and the projection of
/// raw records.
///
/// # Example
///
/// ```ignore
/// use rootmap_core::TargetConfig;
///
/// let target = TargetConfig {
///     register_argument_slots: 4,
///     ..TargetConfig::x86_64_sysv()
/// };
/// target.validate()?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Machine word size; frame sizes and root offsets are measured in it.
    ///
    /// Default: 8 bytes
    pub pointer_width: PointerWidth,

    /// Byte order of emitted tables and of the native stack map stream.
    ///
    /// Default: little-endian
    pub endianness: Endianness,

    /// Number of leading arguments passed in registers.
    ///
    /// `stackArity = max(0, argumentCount - register_argument_slots)`.
    ///
    /// Default: 6 (System V x86-64)
    pub register_argument_slots: u16,

    /// DWARF register number that stack-slot offsets are relative to.
    ///
    /// Default: 7 (RSP)
    pub stack_pointer_register: u16,

    /// Address space reserved for collector-managed pointers.
    ///
    /// Default: 1
    pub managed_address_space: AddressSpace,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::x86_64_sysv()
    }
}

impl TargetConfig {
    /// x86-64 with the System V calling convention.
    pub fn x86_64_sysv() -> Self {
        Self {
            pointer_width: PointerWidth::Eight,
            endianness: Endianness::Little,
            register_argument_slots: 6,
            stack_pointer_register: 7,
            managed_address_space: DEFAULT_MANAGED_ADDRESS_SPACE,
        }
    }

    /// AArch64 with the AAPCS64 calling convention.
    pub fn aarch64() -> Self {
        Self {
            register_argument_slots: 8,
            stack_pointer_register: 31,
            ..Self::x86_64_sysv()
        }
    }

    /// 32-bit x86, cdecl: every argument goes on the stack.
    pub fn i686() -> Self {
        Self {
            pointer_width: PointerWidth::Four,
            endianness: Endianness::Little,
            register_argument_slots: 0,
            stack_pointer_register: 4,
            managed_address_space: DEFAULT_MANAGED_ADDRESS_SPACE,
        }
    }

    /// Look up a preset by name (`x86_64`, `aarch64`, `i686`).
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "x86_64" | "x86-64" | "x86_64-sysv" => Some(Self::x86_64_sysv()),
            "aarch64" | "arm64" => Some(Self::aarch64()),
            "i686" | "x86" => Some(Self::i686()),
            _ => None,
        }
    }

    /// Word size in bytes.
    #[inline]
    pub fn word_bytes(&self) -> usize {
        self.pointer_width.bytes()
    }

    /// Arguments passed on the stack beyond the register-passed ones.
    #[inline]
    pub fn stack_arity(&self, argument_count: u32) -> u32 {
        argument_count.saturating_sub(u32::from(self.register_argument_slots))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_pointer_register > MAX_DWARF_REGISTER {
            return Err(ConfigError::InvalidStackPointerRegister(
                self.stack_pointer_register,
            ));
        }
        if self.register_argument_slots > MAX_REGISTER_ARGUMENT_SLOTS {
            return Err(ConfigError::TooManyArgumentRegisters(
                self.register_argument_slots,
            ));
        }
        Ok(())
    }
}

/// Highest DWARF register number accepted as a frame base.
pub const MAX_DWARF_REGISTER: u16 = 127;

/// Highest number of argument registers any supported ABI uses.
pub const MAX_REGISTER_ARGUMENT_SLOTS: u16 = 32;

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Frame base register is outside the DWARF range in use.
    #[error("stack pointer register {0} is not a valid DWARF register number")]
    InvalidStackPointerRegister(u16),
    /// More argument registers than any supported ABI has.
    #[error("{0} argument registers exceeds the supported maximum of 32")]
    TooManyArgumentRegisters(u16),
}

impl From<ConfigError> for RootMapError {
    fn from(err: ConfigError) -> Self {
        RootMapError::invalid_argument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TargetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_preset_configs_are_valid() {
        for name in ["x86_64", "aarch64", "i686"] {
            let config = TargetConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "{name}");
        }
        assert!(TargetConfig::preset("sparc").is_none());
    }

    #[test]
    fn test_invalid_stack_pointer_register() {
        let config = TargetConfig {
            stack_pointer_register: 200,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidStackPointerRegister(200))
        );
        let err: RootMapError = ConfigError::InvalidStackPointerRegister(200).into();
        assert!(matches!(err, RootMapError::InvalidArgument(_)));
    }

    #[test]
    fn test_stack_arity_saturates() {
        let config = TargetConfig::x86_64_sysv();
        assert_eq!(config.stack_arity(2), 0);
        assert_eq!(config.stack_arity(6), 0);
        assert_eq!(config.stack_arity(9), 3);
        assert_eq!(TargetConfig::i686().stack_arity(2), 2);
    }

    #[test]
    fn test_endianness_codec() {
        assert_eq!(Endianness::Little.write_u32(0x0102_0304), [4, 3, 2, 1]);
        assert_eq!(Endianness::Big.write_u32(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(Endianness::Big.read_u16([0x12, 0x34]), 0x1234);
        assert_eq!(Endianness::Little.read_i16([0xff, 0xff]), -1);
        assert_eq!(
            Endianness::Little.read_u64(Endianness::Little.write_u64(u64::MAX - 1)),
            u64::MAX - 1
        );
    }
}
