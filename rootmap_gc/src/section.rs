//! Byte sink for emitted tables, with 32-bit relocations against code symbols.
//!
//! The builder never touches files or object-file structure. It appends to a
//! [`SectionSink`]; whoever owns the object writer (or, in tests and the CLI,
//! [`ObjectSection`]) decides what a named section is.

use rootmap_core::{Endianness, Result, RootMapError};
use rustc_hash::FxHashMap;

// =============================================================================
// SectionSink
// =============================================================================

/// Append-only sink for one named section.
pub trait SectionSink {
    /// Name of the section being written.
    fn name(&self) -> &str;

    /// Byte order multi-byte integers are written in.
    fn endianness(&self) -> Endianness;

    /// Current size of the section in bytes.
    fn position(&self) -> usize;

    /// Append raw bytes.
    fn emit_bytes(&mut self, bytes: &[u8]);

    /// Append a 32-bit field that the linker fills with `symbol + addend`.
    fn emit_reloc32(&mut self, symbol: &str, addend: u32);

    /// Append a `u16`.
    #[inline]
    fn emit_u16(&mut self, value: u16) {
        let raw = self.endianness().write_u16(value);
        self.emit_bytes(&raw);
    }

    /// Append an `i16`.
    #[inline]
    fn emit_i16(&mut self, value: i16) {
        let raw = self.endianness().write_i16(value);
        self.emit_bytes(&raw);
    }

    /// Append a `u32`.
    #[inline]
    fn emit_u32(&mut self, value: u32) {
        let raw = self.endianness().write_u32(value);
        self.emit_bytes(&raw);
    }

    /// Zero-pad up to the next multiple of `alignment` (a power of two).
    fn align_to(&mut self, alignment: usize) {
        debug_assert!(alignment.is_power_of_two());
        let pos = self.position();
        let padding = ((pos + alignment - 1) & !(alignment - 1)) - pos;
        for _ in 0..padding {
            self.emit_bytes(&[0]);
        }
    }
}

// =============================================================================
// ObjectSection
// =============================================================================

/// A pending absolute 32-bit relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Byte offset of the field within the section.
    pub offset: usize,
    /// Symbol the field refers to.
    pub symbol: String,
    /// Constant added to the symbol's address.
    pub addend: u32,
}

/// In-memory section with its relocation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSection {
    name: String,
    endianness: Endianness,
    data: Vec<u8>,
    relocations: Vec<Relocation>,
}

impl ObjectSection {
    /// Create an empty section.
    pub fn new(name: impl Into<String>, endianness: Endianness) -> Self {
        Self {
            name: name.into(),
            endianness,
            data: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// Unrelocated contents; relocated fields read as zero.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pending relocations, in emission order.
    #[inline]
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Whether nothing has been emitted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Apply every relocation, producing the bytes as they appear once loaded.
    pub fn resolve(&self, resolver: &dyn SymbolResolver) -> Result<Vec<u8>> {
        let mut loaded = self.data.clone();
        for reloc in &self.relocations {
            let base = resolver
                .resolve(&reloc.symbol)
                .ok_or_else(|| RootMapError::UnresolvedSymbol {
                    symbol: reloc.symbol.clone(),
                })?;
            let value = base
                .checked_add(u64::from(reloc.addend))
                .unwrap_or(u64::MAX);
            let field = u32::try_from(value).map_err(|_| RootMapError::RelocationOverflow {
                symbol: reloc.symbol.clone(),
                value,
            })?;
            loaded[reloc.offset..reloc.offset + 4]
                .copy_from_slice(&self.endianness.write_u32(field));
        }
        Ok(loaded)
    }
}

impl SectionSink for ObjectSection {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn endianness(&self) -> Endianness {
        self.endianness
    }

    #[inline]
    fn position(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn emit_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn emit_reloc32(&mut self, symbol: &str, addend: u32) {
        self.relocations.push(Relocation {
            offset: self.data.len(),
            symbol: symbol.to_owned(),
            addend,
        });
        self.data.extend_from_slice(&[0; 4]);
    }

    fn align_to(&mut self, alignment: usize) {
        debug_assert!(alignment.is_power_of_two());
        let aligned = (self.data.len() + alignment - 1) & !(alignment - 1);
        self.data.resize(aligned, 0);
    }
}

// =============================================================================
// Symbol resolution
// =============================================================================

/// Loader-side view: map a symbol to its load address.
pub trait SymbolResolver {
    /// Address of `symbol`, if defined.
    fn resolve(&self, symbol: &str) -> Option<u64>;
}

impl<F> SymbolResolver for F
where
    F: Fn(&str) -> Option<u64>,
{
    #[inline]
    fn resolve(&self, symbol: &str) -> Option<u64> {
        self(symbol)
    }
}

/// Symbol table backed by a hash map.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    symbols: FxHashMap<String, u64>,
}

impl SymbolMap {
    /// Create an empty symbol table.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or redefine `symbol`.
    #[inline]
    pub fn insert(&mut self, symbol: impl Into<String>, address: u64) -> Option<u64> {
        self.symbols.insert(symbol.into(), address)
    }

    /// Number of defined symbols.
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolResolver for SymbolMap {
    #[inline]
    fn resolve(&self, symbol: &str) -> Option<u64> {
        self.symbols.get(symbol).copied()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for SymbolMap {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self {
            symbols: iter
                .into_iter()
                .map(|(symbol, address)| (symbol.into(), address))
                .collect(),
        }
    }
}
