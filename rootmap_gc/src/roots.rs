//! Root lookup during a collection pause.
//!
//! # Frame Layout
//!
//! ```text
//! ┌────────────────────────┐  High addresses
//! │     Return Address     │  ← looked up in the safepoint tables
//! ├────────────────────────┤
//! │  ...  slot N-1         │  [base + (N-1) * word]
//! │         ...            │
//! │        slot 1          │  [base + word]
//! │        slot 0          │  [base]        ← frame_base
//! └────────────────────────┘  Low addresses
//! ```
//!
//! Nothing here dereferences frame memory: the walker reports slot addresses
//! and the collector reads or rewrites them.

use crate::table::SafepointTable;
use parking_lot::RwLock;
use rootmap_core::{Result, RootMapError, TargetConfig};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::trace;

/// Live-root word offsets of the safepoint at exactly `instruction_address`.
///
/// A function without managed roots yields an empty slice. An address that
/// is not a recorded safepoint is [`RootMapError::UnknownSafepoint`], which
/// callers must treat as fatal.
pub fn roots_at(table: &SafepointTable, instruction_address: u64) -> Result<&[u16]> {
    u32::try_from(instruction_address)
        .ok()
        .and_then(|address| table.position(address))
        .and_then(|index| table.roots_of(index))
        .ok_or_else(|| RootMapError::unknown_safepoint(instruction_address))
}

// =============================================================================
// LoadedTableIndex
// =============================================================================

/// Safepoint found by [`LoadedTableIndex::lookup`].
#[derive(Debug, Clone)]
pub struct SafepointRef {
    table: Arc<SafepointTable>,
    index: usize,
}

impl SafepointRef {
    /// Return address of the safepoint.
    #[inline]
    pub fn address(&self) -> u32 {
        self.table.addresses()[self.index]
    }

    /// Table the safepoint belongs to.
    #[inline]
    pub fn table(&self) -> &SafepointTable {
        &self.table
    }

    /// Live-root word offsets.
    #[inline]
    pub fn roots(&self) -> &[u16] {
        self.table.roots_of(self.index).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct IndexState {
    modules: FxHashMap<String, Vec<Arc<SafepointTable>>>,
    /// Every loaded safepoint address, sorted, with its owning table.
    flat: Vec<(u32, Arc<SafepointTable>)>,
}

impl IndexState {
    fn rebuild(&mut self) {
        self.flat = self
            .modules
            .values()
            .flatten()
            .flat_map(|table| {
                table
                    .addresses()
                    .iter()
                    .map(move |&address| (address, Arc::clone(table)))
            })
            .collect();
        self.flat.sort_unstable_by_key(|&(address, _)| address);
    }
}

/// Process-wide index over the tables of every loaded module.
///
/// Tables in the index carry load addresses (see
/// [`SafepointTable::rebased`]). Writers take the lock only while a module is
/// loaded or unloaded, so concurrent lookups during a pause never contend.
#[derive(Debug, Default)]
pub struct LoadedTableIndex {
    state: RwLock<IndexState>,
}

impl LoadedTableIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tables of `module`.
    ///
    /// Fails if the module is already loaded or if one of its safepoint
    /// addresses is already claimed by another table.
    pub fn insert(&self, module: impl Into<String>, tables: Vec<SafepointTable>) -> Result<()> {
        let module = module.into();
        let mut state = self.state.write();
        if state.modules.contains_key(&module) {
            return Err(RootMapError::invalid_argument(format!(
                "module `{module}` is already loaded"
            )));
        }

        let mut incoming: Vec<u32> = tables
            .iter()
            .flat_map(|table| table.addresses().iter().copied())
            .collect();
        incoming.sort_unstable();
        let clash = incoming
            .windows(2)
            .find(|pair| pair[0] == pair[1])
            .map(|pair| pair[0])
            .or_else(|| {
                incoming.iter().copied().find(|address| {
                    state
                        .flat
                        .binary_search_by_key(address, |&(addr, _)| addr)
                        .is_ok()
                })
            });
        if let Some(address) = clash {
            return Err(RootMapError::invalid_argument(format!(
                "safepoint {address:#x} in module `{module}` is already registered"
            )));
        }

        trace!(module = %module, tables = tables.len(), "loading safepoint tables");
        state
            .modules
            .insert(module, tables.into_iter().map(Arc::new).collect());
        state.rebuild();
        Ok(())
    }

    /// Unregister `module`, returning its tables.
    pub fn remove(&self, module: &str) -> Option<Vec<Arc<SafepointTable>>> {
        let mut state = self.state.write();
        let tables = state.modules.remove(module)?;
        state.rebuild();
        Some(tables)
    }

    /// Find the safepoint at exactly `return_address`.
    pub fn lookup(&self, return_address: u64) -> Option<SafepointRef> {
        let address = u32::try_from(return_address).ok()?;
        let state = self.state.read();
        let slot = state
            .flat
            .binary_search_by_key(&address, |&(addr, _)| addr)
            .ok()?;
        let table = Arc::clone(&state.flat[slot].1);
        let index = table.position(address)?;
        Some(SafepointRef { table, index })
    }

    /// [`LoadedTableIndex::lookup`], with a miss reported as
    /// [`RootMapError::UnknownSafepoint`].
    pub fn roots_at(&self, return_address: u64) -> Result<SafepointRef> {
        self.lookup(return_address)
            .ok_or_else(|| RootMapError::unknown_safepoint(return_address))
    }

    /// Number of loaded modules.
    pub fn len(&self) -> usize {
        self.state.read().modules.len()
    }

    /// Whether no module is loaded.
    pub fn is_empty(&self) -> bool {
        self.state.read().modules.is_empty()
    }

    /// Number of safepoints across all loaded modules.
    pub fn safepoint_count(&self) -> usize {
        self.state.read().flat.len()
    }
}

// =============================================================================
// FrameWalker
// =============================================================================

/// A suspended managed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Return address into the frame's code.
    pub return_address: u64,
    /// Address of slot 0.
    pub frame_base: u64,
}

/// One live root reported by [`FrameWalker::walk_stack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSlot {
    /// Frame the root lives in.
    pub frame: Frame,
    /// Offset from the frame base, in words.
    pub offset_words: u16,
    /// Absolute address of the slot.
    pub address: u64,
}

/// Turns safepoint roots into slot addresses.
#[derive(Debug, Clone, Copy)]
pub struct FrameWalker<'a> {
    index: &'a LoadedTableIndex,
    word_bytes: u64,
}

impl<'a> FrameWalker<'a> {
    /// Walker over `index` for frames laid out per `target`.
    #[inline]
    pub fn new(index: &'a LoadedTableIndex, target: &TargetConfig) -> Self {
        Self {
            index,
            word_bytes: target.word_bytes() as u64,
        }
    }

    /// Slot addresses of the live roots of one frame.
    pub fn roots_in_frame(
        &self,
        table: &SafepointTable,
        return_address: u64,
        frame_base: u64,
    ) -> Result<SmallVec<[u64; 8]>> {
        roots_at(table, return_address)?
            .iter()
            .map(|&word| self.slot_address(frame_base, word))
            .collect()
    }

    /// Visit every live root of `frames`, innermost first.
    ///
    /// Stops at the first frame whose return address is not a loaded
    /// safepoint; that error is fatal to the collection. Returns the number of
    /// roots visited.
    pub fn walk_stack<I, F>(&self, frames: I, mut visit: F) -> Result<usize>
    where
        I: IntoIterator<Item = Frame>,
        F: FnMut(RootSlot),
    {
        let mut visited = 0;
        for frame in frames {
            let safepoint = self.index.roots_at(frame.return_address)?;
            for &offset_words in safepoint.roots() {
                let address = self.slot_address(frame.frame_base, offset_words)?;
                visit(RootSlot {
                    frame,
                    offset_words,
                    address,
                });
                visited += 1;
            }
        }
        trace!(roots = visited, "walked stack");
        Ok(visited)
    }

    #[inline]
    fn slot_address(&self, frame_base: u64, word: u16) -> Result<u64> {
        frame_base
            .checked_add(u64::from(word) * self.word_bytes)
            .ok_or_else(|| {
                RootMapError::invalid_argument(format!(
                    "slot {word} of frame at {frame_base:#x} overflows the address space"
                ))
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LiveRoots;

    fn uniform(addresses: &[u32], frame: u16, roots: &[u16]) -> SafepointTable {
        SafepointTable::from_parts(
            addresses.into(),
            frame,
            0,
            LiveRoots::Uniform(roots.into()),
        )
    }

    #[test]
    fn test_roots_at_exact_match() {
        let table = uniform(&[0x30, 0x40], 4, &[0, 2]);
        assert_eq!(roots_at(&table, 0x40).unwrap(), &[0, 2]);
        assert_eq!(
            roots_at(&table, 0x3c),
            Err(RootMapError::unknown_safepoint(0x3c))
        );
        assert!(roots_at(&table, u64::MAX).is_err());
    }

    #[test]
    fn test_roots_at_empty_roots() {
        let table = uniform(&[0x30], 4, &[]);
        assert_eq!(roots_at(&table, 0x30).unwrap(), &[] as &[u16]);
    }

    #[test]
    fn test_index_lookup_across_modules() {
        let index = LoadedTableIndex::new();
        index.insert("a", vec![uniform(&[0x1010, 0x1020], 2, &[1])]).unwrap();
        index.insert("b", vec![uniform(&[0x2008], 3, &[0, 2])]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.safepoint_count(), 3);

        let hit = index.lookup(0x2008).unwrap();
        assert_eq!(hit.address(), 0x2008);
        assert_eq!(hit.roots(), &[0, 2]);
        assert!(index.lookup(0x1015).is_none());

        assert!(index.remove("a").is_some());
        assert!(index.lookup(0x1010).is_none());
        assert!(index.remove("a").is_none());
    }

    #[test]
    fn test_index_rejects_overlap() {
        let index = LoadedTableIndex::new();
        index.insert("a", vec![uniform(&[0x10], 1, &[])]).unwrap();
        assert!(index.insert("a", vec![]).is_err());
        assert!(index.insert("b", vec![uniform(&[0x10], 1, &[])]).is_err());
        assert!(
            index
                .insert("c", vec![uniform(&[0x20], 1, &[]), uniform(&[0x20], 1, &[])])
                .is_err()
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_roots_in_frame_addresses() {
        let index = LoadedTableIndex::new();
        let walker = FrameWalker::new(&index, &TargetConfig::x86_64_sysv());
        let table = uniform(&[0x100], 4, &[0, 3]);
        let slots = walker.roots_in_frame(&table, 0x100, 0x7000).unwrap();
        assert_eq!(slots.as_slice(), &[0x7000, 0x7018]);
    }

    #[test]
    fn test_walk_stack_stops_on_unknown_frame() {
        let index = LoadedTableIndex::new();
        index.insert("m", vec![uniform(&[0x100, 0x180], 2, &[1])]).unwrap();
        let walker = FrameWalker::new(&index, &TargetConfig::i686());

        let frames = [
            Frame {
                return_address: 0x100,
                frame_base: 0x9000,
            },
            Frame {
                return_address: 0x180,
                frame_base: 0x9100,
            },
        ];
        let mut seen = Vec::new();
        let count = walker.walk_stack(frames, |slot| seen.push(slot.address)).unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec![0x9004, 0x9104]);

        let bad = [Frame {
            return_address: 0x104,
            frame_base: 0x9000,
        }];
        let err = walker.walk_stack(bad, |_| {}).unwrap_err();
        assert!(err.is_fatal());
    }
}
