//! Per-call-site input handed over by the live-value analysis.

use rootmap_core::FunctionType;
use smallvec::SmallVec;

/// Live roots at one call site.
///
/// Offsets are frame-relative machine words. Duplicates are allowed and kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafepointRecord {
    /// Code offset of the return address from the function's symbol.
    pub address: u32,
    /// Frame size seen at this call site, in words.
    pub frame_size_words: u32,
    /// Source-level argument count seen at this call site.
    pub argument_count: u32,
    /// Frame slots holding collector-managed pointers, in words.
    pub live_root_offsets: SmallVec<[i32; 8]>,
}

impl SafepointRecord {
    /// Create a record.
    pub fn new(
        address: u32,
        frame_size_words: u32,
        argument_count: u32,
        live_root_offsets: impl IntoIterator<Item = i32>,
    ) -> Self {
        Self {
            address,
            frame_size_words,
            argument_count,
            live_root_offsets: live_root_offsets.into_iter().collect(),
        }
    }

    /// Live roots as a sorted, de-duplicated set.
    pub fn root_set(&self) -> SmallVec<[i32; 8]> {
        let mut set = self.live_root_offsets.clone();
        set.sort_unstable();
        set.dedup();
        set
    }
}

/// Everything the builder needs to know about one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSafepoints {
    /// Symbol the function's code is emitted under.
    pub symbol: String,
    /// Collector strategy tag attached to the function, if any.
    pub strategy: Option<String>,
    /// Declared frame size, in words.
    pub frame_size_words: u32,
    /// Source-level argument count.
    pub argument_count: u32,
    /// Signature, when the front end provides one.
    pub signature: Option<FunctionType>,
    /// Call-site records in code order.
    pub records: Vec<SafepointRecord>,
}

impl FunctionSafepoints {
    /// A function with no strategy tag and no safepoints yet.
    pub fn new(symbol: impl Into<String>, frame_size_words: u32, argument_count: u32) -> Self {
        Self {
            symbol: symbol.into(),
            strategy: None,
            frame_size_words,
            argument_count,
            signature: None,
            records: Vec::new(),
        }
    }

    /// A function whose argument count comes from its signature.
    pub fn from_signature(
        symbol: impl Into<String>,
        signature: FunctionType,
        frame_size_words: u32,
    ) -> Self {
        let argument_count = u32::try_from(signature.arity()).unwrap_or(u32::MAX);
        Self {
            signature: Some(signature),
            ..Self::new(symbol, frame_size_words, argument_count)
        }
    }

    /// Attach a collector strategy tag.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Append a safepoint that shares the function's frame shape.
    pub fn push_safepoint(
        &mut self,
        address: u32,
        live_root_offsets: impl IntoIterator<Item = i32>,
    ) {
        self.records.push(SafepointRecord::new(
            address,
            self.frame_size_words,
            self.argument_count,
            live_root_offsets,
        ));
    }

    /// Builder form of [`FunctionSafepoints::push_safepoint`].
    pub fn with_safepoint(
        mut self,
        address: u32,
        live_root_offsets: impl IntoIterator<Item = i32>,
    ) -> Self {
        self.push_safepoint(address, live_root_offsets);
        self
    }

    /// Whether the function is tagged with `strategy`.
    #[inline]
    pub fn uses_strategy(&self, strategy: &str) -> bool {
        self.strategy.as_deref() == Some(strategy)
    }
}
