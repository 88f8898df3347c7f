//! Collector strategies.
//!
//! A strategy pairs the classifier that decides which pointers are roots with
//! the emitter that writes that strategy's tables. Functions opt in by name.

use crate::builder::SafepointTableBuilder;
use crate::safepoint::FunctionSafepoints;
use crate::section::SectionSink;
use crate::table::{FunctionSafepointTable, TableFormat};
use rootmap_core::{
    AddressSpaceClassifier, PointerClassifier, Result, RootMapError, STATEPOINT_STRATEGY,
    TargetConfig,
};
use rustc_hash::FxHashMap;
use std::fmt;

/// Section the built-in strategy writes its tables to.
pub const SAFEPOINT_TABLE_SECTION: &str = ".gc_safepoint_tables";

// =============================================================================
// TableEmitter
// =============================================================================

/// Writes root tables for the functions of one strategy.
pub trait TableEmitter: Send + Sync {
    /// Strategy tag this emitter accepts.
    fn strategy(&self) -> &str;

    /// Section the tables are appended to.
    fn section_name(&self) -> &str;

    /// Layout of the emitted tables.
    fn format(&self) -> TableFormat;

    /// Validate `function` and append its table to `sink`.
    fn emit(
        &self,
        function: &FunctionSafepoints,
        target: &TargetConfig,
        sink: &mut dyn SectionSink,
    ) -> Result<FunctionSafepointTable>;
}

/// [`TableEmitter`] backed by [`SafepointTableBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafepointTableEmitter {
    strategy: String,
    section: String,
    format: TableFormat,
}

impl SafepointTableEmitter {
    /// Emitter for `strategy` writing to [`SAFEPOINT_TABLE_SECTION`].
    pub fn new(strategy: impl Into<String>, format: TableFormat) -> Self {
        Self {
            strategy: strategy.into(),
            section: SAFEPOINT_TABLE_SECTION.to_owned(),
            format,
        }
    }

    /// Write to `section` instead.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }
}

impl TableEmitter for SafepointTableEmitter {
    fn strategy(&self) -> &str {
        &self.strategy
    }

    fn section_name(&self) -> &str {
        &self.section
    }

    fn format(&self) -> TableFormat {
        self.format
    }

    fn emit(
        &self,
        function: &FunctionSafepoints,
        target: &TargetConfig,
        sink: &mut dyn SectionSink,
    ) -> Result<FunctionSafepointTable> {
        SafepointTableBuilder::new(target, &self.strategy)
            .with_format(self.format)
            .emit(function, sink)
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// A named collector strategy.
pub struct Strategy {
    name: String,
    classifier: Box<dyn PointerClassifier>,
    emitter: Box<dyn TableEmitter>,
}

impl Strategy {
    /// Create a strategy. The emitter must accept the same tag.
    pub fn new(
        name: impl Into<String>,
        classifier: Box<dyn PointerClassifier>,
        emitter: Box<dyn TableEmitter>,
    ) -> Result<Self> {
        let name = name.into();
        if emitter.strategy() != name {
            return Err(RootMapError::invalid_argument(format!(
                "strategy `{name}` paired with an emitter for `{}`",
                emitter.strategy()
            )));
        }
        Ok(Self {
            name,
            classifier,
            emitter,
        })
    }

    /// Strategy tag.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root classifier.
    #[inline]
    pub fn classifier(&self) -> &dyn PointerClassifier {
        self.classifier.as_ref()
    }

    /// Table emitter.
    #[inline]
    pub fn emitter(&self) -> &dyn TableEmitter {
        self.emitter.as_ref()
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("classifier", &self.classifier.name())
            .field("section", &self.emitter.section_name())
            .field("format", &self.emitter.format())
            .finish()
    }
}

// =============================================================================
// StrategyRegistry
// =============================================================================

/// Strategies known to one compilation.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: FxHashMap<String, Strategy>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in statepoint strategy for `target`.
    pub fn with_builtin(target: &TargetConfig, format: TableFormat) -> Self {
        let mut registry = Self::new();
        let builtin = Strategy {
            name: STATEPOINT_STRATEGY.to_owned(),
            classifier: Box::new(AddressSpaceClassifier::new(target.managed_address_space)),
            emitter: Box::new(SafepointTableEmitter::new(STATEPOINT_STRATEGY, format)),
        };
        registry
            .strategies
            .insert(builtin.name.clone(), builtin);
        registry
    }

    /// Add a strategy. Names are unique.
    pub fn register(&mut self, strategy: Strategy) -> Result<()> {
        if self.strategies.contains_key(strategy.name()) {
            return Err(RootMapError::invalid_argument(format!(
                "strategy `{}` is already registered",
                strategy.name()
            )));
        }
        self.strategies.insert(strategy.name.clone(), strategy);
        Ok(())
    }

    /// Strategy registered under `name`.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.strategies.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered strategies.
    #[inline]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategy is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
