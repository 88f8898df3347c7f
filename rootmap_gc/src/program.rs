//! Whole-program table emission.

use crate::safepoint::FunctionSafepoints;
use crate::section::{ObjectSection, SectionSink};
use crate::strategy::StrategyRegistry;
use crate::table::FunctionSafepointTable;
use rootmap_core::{RootMapError, TargetConfig};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::{debug, warn};

/// A function whose table could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Function symbol.
    pub symbol: String,
    /// Why it was rejected.
    pub error: RootMapError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.symbol, self.error)
    }
}

/// Output of [`emit_program`].
#[derive(Debug, Default)]
pub struct ProgramTables {
    /// One section per section name, in order of first use.
    pub sections: Vec<ObjectSection>,
    /// Every emitted table.
    pub tables: Vec<FunctionSafepointTable>,
    /// Functions with no strategy tag or an unregistered one.
    pub skipped: Vec<String>,
    /// Functions rejected by their strategy's emitter.
    pub diagnostics: Vec<Diagnostic>,
}

impl ProgramTables {
    /// Section named `name`, if any table was written to it.
    pub fn section(&self, name: &str) -> Option<&ObjectSection> {
        self.sections.iter().find(|section| section.name() == name)
    }

    /// Whether every tagged function produced a table.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Emit a table for every function that opted into a registered strategy.
///
/// A rejected function contributes a [`Diagnostic`] and no bytes; the
/// remaining functions are unaffected.
pub fn emit_program<'a, I>(
    functions: I,
    registry: &StrategyRegistry,
    target: &TargetConfig,
) -> ProgramTables
where
    I: IntoIterator<Item = &'a FunctionSafepoints>,
{
    let mut out = ProgramTables::default();
    let mut section_index: FxHashMap<String, usize> = FxHashMap::default();

    for function in functions {
        let Some(strategy) = function
            .strategy
            .as_deref()
            .and_then(|name| registry.get(name))
        else {
            debug!(
                function = %function.symbol,
                strategy = ?function.strategy,
                "no registered collector strategy; skipping"
            );
            out.skipped.push(function.symbol.clone());
            continue;
        };

        if let Some(signature) = &function.signature {
            debug!(
                function = %function.symbol,
                managed_params = ?signature.managed_params(strategy.classifier()),
                "managed parameters"
            );
        }

        let emitter = strategy.emitter();
        let slot = *section_index
            .entry(emitter.section_name().to_owned())
            .or_insert_with(|| {
                out.sections
                    .push(ObjectSection::new(emitter.section_name(), target.endianness));
                out.sections.len() - 1
            });

        match emitter.emit(function, target, &mut out.sections[slot]) {
            Ok(table) => out.tables.push(table),
            Err(error) => {
                warn!(function = %function.symbol, %error, "dropping safepoint table");
                out.diagnostics.push(Diagnostic {
                    symbol: function.symbol.clone(),
                    error,
                });
            }
        }
    }
    out
}
