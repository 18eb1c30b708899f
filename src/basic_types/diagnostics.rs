use std::fmt::Display;
use std::fmt::Formatter;

use thiserror::Error;

use crate::logic::Formula;

/// The condition a [`Diagnostic`] reports.
///
/// Every code has a default severity: most are errors, but an empty search
/// strategy or an unbranchable variable merely degrade the search and are
/// warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    /// The formula targets this domain but its shape is not recognised.
    UnsupportedFormula,
    /// The argument of an optimisation predicate is a non-variable
    /// expression that mentions variables.
    BadObjective,
    /// A variable- or value-order atom outside the enumerated sets.
    UnknownStrategy,
    /// A `search(...)` predicate with zero variables; the strategy is
    /// dropped.
    EmptyStrategy,
    /// An atom references a name the environment does not know.
    UndeclaredVariable,
    /// A new table is incompatible with the matrix already installed.
    TableShapeMismatch,
    /// Branching was attempted on an unbounded variable; the split produces
    /// an empty branch.
    UnbranchableVariable,
}

impl DiagnosticCode {
    pub fn default_severity(self) -> Severity {
        match self {
            DiagnosticCode::EmptyStrategy | DiagnosticCode::UnbranchableVariable => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single interpretation finding, with a rendering of the offending
/// formula.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{severity}: {detail} (in `{source_formula}`)")]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub detail: String,
    pub source_formula: String,
}

/// Collects [`Diagnostic`]s during interpretation.
///
/// Interpretation keeps going after an error so that one pass reports as
/// much as possible; the caller learns whether the intermediate is usable
/// from the interpretation result itself, not from this sink.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    entries: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> DiagnosticSink {
        DiagnosticSink::default()
    }

    /// Records `code` at its default severity against `source`.
    pub fn report(&mut self, code: DiagnosticCode, source: &Formula, detail: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: code.default_severity(),
            code,
            detail: detail.into(),
            source_formula: source.to_string(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}
