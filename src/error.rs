//! Structured diagnostics shared by the scanner, parser, validator and evaluator.
//!
//! Mirrors the diagnostics collection used elsewhere in this codebase (a flat,
//! serializable list of marks) but classified by pipeline stage and carrying a
//! full [`Span`] rather than a single cell position.

use serde::{Deserialize, Serialize};

use crate::position::Span;

/// Severity level for a diagnostic.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Which pipeline stage produced a diagnostic.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Scanner,
    Parser,
    Validator,
    Evaluator,
}

impl Origin {
    /// Relative ordering used when diagnostics are grouped for presentation:
    /// scanner, then parser, then validator, then evaluator.
    fn rank(self) -> u8 {
        match self {
            Origin::Scanner => 0,
            Origin::Parser => 1,
            Origin::Validator => 2,
            Origin::Evaluator => 3,
        }
    }
}

/// A single structured diagnostic with a source span.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    pub origin: Origin,
    /// Short machine-readable kind, e.g. "unknown_transform", "unterminated_string".
    pub kind: String,
}

/// Collects diagnostics for one `analyze`/`evaluate` pass.
///
/// Diagnostics are immutable once recorded: there is no API to mutate a
/// [`Diagnostic`] after `report`. Callers must call [`ErrorReporter::reset`]
/// before reusing a reporter across multiple analyses, or stale errors from a
/// previous pass will accumulate.
#[derive(Debug, Default, Clone)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: impl Into<String>, span: Span, message: impl Into<String>, origin: Origin) {
        self.report_with_severity(Severity::Error, kind, span, message, origin);
    }

    pub fn warn(&mut self, kind: impl Into<String>, span: Span, message: impl Into<String>, origin: Origin) {
        self.report_with_severity(Severity::Warning, kind, span, message, origin);
    }

    fn report_with_severity(
        &mut self,
        severity: Severity,
        kind: impl Into<String>,
        span: Span,
        message: impl Into<String>,
        origin: Origin,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            span,
            message: message.into(),
            origin,
            kind: kind.into(),
        });
    }

    /// All recorded diagnostics, grouped by origin in pipeline order and
    /// otherwise preserving source (insertion) order within a group.
    pub fn errors(&self) -> Vec<Diagnostic> {
        let mut out = self.diagnostics.clone();
        out.sort_by_key(|d| d.origin.rank());
        out
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Clears all recorded diagnostics so the reporter can be reused for a
    /// fresh analysis pass.
    pub fn reset(&mut self) {
        self.diagnostics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    fn span() -> Span {
        Span::new(Position::new(0, 0, 0), Position::new(0, 1, 1))
    }

    #[test]
    fn reports_are_grouped_by_origin() {
        let mut r = ErrorReporter::new();
        r.report("x", span(), "evaluator issue", Origin::Evaluator);
        r.report("y", span(), "scanner issue", Origin::Scanner);
        r.report("z", span(), "parser issue", Origin::Parser);

        let errs = r.errors();
        assert_eq!(errs[0].origin, Origin::Scanner);
        assert_eq!(errs[1].origin, Origin::Parser);
        assert_eq!(errs[2].origin, Origin::Evaluator);
    }

    #[test]
    fn reset_clears_diagnostics() {
        let mut r = ErrorReporter::new();
        r.report("x", span(), "oops", Origin::Scanner);
        assert!(r.has_errors());
        r.reset();
        assert!(!r.has_errors());
        assert!(r.is_empty());
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut r = ErrorReporter::new();
        r.warn("noop", span(), "transpose 0 is a no-op", Origin::Validator);
        assert!(!r.has_errors());
        assert_eq!(r.errors().len(), 1);
    }
}
