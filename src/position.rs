//! Source positions and spans shared by both languages.

use serde::{Deserialize, Serialize};

/// A zero-based location in a source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl Position {
    pub fn new(line: u32, column: u32, offset: u32) -> Self {
        Self { line, column, offset }
    }
}

/// A half-open range `[start, end)` over the source. `end.offset` is one past
/// the last byte covered by the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn union(&self, other: &Span) -> Span {
        let start = if self.start.offset <= other.start.offset { self.start } else { other.start };
        let end = if self.end.offset >= other.end.offset { self.end } else { other.end };
        Span::new(start, end)
    }

    /// Whether this span's byte range overlaps `other`'s.
    pub fn intersects(&self, other: &Span) -> bool {
        self.start.offset < other.end.offset && other.start.offset < self.end.offset
    }

    /// Whether the given 1-based user-visible line/column range intersects this span.
    /// `end_line`/`end_col` default to `line`/`col` when absent (a single point).
    pub fn intersects_user_range(&self, line: u32, col: Option<u32>, end_line: Option<u32>, end_col: Option<u32>) -> bool {
        let start_line0 = line.saturating_sub(1);
        let end_line0 = end_line.unwrap_or(line).saturating_sub(1);
        if (self.end.line) < start_line0 || self.start.line > end_line0 {
            return false;
        }
        match col {
            None => true,
            Some(c) => {
                let start_col0 = c.saturating_sub(1);
                let end_col0 = end_col.unwrap_or(c).saturating_sub(1);
                // Only meaningful to check columns when the span is on a single line
                // that matches the queried line exactly; otherwise the line overlap above suffices.
                if start_line0 == end_line0 && self.start.line == self.end.line && self.start.line == start_line0 {
                    self.start.column <= end_col0 && start_col0 <= self.end.column
                } else {
                    true
                }
            }
        }
    }
}

/// Converts a 0-based core [`Position`] into an LSP-style `(line, character)` pair.
/// LSP positions are already 0-based, so this is an identity conversion that exists
/// purely as the documented boundary between core spans and client-facing ranges.
pub fn to_lsp_position(pos: Position) -> (u32, u32) {
    (pos.line, pos.column)
}
