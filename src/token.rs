//! The token shape shared by the ABC and ABCT scanners. Each concrete
//! `TokenKind` enum (see `abc::scanner` and `abct::scanner`) plugs into the
//! same generic [`Token`] struct so span tracking and id minting live in one
//! place.

use serde::{Deserialize, Serialize};

use crate::position::{Position, Span};

/// A literal value carried by a token that the parser would otherwise have
/// to re-derive from the lexeme (numbers, fractions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Fraction(i64, i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token<K> {
    pub kind: K,
    pub lexeme: String,
    pub literal: Option<Value>,
    pub line: u32,
    pub column: u32,
    pub offset: u32,
    /// Stable id minted by the owning `SourceContext`, used for reference
    /// equality in tests and wherever a tree node needs to point back at a
    /// lexical token.
    pub id: u64,
}

impl<K> Token<K> {
    pub fn start(&self) -> Position {
        Position::new(self.line, self.column, self.offset)
    }

    pub fn end(&self) -> Position {
        let bytes = self.lexeme.len() as u32;
        let newlines = self.lexeme.matches('\n').count() as u32;
        if newlines == 0 {
            let chars = self.lexeme.chars().count() as u32;
            Position::new(self.line, self.column + chars, self.offset + bytes)
        } else {
            let after_last_nl = self.lexeme.rsplit('\n').next().unwrap_or("");
            let chars = after_last_nl.chars().count() as u32;
            Position::new(self.line + newlines, chars, self.offset + bytes)
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start(), self.end())
    }
}
