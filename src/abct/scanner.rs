//! Tokenizer for the ABCT transform DSL.

use serde::{Deserialize, Serialize};

use crate::context::SourceContext;
use crate::error::Origin;
use crate::position::{Position, Span};
use crate::token::{Token, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbctTokenKind {
    Identifier,
    Number,
    Pipe,
    PipeEq,
    Plus,
    At,
    Colon,
    Comma,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    EqEq,
    BangEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Minus,
    And,
    Or,
    Not,
    Filter,
    AbcFenceOpen,
    AbcContent,
    AbcFenceClose,
    Eol,
    Comment,
    Ws,
    Invalid,
    Eof,
}

pub type AbctToken = Token<AbctTokenKind>;

pub struct AbctScanner<'a> {
    ctx: &'a mut SourceContext,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> AbctScanner<'a> {
    pub fn new(ctx: &'a mut SourceContext) -> Self {
        let chars = ctx.source.chars().collect();
        Self { ctx, chars, pos: 0, line: 0, column: 0 }
    }

    pub fn scan(mut self) -> Vec<AbctToken> {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' => self.scan_ws(&mut out),
                '\n' => self.scan_eol(&mut out),
                '#' => self.scan_comment(&mut out),
                '|' => self.scan_pipe(&mut out),
                '+' => self.scan_single(&mut out, AbctTokenKind::Plus),
                '@' => self.scan_at(&mut out),
                ':' => self.scan_single(&mut out, AbctTokenKind::Colon),
                ',' => self.scan_single(&mut out, AbctTokenKind::Comma),
                '(' => self.scan_single(&mut out, AbctTokenKind::LParen),
                ')' => self.scan_single(&mut out, AbctTokenKind::RParen),
                '[' => self.scan_single(&mut out, AbctTokenKind::LBracket),
                ']' => self.scan_single(&mut out, AbctTokenKind::RBracket),
                '=' => self.scan_eq(&mut out),
                '!' => self.scan_bang_eq(&mut out),
                '>' => self.scan_rel(&mut out, '>', AbctTokenKind::Gt, AbctTokenKind::Gte),
                '<' => self.scan_rel(&mut out, '<', AbctTokenKind::Lt, AbctTokenKind::Lte),
                '-' => self.scan_minus(&mut out),
                '`' => self.scan_fence_or_invalid(&mut out),
                c if c.is_ascii_digit() => self.scan_number(&mut out),
                c if c.is_alphabetic() || c == '_' => self.scan_identifier_or_path(&mut out),
                '.' => self.scan_single(&mut out, AbctTokenKind::Dot),
                _ => self.scan_invalid(&mut out),
            }
        }
        out.push(self.make_token(AbctTokenKind::Eof, String::new(), None));
        out
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        c
    }

    fn start_pos(&self) -> Position {
        Position::new(self.line, self.column, self.pos as u32)
    }

    fn make_token(&mut self, kind: AbctTokenKind, lexeme: String, literal: Option<Value>) -> AbctToken {
        let id = self.ctx.next_id();
        Token { kind, lexeme, literal, line: self.line, column: self.column, offset: self.pos as u32, id }
    }

    fn push_at(&mut self, out: &mut Vec<AbctToken>, start: Position, kind: AbctTokenKind, lexeme: String, literal: Option<Value>) {
        let mut tok = self.make_token(kind, lexeme, literal);
        tok.line = start.line;
        tok.column = start.column;
        tok.offset = start.offset;
        out.push(tok);
    }

    fn scan_single(&mut self, out: &mut Vec<AbctToken>, kind: AbctTokenKind) {
        let start = self.start_pos();
        let c = self.advance();
        self.push_at(out, start, kind, c.to_string(), None);
    }

    fn scan_ws(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        let mut lexeme = String::new();
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            lexeme.push(self.advance());
        }
        self.push_at(out, start, AbctTokenKind::Ws, lexeme, None);
    }

    fn scan_eol(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        self.advance();
        self.push_at(out, start, AbctTokenKind::Eol, "\n".to_string(), None);
    }

    fn scan_comment(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            lexeme.push(self.advance());
        }
        self.push_at(out, start, AbctTokenKind::Comment, lexeme, None);
    }

    fn scan_pipe(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            self.push_at(out, start, AbctTokenKind::PipeEq, "|=".to_string(), None);
        } else {
            self.push_at(out, start, AbctTokenKind::Pipe, "|".to_string(), None);
        }
    }

    fn scan_at(&mut self, out: &mut Vec<AbctToken>) {
        self.scan_single(out, AbctTokenKind::At);
    }

    fn scan_eq(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            self.push_at(out, start, AbctTokenKind::EqEq, "==".to_string(), None);
        } else {
            self.push_at(out, start, AbctTokenKind::Eq, "=".to_string(), None);
        }
    }

    fn scan_bang_eq(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            self.push_at(out, start, AbctTokenKind::BangEq, "!=".to_string(), None);
        } else {
            self.push_at(out, start, AbctTokenKind::Invalid, "!".to_string(), None);
        }
    }

    fn scan_rel(&mut self, out: &mut Vec<AbctToken>, c: char, plain: AbctTokenKind, eq: AbctTokenKind) {
        let start = self.start_pos();
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            self.push_at(out, start, eq, format!("{c}="), None);
        } else {
            self.push_at(out, start, plain, c.to_string(), None);
        }
    }

    fn scan_minus(&mut self, out: &mut Vec<AbctToken>) {
        self.scan_single(out, AbctTokenKind::Minus);
    }

    fn scan_number(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        let mut lexeme = String::new();
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            lexeme.push(self.advance());
        }
        if self.peek() == Some('/') && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            lexeme.push(self.advance());
            while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                lexeme.push(self.advance());
            }
            let (n, d) = lexeme.split_once('/').unwrap();
            let value = Value::Fraction(n.parse().unwrap_or(0), d.parse().unwrap_or(1));
            self.push_at(out, start, AbctTokenKind::Number, lexeme, Some(value));
            return;
        }
        if self.peek() == Some('.') && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            lexeme.push(self.advance());
            while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                lexeme.push(self.advance());
            }
        }
        let value = Value::Number(lexeme.parse().unwrap_or(0.0));
        self.push_at(out, start, AbctTokenKind::Number, lexeme, Some(value));
    }

    /// Identifiers double as dotted file-ref paths (`song.abc`) and voice
    /// refs (`V:name`, handled by the `:` being its own token the parser
    /// recombines). The scanner just emits one `IDENTIFIER` per
    /// dot/slash-joined run of word characters so the parser can decide
    /// what shape it forms.
    fn scan_identifier_or_path(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '/' || c == '-' {
                // Don't swallow a trailing `.` that isn't followed by a
                // word character (e.g. end of a sentence-like construct is
                // not expected here, but guards against `song.` + EOF).
                if c == '.' && !self.peek_at(1).map(|n| n.is_alphanumeric()).unwrap_or(false) {
                    break;
                }
                if c == '-' && !self.peek_at(1).map(|n| n.is_alphanumeric()).unwrap_or(false) {
                    break;
                }
                lexeme.push(self.advance());
            } else {
                break;
            }
        }
        let kind = match lexeme.as_str() {
            "and" => AbctTokenKind::And,
            "or" => AbctTokenKind::Or,
            "not" => AbctTokenKind::Not,
            "filter" => AbctTokenKind::Filter,
            _ => AbctTokenKind::Identifier,
        };
        self.push_at(out, start, kind, lexeme, None);
    }

    fn scan_fence_or_invalid(&mut self, out: &mut Vec<AbctToken>) {
        if self.peek() == Some('`') && self.peek_at(1) == Some('`') && self.peek_at(2) == Some('`') {
            self.scan_fence(out);
        } else {
            self.scan_invalid(out);
        }
    }

    /// ` ```abc[:loc] ... ``` ` — the fence preserves its opening lexeme
    /// verbatim (including the `:loc` suffix, if present) so the parser can
    /// split out the location selector without the scanner needing to know
    /// its grammar.
    fn scan_fence(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        let mut open = String::new();
        for _ in 0..3 {
            open.push(self.advance());
        }
        while let Some(c) = self.peek() {
            if c == '\n' || c == ' ' {
                break;
            }
            open.push(self.advance());
        }
        self.push_at(out, start, AbctTokenKind::AbcFenceOpen, open, None);

        if self.peek() == Some('\n') {
            self.scan_eol(out);
        }

        let content_start = self.start_pos();
        let mut content = String::new();
        loop {
            if self.peek().is_none() {
                self.ctx.errors.report(
                    "unterminated_fence",
                    Span::new(content_start, self.start_pos()),
                    "unterminated ABC fence literal: expected closing ```",
                    Origin::Scanner,
                );
                break;
            }
            if self.peek() == Some('`') && self.peek_at(1) == Some('`') && self.peek_at(2) == Some('`') {
                break;
            }
            content.push(self.advance());
        }
        if !content.is_empty() {
            self.push_at(out, content_start, AbctTokenKind::AbcContent, content, None);
        }

        if self.peek() == Some('`') {
            let close_start = self.start_pos();
            let mut close = String::new();
            for _ in 0..3 {
                close.push(self.advance());
            }
            self.push_at(out, close_start, AbctTokenKind::AbcFenceClose, close, None);
        }
    }

    fn scan_invalid(&mut self, out: &mut Vec<AbctToken>) {
        let start = self.start_pos();
        let c = self.advance();
        self.ctx.errors.report(
            "unexpected_character",
            Span::new(start, self.start_pos()),
            format!("unexpected character `{c}`"),
            Origin::Scanner,
        );
        self.push_at(out, start, AbctTokenKind::Invalid, c.to_string(), None);
    }
}

pub fn scan(ctx: &mut SourceContext) -> Vec<AbctToken> {
    AbctScanner::new(ctx).scan()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<AbctTokenKind> {
        let mut ctx = SourceContext::new(src);
        scan(&mut ctx).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn pipes_and_update_are_distinct() {
        let ks = kinds("a | b |= c");
        assert!(ks.contains(&AbctTokenKind::Pipe));
        assert!(ks.contains(&AbctTokenKind::PipeEq));
    }

    #[test]
    fn reserved_words_are_classified() {
        let ks = kinds("and or not filter");
        assert_eq!(
            ks,
            vec![
                AbctTokenKind::And,
                AbctTokenKind::Ws,
                AbctTokenKind::Or,
                AbctTokenKind::Ws,
                AbctTokenKind::Not,
                AbctTokenKind::Ws,
                AbctTokenKind::Filter,
                AbctTokenKind::Eof,
            ]
        );
    }

    #[test]
    fn token_roundtrip_reproduces_source() {
        let src = "song.abc | @notes | transpose 2\n";
        let mut ctx = SourceContext::new(src);
        let tokens = scan(&mut ctx);
        let rebuilt: String = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn fence_literal_is_scanned_as_one_content_token() {
        let ks = kinds("```abc\nX:1\nK:C\nCDEF|\n```");
        assert!(ks.contains(&AbctTokenKind::AbcFenceOpen));
        assert!(ks.contains(&AbctTokenKind::AbcContent));
        assert!(ks.contains(&AbctTokenKind::AbcFenceClose));
    }
}
