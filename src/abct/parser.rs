//! Precedence-layered parser for the ABCT DSL.
//!
//! Binding strength, loosest to tightest: pipe (`|`) > concat (`+`) >
//! update (`|=`) > application (juxtaposition) > logical (`or` > `and` >
//! `not`) > comparison > atom. Each level's parse function calls directly
//! into the next-tighter level, the standard recursive-descent-by-
//! precedence shape the ABC parser also uses for its nested grammar.

use crate::abct::ast::{CompareOp, Expr, FileRef, LocationEnd, LocationSelector, LogicalOp, Program, Stmt};
use crate::abct::scanner::{scan, AbctToken, AbctTokenKind};
use crate::context::SourceContext;
use crate::error::Origin;
use crate::position::{Position, Span};

pub fn parse(ctx: &mut SourceContext) -> Program {
    let tokens = scan(ctx);
    let mut parser = Parser::new(tokens, ctx);
    parser.parse_program()
}

struct Parser<'a> {
    tokens: Vec<AbctToken>,
    pos: usize,
    ctx: &'a mut SourceContext,
}

const SYNC_KINDS: &[AbctTokenKind] = &[
    AbctTokenKind::Eol,
    AbctTokenKind::Eq,
    AbctTokenKind::Pipe,
    AbctTokenKind::RParen,
    AbctTokenKind::RBracket,
    AbctTokenKind::AbcFenceClose,
    AbctTokenKind::Eof,
];

impl<'a> Parser<'a> {
    fn new(tokens: Vec<AbctToken>, ctx: &'a mut SourceContext) -> Self {
        // Whitespace and comments carry no grammatical meaning in ABCT; drop
        // them up front so every parse function can look at the next
        // meaningful token without skipping boilerplate inline.
        let tokens: Vec<AbctToken> = tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, AbctTokenKind::Ws | AbctTokenKind::Comment))
            .collect();
        Self { tokens, pos: 0, ctx }
    }

    fn peek(&self) -> &AbctToken {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> Option<&AbctToken> {
        self.tokens.get(self.pos + offset)
    }

    fn kind(&self) -> AbctTokenKind {
        self.peek().kind
    }

    fn at_end(&self) -> bool {
        matches!(self.kind(), AbctTokenKind::Eof)
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.kind(), AbctTokenKind::Eol | AbctTokenKind::Eof)
    }

    fn advance(&mut self) -> AbctToken {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: AbctTokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: AbctTokenKind) -> Option<AbctToken> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn synchronize(&mut self) {
        while !SYNC_KINDS.contains(&self.kind()) {
            self.advance();
        }
    }

    fn error_expr(&mut self, message: impl Into<String>, start: Position) -> Expr {
        let end = self.peek().start();
        let span = Span::new(start, end.max(start));
        let message = message.into();
        self.ctx.errors.report("parse_error", span, message.clone(), Origin::Parser);
        self.synchronize();
        Expr::ErrorExpr { message, partial: None, span }
    }

    // ------------------------------------------------------------ program

    fn parse_program(&mut self) -> Program {
        let start = self.peek().start();
        let mut stmts = Vec::new();
        while !self.at_end() {
            if self.check(AbctTokenKind::Eol) {
                self.advance();
                continue;
            }
            stmts.push(self.parse_stmt());
            if self.check(AbctTokenKind::Eol) {
                self.advance();
            }
        }
        let end = self.peek().start();
        Program { stmts, span: Span::new(start, end) }
    }

    fn parse_stmt(&mut self) -> Stmt {
        let start = self.peek().start();
        if self.check(AbctTokenKind::Identifier)
            && matches!(self.peek_at(1).map(|t| t.kind), Some(AbctTokenKind::Eq))
        {
            let name_tok = self.advance();
            self.advance(); // '='
            if self.at_stmt_end() {
                let span = Span::new(start, self.peek().start());
                self.ctx.errors.report(
                    "missing_assignment_value",
                    span,
                    "assignment is missing a right-hand side",
                    Origin::Parser,
                );
                return Stmt::Assignment {
                    name: name_tok.lexeme,
                    value: Expr::ErrorExpr { message: "missing value".to_string(), partial: None, span },
                    span,
                };
            }
            let value = self.parse_pipe();
            let span = Span::new(start, value.span().end);
            return Stmt::Assignment { name: name_tok.lexeme, value, span };
        }
        Stmt::Expr(self.parse_pipe())
    }

    // --------------------------------------------------------------- pipe

    fn parse_pipe(&mut self) -> Expr {
        let mut left = self.parse_concat();
        while self.check(AbctTokenKind::Pipe) {
            self.advance();
            let right = self.parse_concat();
            let span = Span::new(left.span().start, right.span().end);
            left = Expr::Pipe { left: Box::new(left), right: Box::new(right), span };
        }
        left
    }

    fn parse_concat(&mut self) -> Expr {
        let mut left = self.parse_update();
        while self.check(AbctTokenKind::Plus) {
            self.advance();
            let right = self.parse_update();
            let span = Span::new(left.span().start, right.span().end);
            left = Expr::Concat { left: Box::new(left), right: Box::new(right), span };
        }
        left
    }

    fn parse_update(&mut self) -> Expr {
        let left = self.parse_application();
        if self.check(AbctTokenKind::PipeEq) {
            self.advance();
            if self.at_stmt_end() || self.check(AbctTokenKind::RParen) {
                let start = left.span().start;
                return self.error_expr("`|=` is missing its transform", start);
            }
            let right = self.parse_update();
            let span = Span::new(left.span().start, right.span().end);
            return Expr::Update { selector: Box::new(left), transform: Box::new(right), span };
        }
        left
    }

    /// Juxtaposed atoms/logical-expressions form an application:
    /// `transpose 2`, `filter(pitch > C4)`, `octave -1`.
    fn parse_application(&mut self) -> Expr {
        let callee = self.parse_logical();
        let mut args = Vec::new();
        while self.starts_atom() {
            args.push(self.parse_logical());
        }
        if args.is_empty() {
            return callee;
        }
        let span = Span::new(callee.span().start, args.last().unwrap().span().end);
        Expr::Application { callee: Box::new(callee), args, span }
    }

    fn starts_atom(&self) -> bool {
        matches!(
            self.kind(),
            AbctTokenKind::LParen
                | AbctTokenKind::LBracket
                | AbctTokenKind::AbcFenceOpen
                | AbctTokenKind::Colon
                | AbctTokenKind::At
                | AbctTokenKind::Filter
                | AbctTokenKind::Minus
                | AbctTokenKind::Number
                | AbctTokenKind::Identifier
        )
    }

    // ------------------------------------------------------------ logical

    fn parse_logical(&mut self) -> Expr {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Expr {
        let mut left = self.parse_and();
        while self.check(AbctTokenKind::Or) {
            self.advance();
            let right = self.parse_and();
            let span = Span::new(left.span().start, right.span().end);
            left = Expr::Logical { left: Box::new(left), op: LogicalOp::Or, right: Box::new(right), span };
        }
        left
    }

    fn parse_and(&mut self) -> Expr {
        let mut left = self.parse_not();
        while self.check(AbctTokenKind::And) {
            self.advance();
            let right = self.parse_not();
            let span = Span::new(left.span().start, right.span().end);
            left = Expr::Logical { left: Box::new(left), op: LogicalOp::And, right: Box::new(right), span };
        }
        left
    }

    fn parse_not(&mut self) -> Expr {
        if self.check(AbctTokenKind::Not) {
            let start = self.advance().start();
            let inner = self.parse_not();
            let span = Span::new(start, inner.span().end);
            return Expr::Negate { inner: Box::new(inner), span };
        }
        self.parse_comparison()
    }

    // --------------------------------------------------------- comparison

    fn parse_comparison(&mut self) -> Expr {
        let left = self.parse_atom();
        let op = match self.kind() {
            AbctTokenKind::EqEq => CompareOp::Eq,
            AbctTokenKind::BangEq => CompareOp::Ne,
            AbctTokenKind::Gt => CompareOp::Gt,
            AbctTokenKind::Gte => CompareOp::Gte,
            AbctTokenKind::Lt => CompareOp::Lt,
            AbctTokenKind::Lte => CompareOp::Lte,
            _ => return left,
        };
        self.advance();
        let right = self.parse_atom();
        let span = Span::new(left.span().start, right.span().end);
        Expr::Comparison { left: Box::new(left), op, right: Box::new(right), span }
    }

    // --------------------------------------------------------------- atom

    fn parse_atom(&mut self) -> Expr {
        let start = self.peek().start();
        match self.kind() {
            AbctTokenKind::LParen => self.parse_group(),
            AbctTokenKind::LBracket => self.parse_list(),
            AbctTokenKind::AbcFenceOpen => self.parse_fence(),
            AbctTokenKind::Colon => self.parse_location_selector_atom(),
            AbctTokenKind::At => self.parse_selector(),
            AbctTokenKind::Filter => self.parse_filter(),
            AbctTokenKind::Minus => {
                self.advance();
                let inner = self.parse_atom();
                let span = Span::new(start, inner.span().end);
                Expr::Negate { inner: Box::new(inner), span }
            }
            AbctTokenKind::Number => self.parse_number(),
            AbctTokenKind::Identifier => self.parse_identifier_like(),
            _ => self.error_expr(format!("unexpected token `{}`", self.peek().lexeme), start),
        }
    }

    fn parse_group(&mut self) -> Expr {
        let start = self.advance().start(); // '('
        let inner = self.parse_pipe();
        let end = if let Some(t) = self.eat(AbctTokenKind::RParen) {
            t.end()
        } else {
            self.ctx.errors.report(
                "unclosed_paren",
                Span::new(start, self.peek().start()),
                "expected `)`",
                Origin::Parser,
            );
            self.peek().start()
        };
        Expr::Group { inner: Box::new(inner), span: Span::new(start, end) }
    }

    fn parse_list(&mut self) -> Expr {
        let start = self.advance().start(); // '['
        let mut items = Vec::new();
        if !self.check(AbctTokenKind::RBracket) {
            items.push(self.parse_pipe());
            while self.eat(AbctTokenKind::Comma).is_some() {
                items.push(self.parse_pipe());
            }
        }
        let end = if let Some(t) = self.eat(AbctTokenKind::RBracket) {
            t.end()
        } else {
            self.ctx.errors.report(
                "unclosed_bracket",
                Span::new(start, self.peek().start()),
                "expected `]`",
                Origin::Parser,
            );
            self.peek().start()
        };
        Expr::List { items, span: Span::new(start, end) }
    }

    fn parse_filter(&mut self) -> Expr {
        let start = self.advance().start(); // 'filter'
        let open = self.eat(AbctTokenKind::LParen);
        if open.is_none() {
            return self.error_expr("`filter` expects `(predicate)`", start);
        }
        let predicate = self.parse_logical();
        let end = if let Some(t) = self.eat(AbctTokenKind::RParen) {
            t.end()
        } else {
            self.ctx.errors.report(
                "unclosed_paren",
                Span::new(start, self.peek().start()),
                "expected `)` after filter predicate",
                Origin::Parser,
            );
            self.peek().start()
        };
        Expr::Filter { predicate: Box::new(predicate), span: Span::new(start, end) }
    }

    fn parse_fence(&mut self) -> Expr {
        let open = self.advance();
        let start = open.start();
        let location = parse_fence_location(&open.lexeme, open.end());
        let source = if self.check(AbctTokenKind::AbcContent) {
            self.advance().lexeme
        } else {
            String::new()
        };
        let end = if let Some(t) = self.eat(AbctTokenKind::AbcFenceClose) {
            t.end()
        } else {
            self.ctx.errors.report(
                "unterminated_fence",
                Span::new(start, self.peek().start()),
                "expected closing ```",
                Origin::Parser,
            );
            self.peek().start()
        };
        Expr::AbcLiteral { source, location, span: Span::new(start, end) }
    }

    /// `:line[:col[-endCol|-endLine:endCol]]`, standalone (not preceded by
    /// `@`). Used on its own it selects tree nodes overlapping the given
    /// user-visible position in the target ABC.
    fn parse_location_selector_atom(&mut self) -> Expr {
        let start = self.advance().start(); // ':'
        let loc = self.parse_location_body(start);
        Expr::LocationSelector(loc)
    }

    fn parse_location_body(&mut self, start: Position) -> LocationSelector {
        let line = self.expect_number_u32();
        let mut col = None;
        let mut end = None;
        if self.eat(AbctTokenKind::Colon).is_some() {
            col = Some(self.expect_number_u32());
        }
        if self.eat(AbctTokenKind::Minus).is_some() {
            let a = self.expect_number_u32();
            if self.eat(AbctTokenKind::Colon).is_some() {
                let b = self.expect_number_u32();
                end = Some(LocationEnd::MultiLine { end_line: a, end_col: b });
            } else {
                end = Some(LocationEnd::SingleLine { end_col: a });
            }
        }
        let span = Span::new(start, self.peek().start());
        LocationSelector { line, col, end, span }
    }

    fn expect_number_u32(&mut self) -> u32 {
        if self.check(AbctTokenKind::Number) {
            let tok = self.advance();
            tok.lexeme.parse().unwrap_or(0)
        } else {
            self.ctx.errors.report(
                "expected_number",
                Span::new(self.peek().start(), self.peek().start()),
                "expected a line/column number",
                Origin::Parser,
            );
            0
        }
    }

    /// `@notes`, `@chords`, `@bass`, `@V:id`, `@M:start-end`, or `@:line...`
    /// for a location selector scoped by `@`.
    fn parse_selector(&mut self) -> Expr {
        let start = self.advance().start(); // '@'
        if self.check(AbctTokenKind::Colon) {
            self.advance();
            let loc = self.parse_location_body(start);
            return Expr::LocationSelector(loc);
        }
        let name_tok = match self.eat(AbctTokenKind::Identifier) {
            Some(t) => t,
            None => return self.error_expr("expected a selector name after `@`", start),
        };
        let mut name = name_tok.lexeme;
        let mut arg = None;
        if self.eat(AbctTokenKind::Colon).is_some() {
            match name.as_str() {
                "V" => {
                    if let Some(t) = self.eat(AbctTokenKind::Identifier) {
                        arg = Some(t.lexeme);
                    }
                }
                "M" => {
                    let a = self.expect_number_u32();
                    if self.eat(AbctTokenKind::Minus).is_some() {
                        let b = self.expect_number_u32();
                        arg = Some(format!("{a}-{b}"));
                    } else {
                        arg = Some(format!("{a}-{a}"));
                    }
                }
                _ => {
                    name.push(':');
                }
            }
        }
        let end = self.peek().start();
        Expr::Selector { name, arg, span: Span::new(start, end) }
    }

    fn parse_number(&mut self) -> Expr {
        let tok = self.advance();
        let fraction = tok.lexeme.split_once('/').and_then(|(n, d)| Some((n.parse().ok()?, d.parse().ok()?)));
        let value = if let Some((n, d)) = fraction {
            n as f64 / d as f64
        } else {
            tok.lexeme.parse().unwrap_or(0.0)
        };
        Expr::Number { value, fraction, span: tok.span() }
    }

    /// A plain identifier, a `V:name` voice ref, or a dotted file ref,
    /// optionally followed by `:location` and/or `@selector`.
    fn parse_identifier_like(&mut self) -> Expr {
        let tok = self.advance();
        let start = tok.start();

        if tok.lexeme == "V" && self.check(AbctTokenKind::Colon) {
            self.advance();
            let id_tok = self.eat(AbctTokenKind::Identifier).unwrap_or_else(|| tok.clone());
            let span = Span::new(start, id_tok.end());
            return Expr::VoiceRef { id: id_tok.lexeme, span };
        }

        if tok.lexeme.contains('.') {
            let mut location = None;
            if self.check(AbctTokenKind::Colon) {
                self.advance();
                location = Some(self.parse_location_body(start));
            }
            let mut selector = None;
            if self.eat(AbctTokenKind::At).is_some() {
                selector = Some(Box::new(self.parse_selector_tail(start)));
            }
            let end = location
                .as_ref()
                .map(|l| l.span.end)
                .max(selector.as_ref().map(|s| s.span().end))
                .unwrap_or(tok.end());
            return Expr::FileRef(FileRef { path: tok.lexeme, location, selector, span: Span::new(start, end) });
        }

        Expr::Identifier { name: tok.lexeme, span: tok.span() }
    }

    /// Parses the selector name (and optional `:arg`) that follows an `@`
    /// already consumed by the caller — used for `file.abc@notes`.
    fn parse_selector_tail(&mut self, start: Position) -> Expr {
        let name_tok = match self.eat(AbctTokenKind::Identifier) {
            Some(t) => t,
            None => return self.error_expr("expected a selector name after `@`", start),
        };
        let mut name = name_tok.lexeme;
        let mut arg = None;
        if self.eat(AbctTokenKind::Colon).is_some() {
            match name.as_str() {
                "V" => {
                    if let Some(t) = self.eat(AbctTokenKind::Identifier) {
                        arg = Some(t.lexeme);
                    }
                }
                "M" => {
                    let a = self.expect_number_u32();
                    if self.eat(AbctTokenKind::Minus).is_some() {
                        let b = self.expect_number_u32();
                        arg = Some(format!("{a}-{b}"));
                    } else {
                        arg = Some(format!("{a}-{a}"));
                    }
                }
                _ => name.push(':'),
            }
        }
        let end = self.peek().start();
        Expr::Selector { name, arg, span: Span::new(start, end) }
    }
}

/// Splits the fence open lexeme ` ```abc[:loc] ` into its optional location
/// suffix. The scanner preserves the raw bytes; the parser owns the grammar
/// for what follows `abc`.
fn parse_fence_location(open_lexeme: &str, end: Position) -> Option<LocationSelector> {
    let rest = open_lexeme.strip_prefix("```abc")?;
    let rest = rest.strip_prefix(':')?;
    let (line_str, tail) = rest.split_once(':').unwrap_or((rest, ""));
    let line: u32 = line_str.parse().ok()?;
    if tail.is_empty() {
        return Some(LocationSelector { line, col: None, end: None, span: Span::new(end, end) });
    }
    if let Some((col_str, range)) = tail.split_once('-') {
        let col: u32 = col_str.parse().ok()?;
        let end_sel = if let Some((el, ec)) = range.split_once(':') {
            LocationEnd::MultiLine { end_line: el.parse().ok()?, end_col: ec.parse().ok()? }
        } else {
            LocationEnd::SingleLine { end_col: range.parse().ok()? }
        };
        Some(LocationSelector { line, col: Some(col), end: Some(end_sel), span: Span::new(end, end) })
    } else {
        let col: u32 = tail.parse().ok()?;
        Some(LocationSelector { line, col: Some(col), end: None, span: Span::new(end, end) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_src(src: &str) -> (Program, SourceContext) {
        let mut ctx = SourceContext::new(src);
        let program = parse(&mut ctx);
        (program, ctx)
    }

    #[test]
    fn pipe_is_left_associative() {
        let (program, ctx) = parse_src("a | b | c");
        assert!(!ctx.errors.has_errors());
        assert_eq!(program.stmts.len(), 1);
        match &program.stmts[0] {
            Stmt::Expr(Expr::Pipe { left, right, .. }) => {
                assert!(matches!(**right, Expr::Identifier { .. }));
                assert!(matches!(**left, Expr::Pipe { .. }));
            }
            other => panic!("expected Pipe(Pipe(a,b),c), got {other:?}"),
        }
    }

    #[test]
    fn assignment_binds_name() {
        let (program, ctx) = parse_src("src = song.abc");
        assert!(!ctx.errors.has_errors());
        match &program.stmts[0] {
            Stmt::Assignment { name, value, .. } => {
                assert_eq!(name, "src");
                assert!(matches!(value, Expr::FileRef(_)));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn selector_then_transform_application() {
        let (program, ctx) = parse_src("song.abc | @notes | transpose 2");
        assert!(!ctx.errors.has_errors());
        match &program.stmts[0] {
            Stmt::Expr(Expr::Pipe { right, .. }) => {
                assert!(matches!(**right, Expr::Application { .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn update_narrows_then_transforms() {
        let (program, ctx) = parse_src("song.abc | @notes |= transpose 2");
        assert!(!ctx.errors.has_errors());
        let Stmt::Expr(Expr::Pipe { right, .. }) = &program.stmts[0] else {
            panic!("expected pipe");
        };
        assert!(matches!(**right, Expr::Update { .. }));
    }

    #[test]
    fn standalone_update_parses_without_pipe() {
        let (program, ctx) = parse_src("@notes |= transpose 2");
        assert!(!ctx.errors.has_errors());
        assert!(matches!(program.stmts[0], Stmt::Expr(Expr::Update { .. })));
    }

    #[test]
    fn filter_predicate_parses_as_comparison() {
        let (program, ctx) = parse_src("song.abc | filter(pitch > C4)");
        assert!(!ctx.errors.has_errors());
        let Stmt::Expr(Expr::Pipe { right, .. }) = &program.stmts[0] else {
            panic!("expected pipe");
        };
        assert!(matches!(**right, Expr::Filter { .. }));
    }

    #[test]
    fn missing_assignment_value_is_an_error_node() {
        let (program, ctx) = parse_src("src =\n");
        assert!(ctx.errors.has_errors());
        assert!(matches!(
            program.stmts[0],
            Stmt::Assignment { value: Expr::ErrorExpr { .. }, .. }
        ));
    }

    #[test]
    fn fence_literal_parses_as_abc_literal() {
        let (program, ctx) = parse_src("```abc\nX:1\nK:C\nCDEF|\n```\n");
        assert!(!ctx.errors.has_errors());
        assert!(matches!(program.stmts[0], Stmt::Expr(Expr::AbcLiteral { .. })));
    }

    #[test]
    fn nested_update_inside_group() {
        let (program, ctx) = parse_src("song.abc | @chords |= (@notes |= transpose 2)");
        assert!(!ctx.errors.has_errors());
        let Stmt::Expr(Expr::Pipe { right, .. }) = &program.stmts[0] else {
            panic!("expected pipe");
        };
        let Expr::Update { transform, .. } = right.as_ref() else {
            panic!("expected update");
        };
        assert!(matches!(transform.unwrap_group(), Expr::Update { .. }));
    }
}
