//! Language-neutral AST for the ABCT transform DSL.
//!
//! Mirrors `abc::tree`'s tagged-variant-with-span style rather than a class
//! hierarchy: one flat `Expr` enum instead of a node per expression kind.

use crate::position::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assignment { name: String, value: Expr, span: Span },
    Expr(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assignment { span, .. } => *span,
            Stmt::Expr(e) => e.span(),
        }
    }
}

/// A single-line or multi-line location reference, 1-based and
/// user-visible (distinct from the internal 0-based `Span`).
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSelector {
    pub line: u32,
    pub col: Option<u32>,
    pub end: Option<LocationEnd>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationEnd {
    SingleLine { end_col: u32 },
    MultiLine { end_line: u32, end_col: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    pub path: String,
    pub location: Option<LocationSelector>,
    pub selector: Option<Box<Expr>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Pipe { left: Box<Expr>, right: Box<Expr>, span: Span },
    Concat { left: Box<Expr>, right: Box<Expr>, span: Span },
    Update { selector: Box<Expr>, transform: Box<Expr>, span: Span },
    Application { callee: Box<Expr>, args: Vec<Expr>, span: Span },
    Selector { name: String, arg: Option<String>, span: Span },
    LocationSelector(LocationSelector),
    FileRef(FileRef),
    AbcLiteral { source: String, location: Option<LocationSelector>, span: Span },
    Identifier { name: String, span: Span },
    Number { value: f64, fraction: Option<(i64, i64)>, span: Span },
    List { items: Vec<Expr>, span: Span },
    Group { inner: Box<Expr>, span: Span },
    Filter { predicate: Box<Expr>, span: Span },
    Comparison { left: Box<Expr>, op: CompareOp, right: Box<Expr>, span: Span },
    Logical { left: Box<Expr>, op: LogicalOp, right: Box<Expr>, span: Span },
    Negate { inner: Box<Expr>, span: Span },
    VoiceRef { id: String, span: Span },
    ErrorExpr { message: String, partial: Option<Box<Expr>>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Pipe { span, .. }
            | Expr::Concat { span, .. }
            | Expr::Update { span, .. }
            | Expr::Application { span, .. }
            | Expr::Selector { span, .. }
            | Expr::AbcLiteral { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Number { span, .. }
            | Expr::List { span, .. }
            | Expr::Group { span, .. }
            | Expr::Filter { span, .. }
            | Expr::Comparison { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Negate { span, .. }
            | Expr::VoiceRef { span, .. }
            | Expr::ErrorExpr { span, .. } => *span,
            Expr::LocationSelector(l) => l.span,
            Expr::FileRef(f) => f.span,
        }
    }

    /// Unwraps `Group` nodes to see the expression's effective shape; used
    /// by the evaluator so `(f | g)` on the right of `|=` flattens through
    /// parenthesization without losing the parser's recorded precedence
    /// intent (the `Group` node itself is still preserved in the tree).
    pub fn unwrap_group(&self) -> &Expr {
        match self {
            Expr::Group { inner, .. } => inner.unwrap_group(),
            other => other,
        }
    }
}
