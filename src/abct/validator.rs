//! Semantic checks over a parsed [`Program`] (spec §4.7): unknown
//! transform/selector names (with a Levenshtein-nearest suggestion),
//! missing or mistyped transform arguments, unknown filter properties, and
//! no-op warnings for `transpose 0` / `octave 0`.

use regex::Regex;
use once_cell::sync::Lazy;

use crate::abct::ast::{Expr, Program, Stmt};
use crate::abct::filter::parse_predicate;
use crate::abct::selectors::SELECTOR_NAMES;
use crate::abct::transforms::{self, ArgType};
use crate::error::{ErrorReporter, Origin};

static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());
static FRACTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+/\d+$").unwrap());

/// Levenshtein edit distance between two short identifiers, used only for
/// "did you mean" suggestions — no need for a crate dependency at this size.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn suggest(name: &str, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|c| (*c, edit_distance(name, c)))
        .filter(|(_, d)| *d <= 2)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c.to_string())
}

fn known_names() -> Vec<&'static str> {
    let mut names = transforms::names();
    names.extend(SELECTOR_NAMES.iter().copied());
    names
}

fn arg_matches_type(expr: &Expr, ty: ArgType) -> bool {
    match (expr.unwrap_group(), ty) {
        (_, ArgType::Expression) => true,
        (Expr::Identifier { .. }, ArgType::String) => true,
        (Expr::Number { fraction: None, .. }, ArgType::Number) => true,
        (Expr::Number { fraction: None, value, .. }, ArgType::Integer) => value.fract() == 0.0,
        (Expr::Number { fraction: Some(_), .. }, ArgType::Number) => true,
        (Expr::Negate { inner, .. }, _) => arg_matches_type(inner, ty),
        (Expr::List { .. }, ArgType::List) => true,
        (Expr::Identifier { name, .. }, ArgType::Integer) => INTEGER_RE.is_match(name),
        (Expr::Identifier { name, .. }, ArgType::Number) => {
            NUMBER_RE.is_match(name) || FRACTION_RE.is_match(name)
        }
        _ => false,
    }
}

pub fn validate(program: &Program) -> ErrorReporter {
    let mut reporter = ErrorReporter::new();
    for stmt in &program.stmts {
        match stmt {
            Stmt::Assignment { value, .. } => validate_expr(value, false, &mut reporter),
            Stmt::Expr(e) => validate_expr(e, false, &mut reporter),
        }
    }
    reporter
}

fn validate_expr(expr: &Expr, in_transform_position: bool, reporter: &mut ErrorReporter) {
    match expr {
        Expr::Pipe { left, right, .. } => {
            validate_expr(left, false, reporter);
            validate_expr(right, true, reporter);
        }
        Expr::Concat { left, right, .. } => {
            validate_expr(left, in_transform_position, reporter);
            validate_expr(right, in_transform_position, reporter);
        }
        Expr::Update { selector, transform, .. } => {
            validate_expr(selector, false, reporter);
            validate_expr(transform, true, reporter);
        }
        Expr::Application { callee, args, .. } => {
            if let Expr::Identifier { name, span: callee_span } = callee.unwrap_group() {
                validate_call(name, args, *callee_span, reporter);
            }
            for a in args {
                validate_expr(a, false, reporter);
            }
        }
        Expr::Selector { name, span, .. } => {
            if !SELECTOR_NAMES.contains(&name.as_str()) {
                let msg = match suggest(name, &known_names()) {
                    Some(s) => format!("unknown selector `@{name}`, did you mean `@{s}`?"),
                    None => format!("unknown selector `@{name}`"),
                };
                reporter.report("unknown_selector", *span, msg, Origin::Validator);
            }
        }
        Expr::Identifier { name, span } if in_transform_position => {
            validate_call(name, &[], *span, reporter);
        }
        Expr::Filter { predicate, span } => {
            if let Err(message) = parse_predicate(predicate) {
                reporter.report("invalid_filter_predicate", *span, message, Origin::Validator);
            }
        }
        Expr::Group { inner, .. } => validate_expr(inner, in_transform_position, reporter),
        Expr::List { items, .. } => {
            for item in items {
                validate_expr(item, in_transform_position, reporter);
            }
        }
        Expr::Logical { left, right, .. } => {
            validate_expr(left, false, reporter);
            validate_expr(right, false, reporter);
        }
        Expr::Comparison { left, right, .. } => {
            validate_expr(left, false, reporter);
            validate_expr(right, false, reporter);
        }
        Expr::Negate { inner, .. } => validate_expr(inner, false, reporter),
        Expr::ErrorExpr { message, span, .. } => {
            reporter.report("syntax_error", *span, message.clone(), Origin::Validator);
        }
        _ => {}
    }
}

fn validate_call(name: &str, args: &[Expr], span: crate::position::Span, reporter: &mut ErrorReporter) {
    let Some(spec) = transforms::lookup(name) else {
        let msg = match suggest(name, &known_names()) {
            Some(s) => format!("unknown transform `{name}`, did you mean `{s}`?"),
            None => format!("unknown transform `{name}`"),
        };
        reporter.report("unknown_transform", span, msg, Origin::Validator);
        return;
    };

    for (i, arg_spec) in spec.args.iter().enumerate() {
        match args.get(i) {
            Some(expr) => {
                if !arg_matches_type(expr, arg_spec.ty) {
                    reporter.report(
                        "argument_type_mismatch",
                        expr.span(),
                        format!("argument `{}` to `{name}` should be a {:?}", arg_spec.name, arg_spec.ty),
                        Origin::Validator,
                    );
                }
            }
            None if arg_spec.required => {
                reporter.report(
                    "missing_argument",
                    span,
                    format!("`{name}` requires argument `{}`", arg_spec.name),
                    Origin::Validator,
                );
            }
            None => {}
        }
    }

    if matches!(name, "transpose" | "octave") {
        if let Some(Expr::Number { value, .. }) = args.first().map(Expr::unwrap_group) {
            if *value == 0.0 {
                reporter.warn("noop_transform", span, format!("`{name} 0` has no effect"), Origin::Validator);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abct::parser::parse;
    use crate::context::SourceContext;

    fn program_of(src: &str) -> Program {
        let mut ctx = SourceContext::new(src);
        parse(&mut ctx)
    }

    #[test]
    fn unknown_transform_is_flagged_with_suggestion() {
        let program = program_of("song.abc | @notes | transpos 2");
        let report = validate(&program);
        let errs = report.errors();
        assert!(errs.iter().any(|d| d.kind == "unknown_transform" && d.message.contains("transpose")));
    }

    #[test]
    fn unknown_selector_is_flagged() {
        let program = program_of("song.abc | @bogus");
        let report = validate(&program);
        assert!(report.errors().iter().any(|d| d.kind == "unknown_selector"));
    }

    #[test]
    fn transpose_zero_is_a_noop_warning() {
        let program = program_of("song.abc | @notes | transpose 0");
        let report = validate(&program);
        let errs = report.errors();
        assert!(errs.iter().any(|d| d.kind == "noop_transform"));
        assert!(!report.has_errors());
    }

    #[test]
    fn missing_required_argument_is_flagged() {
        let program = program_of("song.abc | @notes | transpose");
        let report = validate(&program);
        assert!(report.errors().iter().any(|d| d.kind == "missing_argument"));
    }

    #[test]
    fn well_formed_program_has_no_diagnostics() {
        let program = program_of("song.abc | @notes | transpose 2");
        let report = validate(&program);
        assert!(report.is_empty());
    }
}
