//! Evaluates a parsed ABCT [`Program`] against an [`AbcLoader`] (spec §4.11),
//! folding statements left to right and threading variable bindings through
//! an `Env`.
//!
//! Each statement evaluates to a [`Selection`]; a bare selection statement
//! (not an assignment) contributes its underlying ABC tree to the result the
//! caller renders back with `abc::format`.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::abc::parser::parse as parse_abc;
use crate::abc::tree::AbcTree;
use crate::abct::ast::{Expr, FileRef, LocationSelector, Program, Stmt};
use crate::abct::filter::{apply_filter, parse_predicate};
use crate::abct::loader::{resolve_path, AbcLoader, LoadCache};
use crate::abct::selectors::{
    select_all, select_bar_range, select_chords, select_chords_from_selection, select_location, select_notes,
    select_notes_from_selection, select_voice, Selection,
};
use crate::abct::transforms;
use crate::context::SourceContext;
use crate::error::{ErrorReporter, Origin};
use crate::position::Span;

/// Bindings introduced by `name = expr` assignment statements.
type Env = HashMap<String, Selection>;

/// The outcome of evaluating a program: the final selection's tree,
/// re-rendered as ABC source, plus any diagnostics collected along the way.
/// `abc` is always present, possibly empty (spec §7's canonical shape for an
/// evaluation that never produced output, e.g. an assignment-only program).
pub struct EvaluationResult {
    pub abc: String,
    pub diagnostics: Vec<crate::error::Diagnostic>,
}

/// Evaluates `program` against `loader`, resolving file references relative
/// to `base_dir`. `up_to` optionally stops evaluation after the statement
/// whose span covers the given 1-based source line (spec §4.11's
/// cursor-scoped "evaluate up to here" mode for editor integrations).
pub fn evaluate(program: &Program, loader: &dyn AbcLoader, base_dir: &Path, up_to_line: Option<u32>) -> EvaluationResult {
    let mut reporter = ErrorReporter::new();
    let mut cache = LoadCache::new();
    let mut env: Env = HashMap::new();
    let mut last: Option<Selection> = None;

    for stmt in &program.stmts {
        if let Some(line) = up_to_line {
            if stmt.span().start.line + 1 > line {
                break;
            }
        }
        match stmt {
            Stmt::Assignment { name, value, .. } => {
                log::debug!("evaluator: dispatching assignment to `{name}`");
                // An assignment binds a variable; it never contributes output
                // on its own (spec §8 scenario D).
                if let Some(sel) = eval_expr(value, &env, loader, &mut cache, base_dir, &mut reporter) {
                    env.insert(name.clone(), sel);
                }
            }
            Stmt::Expr(e) => {
                log::debug!("evaluator: dispatching bare expression statement");
                if let Some(sel) = eval_expr(e, &env, loader, &mut cache, base_dir, &mut reporter) {
                    last = Some(sel);
                }
            }
        }
    }

    let abc = last
        .map(|sel| {
            let tree = sel.tree.borrow();
            crate::abc::format(&tree, &crate::abc::FormatOptions::default())
        })
        .unwrap_or_default();

    EvaluationResult { abc, diagnostics: reporter.errors() }
}

fn eval_expr(
    expr: &Expr,
    env: &Env,
    loader: &dyn AbcLoader,
    cache: &mut LoadCache,
    base_dir: &Path,
    reporter: &mut ErrorReporter,
) -> Option<Selection> {
    match expr {
        Expr::Pipe { left, right, .. } => {
            let left_sel = eval_expr(left, env, loader, cache, base_dir, reporter)?;
            eval_pipe_stage(&left_sel, right, env, loader, cache, base_dir, reporter)
        }
        // Reached only when `|=` appears as its own top-level statement (not
        // as a pipe stage, which `eval_pipe_stage` handles instead) — spec
        // §8 scenario E.
        Expr::Update { span, .. } => {
            reporter.report("standalone_update", *span, "`|=` must be used within a pipe".to_string(), Origin::Evaluator);
            None
        }
        Expr::FileRef(file_ref) => eval_file_ref(file_ref, loader, cache, base_dir, reporter),
        Expr::AbcLiteral { source, .. } => {
            let mut ctx = SourceContext::new(source.clone());
            let tree = parse_abc(&mut ctx);
            let shared = Rc::new(std::cell::RefCell::new(tree));
            Some(select_all(&shared))
        }
        Expr::Identifier { name, span } => match env.get(name) {
            Some(sel) => Some(sel.clone()),
            None => {
                reporter.report("undefined_variable", *span, format!("`{name}` is not defined"), Origin::Evaluator);
                None
            }
        },
        Expr::Group { inner, .. } => eval_expr(inner, env, loader, cache, base_dir, reporter),
        Expr::ErrorExpr { message, span, .. } => {
            reporter.report("syntax_error", *span, message.clone(), Origin::Evaluator);
            None
        }
        other => {
            reporter.report(
                "unsupported_expression",
                other.span(),
                "this expression cannot start a pipeline on its own".to_string(),
                Origin::Evaluator,
            );
            None
        }
    }
}

/// Applies `stage` (a selector, transform application, bare transform name,
/// update, filter, or location selector) to `left`, the selection produced
/// by everything before this pipe segment.
fn eval_pipe_stage(
    left: &Selection,
    stage: &Expr,
    env: &Env,
    loader: &dyn AbcLoader,
    cache: &mut LoadCache,
    base_dir: &Path,
    reporter: &mut ErrorReporter,
) -> Option<Selection> {
    match stage {
        Expr::Selector { name, arg, span } => Some(apply_selector(left, name, arg.as_deref(), *span, reporter)),
        Expr::Application { callee, args, span } => {
            let Expr::Identifier { name, .. } = callee.unwrap_group() else {
                reporter.report("unsupported_pipe_stage", *span, "expected a transform name", Origin::Evaluator);
                return Some(left.clone());
            };
            apply_transform_call(left, name, args, *span, reporter);
            Some(left.clone())
        }
        Expr::Identifier { name, span } => {
            apply_transform_call(left, name, &[], *span, reporter);
            Some(left.clone())
        }
        Expr::Update { selector, transform, span } => {
            let narrowed = eval_pipe_stage(left, selector, env, loader, cache, base_dir, reporter)?;
            apply_update(&narrowed, transform, reporter, *span);
            Some(left.clone())
        }
        Expr::Filter { predicate, span } => match parse_predicate(predicate) {
            Ok(pred) => Some(apply_filter(left, &pred)),
            Err(message) => {
                reporter.report("invalid_filter_predicate", *span, message, Origin::Evaluator);
                None
            }
        },
        Expr::LocationSelector(loc) => Some(apply_location(left, loc)),
        Expr::Group { inner, .. } => eval_pipe_stage(left, inner, env, loader, cache, base_dir, reporter),
        _ => {
            reporter.report(
                "unsupported_pipe_stage",
                stage.span(),
                "this expression cannot follow a pipe",
                Origin::Evaluator,
            );
            Some(left.clone())
        }
    }
}

fn apply_selector(left: &Selection, name: &str, arg: Option<&str>, span: Span, reporter: &mut ErrorReporter) -> Selection {
    match name {
        "notes" | "n" => select_notes(&left.tree),
        "chords" | "c" => select_chords(&left.tree),
        "bass" => crate::abct::selectors::select_bass(&left.tree),
        "V" => match arg {
            Some(id) => select_voice(&left.tree, id),
            None => {
                reporter.report("missing_voice_id", span, "`@V:` requires a voice id", Origin::Evaluator);
                left.clone()
            }
        },
        "M" => match arg.and_then(parse_bar_range) {
            Some((start, end)) => select_bar_range(&left.tree, start, end),
            None => {
                reporter.report("invalid_bar_range", span, "`@M:` requires a `start-end` bar range", Origin::Evaluator);
                left.clone()
            }
        },
        _ => {
            reporter.report("unknown_selector", span, format!("unknown selector `@{name}`"), Origin::Evaluator);
            left.clone()
        }
    }
}

fn parse_bar_range(arg: &str) -> Option<(u32, u32)> {
    let (a, b) = arg.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

fn apply_location(left: &Selection, loc: &LocationSelector) -> Selection {
    use crate::abct::ast::LocationEnd;
    let (end_line, end_col) = match &loc.end {
        Some(LocationEnd::SingleLine { end_col }) => (None, Some(*end_col)),
        Some(LocationEnd::MultiLine { end_line, end_col }) => (Some(*end_line), Some(*end_col)),
        None => (None, None),
    };
    let full = select_location(&left.tree, loc.line, loc.col, end_line, end_col);
    let ids: std::collections::HashSet<_> = full.selected.intersection(&left.selected).copied().collect();
    Selection::new(left.tree.clone(), ids)
}

fn apply_transform_call(sel: &Selection, name: &str, args: &[Expr], span: Span, reporter: &mut ErrorReporter) {
    let Some(spec) = transforms::lookup(name) else {
        reporter.report("unknown_transform", span, format!("unknown transform `{name}`"), Origin::Evaluator);
        return;
    };
    let values: Vec<transforms::Value> = args.iter().map(transforms::coerce_arg).collect();
    if let Err(message) = (spec.apply)(sel, &values) {
        reporter.report("transform_failed", span, message, Origin::Evaluator);
    }
}

/// `sel |= transform`: narrows to `sel`, applies `transform` in place, and
/// returns nothing — the caller keeps using its own (wider) selection per
/// spec §4.10, since `|=` mutates the tree rather than narrowing the pipe.
fn apply_update(sel: &Selection, transform: &Expr, reporter: &mut ErrorReporter, update_span: Span) {
    match transform.unwrap_group() {
        Expr::Application { callee, args, span } => {
            if let Expr::Identifier { name, .. } = callee.unwrap_group() {
                apply_transform_call(sel, name, args, *span, reporter);
            }
        }
        Expr::Identifier { name, span } => apply_transform_call(sel, name, &[], *span, reporter),
        Expr::Update { selector, transform: inner, span } => {
            let narrowed = match selector.unwrap_group() {
                // Narrow within `sel` rather than re-selecting the whole
                // tree, so `@chords |= (@notes |= transpose n)` only ever
                // reaches notes inside the already-selected chords (spec
                // §4.8/§4.11).
                Expr::Selector { name, .. } if name == "notes" || name == "n" => select_notes_from_selection(sel),
                Expr::Selector { name, .. } if name == "chords" || name == "c" => select_chords_from_selection(sel),
                Expr::Selector { name, arg, .. } => apply_selector(sel, name, arg.as_deref(), *span, reporter),
                _ => sel.clone(),
            };
            apply_update(&narrowed, inner, reporter, *span);
        }
        _ => {
            reporter.report("unsupported_transform", update_span, "expected a transform after `|=`", Origin::Evaluator);
        }
    }
}

fn eval_file_ref(
    file_ref: &FileRef,
    loader: &dyn AbcLoader,
    cache: &mut LoadCache,
    base_dir: &Path,
    reporter: &mut ErrorReporter,
) -> Option<Selection> {
    let resolved = resolve_path(base_dir, &file_ref.path);
    let tree = match cache.get_or_load(loader, &resolved) {
        Ok(tree) => tree,
        Err(err) => {
            reporter.report("load_error", file_ref.span, err.to_string(), Origin::Evaluator);
            return None;
        }
    };

    let mut sel = select_all(&tree);
    if let Some(loc) = &file_ref.location {
        sel = apply_location(&sel, loc);
    }
    if let Some(selector) = &file_ref.selector {
        if let Expr::Selector { name, arg, span } = selector.unwrap_group() {
            sel = apply_selector(&sel, name, arg.as_deref(), *span, reporter);
        }
    }
    Some(sel)
}

/// Re-exported for callers that already hold a parsed tree (e.g. tests)
/// and want to start a selection without going through a loader.
pub fn selection_of(tree: AbcTree) -> Selection {
    let shared = Rc::new(std::cell::RefCell::new(tree));
    select_all(&shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abct::loader::MemoryLoader;
    use crate::abct::parser::parse;
    use std::path::Path;

    fn eval_src(abct_src: &str, loader: &dyn AbcLoader) -> EvaluationResult {
        let mut ctx = SourceContext::new(abct_src);
        let program = parse(&mut ctx);
        evaluate(&program, loader, Path::new("/tunes"), None)
    }

    #[test]
    fn pipeline_transposes_notes() {
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
        let result = eval_src("song.abc | @notes | transpose 2", &loader);
        assert!(result.diagnostics.is_empty());
        assert!(result.abc.contains('D'));
    }

    #[test]
    fn update_mutates_but_keeps_whole_file_selection() {
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\nGABc|\n");
        let result = eval_src("song.abc | @notes |= transpose 2", &loader);
        assert!(result.diagnostics.is_empty());
        assert!(result.abc.contains("X:1"));
    }

    #[test]
    fn standalone_update_without_pipe_reports_exactly_one_diagnostic() {
        let loader = MemoryLoader::new();
        let result = eval_src("@notes |= transpose 2", &loader);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].kind, "standalone_update");
        assert!(result.diagnostics[0].message.contains("must be used within a pipe"));
        assert!(result.abc.is_empty());
    }

    #[test]
    fn missing_file_is_reported() {
        let loader = MemoryLoader::new();
        let result = eval_src("missing.abc | @notes | transpose 2", &loader);
        assert!(result.diagnostics.iter().any(|d| d.kind == "load_error"));
        assert!(result.abc.is_empty());
    }

    #[test]
    fn assignment_only_up_to_line_one_produces_empty_output() {
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
        let mut ctx = SourceContext::new("src = song.abc\nsrc | @notes | transpose 2");
        let program = crate::abct::parser::parse(&mut ctx);
        let result = evaluate(&program, &loader, Path::new("/tunes"), Some(1));
        assert!(result.diagnostics.is_empty());
        assert!(result.abc.is_empty());
    }

    #[test]
    fn nested_update_only_transposes_notes_inside_the_selected_chords() {
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\n[CE]D|\n");
        let result = eval_src("song.abc | @chords |= (@notes |= transpose 2)", &loader);
        assert!(result.diagnostics.is_empty());
        // The chord's C/E shift to D/F#; the loose D beside it is untouched.
        assert!(result.abc.contains("[D"), "chord should be transposed: {}", result.abc);
        assert!(!result.abc.contains("^D"), "loose D must not be transposed: {}", result.abc);
    }

    #[test]
    fn assignment_binds_variable_for_later_reference() {
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
        let result = eval_src("src = song.abc\nsrc | @notes | transpose 1", &loader);
        assert!(result.diagnostics.is_empty());
        assert!(!result.abc.is_empty());
    }
}
