//! ABC notation analysis and the ABCT selector/transform pipeline DSL.
//!
//! Two independent languages share one source/error/position foundation:
//! `abc` (the music notation itself) and `abct` (the pipeline language that
//! selects and transforms parsed ABC trees). [`position`] and [`error`]
//! are common to both; [`context::SourceContext`] backs a single
//! scan-and-parse pass of either language.

pub mod abc;
pub mod abct;
pub mod context;
pub mod error;
pub mod position;
pub mod token;

use std::path::Path;

use abc::tree::AbcTree;
use abc::{format, FormatOptions};
use abct::evaluator::EvaluationResult;
use abct::{evaluate, parse as parse_abct, validate, AbcLoader, Program};
use context::SourceContext;
use error::Diagnostic;
use position::{to_lsp_position, Span};

/// Parses `source` as ABC notation, returning the tree and every diagnostic
/// recorded while scanning and parsing it.
pub fn analyze_abc(source: &str) -> (AbcTree, Vec<Diagnostic>) {
    let mut ctx = SourceContext::new(source);
    let tree = abc::parse(&mut ctx);
    (tree, ctx.errors.errors())
}

/// Parses `source` as an ABCT program and runs semantic validation over it.
/// Scanner/parser diagnostics and validator diagnostics are merged, ordered
/// by pipeline stage.
pub fn analyze_abct(source: &str) -> (Program, Vec<Diagnostic>) {
    let mut ctx = SourceContext::new(source);
    let program = parse_abct(&mut ctx);
    let mut diagnostics = ctx.errors.errors();
    diagnostics.extend(validate(&program).errors());
    (program, diagnostics)
}

/// Renders an [`AbcTree`] back to ABC source text.
pub fn format_abc(tree: &AbcTree, pretty: bool) -> String {
    format(tree, &FormatOptions { pretty })
}

/// Runs a parsed ABCT program against a loader, resolving file references
/// relative to `base_dir`. `up_to_line` limits evaluation to statements
/// starting at or before that 1-based source line, matching an editor's
/// "evaluate up to the cursor" behavior; `None` runs the whole program.
pub fn evaluate_abct(
    program: &Program,
    loader: &dyn AbcLoader,
    base_dir: &Path,
    up_to_line: Option<u32>,
) -> EvaluationResult {
    evaluate(program, loader, base_dir, up_to_line)
}

/// A diagnostic range in LSP's 0-based `{start, end}` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LspRange {
    pub start: (u32, u32),
    pub end: (u32, u32),
}

impl From<Span> for LspRange {
    fn from(span: Span) -> Self {
        LspRange { start: to_lsp_position(span.start), end: to_lsp_position(span.end) }
    }
}

/// A diagnostic shaped for an LSP client: severity, a 0-based range, a
/// message, and a `source` tag identifying which language produced it.
/// This is the boundary conversion spec'd for interop with editor
/// clients; internal code should keep using [`Diagnostic`] directly.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LspDiagnostic {
    pub severity: error::Severity,
    pub range: LspRange,
    pub message: String,
    pub source: &'static str,
}

/// Converts core diagnostics to the LSP-facing shape, tagging each with
/// `source` (e.g. `"abc"` or `"abct"`) for clients that merge diagnostics
/// from multiple languages into one list.
pub fn to_lsp_diagnostics(diagnostics: &[Diagnostic], source: &'static str) -> Vec<LspDiagnostic> {
    diagnostics
        .iter()
        .map(|d| LspDiagnostic {
            severity: d.severity,
            range: d.span.into(),
            message: d.message.clone(),
            source,
        })
        .collect()
}

/// Serializes LSP-shaped diagnostics to a JSON array, the wire format a
/// JSON-RPC language-server layer publishes to an editor client. Kept as a
/// pure function here so that boundary never needs its own serialization
/// logic, only a transport.
pub fn lsp_diagnostics_to_json(diagnostics: &[LspDiagnostic]) -> serde_json::Result<String> {
    serde_json::to_string(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abct::MemoryLoader;

    #[test]
    fn analyze_abc_parses_a_simple_tune() {
        let (tree, diagnostics) = analyze_abc("X:1\nK:C\nCDEF|\n");
        assert!(diagnostics.is_empty());
        assert!(matches!(tree.root_node(), abc::tree::Node::FileStructure { .. }));
    }

    #[test]
    fn analyze_abct_validates_an_unknown_transform() {
        let (_program, diagnostics) = analyze_abct("song.abc | @notes | transpos 2");
        assert!(diagnostics.iter().any(|d| d.kind == "unknown_transform"));
    }

    #[test]
    fn format_abc_round_trips_a_parsed_tree() {
        let (tree, _) = analyze_abc("X:1\nK:C\nCDEF|\n");
        let rendered = format_abc(&tree, false);
        assert!(rendered.contains("K:C"));
    }

    #[test]
    fn evaluate_abct_runs_a_pipeline_end_to_end() {
        let (program, diagnostics) = analyze_abct("song.abc | @notes | transpose 2");
        assert!(diagnostics.is_empty());
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
        let result = evaluate_abct(&program, &loader, Path::new("/tunes"), None);
        assert!(result.diagnostics.is_empty());
        assert!(result.abc.contains("K:C"));
    }

    #[test]
    fn lsp_diagnostics_carry_zero_based_ranges_and_source_tag() {
        let (_program, diagnostics) = analyze_abct("song.abc | @bogus");
        let lsp = to_lsp_diagnostics(&diagnostics, "abct");
        assert_eq!(lsp.len(), diagnostics.len());
        assert_eq!(lsp[0].source, "abct");
    }

    #[test]
    fn lsp_diagnostics_serialize_to_a_json_array() {
        let (_program, diagnostics) = analyze_abct("song.abc | @bogus");
        let lsp = to_lsp_diagnostics(&diagnostics, "abct");
        let json = lsp_diagnostics_to_json(&lsp).expect("diagnostics should serialize");
        assert!(json.starts_with('['));
        assert!(json.contains("\"source\":\"abct\""));
    }
}
