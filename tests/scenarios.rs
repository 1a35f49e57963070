//! End-to-end scenarios tying the scanner, parser, validator and evaluator
//! together against whole ABC/ABCT programs, mirroring how an editor would
//! drive this crate.

use std::path::Path;

use abcls_core::abc::tree::Node;
use abcls_core::abct::MemoryLoader;
use abcls_core::{analyze_abc, analyze_abct, evaluate_abct, format_abc};

fn notes_of(abc: &str) -> Vec<char> {
    abc.chars().filter(|c| "CDEFGAB".contains(*c)).collect()
}

#[test]
fn scenario_a_pipeline_transposes_notes_up_by_two_semitones() {
    let (program, diagnostics) = analyze_abct("song.abc | @notes | transpose 2");
    assert!(diagnostics.is_empty());

    let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
    let result = evaluate_abct(&program, &loader, Path::new("/tunes"), None);

    assert!(result.diagnostics.is_empty());
    assert!(result.abc.contains("K:C"));
    assert_eq!(notes_of(&result.abc), vec!['D', 'E', 'F', 'G']);
}

#[test]
fn scenario_b_update_mutates_in_place_but_keeps_the_whole_tune() {
    let (program, diagnostics) = analyze_abct("song.abc | @notes |= transpose 2");
    assert!(diagnostics.is_empty());

    let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
    let result = evaluate_abct(&program, &loader, Path::new("/tunes"), None);

    assert!(result.diagnostics.is_empty());
    assert!(result.abc.contains("X:1"));
    assert!(result.abc.contains("K:C"));
    assert_eq!(notes_of(&result.abc), vec!['D', 'E', 'F', 'G']);
}

#[test]
fn scenario_c_bass_replaces_a_chord_with_its_lowest_note() {
    let (program, diagnostics) = analyze_abct("song.abc | @chords |= bass");
    assert!(diagnostics.is_empty());

    let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\n[CEG]|\n");
    let result = evaluate_abct(&program, &loader, Path::new("/tunes"), None);

    assert!(result.diagnostics.is_empty());
    assert!(!result.abc.contains('['));
    assert!(!result.abc.contains(']'));
    assert!(result.abc.contains('C'));
}

#[test]
fn scenario_d_assignment_only_up_to_first_line_produces_empty_output() {
    let (program, diagnostics) = analyze_abct("src = song.abc\nsrc | @notes | transpose 2");
    assert!(diagnostics.is_empty());

    let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
    let result = evaluate_abct(&program, &loader, Path::new("/tunes"), Some(1));

    assert!(result.diagnostics.is_empty());
    assert!(result.abc.is_empty());
}

#[test]
fn scenario_e_standalone_update_without_a_pipe_is_a_single_error() {
    let (program, diagnostics) = analyze_abct("@notes |= transpose 2");
    assert!(diagnostics.is_empty(), "parsing/validating a standalone update is itself fine");

    let loader = MemoryLoader::new();
    let result = evaluate_abct(&program, &loader, Path::new("/tunes"), None);

    assert!(result.abc.is_empty());
    assert_eq!(result.diagnostics.len(), 1);
    assert!(result.diagnostics[0].message.contains("must be used within a pipe"));
}

#[test]
fn scenario_f_reanalyzing_without_the_directive_clears_the_linear_flag() {
    let mut ctx = abcls_core::context::SourceContext::new("%%abcls-parse linear\n\nX:1\nK:C\nCDEF|\n");
    abcls_core::context::apply_directive(&mut ctx, "abcls-parse", "linear");
    assert!(ctx.parser_flags.linear);

    ctx.reset("X:1\nK:C\nCDEF|\n");
    assert!(!ctx.parser_flags.linear);
}

#[test]
fn analyze_abc_reports_no_diagnostics_for_a_well_formed_tune() {
    let (tree, diagnostics) = analyze_abc("X:1\nT:Test\nM:4/4\nL:1/8\nK:C\nCDEF GABc|\n");
    assert!(diagnostics.is_empty());
    assert!(matches!(tree.root_node(), Node::FileStructure { .. }));
}

#[test]
fn format_preserves_an_error_expression_verbatim() {
    let (tree, diagnostics) = analyze_abc("X:1\nK:C\nCDEF| ~garbage~\n");
    let rendered = format_abc(&tree, false);
    let has_error_node = tree.all_ids().iter().any(|id| matches!(tree.arena.get(*id), Node::ErrorExpr { .. }));
    if has_error_node {
        assert!(rendered.contains("~garbage~"));
    }
    let _ = diagnostics;
}

#[test]
fn transpose_composition_matches_a_single_combined_transpose() {
    let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");

    let (program_ab, _) = analyze_abct("song.abc | @notes | transpose 2 | transpose 3");
    let result_ab = evaluate_abct(&program_ab, &loader, Path::new("/tunes"), None);

    let (program_sum, _) = analyze_abct("song.abc | @notes | transpose 5");
    let result_sum = evaluate_abct(&program_sum, &loader, Path::new("/tunes"), None);

    assert_eq!(notes_of(&result_ab.abc), notes_of(&result_sum.abc));
}

#[test]
fn unknown_selector_is_reported_with_a_suggestion() {
    let (_program, diagnostics) = analyze_abct("song.abc | @not");
    assert!(diagnostics.iter().any(|d| d.kind == "unknown_selector" && d.message.contains("notes")));
}

#[test]
fn missing_file_reference_yields_empty_output_and_one_diagnostic() {
    let (program, diagnostics) = analyze_abct("missing.abc | @notes | transpose 2");
    assert!(diagnostics.is_empty());

    let loader = MemoryLoader::new();
    let result = evaluate_abct(&program, &loader, Path::new("/tunes"), None);
    assert!(result.abc.is_empty());
    assert!(!result.diagnostics.is_empty());
}
