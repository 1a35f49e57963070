//! The transform registry (spec §4.9): named operations that mutate a
//! [`Selection`]'s tree in place. Grounded on `abc::pitch`'s MIDI/respelling
//! arithmetic for the pitch-moving transforms and on `abct::selectors`'
//! lowest-note rule for `bass`.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::abc::pitch::{transpose_pitch, Accidental, NoteLetter, ResolvedPitch};
use crate::abc::tree::{AbcTree, Node, NodeId, ParsedInfo};
use crate::abct::ast::Expr;
use crate::abct::selectors::{lowest_note_among, Selection};

/// An evaluated, already-coerced transform argument (spec §4.9's argument
/// coercion rules: fractions/negatives become floats, bare identifiers
/// become strings).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(n.round() as i64),
            Value::Text(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

/// Coerces a parsed argument expression per spec §4.9: `NumberLiteral`
/// (including a `n/m` fraction) becomes a float, a bare identifier becomes a
/// string, and a number wrapped in `Negate` becomes a negated float.
pub fn coerce_arg(expr: &Expr) -> Value {
    match expr.unwrap_group() {
        Expr::Number { value, .. } => Value::Number(*value),
        Expr::Negate { inner, .. } => match coerce_arg(inner) {
            Value::Number(n) => Value::Number(-n),
            other => other,
        },
        Expr::Identifier { name, .. } => Value::Text(name.clone()),
        other => Value::Text(format!("{other:?}")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Integer,
    Number,
    String,
    List,
    Expression,
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub required: bool,
}

pub type TransformFn = fn(&Selection, &[Value]) -> Result<(), String>;

#[derive(Clone)]
pub struct TransformSpec {
    pub name: &'static str,
    pub args: &'static [ArgSpec],
    pub description: &'static str,
    pub examples: &'static [&'static str],
    pub apply: TransformFn,
}

pub static REGISTRY: Lazy<Vec<TransformSpec>> = Lazy::new(|| {
    vec![
        TransformSpec {
            name: "transpose",
            args: &[ArgSpec { name: "k", ty: ArgType::Integer, required: true }],
            description: "Shift every selected note's MIDI pitch by k semitones.",
            examples: &["song.abc | @notes | transpose 2"],
            apply: apply_transpose,
        },
        TransformSpec {
            name: "octave",
            args: &[ArgSpec { name: "k", ty: ArgType::Integer, required: true }],
            description: "Shift every selected note by k octaves (12*k semitones).",
            examples: &["song.abc | @notes | octave -1"],
            apply: apply_octave,
        },
        TransformSpec {
            name: "retrograde",
            args: &[],
            description: "Reverse the order of selected notes within each system, barlines fixed.",
            examples: &["song.abc | @notes | retrograde"],
            apply: apply_retrograde,
        },
        TransformSpec {
            name: "bass",
            args: &[],
            description: "Replace each selected chord with its lowest note.",
            examples: &["song.abc | @chords |= bass"],
            apply: apply_bass,
        },
        TransformSpec {
            name: "invert",
            args: &[],
            description: "Mirror selected notes' MIDI pitches around the first selected note.",
            examples: &["song.abc | @notes | invert"],
            apply: apply_invert,
        },
        TransformSpec {
            name: "reverse",
            args: &[],
            description: "Reverse the pitch sequence of selected notes in place, keeping each note's position and rhythm.",
            examples: &["song.abc | @notes | reverse"],
            apply: apply_reverse,
        },
    ]
});

pub fn lookup(name: &str) -> Option<&'static TransformSpec> {
    REGISTRY.iter().find(|t| t.name == name)
}

pub fn names() -> Vec<&'static str> {
    REGISTRY.iter().map(|t| t.name).collect()
}

fn as_integer_arg(args: &[Value], index: usize, name: &str) -> Result<i32, String> {
    args.get(index)
        .and_then(Value::as_integer)
        .map(|v| v as i32)
        .ok_or_else(|| format!("missing or non-integer argument `{name}`"))
}

/// Maps every node id under a tune's body to that tune's key tonic, so
/// pitch-moving transforms can respell using key context even though the
/// tree itself has no parent pointers.
fn build_key_context(tree: &AbcTree) -> HashMap<NodeId, (NoteLetter, Accidental)> {
    let mut map = HashMap::new();
    if let Node::FileStructure { tunes, .. } = tree.root_node() {
        for tune_id in tunes.clone() {
            if let Node::Tune { header, body, .. } = tree.arena.get(tune_id) {
                let tonic = tune_tonic(tree, *header);
                if let Some(body_id) = body {
                    collect_with_tonic(tree, *body_id, tonic, &mut map);
                }
            }
        }
    }
    map
}

fn tune_tonic(tree: &AbcTree, header: NodeId) -> (NoteLetter, Accidental) {
    if let Node::TuneHeader { info_lines, .. } = tree.arena.get(header) {
        for line in info_lines {
            if let Node::InfoLine { parsed: Some(ParsedInfo::Key { tonic, accidental, .. }), .. } = tree.arena.get(*line) {
                return (*tonic, *accidental);
            }
        }
    }
    (NoteLetter::C, Accidental::Natural)
}

fn collect_with_tonic(tree: &AbcTree, id: NodeId, tonic: (NoteLetter, Accidental), map: &mut HashMap<NodeId, (NoteLetter, Accidental)>) {
    map.insert(id, tonic);
    for child in tree.children(id) {
        collect_with_tonic(tree, child, tonic, map);
    }
}

fn apply_resolved_to_pitch(node: &mut Node, resolved: ResolvedPitch) {
    if let Node::PitchNode(p) = node {
        p.letter = resolved.letter;
        p.alteration = if resolved.accidental == Accidental::Natural { None } else { Some(resolved.accidental) };
        let lowercase = resolved.octave >= 5;
        let baseline = if lowercase { 5 } else { 4 };
        p.lowercase = lowercase;
        p.octave_marks = resolved.octave - baseline;
    }
}

fn transpose_selected_notes(sel: &Selection, semitones: i32) -> Result<(), String> {
    let tree_rc = sel.tree.clone();
    let key_map = {
        let t = tree_rc.borrow();
        build_key_context(&t)
    };
    let mut t = tree_rc.borrow_mut();
    for id in sel.selected.iter().copied() {
        let pitch_id = match t.arena.get(id) {
            Node::Note { pitch, .. } => *pitch,
            _ => continue,
        };
        let resolved = match t.arena.get(pitch_id) {
            Node::PitchNode(p) => p.to_resolved(),
            _ => continue,
        };
        let tonic = key_map.get(&id).copied().unwrap_or((NoteLetter::C, Accidental::Natural));
        let transposed = transpose_pitch(resolved, semitones, tonic);
        apply_resolved_to_pitch(t.arena.get_mut(pitch_id), transposed);
    }
    Ok(())
}

fn apply_transpose(sel: &Selection, args: &[Value]) -> Result<(), String> {
    let k = as_integer_arg(args, 0, "k")?;
    transpose_selected_notes(sel, k)
}

fn apply_octave(sel: &Selection, args: &[Value]) -> Result<(), String> {
    let k = as_integer_arg(args, 0, "k")?;
    transpose_selected_notes(sel, 12 * k)
}

/// Whether `id` (a top-level element of a `System`) carries any pitch
/// content that is part of `selected` — used to decide which elements
/// `retrograde` treats as reorderable units, leaving everything else
/// (barlines, whitespace, info lines) fixed in place.
fn element_is_reorderable(t: &AbcTree, id: NodeId, selected: &std::collections::HashSet<NodeId>) -> bool {
    match t.arena.get(id) {
        Node::Note { .. } => selected.contains(&id),
        Node::Chord { contents, .. } => {
            selected.contains(&id) || contents.iter().any(|c| selected.contains(c))
        }
        Node::Beam { contents, .. } => contents.iter().any(|c| element_is_reorderable(t, *c, selected)),
        _ => false,
    }
}

fn apply_retrograde(sel: &Selection, _args: &[Value]) -> Result<(), String> {
    let tree_rc = sel.tree.clone();
    let system_ids: Vec<NodeId> = {
        let t = tree_rc.borrow();
        let mut out = Vec::new();
        t.walk(|id, node| {
            if matches!(node, Node::System { .. }) {
                out.push(id);
            }
        });
        out
    };

    let mut t = tree_rc.borrow_mut();
    for sys_id in system_ids {
        let elements = match t.arena.get(sys_id) {
            Node::System { elements, .. } => elements.clone(),
            _ => continue,
        };
        let positions: Vec<usize> = elements
            .iter()
            .enumerate()
            .filter(|(_, el)| element_is_reorderable(&t, **el, &sel.selected))
            .map(|(i, _)| i)
            .collect();
        let mut new_elements = elements;
        let n = positions.len();
        for k in 0..n / 2 {
            new_elements.swap(positions[k], positions[n - 1 - k]);
        }
        if let Node::System { elements, .. } = t.arena.get_mut(sys_id) {
            *elements = new_elements;
        }
    }
    Ok(())
}

fn apply_bass(sel: &Selection, _args: &[Value]) -> Result<(), String> {
    let tree_rc = sel.tree.clone();
    let mut t = tree_rc.borrow_mut();
    for chord_id in sel.selected.clone() {
        let (contents, chord_rhythm, chord_tie, span) = match t.arena.get(chord_id) {
            Node::Chord { contents, rhythm, tie, span } => (contents.clone(), *rhythm, *tie, *span),
            _ => continue,
        };
        let Some(lowest_id) = lowest_note_among(&t, &contents) else { continue };
        let (pitch_id, note_rhythm, note_tie) = match t.arena.get(lowest_id) {
            Node::Note { pitch, rhythm, tie, .. } => (*pitch, *rhythm, *tie),
            _ => continue,
        };
        let rhythm = chord_rhythm.or(note_rhythm);
        let tie = chord_tie || note_tie;
        *t.arena.get_mut(chord_id) = Node::Note { pitch: pitch_id, rhythm, tie, span };
    }
    Ok(())
}

/// Document-order `Note` ids among `sel.selected`, used by `invert`/
/// `reverse` to establish a stable left-to-right sequence.
fn ordered_selected_notes(t: &AbcTree, sel: &Selection) -> Vec<NodeId> {
    let mut notes: Vec<NodeId> = sel.selected.iter().copied().filter(|id| t.arena.get(*id).is_note()).collect();
    notes.sort_by_key(|id| t.arena.get(*id).span().start.offset);
    notes
}

fn apply_invert(sel: &Selection, _args: &[Value]) -> Result<(), String> {
    let tree_rc = sel.tree.clone();
    let key_map = {
        let t = tree_rc.borrow();
        build_key_context(&t)
    };
    let mut t = tree_rc.borrow_mut();
    let notes = ordered_selected_notes(&t, sel);
    let Some(&axis_note) = notes.first() else { return Ok(()) };
    let axis_midi = match t.arena.get(axis_note) {
        Node::Note { pitch, .. } => match t.arena.get(*pitch) {
            Node::PitchNode(p) => p.to_midi() as i32,
            _ => return Ok(()),
        },
        _ => return Ok(()),
    };

    for id in notes {
        let pitch_id = match t.arena.get(id) {
            Node::Note { pitch, .. } => *pitch,
            _ => continue,
        };
        let resolved = match t.arena.get(pitch_id) {
            Node::PitchNode(p) => p.to_resolved(),
            _ => continue,
        };
        let mirrored_midi = axis_midi * 2 - resolved.to_midi() as i32;
        let semitones = mirrored_midi - resolved.to_midi() as i32;
        let tonic = key_map.get(&id).copied().unwrap_or((NoteLetter::C, Accidental::Natural));
        let transposed = transpose_pitch(resolved, semitones, tonic);
        apply_resolved_to_pitch(t.arena.get_mut(pitch_id), transposed);
    }
    Ok(())
}

fn apply_reverse(sel: &Selection, _args: &[Value]) -> Result<(), String> {
    let tree_rc = sel.tree.clone();
    let mut t = tree_rc.borrow_mut();
    let notes = ordered_selected_notes(&t, sel);
    let pitch_ids: Vec<NodeId> = notes
        .iter()
        .filter_map(|id| match t.arena.get(*id) {
            Node::Note { pitch, .. } => Some(*pitch),
            _ => None,
        })
        .collect();
    let values: Vec<_> = pitch_ids
        .iter()
        .map(|pid| match t.arena.get(*pid) {
            Node::PitchNode(p) => p.clone(),
            _ => unreachable!("pitch id always resolves to a PitchNode"),
        })
        .collect();
    for (pid, new_value) in pitch_ids.iter().zip(values.into_iter().rev()) {
        if let Node::PitchNode(p) = t.arena.get_mut(*pid) {
            let span = p.span;
            *p = new_value;
            p.span = span;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::parser::parse;
    use crate::abct::selectors::select_notes;
    use crate::context::SourceContext;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn tree_of(src: &str) -> Rc<RefCell<AbcTree>> {
        let mut ctx = SourceContext::new(src);
        Rc::new(RefCell::new(parse(&mut ctx)))
    }

    fn midis(tree: &Rc<RefCell<AbcTree>>, sel: &Selection) -> Vec<u8> {
        let t = tree.borrow();
        let mut notes: Vec<NodeId> = sel.selected.iter().copied().collect();
        notes.sort_by_key(|id| t.arena.get(*id).span().start.offset);
        notes
            .iter()
            .map(|id| {
                let Node::Note { pitch, .. } = t.arena.get(*id) else { panic!("expected note") };
                let Node::PitchNode(p) = t.arena.get(*pitch) else { panic!("expected pitch") };
                p.to_midi()
            })
            .collect()
    }

    #[test]
    fn transpose_shifts_every_note_up() {
        let tree = tree_of("X:1\nK:C\nCDEF|\n");
        let sel = select_notes(&tree);
        let before = midis(&tree, &sel);
        apply_transpose(&sel, &[Value::Number(2.0)]).unwrap();
        let after = midis(&tree, &sel);
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(*a, b + 2);
        }
    }

    #[test]
    fn octave_shifts_by_twelve_semitones_per_unit() {
        let tree = tree_of("X:1\nK:C\nC|\n");
        let sel = select_notes(&tree);
        let before = midis(&tree, &sel)[0];
        apply_octave(&sel, &[Value::Number(1.0)]).unwrap();
        assert_eq!(midis(&tree, &sel)[0], before + 12);
    }

    #[test]
    fn transpose_composition_matches_sum() {
        let tree = tree_of("X:1\nK:C\n^GA|\n");
        let sel = select_notes(&tree);
        let combined = tree_of("X:1\nK:C\n^GA|\n");
        let combined_sel = select_notes(&combined);

        apply_transpose(&sel, &[Value::Number(3.0)]).unwrap();
        apply_transpose(&sel, &[Value::Number(4.0)]).unwrap();
        apply_transpose(&combined_sel, &[Value::Number(7.0)]).unwrap();

        assert_eq!(midis(&tree, &sel), midis(&combined, &combined_sel));
    }

    #[test]
    fn bass_replaces_chord_with_lowest_note() {
        let tree = tree_of("X:1\nK:C\n[CEG]|\n");
        let sel = crate::abct::selectors::select_chords(&tree);
        apply_bass(&sel, &[]).unwrap();
        let t = tree.borrow();
        let id = *sel.selected.iter().next().unwrap();
        assert!(t.arena.get(id).is_note());
    }

    #[test]
    fn retrograde_reverses_note_order_within_system() {
        let tree = tree_of("X:1\nK:C\nC D E|\n");
        let sel = select_notes(&tree);
        let before = midis(&tree, &sel);
        apply_retrograde(&sel, &[]).unwrap();
        let after = midis(&tree, &sel);
        let mut expected = before.clone();
        expected.reverse();
        assert_eq!(after, expected);
    }

    #[test]
    fn reverse_swaps_pitches_but_keeps_positions() {
        let tree = tree_of("X:1\nK:C\nC D E|\n");
        let sel = select_notes(&tree);
        let before = midis(&tree, &sel);
        apply_reverse(&sel, &[]).unwrap();
        let after = midis(&tree, &sel);
        let mut expected = before;
        expected.reverse();
        assert_eq!(after, expected);
    }

    #[test]
    fn invert_mirrors_around_first_note() {
        let tree = tree_of("X:1\nK:C\nC D e|\n");
        let sel = select_notes(&tree);
        let before = midis(&tree, &sel);
        apply_invert(&sel, &[]).unwrap();
        let after = midis(&tree, &sel);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1] as i32, 2 * before[0] as i32 - before[1] as i32);
    }
}
