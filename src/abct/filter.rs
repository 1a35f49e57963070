//! `filter(...)` predicate parsing and the selection-narrowing rewrite that
//! removes notes/chords failing a predicate from a [`Selection`] (spec §4.12).
//!
//! The rewrite works over the whole tree structurally (a single recursive
//! function generalizing over `Chord`/`Beam`/`Tuplet`/`GraceGroup`/`System`)
//! but only ever *considers* removal of ids already in `sel.selected` — a
//! filter narrows within the current selection, it never reaches outside it.

use std::collections::HashSet;

use crate::abc::pitch::{Accidental, NoteLetter, ResolvedPitch};
use crate::abc::tree::{AbcTree, Node, NodeId};
use crate::abct::ast::{CompareOp, Expr};
use crate::abct::selectors::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Pitch,
    Size,
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PredicateValue {
    Midi(u8),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub property: Property,
    pub op: CompareOp,
    pub value: PredicateValue,
}

/// Parses a letter (+ optional octave digit) pitch literal like `C4` or `f`
/// into a MIDI number. Not a regex: the ABCT scanner never produces
/// accidental characters inside a bare identifier, so the grammar this needs
/// to recognize is just a letter and an optional digit.
fn parse_pitch_literal(s: &str) -> Option<u8> {
    let mut chars = s.chars();
    let letter_char = chars.next()?;
    let letter = NoteLetter::from_char(letter_char)?;
    let lowercase = letter_char.is_ascii_lowercase();
    let rest: String = chars.collect();
    let octave = if rest.is_empty() {
        if lowercase {
            5
        } else {
            4
        }
    } else {
        rest.parse::<i32>().ok()?
    };
    Some(ResolvedPitch { letter, accidental: Accidental::Natural, octave }.to_midi())
}

fn property_from_name(name: &str) -> Option<Property> {
    match name {
        "pitch" => Some(Property::Pitch),
        "size" => Some(Property::Size),
        "length" => Some(Property::Length),
        _ => None,
    }
}

/// Parses `pitch > C4`, `size >= 3`, `length < 1/4` style predicates out of
/// a parsed `filter(...)` argument expression.
pub fn parse_predicate(expr: &Expr) -> Result<Predicate, String> {
    match expr.unwrap_group() {
        Expr::Comparison { left, op, right, .. } => {
            let name = match left.unwrap_group() {
                Expr::Identifier { name, .. } => name.clone(),
                _ => return Err("filter predicate's left side must be a property name".to_string()),
            };
            let property = property_from_name(&name)
                .ok_or_else(|| format!("unknown filter property `{name}` (expected pitch, size or length)"))?;

            let value = match right.unwrap_group() {
                Expr::Identifier { name, .. } => {
                    let midi = parse_pitch_literal(name)
                        .ok_or_else(|| format!("`{name}` is not a recognized pitch literal"))?;
                    PredicateValue::Midi(midi)
                }
                Expr::Number { value, .. } => PredicateValue::Number(*value),
                Expr::Negate { inner, .. } => match inner.unwrap_group() {
                    Expr::Number { value, .. } => PredicateValue::Number(-value),
                    _ => return Err("filter predicate's right side must be a literal".to_string()),
                },
                _ => return Err("filter predicate's right side must be a pitch or number literal".to_string()),
            };

            Ok(Predicate { property, op: *op, value })
        }
        _ => Err("filter argument must be a comparison expression".to_string()),
    }
}

fn compare(op: CompareOp, lhs: f64, rhs: f64) -> bool {
    match op {
        CompareOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
        CompareOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Lte => lhs <= rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Gte => lhs >= rhs,
    }
}

fn note_length_in_units(t: &AbcTree, rhythm: Option<NodeId>) -> f64 {
    let ratio = rhythm
        .map(|id| match t.arena.get(id) {
            Node::RhythmNode(r) => r.multiplier(),
            _ => num_rational::Rational64::new(1, 1),
        })
        .unwrap_or_else(|| num_rational::Rational64::new(1, 1));
    *ratio.numer() as f64 / *ratio.denom() as f64
}

fn note_passes(t: &AbcTree, id: NodeId, pred: &Predicate) -> bool {
    match t.arena.get(id) {
        Node::Note { pitch, rhythm, .. } => match pred.property {
            Property::Pitch => {
                let Node::PitchNode(p) = t.arena.get(*pitch) else { return true };
                let midi = p.to_midi();
                match pred.value {
                    PredicateValue::Midi(m) => compare(pred.op, midi as f64, m as f64),
                    PredicateValue::Number(n) => compare(pred.op, midi as f64, n),
                }
            }
            Property::Length => {
                let length = note_length_in_units(t, *rhythm);
                let target = match pred.value {
                    PredicateValue::Midi(m) => m as f64,
                    PredicateValue::Number(n) => n,
                };
                compare(pred.op, length, target)
            }
            Property::Size => true,
        },
        _ => true,
    }
}

fn chord_passes_size(t: &AbcTree, id: NodeId, pred: &Predicate) -> bool {
    if pred.property != Property::Size {
        return true;
    }
    let Node::Chord { contents, .. } = t.arena.get(id) else { return true };
    let size = contents.iter().filter(|c| matches!(t.arena.get(**c), Node::Note { .. })).count();
    let target = match pred.value {
        PredicateValue::Midi(m) => m as f64,
        PredicateValue::Number(n) => n,
    };
    compare(pred.op, size as f64, target)
}

/// How many of a beam/tuplet/grace-group's children are still "beamable"
/// content after filtering, used to decide whether the container itself
/// collapses (spec invariant: a `Beam` never contains fewer than 2 beamable
/// elements).
fn count_beamable(t: &AbcTree, ids: &[NodeId]) -> usize {
    ids.iter().filter(|id| t.arena.get(**id).is_beamable()).count()
}

/// Rewrites `id`'s subtree in place, returning the replacement id list to
/// splice into its parent's child vector. An empty vec drops the node; more
/// than one id downgrades a structural container that no longer satisfies
/// its own invariants; exactly one id keeps the node (possibly mutated).
fn rewrite(
    t: &mut AbcTree,
    id: NodeId,
    pred: &Predicate,
    removed_notes: &HashSet<NodeId>,
    removed_chords: &HashSet<NodeId>,
) -> Vec<NodeId> {
    match t.arena.get(id).clone() {
        Node::Note { .. } => {
            if removed_notes.contains(&id) {
                vec![]
            } else {
                vec![id]
            }
        }
        Node::Chord { contents, rhythm, tie, span } => {
            if removed_chords.contains(&id) {
                return vec![];
            }
            let kept: Vec<NodeId> = contents
                .iter()
                .copied()
                .filter(|c| !matches!(t.arena.get(*c), Node::Note { .. }) || !removed_notes.contains(c))
                .collect();
            if kept.is_empty() {
                return vec![];
            }
            let notes_left = kept.iter().filter(|c| matches!(t.arena.get(**c), Node::Note { .. })).count();
            if notes_left == 1 && kept.len() == 1 {
                // A single-note chord collapses to a bare note.
                return vec![kept[0]];
            }
            *t.arena.get_mut(id) = Node::Chord { contents: kept, rhythm, tie, span };
            vec![id]
        }
        Node::Beam { contents, span } => {
            let mut rewritten = Vec::new();
            for child in &contents {
                rewritten.extend(rewrite(t, *child, pred, removed_notes, removed_chords));
            }
            if count_beamable(t, &rewritten) < 2 {
                return rewritten;
            }
            *t.arena.get_mut(id) = Node::Beam { contents: rewritten, span };
            vec![id]
        }
        Node::Tuplet { p, q, r, contents, span } => {
            let mut rewritten = Vec::new();
            for child in &contents {
                rewritten.extend(rewrite(t, *child, pred, removed_notes, removed_chords));
            }
            if rewritten.is_empty() {
                return vec![];
            }
            *t.arena.get_mut(id) = Node::Tuplet { p, q, r, contents: rewritten, span };
            vec![id]
        }
        Node::GraceGroup { notes, is_acciaccatura, span } => {
            let mut rewritten = Vec::new();
            for child in &notes {
                rewritten.extend(rewrite(t, *child, pred, removed_notes, removed_chords));
            }
            if rewritten.is_empty() {
                return vec![];
            }
            *t.arena.get_mut(id) = Node::GraceGroup { notes: rewritten, is_acciaccatura, span };
            vec![id]
        }
        Node::System { elements, voice, span } => {
            let mut rewritten = Vec::new();
            for child in &elements {
                rewritten.extend(rewrite(t, *child, pred, removed_notes, removed_chords));
            }
            *t.arena.get_mut(id) = Node::System { elements: rewritten, voice, span };
            vec![id]
        }
        _ => vec![id],
    }
}

/// Applies `pred` to `sel`, returning a new, narrower [`Selection`] over the
/// same tree. Notes/chords outside `sel.selected` are left untouched
/// regardless of the predicate.
pub fn apply_filter(sel: &Selection, pred: &Predicate) -> Selection {
    let tree_rc = sel.tree.clone();
    let mut removed_notes = HashSet::new();
    let mut removed_chords = HashSet::new();

    {
        let t = tree_rc.borrow();
        for id in sel.selected.iter().copied() {
            match t.arena.get(id) {
                Node::Note { .. } => {
                    if !note_passes(&t, id, pred) {
                        removed_notes.insert(id);
                    }
                }
                Node::Chord { contents, .. } => {
                    if pred.property == Property::Pitch {
                        for member in contents.iter().copied() {
                            if matches!(t.arena.get(member), Node::Note { .. }) && !note_passes(&t, member, pred) {
                                removed_notes.insert(member);
                            }
                        }
                    } else if !chord_passes_size(&t, id, pred) {
                        removed_chords.insert(id);
                    }
                }
                _ => {}
            }
        }
    }

    {
        let mut t = tree_rc.borrow_mut();
        let root = t.root;
        rewrite(&mut t, root, pred, &removed_notes, &removed_chords);
    }

    let kept: HashSet<NodeId> = sel
        .selected
        .iter()
        .copied()
        .filter(|id| !removed_notes.contains(id) && !removed_chords.contains(id))
        .collect();
    Selection::new(tree_rc, kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::parser::parse;
    use crate::abct::ast::CompareOp;
    use crate::abct::selectors::select_notes;
    use crate::context::SourceContext;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn tree_of(src: &str) -> Rc<RefCell<crate::abc::tree::AbcTree>> {
        let mut ctx = SourceContext::new(src);
        Rc::new(RefCell::new(parse(&mut ctx)))
    }

    #[test]
    fn pitch_literal_parses_letter_and_octave() {
        assert_eq!(parse_pitch_literal("C4"), Some(60));
        assert_eq!(parse_pitch_literal("c"), Some(72));
    }

    #[test]
    fn filter_removes_notes_below_pitch_threshold() {
        let tree = tree_of("X:1\nK:C\nC,DEF|\n");
        let sel = select_notes(&tree);
        let pred = Predicate { property: Property::Pitch, op: CompareOp::Gte, value: PredicateValue::Midi(60) };
        let filtered = apply_filter(&sel, &pred);
        assert!(filtered.selected.len() < sel.selected.len());
    }

    #[test]
    fn filter_on_chord_pitch_removes_failing_member_notes() {
        let tree = tree_of("X:1\nK:C\n[C,EG]|\n");
        let sel = crate::abct::selectors::select_chords(&tree);
        // C, (an octave down) fails `pitch >= C4`; E and G stay.
        let pred = Predicate { property: Property::Pitch, op: CompareOp::Gte, value: PredicateValue::Midi(60) };
        let _ = apply_filter(&sel, &pred);

        let t = tree.borrow();
        let chord_id = t.all_ids().into_iter().find(|id| matches!(t.arena.get(*id), Node::Chord { .. })).unwrap();
        let Node::Chord { contents, .. } = t.arena.get(chord_id) else { panic!("expected chord") };
        let note_count = contents.iter().filter(|c| matches!(t.arena.get(**c), Node::Note { .. })).count();
        assert_eq!(note_count, 2, "the low C, should have been dropped from the chord");
    }

    #[test]
    fn filter_on_chord_size_drops_small_chords() {
        let tree = tree_of("X:1\nK:C\n[CE][CEG]|\n");
        let sel = crate::abct::selectors::select_chords(&tree);
        let pred = Predicate { property: Property::Size, op: CompareOp::Gte, value: PredicateValue::Number(3.0) };
        let filtered = apply_filter(&sel, &pred);
        assert_eq!(filtered.selected.len(), 1);
    }

    #[test]
    fn beam_downgrades_when_fewer_than_two_members_remain() {
        let tree = tree_of("X:1\nK:C\nCDE|\n");
        let sel = select_notes(&tree);
        let pred = Predicate { property: Property::Pitch, op: CompareOp::Gte, value: PredicateValue::Midi(64) };
        let _ = apply_filter(&sel, &pred);
        let t = tree.borrow();
        let beams = t.all_ids().into_iter().filter(|id| t.arena.get(*id).is_beam()).count();
        for id in t.all_ids() {
            if let Node::Beam { contents, .. } = t.arena.get(id) {
                assert!(contents.len() != 1, "a lone beamed element must downgrade to a bare node");
            }
        }
        let _ = beams;
    }
}
