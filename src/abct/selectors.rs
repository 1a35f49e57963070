//! Builds and narrows [`Selection`]s: `tree` plus a subset of its node ids.
//!
//! Selections share the underlying tree by `Rc<RefCell<_>>` rather than
//! copying it, per spec §3 ("creating a new selection never copies the
//! tree"); the per-evaluation load cache in `abct::evaluator` relies on
//! `Rc::ptr_eq` over these handles to uphold the "identity-equal" invariant
//! for repeated references to the same loaded file.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::abc::tree::{AbcTree, Node, NodeId, ParsedInfo};

pub type SharedTree = Rc<RefCell<AbcTree>>;

#[derive(Clone)]
pub struct Selection {
    pub tree: SharedTree,
    pub selected: HashSet<NodeId>,
}

impl Selection {
    pub fn new(tree: SharedTree, selected: HashSet<NodeId>) -> Self {
        Self { tree, selected }
    }

    pub fn empty(tree: SharedTree) -> Self {
        Self { tree, selected: HashSet::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn same_tree(&self, other: &Selection) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree)
    }
}

/// `@notes` / `@n` — every `Note` whose pitch is a real pitch (rests
/// excluded per spec §4.8).
pub fn select_notes(tree: &SharedTree) -> Selection {
    let t = tree.borrow();
    let mut ids = HashSet::new();
    t.walk(|id, node| {
        if node.is_real_pitch_note(&t.arena) {
            ids.insert(id);
        }
    });
    drop(t);
    Selection::new(tree.clone(), ids)
}

/// `@chords` / `@c` — every `Chord` node.
pub fn select_chords(tree: &SharedTree) -> Selection {
    let t = tree.borrow();
    let mut ids = HashSet::new();
    t.walk(|id, node| {
        if node.is_chord() {
            ids.insert(id);
        }
    });
    drop(t);
    Selection::new(tree.clone(), ids)
}

/// `@notes` + `@chords` combined — the evaluator's starting selection for
/// a freshly loaded file or ABC literal (spec §4.11, "FileRef"/"AbcLiteral").
pub fn select_all(tree: &SharedTree) -> Selection {
    let notes = select_notes(tree);
    let chords = select_chords(tree);
    let mut ids = notes.selected;
    ids.extend(chords.selected);
    Selection::new(tree.clone(), ids)
}

/// `@bass` — the lowest-MIDI note in each chord, plus (when the tune has
/// more than one voice) the lowest note among notes occupying the same
/// ordinal position across systems, for notes not already inside a chord.
pub fn select_bass(tree: &SharedTree) -> Selection {
    let t = tree.borrow();
    let mut ids = HashSet::new();

    t.walk(|_, node| {
        if let Node::Chord { contents, .. } = node {
            if let Some(lowest) = lowest_note_among(&t, contents) {
                ids.insert(lowest);
            }
        }
    });

    if let Node::FileStructure { tunes, .. } = t.root_node() {
        for tune_id in tunes.clone() {
            if let Node::Tune { body: Some(body_id), .. } = t.arena.get(tune_id) {
                if let Node::TuneBody { systems, .. } = t.arena.get(*body_id) {
                    if systems.len() > 1 {
                        let per_system: Vec<Vec<NodeId>> = systems
                            .iter()
                            .map(|sys_id| top_level_note_ids(&t, *sys_id))
                            .collect();
                        let max_len = per_system.iter().map(|v| v.len()).max().unwrap_or(0);
                        for i in 0..max_len {
                            let candidates: Vec<NodeId> =
                                per_system.iter().filter_map(|v| v.get(i).copied()).collect();
                            if let Some(lowest) = lowest_note_among(&t, &candidates) {
                                ids.insert(lowest);
                            }
                        }
                    }
                }
            }
        }
    }

    drop(t);
    Selection::new(tree.clone(), ids)
}

/// Known `@`-selector names, used by the validator (spec §4.7) to build its
/// combined transform+selector suggestion registry.
pub const SELECTOR_NAMES: &[&str] = &["notes", "n", "chords", "c", "bass", "V", "M"];

/// Lowest-MIDI real-pitch `Note` among `candidates` (which may themselves
/// include non-note ids; those are ignored). Exposed at `pub(crate)` so
/// `abct::transforms::bass` can reuse the same rule `@bass` selects by.
pub(crate) fn lowest_note_among(t: &AbcTree, candidates: &[NodeId]) -> Option<NodeId> {
    candidates
        .iter()
        .copied()
        .filter(|id| t.arena.get(*id).is_real_pitch_note(&t.arena))
        .min_by_key(|id| {
            let Node::Note { pitch, .. } = t.arena.get(*id) else { unreachable!() };
            let Node::PitchNode(p) = t.arena.get(*pitch) else { unreachable!() };
            p.to_midi()
        })
}

/// Document-order `Note` ids directly reachable from a system without
/// descending into `Chord` (chords are handled separately by `select_bass`).
fn top_level_note_ids(t: &AbcTree, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    collect_top_level_notes(t, id, &mut out);
    out
}

fn collect_top_level_notes(t: &AbcTree, id: NodeId, out: &mut Vec<NodeId>) {
    match t.arena.get(id) {
        Node::Note { .. } => out.push(id),
        Node::Chord { .. } => {}
        _ => {
            for child in t.children(id) {
                collect_top_level_notes(t, child, out);
            }
        }
    }
}

/// `@V:id` — all music-code nodes inside the system(s) tagged with voice
/// `id`.
pub fn select_voice(tree: &SharedTree, voice_id: &str) -> Selection {
    let t = tree.borrow();
    let mut ids = HashSet::new();
    t.walk(|id, node| {
        if let Node::System { voice: Some(v), elements, .. } = node {
            if v == voice_id {
                ids.insert(id);
                for e in elements {
                    ids.insert(*e);
                }
            }
        }
    });
    drop(t);
    Selection::new(tree.clone(), ids)
}

/// `@M:start-end` — all music-code nodes in bars `start..=end`, 1-based
/// inclusive, counting barlines across the whole tune body in document
/// order.
pub fn select_bar_range(tree: &SharedTree, start: u32, end: u32) -> Selection {
    let t = tree.borrow();
    let mut ids = HashSet::new();

    if let Node::FileStructure { tunes, .. } = t.root_node() {
        for tune_id in tunes.clone() {
            if let Node::Tune { body: Some(body_id), .. } = t.arena.get(tune_id) {
                let mut bar = 1u32;
                walk_music_in_order(&t, *body_id, &mut |id, node| {
                    if bar >= start && bar <= end {
                        ids.insert(id);
                    }
                    if node.is_barline() {
                        bar += 1;
                    }
                });
            }
        }
    }

    drop(t);
    Selection::new(tree.clone(), ids)
}

fn walk_music_in_order(t: &AbcTree, id: NodeId, visit: &mut impl FnMut(NodeId, &Node)) {
    let node = t.arena.get(id);
    visit(id, node);
    for child in t.children(id) {
        walk_music_in_order(t, child, visit);
    }
}

/// Location selector: all nodes whose span intersects the given 1-based
/// user-visible line/column range in the tree's own source.
pub fn select_location(
    tree: &SharedTree,
    line: u32,
    col: Option<u32>,
    end_line: Option<u32>,
    end_col: Option<u32>,
) -> Selection {
    let t = tree.borrow();
    let mut ids = HashSet::new();
    t.walk(|id, node| {
        if node.span().intersects_user_range(line, col, end_line, end_col) {
            ids.insert(id);
        }
    });
    drop(t);
    Selection::new(tree.clone(), ids)
}

/// Narrows `sel` to the `Note` nodes reachable from its selected nodes
/// (each selected node itself, plus its descendants) — used for nested
/// updates like `@chords |= (@notes |= transpose n)` where the inner
/// selector must only reach notes inside the already-selected chords,
/// not every note in the tree.
pub fn select_notes_from_selection(sel: &Selection) -> Selection {
    let t = sel.tree.borrow();
    let mut ids = HashSet::new();
    for root in sel.selected.iter().copied() {
        collect_matching(&t, root, &mut ids, |node, t| node.is_real_pitch_note(&t.arena));
    }
    drop(t);
    Selection::new(sel.tree.clone(), ids)
}

/// Narrows `sel` to the `Chord` nodes reachable from its selected nodes,
/// same rationale as [`select_notes_from_selection`].
pub fn select_chords_from_selection(sel: &Selection) -> Selection {
    let t = sel.tree.borrow();
    let mut ids = HashSet::new();
    for root in sel.selected.iter().copied() {
        collect_matching(&t, root, &mut ids, |node, _| node.is_chord());
    }
    drop(t);
    Selection::new(sel.tree.clone(), ids)
}

/// Collects every id in `id`'s subtree (`id` included) matching `pred`.
fn collect_matching(t: &AbcTree, id: NodeId, out: &mut HashSet<NodeId>, pred: impl Fn(&Node, &AbcTree) -> bool + Copy) {
    if pred(t.arena.get(id), t) {
        out.insert(id);
    }
    for child in t.children(id) {
        collect_matching(t, child, out, pred);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::parser::parse;
    use crate::context::SourceContext;

    fn tree_of(src: &str) -> SharedTree {
        let mut ctx = SourceContext::new(src);
        Rc::new(RefCell::new(parse(&mut ctx)))
    }

    #[test]
    fn notes_excludes_rests() {
        let tree = tree_of("X:1\nK:C\nCzDz|\n");
        let sel = select_notes(&tree);
        assert_eq!(sel.selected.len(), 2);
    }

    #[test]
    fn chords_selects_chord_nodes() {
        let tree = tree_of("X:1\nK:C\n[CEG]D|\n");
        let sel = select_chords(&tree);
        assert_eq!(sel.selected.len(), 1);
    }

    #[test]
    fn bass_picks_lowest_note_in_chord() {
        let tree = tree_of("X:1\nK:C\n[CEG]|\n");
        let sel = select_bass(&tree);
        assert_eq!(sel.selected.len(), 1);
        let t = tree.borrow();
        let id = *sel.selected.iter().next().unwrap();
        let Node::Note { pitch, .. } = t.arena.get(id) else { panic!("expected note") };
        let Node::PitchNode(p) = t.arena.get(*pitch) else { panic!("expected pitch") };
        assert_eq!(p.to_midi(), 60); // C4
    }

    #[test]
    fn voice_selector_scopes_to_matching_systems() {
        let tree = tree_of("X:1\nK:C\nV:A\nV:B\nK:C\nV:A\nCDEF|\nV:B\nGABc|\n");
        let sel = select_voice(&tree, "A");
        assert!(!sel.is_empty());
    }

    #[test]
    fn location_selector_finds_node_at_position() {
        let tree = tree_of("X:1\nK:C\nCDEF|\n");
        // Line 3 (1-based) is the music line; column 1 is the `C`.
        let sel = select_location(&tree, 3, Some(1), None, None);
        assert!(!sel.is_empty());
    }

    #[test]
    fn notes_from_selection_stays_within_selected_chords() {
        let tree = tree_of("X:1\nK:C\n[CE]D|\n");
        let chords = select_chords(&tree);
        assert_eq!(chords.selected.len(), 1);

        let notes = select_notes_from_selection(&chords);
        // Only the chord's own two notes, not the loose `D` beside it.
        assert_eq!(notes.selected.len(), 2);

        let t = tree.borrow();
        let loose_d = select_notes(&tree).selected.into_iter().find(|id| {
            let Node::Note { pitch, .. } = t.arena.get(*id) else { return false };
            let Node::PitchNode(p) = t.arena.get(*pitch) else { return false };
            p.to_midi() == 62
        });
        drop(t);
        let loose_d = loose_d.expect("loose D note should exist");
        assert!(!notes.selected.contains(&loose_d));
    }

    #[test]
    fn chords_from_selection_narrows_to_chords_within_the_given_nodes() {
        let tree = tree_of("X:1\nK:C\n[CE][GB]|\n");
        let all = select_all(&tree);
        let chords = select_chords_from_selection(&all);
        assert_eq!(chords.selected.len(), 2);
    }
}
