//! The ABC tree: a polymorphic, arena-backed node graph.
//!
//! Source languages with deep class hierarchies tend to grow a visitor per
//! concern; here the tree is instead a flat arena of tagged [`Node`]
//! variants addressed by [`NodeId`]. This gives transforms and selections
//! (`Vec<NodeId>` subsets of the same arena) cheap, shared access without
//! needing `Rc`/`RefCell` or a visitor trait per operation — `walk` and
//! `walk_mut` are plain free functions instead.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::abc::pitch::{Accidental, NoteLetter};
use crate::position::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct Pitch {
    pub alteration: Option<Accidental>,
    pub letter: NoteLetter,
    /// Number of `'` (positive) or `,` (negative) octave marks.
    pub octave_marks: i32,
    /// `true` for a lowercase ABC letter (register baseline octave 5).
    pub lowercase: bool,
    pub span: Span,
}

impl Pitch {
    /// Absolute octave number (4 = ABC uppercase unmarked, 5 = lowercase unmarked).
    pub fn octave(&self) -> i32 {
        (if self.lowercase { 5 } else { 4 }) + self.octave_marks
    }

    pub fn to_resolved(&self) -> crate::abc::pitch::ResolvedPitch {
        crate::abc::pitch::ResolvedPitch {
            letter: self.letter,
            accidental: self.alteration.unwrap_or(Accidental::Natural),
            octave: self.octave(),
        }
    }

    pub fn to_midi(&self) -> u8 {
        self.to_resolved().to_midi()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rhythm {
    pub numerator: Option<String>,
    pub separator: Option<String>,
    pub denominator: Option<String>,
    /// Run of `>` (positive) or `<` (negative) broken-rhythm markers.
    pub broken: i32,
    pub span: Span,
}

impl Rhythm {
    /// The rhythm multiplier over the tune's unit note length, reduced to
    /// lowest terms so e.g. `2/4` and `1/2` compare equal, defaulting to
    /// `1/1` when no explicit multiplier is given.
    pub fn multiplier(&self) -> Rational64 {
        let has_slash_only = self.separator.is_some() && self.numerator.is_none() && self.denominator.is_none();
        if has_slash_only {
            let halvings = self.separator.as_ref().map(|s| s.len()).unwrap_or(1) as u32;
            return Rational64::new(1, 2i64.pow(halvings));
        }
        let n: i64 = self.numerator.as_deref().and_then(|s| s.parse().ok()).unwrap_or(1);
        let d: i64 = self.denominator.as_deref().and_then(|s| s.parse().ok()).filter(|d| *d != 0).unwrap_or(1);
        Rational64::new(n, d)
    }
}

/// A parsed info-line header value, keyed by the line's letter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedInfo {
    Key { tonic: NoteLetter, accidental: Accidental, mode: String },
    Meter { numerator: u32, denominator: u32 },
    NoteLength(Rational64),
    Voice(VoiceDef),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceDef {
    pub id: String,
    pub name: Option<String>,
}

/// A single ABC tree node. All nodes own their children; a node's span is
/// the union of its children's spans (enforced by the constructors in
/// `parser.rs`, not by this type itself).
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    FileStructure { header: Option<NodeId>, tunes: Vec<NodeId>, span: Span },
    FileHeader { text: String, span: Span },
    Tune { header: NodeId, body: Option<NodeId>, span: Span },
    TuneHeader { info_lines: Vec<NodeId>, span: Span },
    InfoLine { key: String, value: String, parsed: Option<ParsedInfo>, span: Span },
    TuneBody { systems: Vec<NodeId>, span: Span },
    /// `voice` is the `V:` id governing this system, when the tune declares
    /// voices; `None` for a single-voice (or not-yet-voice-tagged) tune.
    System { elements: Vec<NodeId>, voice: Option<String>, span: Span },
    Note { pitch: NodeId, rhythm: Option<NodeId>, tie: bool, span: Span },
    RestNode { rhythm: Option<NodeId>, span: Span },
    PitchNode(Pitch),
    RhythmNode(Rhythm),
    Chord { contents: Vec<NodeId>, rhythm: Option<NodeId>, tie: bool, span: Span },
    Beam { contents: Vec<NodeId>, span: Span },
    GraceGroup { notes: Vec<NodeId>, is_acciaccatura: bool, span: Span },
    BarLine { text: String, repeat_numbers: Vec<String>, span: Span },
    Annotation { text: String, span: Span },
    Decoration { text: String, span: Span },
    Symbol { text: String, span: Span },
    InlineField { key: String, value: String, span: Span },
    NthRepeat { text: String, span: Span },
    MultiMeasureRest { count: u32, span: Span },
    YSpacer { span: Span },
    Tuplet { p: u32, q: Option<u32>, r: Option<u32>, contents: Vec<NodeId>, span: Span },
    VoiceOverlay { contents: Vec<NodeId>, span: Span },
    OverlayMarker { span: Span },
    Comment { text: String, span: Span },
    StyleSheetDirective { text: String, span: Span },
    Whitespace { text: String, span: Span },
    ErrorExpr { message: String, raw_text: String, partial: Option<NodeId>, span: Span },
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::FileStructure { span, .. }
            | Node::FileHeader { span, .. }
            | Node::Tune { span, .. }
            | Node::TuneHeader { span, .. }
            | Node::InfoLine { span, .. }
            | Node::TuneBody { span, .. }
            | Node::System { span, .. }
            | Node::Note { span, .. }
            | Node::RestNode { span, .. }
            | Node::Chord { span, .. }
            | Node::Beam { span, .. }
            | Node::GraceGroup { span, .. }
            | Node::BarLine { span, .. }
            | Node::Annotation { span, .. }
            | Node::Decoration { span, .. }
            | Node::Symbol { span, .. }
            | Node::InlineField { span, .. }
            | Node::NthRepeat { span, .. }
            | Node::MultiMeasureRest { span, .. }
            | Node::YSpacer { span, .. }
            | Node::Tuplet { span, .. }
            | Node::VoiceOverlay { span, .. }
            | Node::OverlayMarker { span }
            | Node::Comment { span, .. }
            | Node::StyleSheetDirective { span, .. }
            | Node::Whitespace { span, .. }
            | Node::ErrorExpr { span, .. } => *span,
            Node::PitchNode(p) => p.span,
            Node::RhythmNode(r) => r.span,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, Node::Note { .. })
    }

    pub fn is_real_pitch_note(&self, arena: &Arena) -> bool {
        match self {
            Node::Note { pitch, .. } => matches!(arena.get(*pitch), Node::PitchNode(_)),
            _ => false,
        }
    }

    pub fn is_chord(&self) -> bool {
        matches!(self, Node::Chord { .. })
    }

    pub fn is_beam(&self) -> bool {
        matches!(self, Node::Beam { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Node::ErrorExpr { .. })
    }

    pub fn is_barline(&self) -> bool {
        matches!(self, Node::BarLine { .. })
    }

    pub fn is_whitespace_or_eol(&self) -> bool {
        matches!(self, Node::Whitespace { .. })
    }

    /// `Note`/`Chord` nodes are "beamable"; everything else interrupts beam
    /// formation when it appears between two of them.
    pub fn is_beamable(&self) -> bool {
        matches!(self, Node::Note { .. } | Node::Chord { .. })
    }
}

/// An arena of ABC tree nodes, addressed by stable [`NodeId`]s so a
/// [`Selection`](crate::abct::selectors::Selection) can reference a subset
/// without copying the tree.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }
}

/// A parsed ABC document: the node arena plus the root [`NodeId`].
#[derive(Debug, Clone)]
pub struct AbcTree {
    pub arena: Arena,
    pub root: NodeId,
    /// `V:` id -> declared voice order index, used by the parser's system
    /// grouping and by the `@V:id` selector.
    pub voice_order: HashMap<String, usize>,
}

impl AbcTree {
    pub fn root_node(&self) -> &Node {
        self.arena.get(self.root)
    }

    /// All direct and indirect children of `id`, in document order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.arena.get(id) {
            Node::FileStructure { header, tunes, .. } => {
                let mut v: Vec<NodeId> = header.into_iter().copied().collect();
                v.extend(tunes.iter().copied());
                v
            }
            Node::Tune { header, body, .. } => {
                let mut v = vec![*header];
                v.extend(body.iter().copied());
                v
            }
            Node::TuneHeader { info_lines, .. } => info_lines.clone(),
            Node::TuneBody { systems, .. } => systems.clone(),
            Node::System { elements, .. } => elements.clone(),
            Node::Note { pitch, rhythm, .. } => {
                let mut v = vec![*pitch];
                v.extend(rhythm.iter().copied());
                v
            }
            Node::RestNode { rhythm, .. } => rhythm.iter().copied().collect(),
            Node::Chord { contents, rhythm, .. } => {
                let mut v = contents.clone();
                v.extend(rhythm.iter().copied());
                v
            }
            Node::Beam { contents, .. } => contents.clone(),
            Node::GraceGroup { notes, .. } => notes.clone(),
            Node::Tuplet { contents, .. } => contents.clone(),
            Node::VoiceOverlay { contents, .. } => contents.clone(),
            _ => Vec::new(),
        }
    }

    /// Depth-first walk over every node reachable from the root.
    pub fn walk(&self, mut visit: impl FnMut(NodeId, &Node)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            visit(id, self.arena.get(id));
            let mut kids = self.children(id);
            kids.reverse();
            stack.extend(kids);
        }
    }

    /// Same traversal as [`walk`](Self::walk) but with mutable node access.
    /// Because children are recomputed from the (possibly just-mutated)
    /// parent on each step, mutations that change a node's child list take
    /// effect for the remainder of the walk.
    pub fn walk_mut(&mut self, mut visit: impl FnMut(NodeId, &mut Arena)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            visit(id, &mut self.arena);
            let mut kids = self.children(id);
            kids.reverse();
            stack.extend(kids);
        }
    }

    pub fn all_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(|id, _| out.push(id));
        out
    }
}
