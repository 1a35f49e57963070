//! Recursive-descent parser producing an [`AbcTree`] with error recovery.
//!
//! Two contexts drive the grammar: a *header* context (info lines up to and
//! including `K:`) and a *body* context (systems of music code). Beam
//! detection and tuplet grouping happen inline while walking the body's
//! token stream rather than as a later tree-rewrite pass.

use std::collections::HashMap;

use crate::abc::pitch::{Accidental, NoteLetter};
use crate::abc::scanner::{scan, AbcToken, AbcTokenKind};
use crate::abc::tree::{AbcTree, Arena, Node, NodeId, ParsedInfo, Pitch, Rhythm, VoiceDef};
use crate::context::SourceContext;
use crate::error::Origin;
use crate::position::{Position, Span};

pub fn parse(ctx: &mut SourceContext) -> AbcTree {
    let tokens = scan(ctx);
    let mut parser = Parser::new(tokens, ctx);
    parser.parse_file()
}

struct Parser<'a> {
    tokens: Vec<AbcToken>,
    pos: usize,
    arena: Arena,
    ctx: &'a mut SourceContext,
    voice_order: HashMap<String, usize>,
}

const RECOVERY_KINDS: &[AbcTokenKind] = &[AbcTokenKind::Eol, AbcTokenKind::BarLine, AbcTokenKind::InfHdr, AbcTokenKind::Eof];

impl<'a> Parser<'a> {
    fn new(tokens: Vec<AbcToken>, ctx: &'a mut SourceContext) -> Self {
        Self {
            tokens,
            pos: 0,
            arena: Arena::new(),
            ctx,
            voice_order: HashMap::new(),
        }
    }

    fn peek(&self) -> &AbcToken {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> AbcTokenKind {
        self.peek().kind
    }

    fn at_end(&self) -> bool {
        self.peek_kind() == AbcTokenKind::Eof
    }

    fn advance(&mut self) -> AbcToken {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn pos_of(&self, tok: &AbcToken) -> Position {
        tok.start()
    }

    fn end_of(&self, tok: &AbcToken) -> Position {
        tok.end()
    }

    fn synchronize(&mut self) -> String {
        let mut text = String::new();
        while !RECOVERY_KINDS.contains(&self.peek_kind()) {
            text.push_str(&self.advance().lexeme);
        }
        text
    }

    fn error_node(&mut self, message: impl Into<String>, start: Position, raw_text: String) -> NodeId {
        let end = self.peek().start();
        let span = Span::new(start, end.max(start));
        let message = message.into();
        log::debug!("parser: recovery at {:?}: {}", start, message);
        self.ctx.errors.report("parse_error", span, message.clone(), Origin::Parser);
        self.arena.alloc(Node::ErrorExpr { message, raw_text, partial: None, span })
    }

    // ---------------------------------------------------------------- file

    fn parse_file(&mut self) -> AbcTree {
        let start = self.peek().start();
        let mut header = None;
        let mut preamble = String::new();
        while !self.at_end() && !self.at_tune_start() {
            let tok = self.advance();
            preamble.push_str(&tok.lexeme);
        }
        if !preamble.trim().is_empty() {
            let span = Span::new(start, self.peek().start());
            header = Some(self.arena.alloc(Node::FileHeader { text: preamble, span }));
        }

        let mut tunes = Vec::new();
        while !self.at_end() {
            if self.at_tune_start() {
                let tune = self.parse_tune();
                tunes.push(tune);
            } else {
                // Blank separator lines between tunes.
                self.advance();
            }
        }

        let end = self.peek().start();
        let span = Span::new(start, end);
        let root = self.arena.alloc(Node::FileStructure { header, tunes, span });

        AbcTree {
            arena: std::mem::take(&mut self.arena),
            root,
            voice_order: std::mem::take(&mut self.voice_order),
        }
    }

    fn at_tune_start(&self) -> bool {
        self.peek_kind() == AbcTokenKind::InfHdr && self.peek().lexeme.starts_with('X')
    }

    // --------------------------------------------------------------- tune

    fn parse_tune(&mut self) -> NodeId {
        let start = self.peek().start();
        let header = self.parse_tune_header();
        let body = if self.at_body_content() { Some(self.parse_tune_body()) } else { None };
        let end = self.tokens.get(self.pos.saturating_sub(1)).map(|t| t.end()).unwrap_or(start);
        let span = Span::new(start, end);
        self.arena.alloc(Node::Tune { header, body, span })
    }

    fn at_body_content(&self) -> bool {
        !self.at_end() && self.peek_kind() != AbcTokenKind::InfHdr
    }

    fn parse_tune_header(&mut self) -> NodeId {
        let start = self.peek().start();
        let mut info_lines = Vec::new();
        loop {
            match self.peek_kind() {
                AbcTokenKind::InfHdr => {
                    let is_key_line = self.peek().lexeme.starts_with('K');
                    let line = self.parse_info_line();
                    info_lines.push(line);
                    if is_key_line {
                        break;
                    }
                }
                AbcTokenKind::Comment => info_lines.push(self.parse_comment()),
                AbcTokenKind::StylesheetDirective => info_lines.push(self.parse_stylesheet_directive()),
                AbcTokenKind::Eol => {
                    self.advance();
                }
                _ => break,
            }
            if self.at_end() {
                break;
            }
        }
        let end = self.tokens.get(self.pos.saturating_sub(1)).map(|t| t.end()).unwrap_or(start);
        let span = Span::new(start, end);
        self.arena.alloc(Node::TuneHeader { info_lines, span })
    }

    fn parse_info_line(&mut self) -> NodeId {
        let key_tok = self.advance();
        let start = self.pos_of(&key_tok);
        let key = key_tok.lexeme.clone();

        let mut value = String::new();
        let mut voice_id = None;
        while matches!(self.peek_kind(), AbcTokenKind::VxId | AbcTokenKind::VxK | AbcTokenKind::Eql | AbcTokenKind::Ws | AbcTokenKind::VxV) {
            let tok = self.advance();
            if tok.kind == AbcTokenKind::VxId && voice_id.is_none() {
                voice_id = Some(tok.lexeme.clone());
            }
            value.push_str(&tok.lexeme);
        }

        let parsed = parse_info_value(&key, &value, voice_id.clone());
        if let Some(ParsedInfo::Voice(ref v)) = parsed {
            let next_index = self.voice_order.len();
            self.voice_order.entry(v.id.clone()).or_insert(next_index);
        }

        let end = self.peek().start();
        if self.peek_kind() == AbcTokenKind::Eol {
            self.advance();
        }
        let span = Span::new(start, end);
        self.arena.alloc(Node::InfoLine { key, value, parsed, span })
    }

    fn parse_comment(&mut self) -> NodeId {
        let tok = self.advance();
        let span = tok.span();
        if self.peek_kind() == AbcTokenKind::Eol {
            self.advance();
        }
        self.arena.alloc(Node::Comment { text: tok.lexeme, span })
    }

    fn parse_stylesheet_directive(&mut self) -> NodeId {
        let tok = self.advance();
        let span = tok.span();
        if self.peek_kind() == AbcTokenKind::Eol {
            self.advance();
        }
        self.arena.alloc(Node::StyleSheetDirective { text: tok.lexeme, span })
    }

    // --------------------------------------------------------------- body

    fn parse_tune_body(&mut self) -> NodeId {
        let start = self.peek().start();
        let mut systems = Vec::new();
        let mut current: Vec<NodeId> = Vec::new();
        let mut current_start = start;
        let mut current_voice: Option<String> = None;
        let mut last_voice_index: Option<usize> = None;

        loop {
            if self.at_end() || self.at_tune_start() || self.at_blank_line() {
                break;
            }

            let line_voice = self.peek_line_voice();
            if let (Some((idx, id)), Some(last)) = (line_voice.clone(), last_voice_index) {
                if !self.ctx.parser_flags.linear && idx <= last && !current.is_empty() {
                    let end = self.tokens.get(self.pos.saturating_sub(1)).map(|t| t.end()).unwrap_or(current_start);
                    let span = Span::new(current_start, end);
                    systems.push(self.arena.alloc(Node::System {
                        elements: std::mem::take(&mut current),
                        voice: current_voice.clone(),
                        span,
                    }));
                    current_start = self.peek().start();
                    current_voice = Some(id);
                }
            }
            if let Some((idx, id)) = line_voice {
                last_voice_index = Some(idx);
                if current_voice.is_none() {
                    current_voice = Some(id);
                }
            }

            self.parse_body_line(&mut current);
        }

        if !current.is_empty() {
            let end = self.tokens.get(self.pos.saturating_sub(1)).map(|t| t.end()).unwrap_or(current_start);
            let span = Span::new(current_start, end);
            systems.push(self.arena.alloc(Node::System { elements: current, voice: current_voice, span }));
        }

        let end = self.tokens.get(self.pos.saturating_sub(1)).map(|t| t.end()).unwrap_or(start);
        let span = Span::new(start, end);
        self.arena.alloc(Node::TuneBody { systems, span })
    }

    fn at_blank_line(&self) -> bool {
        self.peek_kind() == AbcTokenKind::Eol
            && matches!(self.tokens.get(self.pos + 1).map(|t| t.kind), Some(AbcTokenKind::Eol) | Some(AbcTokenKind::Eof) | None)
    }

    fn peek_line_voice(&self) -> Option<(usize, String)> {
        if self.peek_kind() != AbcTokenKind::InfHdr || !self.peek().lexeme.starts_with('V') {
            return None;
        }
        let id_tok = self.tokens.get(self.pos + 1)?;
        if id_tok.kind != AbcTokenKind::VxId {
            return None;
        }
        let idx = *self.voice_order.get(&id_tok.lexeme)?;
        Some((idx, id_tok.lexeme.clone()))
    }

    /// One physical line within the body: an info line, a comment, a
    /// stylesheet directive, or a run of music code.
    fn parse_body_line(&mut self, out: &mut Vec<NodeId>) {
        match self.peek_kind() {
            AbcTokenKind::InfHdr => out.push(self.parse_info_line()),
            AbcTokenKind::Comment => out.push(self.parse_comment()),
            AbcTokenKind::StylesheetDirective => out.push(self.parse_stylesheet_directive()),
            AbcTokenKind::Eol => {
                let tok = self.advance();
                out.push(self.arena.alloc(Node::Whitespace { text: tok.lexeme, span: tok.span() }));
            }
            _ => self.parse_music_line(out),
        }
    }

    /// Parses one physical line of music code, performing beam grouping
    /// inline, and appends its elements (plus the trailing EOL, if any) to
    /// `out`.
    fn parse_music_line(&mut self, out: &mut Vec<NodeId>) {
        let mut beam_run: Vec<NodeId> = Vec::new();
        let mut beam_count = 0usize;

        loop {
            match self.peek_kind() {
                AbcTokenKind::Eol | AbcTokenKind::Eof => break,
                AbcTokenKind::LineContinuation => {
                    let tok = self.advance();
                    out.push(self.arena.alloc(Node::Whitespace { text: tok.lexeme, span: tok.span() }));
                    if self.peek_kind() == AbcTokenKind::Eol {
                        let eol = self.advance();
                        out.push(self.arena.alloc(Node::Whitespace { text: eol.lexeme, span: eol.span() }));
                    }
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    continue;
                }
                AbcTokenKind::LeftParenNumber => {
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    let tuplet = self.parse_tuplet();
                    out.push(tuplet);
                    continue;
                }
                AbcTokenKind::NoteLetter | AbcTokenKind::Accidental | AbcTokenKind::Rest => {
                    let id = self.parse_note_or_rest();
                    beam_run.push(id);
                    beam_count += 1;
                    continue;
                }
                AbcTokenKind::ChrdLeftBrkt => {
                    let id = self.parse_chord();
                    beam_run.push(id);
                    beam_count += 1;
                    continue;
                }
                AbcTokenKind::GrcGrpLeftBrace => {
                    let id = self.parse_grace_group();
                    if beam_run.is_empty() {
                        out.push(id);
                    } else {
                        beam_run.push(id);
                    }
                    continue;
                }
                AbcTokenKind::Annotation | AbcTokenKind::Symbol | AbcTokenKind::Decoration | AbcTokenKind::YSpacer => {
                    let id = self.parse_filler();
                    if beam_run.is_empty() {
                        out.push(id);
                    } else {
                        beam_run.push(id);
                    }
                    continue;
                }
                AbcTokenKind::BarLine => {
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    out.push(self.parse_barline());
                    continue;
                }
                AbcTokenKind::NthRepeatMarker => {
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    let tok = self.advance();
                    out.push(self.arena.alloc(Node::NthRepeat { text: tok.lexeme, span: tok.span() }));
                    continue;
                }
                AbcTokenKind::InlineFieldOpen => {
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    out.push(self.parse_inline_field());
                    continue;
                }
                AbcTokenKind::Ws => {
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    let tok = self.advance();
                    out.push(self.arena.alloc(Node::Whitespace { text: tok.lexeme, span: tok.span() }));
                    continue;
                }
                AbcTokenKind::Ampersand => {
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    let tok = self.advance();
                    out.push(self.arena.alloc(Node::OverlayMarker { span: tok.span() }));
                    continue;
                }
                _ => {
                    self.flush_beam(out, &mut beam_run, &mut beam_count);
                    let start = self.peek().start();
                    let raw_text = self.synchronize();
                    let id = self.error_node("unexpected token in music code", start, raw_text);
                    out.push(id);
                    continue;
                }
            }
        }

        self.flush_beam(out, &mut beam_run, &mut beam_count);
        if self.peek_kind() == AbcTokenKind::Eol {
            let tok = self.advance();
            out.push(self.arena.alloc(Node::Whitespace { text: tok.lexeme, span: tok.span() }));
        }
    }

    /// Closes out a pending run of beamable elements: wraps it as a single
    /// [`Node::Beam`] when it spans two or more notes/chords, otherwise
    /// emits its members directly (a lone note is never beamed alone, per
    /// the invariant that a beam is formed only by the parser between
    /// *adjacent* beamable elements).
    fn flush_beam(&mut self, out: &mut Vec<NodeId>, beam_run: &mut Vec<NodeId>, beam_count: &mut usize) {
        if beam_run.is_empty() {
            return;
        }
        if *beam_count >= 2 {
            let span = self.span_of_all(beam_run);
            let id = self.arena.alloc(Node::Beam { contents: std::mem::take(beam_run), span });
            out.push(id);
        } else {
            out.extend(beam_run.drain(..));
        }
        *beam_count = 0;
    }

    fn span_of_all(&self, ids: &[NodeId]) -> Span {
        ids.iter()
            .map(|id| self.arena.get(*id).span())
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default()
    }

    fn parse_tuplet(&mut self) -> NodeId {
        let tok = self.advance();
        let start = self.pos_of(&tok);
        let (p, q, r) = parse_tuplet_spec(&tok.lexeme);

        let mut contents = Vec::new();
        let mut collected = 0u32;
        while collected < p {
            match self.peek_kind() {
                AbcTokenKind::NoteLetter | AbcTokenKind::Accidental | AbcTokenKind::Rest => {
                    contents.push(self.parse_note_or_rest());
                    collected += 1;
                }
                AbcTokenKind::ChrdLeftBrkt => {
                    contents.push(self.parse_chord());
                    collected += 1;
                }
                AbcTokenKind::GrcGrpLeftBrace => contents.push(self.parse_grace_group()),
                AbcTokenKind::Annotation | AbcTokenKind::Symbol | AbcTokenKind::Decoration => {
                    contents.push(self.parse_filler())
                }
                AbcTokenKind::Ws => {
                    let t = self.advance();
                    contents.push(self.arena.alloc(Node::Whitespace { text: t.lexeme, span: t.span() }));
                }
                _ => break,
            }
        }

        let end = contents.last().map(|id| self.arena.get(*id).span().end).unwrap_or(self.end_of(&tok));
        let span = Span::new(start, end);
        self.arena.alloc(Node::Tuplet { p, q, r, contents, span })
    }

    fn parse_note_or_rest(&mut self) -> NodeId {
        if self.peek_kind() == AbcTokenKind::Rest {
            let tok = self.advance();
            let start = self.pos_of(&tok);
            let is_multi_measure = tok.lexeme.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
            if is_multi_measure && self.peek_kind() == AbcTokenKind::RhyNumer {
                let count_tok = self.advance();
                let count: u32 = count_tok.lexeme.parse().unwrap_or(1);
                let span = Span::new(start, count_tok.end());
                return self.arena.alloc(Node::MultiMeasureRest { count, span });
            }
            let rhythm = self.try_parse_rhythm();
            let end = rhythm.map(|r| self.arena.get(r).span().end).unwrap_or(self.end_of(&tok));
            let span = Span::new(start, end);
            return self.arena.alloc(Node::RestNode { rhythm, span });
        }

        let start = self.peek().start();
        let pitch = self.parse_pitch();
        let pitch_span = self.arena.get(pitch).span();
        let rhythm = self.try_parse_rhythm();
        let tie = if self.peek_kind() == AbcTokenKind::Tie {
            self.advance();
            true
        } else {
            false
        };
        let end = rhythm.map(|r| self.arena.get(r).span().end).unwrap_or(pitch_span.end);
        let span = Span::new(start, end);
        self.arena.alloc(Node::Note { pitch, rhythm, tie, span })
    }

    fn parse_pitch(&mut self) -> NodeId {
        let start = self.peek().start();
        let alteration = if self.peek_kind() == AbcTokenKind::Accidental {
            let tok = self.advance();
            Some(parse_accidental(&tok.lexeme))
        } else {
            None
        };

        let letter_tok = if self.peek_kind() == AbcTokenKind::NoteLetter {
            self.advance()
        } else {
            let end = self.peek().start();
            self.ctx.errors.report(
                "expected_note_letter",
                Span::new(start, end),
                "expected a note letter",
                Origin::Parser,
            );
            // Synthesize a placeholder so callers can keep going.
            AbcToken {
                kind: AbcTokenKind::NoteLetter,
                lexeme: "C".to_string(),
                literal: None,
                line: start.line,
                column: start.column,
                offset: start.offset,
                id: 0,
            }
        };
        let lowercase = letter_tok.lexeme.chars().next().map(|c| c.is_lowercase()).unwrap_or(false);
        let letter = NoteLetter::from_char(letter_tok.lexeme.chars().next().unwrap_or('C')).unwrap_or(NoteLetter::C);

        let mut octave_marks = 0;
        let mut end = letter_tok.end();
        if self.peek_kind() == AbcTokenKind::Octave {
            let tok = self.advance();
            end = tok.end();
            for c in tok.lexeme.chars() {
                octave_marks += if c == '\'' { 1 } else { -1 };
            }
        }

        let span = Span::new(start, end);
        self.arena.alloc(Node::PitchNode(Pitch { alteration, letter, octave_marks, lowercase, span }))
    }

    fn try_parse_rhythm(&mut self) -> Option<NodeId> {
        let has_numer = self.peek_kind() == AbcTokenKind::RhyNumer;
        let has_sep = self.peek_kind() == AbcTokenKind::RhySep;
        let has_broken = self.peek_kind() == AbcTokenKind::Broken;
        if !has_numer && !has_sep && !has_broken {
            return None;
        }

        let start = self.peek().start();
        let numerator = if self.peek_kind() == AbcTokenKind::RhyNumer {
            Some(self.advance().lexeme)
        } else {
            None
        };
        let separator = if self.peek_kind() == AbcTokenKind::RhySep {
            Some(self.advance().lexeme)
        } else {
            None
        };
        let denominator = if self.peek_kind() == AbcTokenKind::RhyDenom {
            Some(self.advance().lexeme)
        } else {
            None
        };
        let mut broken = 0;
        let mut end = self.tokens[self.pos.saturating_sub(1)].end();
        if self.peek_kind() == AbcTokenKind::Broken {
            let tok = self.advance();
            end = tok.end();
            for c in tok.lexeme.chars() {
                broken += if c == '>' { 1 } else { -1 };
            }
        }

        let span = Span::new(start, end);
        Some(self.arena.alloc(Node::RhythmNode(Rhythm { numerator, separator, denominator, broken, span })))
    }

    fn parse_chord(&mut self) -> NodeId {
        let open = self.advance();
        let start = self.pos_of(&open);
        let mut contents = Vec::new();
        loop {
            match self.peek_kind() {
                AbcTokenKind::ChrdRightBrkt | AbcTokenKind::Eol | AbcTokenKind::Eof => break,
                AbcTokenKind::NoteLetter | AbcTokenKind::Accidental | AbcTokenKind::Rest => {
                    contents.push(self.parse_note_or_rest())
                }
                AbcTokenKind::Annotation => contents.push(self.parse_filler()),
                _ => {
                    let tok = self.advance();
                    contents.push(self.arena.alloc(Node::Whitespace { text: tok.lexeme, span: tok.span() }));
                }
            }
        }
        let mut end = self.peek().start();
        if self.peek_kind() == AbcTokenKind::ChrdRightBrkt {
            let close = self.advance();
            end = close.end();
        } else {
            self.ctx.errors.report(
                "unclosed_chord",
                Span::new(start, end),
                "unclosed chord: expected `]`",
                Origin::Parser,
            );
        }
        let has_note = contents.iter().any(|id| self.arena.get(*id).is_note());
        if !has_note {
            self.ctx.errors.report(
                "empty_chord",
                Span::new(start, end),
                "a chord must contain at least one note",
                Origin::Parser,
            );
        }

        let rhythm = self.try_parse_rhythm();
        let tie = if self.peek_kind() == AbcTokenKind::Tie {
            self.advance();
            true
        } else {
            false
        };
        if let Some(r) = rhythm {
            end = self.arena.get(r).span().end;
        }
        let span = Span::new(start, end);
        self.arena.alloc(Node::Chord { contents, rhythm, tie, span })
    }

    fn parse_grace_group(&mut self) -> NodeId {
        let open = self.advance();
        let start = self.pos_of(&open);
        let is_acciaccatura = if self.peek_kind() == AbcTokenKind::GrcGrpSlsh {
            self.advance();
            true
        } else {
            false
        };
        let mut notes = Vec::new();
        loop {
            match self.peek_kind() {
                AbcTokenKind::GrcGrpRightBrace | AbcTokenKind::Eol | AbcTokenKind::Eof => break,
                AbcTokenKind::NoteLetter | AbcTokenKind::Accidental | AbcTokenKind::Rest => {
                    notes.push(self.parse_note_or_rest())
                }
                _ => {
                    self.advance();
                }
            }
        }
        let mut end = self.peek().start();
        if self.peek_kind() == AbcTokenKind::GrcGrpRightBrace {
            end = self.advance().end();
        }
        let span = Span::new(start, end);
        self.arena.alloc(Node::GraceGroup { notes, is_acciaccatura, span })
    }

    fn parse_filler(&mut self) -> NodeId {
        let tok = self.advance();
        let span = tok.span();
        match tok.kind {
            AbcTokenKind::Annotation => self.arena.alloc(Node::Annotation { text: tok.lexeme, span }),
            AbcTokenKind::Symbol => self.arena.alloc(Node::Symbol { text: tok.lexeme, span }),
            AbcTokenKind::Decoration => self.arena.alloc(Node::Decoration { text: tok.lexeme, span }),
            AbcTokenKind::YSpacer => self.arena.alloc(Node::YSpacer { span }),
            _ => self.arena.alloc(Node::Whitespace { text: tok.lexeme, span }),
        }
    }

    fn parse_barline(&mut self) -> NodeId {
        let tok = self.advance();
        let mut span = tok.span();
        let mut repeat_numbers = Vec::new();
        if self.peek_kind() == AbcTokenKind::RepeatDigit {
            let r = self.advance();
            span = span.union(&r.span());
            repeat_numbers.push(r.lexeme);
        }
        self.arena.alloc(Node::BarLine { text: tok.lexeme, repeat_numbers, span })
    }

    fn parse_inline_field(&mut self) -> NodeId {
        let open = self.advance();
        let start = self.pos_of(&open);
        let key = open.lexeme.trim_start_matches('[').to_string();
        let mut value = String::new();
        let mut end = open.end();
        if self.peek_kind() == AbcTokenKind::InlineFieldClose {
            let close = self.advance();
            end = close.end();
            value = close.lexeme.trim_end_matches(']').to_string();
        }
        let span = Span::new(start, end);
        self.arena.alloc(Node::InlineField { key, value, span })
    }
}

fn parse_accidental(lexeme: &str) -> Accidental {
    match lexeme {
        "^" => Accidental::Sharp,
        "^^" => Accidental::DoubleSharp,
        "_" => Accidental::Flat,
        "__" => Accidental::DoubleFlat,
        _ => Accidental::Natural,
    }
}

/// Parses a tuplet head lexeme like `(3`, `(3:2`, `(3::`, `(3::4`, `(3:2:4`.
fn parse_tuplet_spec(lexeme: &str) -> (u32, Option<u32>, Option<u32>) {
    let rest = lexeme.trim_start_matches('(');
    let parts: Vec<&str> = rest.split(':').collect();
    let p = parts.first().and_then(|s| s.parse().ok()).unwrap_or(3);
    let q = parts.get(1).and_then(|s| s.parse().ok());
    let r = parts.get(2).and_then(|s| s.parse().ok());
    (p, q, r)
}

/// Interprets an info-line's raw value text according to its key, producing
/// the typed [`ParsedInfo`] the spec calls for. Unknown or malformed values
/// fall back to [`ParsedInfo::Other`] rather than failing the parse.
fn parse_info_value(key: &str, value: &str, voice_id: Option<String>) -> Option<ParsedInfo> {
    let value = value.trim();
    match key.chars().next() {
        Some('K') => {
            let (tonic_str, mode) = split_key_mode(value);
            let (letter, accidental) = parse_tonic(tonic_str);
            Some(ParsedInfo::Key { tonic: letter, accidental, mode })
        }
        Some('M') => parse_meter(value).or(Some(ParsedInfo::Other(value.to_string()))),
        Some('L') => parse_fraction(value)
            .filter(|(_, d)| *d != 0)
            .map(|(n, d)| ParsedInfo::NoteLength(num_rational::Rational64::new(n, d)))
            .or(Some(ParsedInfo::Other(value.to_string()))),
        Some('V') => Some(ParsedInfo::Voice(VoiceDef {
            id: voice_id.unwrap_or_default(),
            name: extract_named_attr(value, "name"),
        })),
        _ => {
            if value.is_empty() {
                None
            } else {
                Some(ParsedInfo::Other(value.to_string()))
            }
        }
    }
}

fn split_key_mode(value: &str) -> (&str, String) {
    let value = value.trim();
    if let Some(idx) = value.find(' ') {
        (&value[..idx], value[idx..].trim().to_string())
    } else {
        // e.g. "Cmaj", "Dmix"; split on the first lowercase run after a
        // letter + optional accidental.
        let mut split_at = value.len();
        for (i, c) in value.char_indices() {
            if i > 0 && c.is_lowercase() {
                split_at = i;
                break;
            }
        }
        (&value[..split_at], value[split_at..].to_string())
    }
}

fn parse_tonic(s: &str) -> (NoteLetter, Accidental) {
    let mut chars = s.chars();
    let letter = chars.next().and_then(NoteLetter::from_char).unwrap_or(NoteLetter::C);
    let accidental = match chars.next() {
        Some('#') => Accidental::Sharp,
        Some('b') => Accidental::Flat,
        _ => Accidental::Natural,
    };
    (letter, accidental)
}

fn parse_meter(value: &str) -> Option<ParsedInfo> {
    match value {
        "C" => Some(ParsedInfo::Meter { numerator: 4, denominator: 4 }),
        "C|" => Some(ParsedInfo::Meter { numerator: 2, denominator: 2 }),
        _ => parse_fraction(value).map(|(n, d)| ParsedInfo::Meter { numerator: n as u32, denominator: d as u32 }),
    }
}

fn parse_fraction(value: &str) -> Option<(i64, i64)> {
    let (n, d) = value.split_once('/')?;
    Some((n.trim().parse().ok()?, d.trim().parse().ok()?))
}

fn extract_named_attr(value: &str, key: &str) -> Option<String> {
    for part in value.split_whitespace() {
        if let Some(rest) = part.strip_prefix(&format!("{key}=")) {
            return Some(rest.trim_matches('"').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::tree::Node;

    fn parse_src(src: &str) -> (AbcTree, SourceContext) {
        let mut ctx = SourceContext::new(src);
        let tree = parse(&mut ctx);
        (tree, ctx)
    }

    #[test]
    fn parses_minimal_tune() {
        let (tree, ctx) = parse_src("X:1\nT:Test\nK:C\nCDEF|\n");
        assert!(!ctx.errors.has_errors());
        if let Node::FileStructure { tunes, .. } = tree.root_node() {
            assert_eq!(tunes.len(), 1);
        } else {
            panic!("expected FileStructure root");
        }
    }

    #[test]
    fn adjacent_notes_form_a_beam() {
        let (tree, _ctx) = parse_src("X:1\nK:C\nCDEF|\n");
        let mut found_beam = false;
        tree.walk(|_, node| {
            if let Node::Beam { contents, .. } = node {
                assert_eq!(contents.len(), 4);
                found_beam = true;
            }
        });
        assert!(found_beam);
    }

    #[test]
    fn whitespace_breaks_beam() {
        let (tree, _ctx) = parse_src("X:1\nK:C\nCD EF|\n");
        let mut beams = 0;
        tree.walk(|_, node| {
            if matches!(node, Node::Beam { .. }) {
                beams += 1;
            }
        });
        assert_eq!(beams, 2);
    }

    #[test]
    fn lone_note_is_not_beamed() {
        let (tree, _ctx) = parse_src("X:1\nK:C\nC D E|\n");
        tree.walk(|_, node| {
            assert!(!matches!(node, Node::Beam { .. }));
        });
    }

    #[test]
    fn empty_chord_is_reported() {
        let (_tree, ctx) = parse_src("X:1\nK:C\n[] |\n");
        assert!(ctx.errors.has_errors());
    }

    #[test]
    fn tuplet_collects_its_notes() {
        let (tree, _ctx) = parse_src("X:1\nK:C\n(3CDE|\n");
        let mut found = false;
        tree.walk(|_, node| {
            if let Node::Tuplet { p, contents, .. } = node {
                assert_eq!(*p, 3);
                let note_count = contents
                    .iter()
                    .filter(|_| true)
                    .count();
                assert!(note_count >= 3);
                found = true;
            }
        });
        assert!(found);
    }

    #[test]
    fn voice_wraparound_starts_a_new_system() {
        let src = "X:1\nK:C\nV:A\nV:B\nK:C\nV:A\nCDEF|\nV:B\nGABc|\n";
        let (tree, _ctx) = parse_src(src);
        let mut systems = 0;
        tree.walk(|_, node| {
            if matches!(node, Node::TuneBody { .. }) {
                if let Node::TuneBody { systems: s, .. } = node {
                    systems = s.len();
                }
            }
        });
        assert_eq!(systems, 2);
    }

    #[test]
    fn linear_directive_disables_voice_wraparound_splitting() {
        let src = "%%abcls-parse linear\n\nX:1\nK:C\nV:A\nV:B\nK:C\nV:A\nCDEF|\nV:B\nGABc|\n";
        let (tree, ctx) = parse_src(src);
        assert!(ctx.parser_flags.linear);
        let mut systems = 0;
        tree.walk(|_, node| {
            if let Node::TuneBody { systems: s, .. } = node {
                systems = s.len();
            }
        });
        assert_eq!(systems, 1, "linear mode should keep the whole body in one system");
    }

    #[test]
    fn error_node_preserves_span_for_unexpected_token() {
        let (tree, ctx) = parse_src("X:1\nK:C\n)CDE|\n");
        assert!(ctx.errors.has_errors());
        let mut found_error = false;
        tree.walk(|_, node| {
            if matches!(node, Node::ErrorExpr { .. }) {
                found_error = true;
            }
        });
        assert!(found_error);
    }
}
