//! Pitch representation, MIDI conversion and key-aware respelling.
//!
//! Grounded on the degree/tonic lookup approach used elsewhere in this
//! codebase for scale-aware transposition: rather than doing raw semitone
//! arithmetic and always picking the same accidental, a target key's scale
//! degrees are used to choose the spelling closest to the surrounding
//! accidental context.

use serde::{Deserialize, Serialize};

/// A letter name independent of octave or accidental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteLetter {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl NoteLetter {
    pub const ORDER: [NoteLetter; 7] = [
        NoteLetter::C,
        NoteLetter::D,
        NoteLetter::E,
        NoteLetter::F,
        NoteLetter::G,
        NoteLetter::A,
        NoteLetter::B,
    ];

    /// Semitone offset of this natural letter above C (0..=11).
    pub fn base_semitone(self) -> i32 {
        match self {
            NoteLetter::C => 0,
            NoteLetter::D => 2,
            NoteLetter::E => 4,
            NoteLetter::F => 5,
            NoteLetter::G => 7,
            NoteLetter::A => 9,
            NoteLetter::B => 11,
        }
    }

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|l| *l == self).unwrap()
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(NoteLetter::C),
            'D' => Some(NoteLetter::D),
            'E' => Some(NoteLetter::E),
            'F' => Some(NoteLetter::F),
            'G' => Some(NoteLetter::G),
            'A' => Some(NoteLetter::A),
            'B' => Some(NoteLetter::B),
            _ => None,
        }
    }

    /// Lowercase ABC letters denote the octave-5 register, uppercase octave-4.
    pub fn to_char(self, lowercase: bool) -> char {
        let c = match self {
            NoteLetter::C => 'C',
            NoteLetter::D => 'D',
            NoteLetter::E => 'E',
            NoteLetter::F => 'F',
            NoteLetter::G => 'G',
            NoteLetter::A => 'A',
            NoteLetter::B => 'B',
        };
        if lowercase {
            c.to_ascii_lowercase()
        } else {
            c
        }
    }
}

/// Accidental applied to a [`NoteLetter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accidental {
    DoubleFlat,
    Flat,
    Natural,
    Sharp,
    DoubleSharp,
}

impl Accidental {
    pub fn semitone_offset(self) -> i32 {
        match self {
            Accidental::DoubleFlat => -2,
            Accidental::Flat => -1,
            Accidental::Natural => 0,
            Accidental::Sharp => 1,
            Accidental::DoubleSharp => 2,
        }
    }

    /// ABC accidental lexeme, `""` for an implicit natural.
    pub fn lexeme(self) -> &'static str {
        match self {
            Accidental::DoubleFlat => "__",
            Accidental::Flat => "_",
            Accidental::Natural => "",
            Accidental::Sharp => "^",
            Accidental::DoubleSharp => "^^",
        }
    }
}

/// A fully resolved pitch: letter + accidental + absolute octave number,
/// where octave 4 spans middle C (ABC's uppercase, unmarked register) and
/// octave 5 spans the octave above (ABC's lowercase, unmarked register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedPitch {
    pub letter: NoteLetter,
    pub accidental: Accidental,
    pub octave: i32,
}

impl ResolvedPitch {
    /// MIDI note number: octave 4 baseline for an ABC uppercase letter with
    /// no octave marks, shifted by accidentals and `'`/`,` register marks.
    pub fn to_midi(self) -> u8 {
        let midi = 12 * (self.octave + 1) + self.letter.base_semitone() + self.accidental.semitone_offset();
        midi.clamp(0, 127) as u8
    }

    /// Renders back to ABC note-letter syntax: accidental, letter (case from
    /// register), then trailing `'`/`,` marks.
    pub fn to_abc(self) -> String {
        let lowercase = self.octave >= 5;
        let baseline = if lowercase { 5 } else { 4 };
        let mut s = String::new();
        s.push_str(self.accidental.lexeme());
        s.push(self.letter.to_char(lowercase));
        if self.octave > baseline {
            for _ in 0..(self.octave - baseline) {
                s.push('\'');
            }
        } else if self.octave < baseline {
            for _ in 0..(baseline - self.octave) {
                s.push(',');
            }
        }
        s
    }
}

/// Chromatic pitch class of a tonic letter/accidental pair, 0=C..11=B.
fn tonic_pitch_class(letter: NoteLetter, accidental: Accidental) -> i32 {
    (letter.base_semitone() + accidental.semitone_offset()).rem_euclid(12)
}

/// The seven major-scale degree pitch classes for a given tonic.
fn major_scale_pitch_classes(tonic_pc: i32) -> [i32; 7] {
    const INTERVALS: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];
    let mut out = [0; 7];
    for (i, iv) in INTERVALS.iter().enumerate() {
        out[i] = (tonic_pc + iv).rem_euclid(12);
    }
    out
}

/// Respells a chromatic pitch class (0..=11) as the [`NoteLetter`] +
/// [`Accidental`] combination closest to the diatonic degrees of `tonic`.
///
/// `prefer_sharp` breaks ties (pitch classes not on the diatonic scale) in
/// favor of a sharp spelling on ascending motion, flat on descending, per the
/// documented default policy. `existing_accidental`, when given, is honored
/// when it already spells `pitch_class` correctly against some letter within
/// one step of the scale — this keeps `^C -> ^C` stable rather than
/// relabeling to `_D` purely because the scale prefers flats.
pub fn spell_pitch_class(
    pitch_class: i32,
    tonic: (NoteLetter, Accidental),
    prefer_sharp: bool,
    existing: Option<(NoteLetter, Accidental)>,
) -> (NoteLetter, Accidental) {
    let pitch_class = pitch_class.rem_euclid(12);

    if let Some((letter, acc)) = existing {
        if tonic_pitch_class(letter, acc) == pitch_class {
            return (letter, acc);
        }
    }

    let tonic_pc = tonic_pitch_class(tonic.0, tonic.1);
    let scale = major_scale_pitch_classes(tonic_pc);
    let tonic_idx = tonic.0.index();

    // Degree whose diatonic pitch class matches exactly.
    for (i, &pc) in scale.iter().enumerate() {
        if pc == pitch_class {
            let letter = NoteLetter::ORDER[(tonic_idx + i) % 7];
            return (letter, Accidental::Natural);
        }
    }

    // Chromatic passing tone: pick the nearest diatonic degree and apply an
    // accidental, preferring to alter the degree below when ascending
    // (sharp) and the degree above when descending (flat).
    let mut best: Option<(usize, i32)> = None;
    for (i, &pc) in scale.iter().enumerate() {
        let mut diff = pitch_class - pc;
        if diff > 6 {
            diff -= 12;
        } else if diff < -6 {
            diff += 12;
        }
        if diff.abs() <= 2 {
            let wanted_sign = if prefer_sharp { 1 } else { -1 };
            let matches_preference = diff.signum() == wanted_sign || diff == 0;
            match best {
                None => best = Some((i, diff)),
                Some((_, d)) => {
                    if matches_preference && d.signum() != wanted_sign {
                        best = Some((i, diff));
                    }
                }
            }
        }
    }

    let (i, diff) = best.unwrap_or((0, pitch_class - scale[0]));
    let letter = NoteLetter::ORDER[(tonic_idx + i) % 7];
    let accidental = match diff {
        -2 => Accidental::DoubleFlat,
        -1 => Accidental::Flat,
        0 => Accidental::Natural,
        1 => Accidental::Sharp,
        2 => Accidental::DoubleSharp,
        _ => Accidental::Natural,
    };
    (letter, accidental)
}

/// Transposes a resolved pitch by `semitones`, respelling in the given key.
pub fn transpose_pitch(pitch: ResolvedPitch, semitones: i32, tonic: (NoteLetter, Accidental)) -> ResolvedPitch {
    let midi = pitch.to_midi() as i32 + semitones;
    let pitch_class = midi.rem_euclid(12);
    let octave = midi.div_euclid(12) - 1;
    let prefer_sharp = semitones >= 0;
    let (letter, accidental) = spell_pitch_class(
        pitch_class,
        tonic,
        prefer_sharp,
        Some((pitch.letter, pitch.accidental)),
    );
    ResolvedPitch { letter, accidental, octave }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(letter: NoteLetter, accidental: Accidental, octave: i32) -> ResolvedPitch {
        ResolvedPitch { letter, accidental, octave }
    }

    #[test]
    fn middle_c_is_midi_60() {
        assert_eq!(c(NoteLetter::C, Accidental::Natural, 4).to_midi(), 60);
    }

    #[test]
    fn octave_marks_shift_by_twelve() {
        let base = c(NoteLetter::C, Accidental::Natural, 4).to_midi();
        assert_eq!(c(NoteLetter::C, Accidental::Natural, 5).to_midi(), base + 12);
        assert_eq!(c(NoteLetter::C, Accidental::Natural, 3).to_midi(), base - 12);
    }

    #[test]
    fn transpose_c_major_scale_up_a_step_stays_diatonic() {
        let tonic = (NoteLetter::C, Accidental::Natural);
        let d = transpose_pitch(c(NoteLetter::C, Accidental::Natural, 4), 2, tonic);
        assert_eq!(d.letter, NoteLetter::D);
        assert_eq!(d.accidental, Accidental::Natural);
    }

    #[test]
    fn transpose_composition_matches_sum_in_midi() {
        let tonic = (NoteLetter::C, Accidental::Natural);
        let start = c(NoteLetter::G, Accidental::Sharp, 4);
        for a in -7..7 {
            for b in -7..7 {
                let once = transpose_pitch(start, a + b, tonic);
                let twice = transpose_pitch(transpose_pitch(start, a, tonic), b, tonic);
                assert_eq!(once.to_midi(), twice.to_midi(), "a={a} b={b}");
            }
        }
    }

    #[test]
    fn existing_sharp_accidental_is_respected_when_still_correct() {
        let tonic = (NoteLetter::F, Accidental::Natural);
        let pitch = c(NoteLetter::C, Accidental::Sharp, 4);
        let (letter, acc) = spell_pitch_class(1, tonic, true, Some((pitch.letter, pitch.accidental)));
        assert_eq!((letter, acc), (NoteLetter::C, Accidental::Sharp));
    }
}
