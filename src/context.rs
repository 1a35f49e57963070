//! Shared context threaded through the scanner, parser and validator for a
//! single document.

use crate::error::ErrorReporter;

/// Formatter style knobs that can be set by `%%abcls-fmt` stylesheet
/// directives while scanning. All fields default to their "off" state and
/// must be cleared by [`SourceContext::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatterConfig {
    /// `%%abcls-fmt system-comments`
    pub system_comments: bool,
    /// `%%abcls-fmt voice-markers=inline|infoline`
    pub voice_markers: Option<VoiceMarkerStyle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceMarkerStyle {
    Inline,
    InfoLine,
}

impl VoiceMarkerStyle {
    fn from_value(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(VoiceMarkerStyle::Inline),
            "infoline" => Some(VoiceMarkerStyle::InfoLine),
            _ => None,
        }
    }
}

/// Parser behavior flags toggled by `%%abcls-parse` directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserFlags {
    /// `%%abcls-parse linear` — disables multi-voice system grouping.
    pub linear: bool,
    /// Per-tune variant of `linear`, settable from a tune-local directive.
    pub tune_linear: bool,
}

/// `%%abcls-voices show|hide`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceVisibility {
    Show,
    Hide,
}

/// A single table of every directive that is allowed to mutate scanner or
/// formatter state, centralized here per the design note that the original
/// implementation scattered this knowledge across the codebase.
pub fn apply_directive(ctx: &mut SourceContext, name: &str, value: &str) {
    match name {
        "abcls-parse" => {
            if value.trim() == "linear" {
                ctx.parser_flags.linear = true;
                ctx.parser_flags.tune_linear = true;
            }
        }
        "abcls-fmt" => {
            let value = value.trim();
            if value == "system-comments" {
                ctx.formatter_config.system_comments = true;
            } else if let Some(rest) = value.strip_prefix("voice-markers=") {
                ctx.formatter_config.voice_markers = VoiceMarkerStyle::from_value(rest.trim());
            }
        }
        "abcls-voices" => {
            ctx.voice_visibility = match value.trim() {
                "show" => Some(VoiceVisibility::Show),
                "hide" => Some(VoiceVisibility::Hide),
                _ => None,
            };
        }
        _ => {}
    }
}

/// Owns the source text, the shared error reporter, and any per-document
/// configuration discovered while scanning. One `SourceContext` backs one
/// `analyze()` call; reuse across calls requires [`SourceContext::reset`].
pub struct SourceContext {
    pub source: String,
    pub errors: ErrorReporter,
    pub formatter_config: FormatterConfig,
    pub parser_flags: ParserFlags,
    pub voice_visibility: Option<VoiceVisibility>,
    next_token_id: u64,
}

impl SourceContext {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            errors: ErrorReporter::new(),
            formatter_config: FormatterConfig::default(),
            parser_flags: ParserFlags::default(),
            voice_visibility: None,
            next_token_id: 0,
        }
    }

    /// Mints a fresh, monotonically increasing token id.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_token_id;
        self.next_token_id += 1;
        id
    }

    /// Resets the reporter and all directive-derived configuration so a
    /// re-analysis without a directive present does not inherit stale flags.
    pub fn reset(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.errors.reset();
        self.formatter_config = FormatterConfig::default();
        self.parser_flags = ParserFlags::default();
        self.voice_visibility = None;
        self.next_token_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_parser_flags() {
        let mut ctx = SourceContext::new("%%abcls-parse linear\n");
        apply_directive(&mut ctx, "abcls-parse", "linear");
        assert!(ctx.parser_flags.linear);

        ctx.reset("X:1\nK:C\nCDEF|");
        assert!(!ctx.parser_flags.linear);
    }

    #[test]
    fn token_ids_are_monotonic() {
        let mut ctx = SourceContext::new("");
        assert_eq!(ctx.next_id(), 0);
        assert_eq!(ctx.next_id(), 1);
        assert_eq!(ctx.next_id(), 2);
    }
}
