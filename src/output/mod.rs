//! Size limits for action results.
//!
//! Text is cut to a character ceiling with a marker describing how much was
//! kept. Media segments are never touched. The marker is counted against the
//! ceiling, so bounding an already-bounded result is a no-op.

use crate::types::{ContentSegment, ObservationContent, ObservationResult};

/// Default ceiling, in characters, for one text payload.
pub const DEFAULT_OUTPUT_CHAR_LIMIT: usize = 30_000;

/// Caps the size of action results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBounder {
    max_chars: usize,
}

impl Default for OutputBounder {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CHAR_LIMIT)
    }
}

impl OutputBounder {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Bound one piece of observation content.
    pub fn bound(&self, content: ObservationContent) -> ObservationContent {
        match content {
            ObservationContent::Text(text) => ObservationContent::Text(self.bound_text(text)),
            ObservationContent::Segments(segments) => ObservationContent::Segments(
                segments
                    .into_iter()
                    .map(|segment| match segment {
                        ContentSegment::Text { text } => ContentSegment::Text {
                            text: self.bound_text(text),
                        },
                        media @ ContentSegment::Media { .. } => media,
                    })
                    .collect(),
            ),
        }
    }

    /// Bound the content of a result, keeping its id and error flag.
    pub fn bound_result(&self, result: ObservationResult) -> ObservationResult {
        ObservationResult {
            content: self.bound(result.content),
            ..result
        }
    }

    fn bound_text(&self, text: String) -> String {
        let total = text.chars().count();
        if total <= self.max_chars {
            return text;
        }
        let marker_for = |shown: usize| {
            format!("\n\n[output truncated: showing {shown} of {total} characters]")
        };
        let marker_len = marker_for(self.max_chars).chars().count();
        let shown = self.max_chars.saturating_sub(marker_len);
        let mut bounded: String = text.chars().take(shown).collect();
        bounded.push_str(&marker_for(shown));
        if bounded.chars().count() > self.max_chars {
            // Ceiling smaller than the marker itself.
            bounded = bounded.chars().take(self.max_chars).collect();
        }
        bounded
    }
}
