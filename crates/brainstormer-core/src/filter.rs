//! Candidate validation and per-session deduplication.
//!
//! [`SuggestionFilter::accept`] is the only gate between a framed candidate
//! and the wire. Acceptance records the normalized form in the session's
//! emitted set at once; nothing is rolled back if the send later fails.

use std::collections::HashSet;

use crate::event::Suggestion;
use crate::framer::strip_candidate;
use crate::phrase::MatchMode;

/// Default length ceiling, in characters.
pub const MAX_SUGGESTION_CHARS: usize = 100;

/// Dedup key for a candidate: stripped and lower-cased.
pub fn normalize(candidate: &str) -> String {
    strip_candidate(candidate).to_lowercase()
}

/// Accept/reject policy for framed candidates.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionFilter {
    max_chars: usize,
}

impl Default for SuggestionFilter {
    fn default() -> Self {
        Self::new(MAX_SUGGESTION_CHARS)
    }
}

impl SuggestionFilter {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Decide whether `candidate` becomes a suggestion for this session.
    ///
    /// Rejects candidates that are empty after stripping, longer than the
    /// ceiling, or already in `emitted` (case-insensitive). On acceptance
    /// the normalized form is inserted into `emitted` and the stripped
    /// text, case intact, is returned tagged with `match_type`.
    pub fn accept(
        &self,
        candidate: &str,
        emitted: &mut HashSet<String>,
        match_type: MatchMode,
    ) -> Option<Suggestion> {
        let word = strip_candidate(candidate);
        if word.is_empty() || word.chars().count() > self.max_chars {
            return None;
        }

        if !emitted.insert(normalize(word)) {
            return None;
        }

        Some(Suggestion {
            word: word.to_string(),
            match_type,
        })
    }
}
