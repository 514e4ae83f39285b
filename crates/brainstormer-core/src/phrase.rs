//! Query phrase parsing and match-mode planning.
//!
//! A raw query holds one or more search phrases joined by `+`
//! (`"cats + dogs"`). [`parse_phrases`] splits it into trimmed, non-empty
//! phrases; [`pass_plan`] decides which match modes a request runs.
//!
//! # Example
//!
//! ```rust
//! use brainstormer_core::phrase::{parse_phrases, pass_plan, MatchMode};
//!
//! let phrases = parse_phrases("cats + dogs +  ");
//! assert_eq!(phrases, vec!["cats", "dogs"]);
//! assert_eq!(pass_plan(&phrases), vec![MatchMode::Or, MatchMode::And]);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between independent phrases in a raw query.
pub const PHRASE_SEPARATOR: char = '+';

/// Relevance semantics of a suggestion pass.
///
/// `Or` is inclusive (related to at least one phrase, or the only phrase);
/// `And` is the strict intersection across every phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Or,
    And,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Or => "or",
            MatchMode::And => "and",
        }
    }

    /// Read a caller-supplied mode hint. Case and surrounding whitespace
    /// are ignored; anything other than `and` is `Or`.
    pub fn from_hint(hint: &str) -> Self {
        if hint.trim().eq_ignore_ascii_case("and") {
            MatchMode::And
        } else {
            MatchMode::Or
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a raw query into its ordered phrases.
///
/// Without a separator the whole trimmed query is returned as the single
/// phrase, even when it trims to empty; callers reject blank queries
/// before reaching this point. With separators, every segment is trimmed
/// and empty segments are dropped. Case and punctuation are untouched.
pub fn parse_phrases(raw: &str) -> Vec<String> {
    if !raw.contains(PHRASE_SEPARATOR) {
        return vec![raw.trim().to_string()];
    }

    raw.split(PHRASE_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// The passes a request runs for a phrase set, in emission order.
///
/// A single phrase gets one inclusive pass. Multiple phrases always get
/// the inclusive pass followed by the intersection pass, whatever mode
/// the caller asked for, so both result sets arrive in one round-trip.
pub fn pass_plan(phrases: &[String]) -> Vec<MatchMode> {
    if phrases.len() > 1 {
        vec![MatchMode::Or, MatchMode::And]
    } else {
        vec![MatchMode::Or]
    }
}
