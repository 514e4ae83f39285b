//! Line framing for incremental model output.
//!
//! Model deltas arrive with arbitrary boundaries: a newline may be split
//! from the text before it, or one delta may carry several lines.
//! [`TokenFramer`] buffers the partial line and yields each complete
//! candidate once its newline arrives.
//!
//! # Algorithm
//!
//! 1. Append the delta to the buffer.
//! 2. While the buffer holds a `\n`, split off everything before it.
//! 3. Strip surrounding whitespace and leading bullet markers (`-`, `•`, `*`).
//! 4. Yield the line if anything remains; drop it silently otherwise.
//! 5. At end of stream, [`TokenFramer::finish`] yields the unterminated tail.
//!
//! # Example
//!
//! ```rust
//! use brainstormer_core::framer::TokenFramer;
//!
//! let mut framer = TokenFramer::new();
//! let mut lines = Vec::new();
//! for delta in ["Foo", "\nBar", "\n", "Baz\n"] {
//!     lines.extend(framer.push(delta));
//! }
//! lines.extend(framer.finish());
//! assert_eq!(lines, vec!["Foo", "Bar", "Baz"]);
//! ```

/// Leading list markers models emit despite being told not to.
pub const BULLET_MARKERS: &[char] = &['-', '•', '*'];

/// Strip whitespace and leading bullet markers from a raw line.
///
/// Idempotent: stripping an already stripped candidate returns it unchanged.
pub fn strip_candidate(line: &str) -> &str {
    line.trim().trim_start_matches(BULLET_MARKERS).trim()
}

/// Reassembles candidate lines from one model stream.
///
/// One framer serves exactly one stream; [`finish`](TokenFramer::finish)
/// consumes it.
#[derive(Debug, Default)]
pub struct TokenFramer {
    buffer: String,
}

impl TokenFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta, returning every candidate it completes, in order.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let candidate = strip_candidate(&line);
            if !candidate.is_empty() {
                lines.push(candidate.to_string());
            }
        }
        lines
    }

    /// End of stream: yield the unterminated tail if it has content.
    pub fn finish(self) -> Option<String> {
        let candidate = strip_candidate(&self.buffer);
        if candidate.is_empty() {
            None
        } else {
            Some(candidate.to_string())
        }
    }

    /// Bytes of the current partial line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
