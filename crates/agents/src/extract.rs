//! Structured payload extraction from free-form model output.
//!
//! Models rarely answer with bare JSON: the object usually sits inside prose
//! or a markdown fence. The extractor walks every opening brace in order,
//! cuts the balanced block that starts there, and returns the first one that
//! parses as a JSON object.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// The decision object sent back over the transport. Keys are defined by the
/// system prompt, not by this crate.
pub type StructuredPayload = Map<String, Value>;

/// Why no payload could be extracted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// The text contains no opening brace at all.
    #[error("no JSON object found in model output")]
    NotFound,

    /// At least one candidate block was found, none of them valid JSON.
    #[error("no valid JSON object in model output ({candidates} candidate(s)): {message}")]
    Parse { message: String, candidates: usize },
}

impl ExtractError {
    /// Short machine-friendly reason for logs and metric labels.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Parse { .. } => "parse_error",
        }
    }
}

/// Locate and parse the first valid JSON object embedded in `raw`.
pub fn extract(raw: &str) -> Result<StructuredPayload, ExtractError> {
    let mut ends = BlockEnds::default();
    let mut candidates = 0;
    let mut last_error: Option<String> = None;
    let mut parsed_unterminated = false;
    let mut search_from = 0;

    while let Some(offset) = raw[search_from..].find('{') {
        let start = search_from + offset;
        candidates += 1;
        // '{' is one byte, so start + 1 is always a char boundary.
        search_from = start + 1;

        let block = match ends.end_of(raw, start) {
            Some(end) => &raw[start..end],
            // An unterminated block never parses. One parser message is
            // enough, and re-parsing every suffix would be quadratic.
            None if parsed_unterminated => continue,
            None => {
                parsed_unterminated = true;
                &raw[start..]
            },
        };

        match serde_json::from_str::<Value>(block) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => {},
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    match last_error {
        None => Err(ExtractError::NotFound),
        Some(message) => Err(ExtractError::Parse {
            message,
            candidates,
        }),
    }
}

/// Block boundaries keyed by the offset of their opening brace.
///
/// A scan resolves every brace it walks over outside string literals, so a
/// nested opener is never scanned twice and the whole extraction stays
/// linear in the common case of unbalanced output such as `{{{{`.
#[derive(Debug, Default)]
struct BlockEnds {
    resolved: HashMap<usize, Option<usize>>,
}

impl BlockEnds {
    /// Byte offset just past the bracket that closes the block opened at
    /// `start`, or `None` when the text ends first. Brackets inside JSON
    /// string literals are ignored. A mismatched closer ends the block early
    /// so the parser can report it.
    fn end_of(&mut self, text: &str, start: usize) -> Option<usize> {
        if let Some(&end) = self.resolved.get(&start) {
            return end;
        }
        self.scan(text, start);
        self.resolved.get(&start).copied().flatten()
    }

    fn settle(&mut self, open: (char, usize), end: Option<usize>) {
        if open.0 == '}' {
            self.resolved.insert(open.1, end);
        }
    }

    fn scan(&mut self, text: &str, start: usize) {
        // (expected closer, offset of its opener)
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for (i, ch) in text[start..].char_indices() {
            let pos = start + i;
            if in_string {
                match ch {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {},
                }
                continue;
            }

            match ch {
                '"' => in_string = true,
                '{' => stack.push(('}', pos)),
                '[' => stack.push((']', pos)),
                '}' | ']' => match stack.pop() {
                    Some(open) if open.0 == ch => {
                        self.settle(open, Some(pos + 1));
                        if stack.is_empty() {
                            return;
                        }
                    },
                    popped => {
                        // Every block still open fails on this same closer.
                        for open in popped.into_iter().chain(stack.drain(..)) {
                            self.settle(open, Some(pos + 1));
                        }
                        return;
                    },
                },
                _ => {},
            }
        }

        for open in stack {
            self.settle(open, None);
        }
    }
}
