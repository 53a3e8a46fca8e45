//! Recovers inline reasoning from the content channel.
//!
//! Some providers wrap reasoning in textual markers (`<think>…</think>`)
//! inside ordinary content. Chunks can end anywhere, including in the middle
//! of a marker, so the parser holds back a short tail (the carry) that might
//! still turn into a marker once the next chunk arrives.

use serde::{Deserialize, Serialize};

pub const DEFAULT_OPEN_MARKER: &str = "<think>";
pub const DEFAULT_CLOSE_MARKER: &str = "</think>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkMarkers {
    pub open: String,
    pub close: String,
}

impl Default for ThinkMarkers {
    fn default() -> Self {
        Self {
            open: DEFAULT_OPEN_MARKER.to_string(),
            close: DEFAULT_CLOSE_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedChunk {
    pub content: String,
    pub reasoning: String,
}

impl ParsedChunk {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }

    pub fn extend(&mut self, other: ParsedChunk) {
        self.content.push_str(&other.content);
        self.reasoning.push_str(&other.reasoning);
    }
}

/// Per-generation parser state.
#[derive(Debug, Clone, Default)]
pub struct ThinkParser {
    markers: ThinkMarkers,
    in_reasoning: bool,
    carry: String,
}

impl ThinkParser {
    pub fn new(markers: ThinkMarkers) -> Self {
        Self {
            markers,
            in_reasoning: false,
            carry: String::new(),
        }
    }

    pub fn in_reasoning(&self) -> bool {
        self.in_reasoning
    }

    pub fn carry(&self) -> &str {
        &self.carry
    }

    /// Splits one chunk into answer and reasoning text. Text that could be the
    /// start of a marker is held in the carry until the next call or
    /// [`flush`](Self::flush).
    pub fn process(&mut self, chunk: &str) -> ParsedChunk {
        let mut data = std::mem::take(&mut self.carry);
        data.push_str(chunk);

        let mut parsed = ParsedChunk::default();
        let mut rest = data.as_str();

        while !rest.is_empty() {
            let marker = if self.in_reasoning {
                self.markers.close.as_str()
            } else {
                self.markers.open.as_str()
            };
            let sink = if self.in_reasoning {
                &mut parsed.reasoning
            } else {
                &mut parsed.content
            };

            if marker.is_empty() {
                sink.push_str(rest);
                break;
            }

            match rest.find(marker) {
                Some(index) => {
                    sink.push_str(&rest[..index]);
                    rest = &rest[index + marker.len()..];
                    self.in_reasoning = !self.in_reasoning;
                }
                None => {
                    let split = tail_start(rest, marker.chars().count() - 1);
                    sink.push_str(&rest[..split]);
                    self.carry = rest[split..].to_string();
                    break;
                }
            }
        }

        parsed
    }

    /// Emits whatever is still held back. Inside an unterminated reasoning
    /// span the tail is reasoning, otherwise it is answer text.
    pub fn flush(&mut self) -> ParsedChunk {
        let leftover = std::mem::take(&mut self.carry);
        if self.in_reasoning {
            ParsedChunk {
                content: String::new(),
                reasoning: leftover,
            }
        } else {
            ParsedChunk {
                content: leftover,
                reasoning: String::new(),
            }
        }
    }
}

/// Byte offset where the last `keep` characters of `text` begin.
fn tail_start(text: &str, keep: usize) -> usize {
    if keep == 0 {
        return text.len();
    }
    text.char_indices()
        .rev()
        .nth(keep - 1)
        .map(|(index, _)| index)
        .unwrap_or(0)
}
