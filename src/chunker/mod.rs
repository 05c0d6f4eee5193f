
use serde::{Deserialize, Serialize};

/// Configuration for splitting source content into retrieval windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Window size in sanitized characters
    pub chunk_size: usize,
    /// Number of characters shared between adjacent windows
    pub overlap: usize,
    /// Hard cap on windows emitted per source
    pub max_chunks: usize,
    /// Windows shorter than this are discarded
    pub min_chunk_len: usize,
}

impl Default for ChunkerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 100,
            max_chunks: 50,
            min_chunk_len: 50,
        }
    }
}

impl ChunkerConfig {
    /// Step between window start positions
    #[inline]
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap).max(1)
    }
}

/// Remove characters that are unsafe to persist or re-embed, then collapse
/// whitespace runs to single spaces.
///
/// Control characters, Unicode noncharacters, private-use code points, and
/// the replacement character (the decoded remnant of an unpaired surrogate)
/// are stripped; all whitespace becomes a plain space.
#[inline]
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if !is_safe_char(c) {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    out
}

fn is_safe_char(c: char) -> bool {
    if c.is_control() || c == '\u{FFFD}' {
        return false;
    }
    // Private use areas
    if matches!(c, '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}')
    {
        return false;
    }
    // Noncharacters: U+FDD0..=U+FDEF and the last two code points of each plane
    let cp = u32::from(c);
    if (0xFDD0..=0xFDEF).contains(&cp) || (cp & 0xFFFE) == 0xFFFE {
        return false;
    }
    true
}

/// Split text into overlapping, bounded retrieval windows.
///
/// The input is sanitized first; windows advance by `chunk_size - overlap`
/// characters, windows shorter than `min_chunk_len` are discarded, and the
/// iterator stops after `max_chunks` windows regardless of remaining text.
/// Pure over its input; persisting the windows and requesting embeddings is
/// the caller's job.
#[inline]
pub fn chunk(text: &str, config: &ChunkerConfig) -> Windows {
    Windows {
        chars: sanitize(text).chars().collect(),
        pos: 0,
        config: config.clone(),
        emitted: 0,
    }
}

/// Lazy, finite, non-restartable sequence of chunk windows
#[derive(Debug)]
pub struct Windows {
    chars: Vec<char>,
    pos: usize,
    config: ChunkerConfig,
    emitted: usize,
}

impl Iterator for Windows {
    type Item = String;

    #[inline]
    fn next(&mut self) -> Option<String> {
        while self.emitted < self.config.max_chunks && self.pos < self.chars.len() {
            let end = (self.pos + self.config.chunk_size).min(self.chars.len());
            let start = self.pos;
            self.pos += self.config.stride();

            if end - start >= self.config.min_chunk_len {
                self.emitted += 1;
                return Some(self.chars[start..end].iter().collect());
            }
        }
        None
    }
}
