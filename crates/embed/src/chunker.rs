//! Splits long texts into pieces before they are sent to a provider.
//!
//! All sizes are counted in `char`s (Unicode scalar values), never bytes, so a
//! chunk boundary can not land inside a multi-byte character.

use serde::{Deserialize, Serialize};

/// How a text is split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// The whole text is one chunk, untouched.
    #[default]
    None,
    /// Split after `.`, `!` or `?` followed by whitespace or end of input.
    Sentence,
    /// Split on blank lines (`"\n\n"`).
    Paragraph,
    /// Fixed-size character windows with optional overlap.
    Fixed,
}

/// Text splitter configuration.
///
/// `max_size` and `overlap` only matter for [`ChunkStrategy::Fixed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chunker {
    pub strategy: ChunkStrategy,
    /// Window length in characters.
    pub max_size: usize,
    /// Characters shared by consecutive windows.
    pub overlap: usize,
    /// Trim surrounding whitespace from every chunk.
    pub trim_space: bool,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::None,
            max_size: 512,
            overlap: 50,
            trim_space: true,
        }
    }
}

impl Chunker {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn sentence() -> Self {
        Self {
            strategy: ChunkStrategy::Sentence,
            ..Self::default()
        }
    }

    pub fn paragraph() -> Self {
        Self {
            strategy: ChunkStrategy::Paragraph,
            ..Self::default()
        }
    }

    pub fn fixed(max_size: usize, overlap: usize) -> Self {
        Self {
            strategy: ChunkStrategy::Fixed,
            max_size,
            overlap,
            ..Self::default()
        }
    }

    pub fn with_trim_space(mut self, trim_space: bool) -> Self {
        self.trim_space = trim_space;
        self
    }

    /// Split `text` according to the configured strategy.
    ///
    /// [`ChunkStrategy::None`] returns the input verbatim, even when it is
    /// empty. Every other strategy trims (when enabled) and drops empty
    /// chunks, so an empty or all-whitespace text yields no chunks at all.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let raw = match self.strategy {
            ChunkStrategy::None => return vec![text.to_owned()],
            ChunkStrategy::Sentence => split_sentences(text),
            ChunkStrategy::Paragraph => split_paragraphs(text),
            ChunkStrategy::Fixed => self.split_fixed(text),
        };

        raw.into_iter()
            .map(|chunk| {
                if self.trim_space {
                    chunk.trim().to_owned()
                } else {
                    chunk
                }
            })
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    fn split_fixed(&self, text: &str) -> Vec<String> {
        // A zero window cannot make progress; the text goes out whole.
        if self.max_size == 0 {
            return vec![text.to_owned()];
        }

        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.max_size {
            return vec![text.to_owned()];
        }

        let step = if self.overlap >= self.max_size {
            self.max_size
        } else {
            self.max_size - self.overlap
        };

        let mut chunks = Vec::with_capacity(chars.len() / step + 1);
        let mut start = 0;
        loop {
            let end = (start + self.max_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

fn is_sentence_end(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if is_sentence_end(ch) && chars.peek().map_or(true, |next| next.is_whitespace()) {
            chunks.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}
