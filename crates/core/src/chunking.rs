use crate::error::IngestError;
use crate::models::{Chunk, Document, IngestionOptions};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub lookahead: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        let config = Self {
            chunk_size,
            overlap,
            lookahead: chunk_size / 10,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    // Kept below the stride so a shortened window still advances.
    fn effective_lookahead(&self) -> usize {
        self.lookahead.min(self.stride().saturating_sub(1))
    }
}

impl TryFrom<&IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        let config = Self::new(value.chunk_size, value.chunk_overlap)?;
        Ok(match value.boundary_lookahead {
            Some(lookahead) => config.with_lookahead(lookahead),
            None => config,
        })
    }
}

/// Collapses horizontal whitespace inside lines, unifies line endings and
/// squeezes blank-line runs to a single paragraph break.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;

    for line in unified.split('\n') {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(collapsed);
            previous_blank = false;
        }
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextWindow<'a> {
    pub offset: usize,
    pub text: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Sentence,
    Word,
}

impl Boundary {
    const PRIORITY: [Boundary; 3] = [Boundary::Paragraph, Boundary::Sentence, Boundary::Word];

    fn ends_at(self, two_back: Option<char>, one_back: char) -> bool {
        match self {
            Boundary::Paragraph => one_back == '\n' && two_back == Some('\n'),
            Boundary::Sentence => {
                one_back.is_whitespace() && matches!(two_back, Some('.' | '!' | '?'))
            }
            Boundary::Word => one_back.is_whitespace(),
        }
    }
}

/// Lazy sliding-window iterator over a text.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    text: &'a str,
    char_starts: Vec<usize>,
    config: ChunkingConfig,
    next_offset: Option<usize>,
}

impl<'a> Windows<'a> {
    fn byte_at(&self, char_index: usize) -> usize {
        self.char_starts
            .get(char_index)
            .copied()
            .unwrap_or(self.text.len())
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        let text: &'a str = self.text;
        &text[self.byte_at(start)..self.byte_at(end)]
    }

    fn natural_end(&self, ideal_end: usize) -> usize {
        let lookahead = self.config.effective_lookahead();
        if lookahead == 0 {
            return ideal_end;
        }

        let floor = ideal_end - lookahead;
        let region_start = floor.saturating_sub(2);
        let region: Vec<char> = self.slice(region_start, ideal_end).chars().collect();
        let char_before = |cut: usize, distance: usize| {
            cut.checked_sub(distance)
                .filter(|index| *index >= region_start)
                .and_then(|index| region.get(index - region_start).copied())
        };

        for boundary in Boundary::PRIORITY {
            for cut in (floor..=ideal_end).rev() {
                let Some(one_back) = char_before(cut, 1) else {
                    continue;
                };
                if boundary.ends_at(char_before(cut, 2), one_back) {
                    return cut;
                }
            }
        }

        ideal_end
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = TextWindow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_offset?;
        let total = self.char_starts.len();
        let ideal_end = (start + self.config.chunk_size).min(total);

        let end = if ideal_end == total {
            self.next_offset = None;
            total
        } else {
            let end = self.natural_end(ideal_end);
            self.next_offset = Some(end - self.config.overlap);
            end
        };

        Some(TextWindow {
            offset: start,
            text: self.slice(start, end),
        })
    }
}

/// Splits `text` into overlapping windows of at most `chunk_size` characters.
///
/// Windows prefer to end on a paragraph, sentence or word boundary found
/// within `lookahead` characters before the hard cut. Consecutive windows
/// always share exactly `overlap` characters; the last window is truncated to
/// the remaining text. Empty text yields no windows.
pub fn split(text: &str, config: ChunkingConfig) -> Result<Windows<'_>, IngestError> {
    config.validate()?;
    let char_starts: Vec<usize> = text.char_indices().map(|(index, _)| index).collect();
    let next_offset = if char_starts.is_empty() { None } else { Some(0) };

    Ok(Windows {
        text,
        char_starts,
        config,
        next_offset,
    })
}

pub fn chunk_document(
    document: &Document,
    config: ChunkingConfig,
) -> Result<impl Iterator<Item = Chunk> + '_, IngestError> {
    let windows = split(&document.raw_text, config)?;
    Ok(windows.map(move |window| Chunk {
        chunk_id: make_chunk_id(&document.source_id, window.offset),
        text: window.text.to_string(),
        source_id: document.source_id.clone(),
        offset: window.offset,
        metadata: document.metadata.clone(),
    }))
}

pub fn make_chunk_id(source_id: &str, offset: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update((offset as u64).to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets_and_lengths(text: &str, config: ChunkingConfig) -> Vec<(usize, usize)> {
        split(text, config)
            .map(|windows| {
                windows
                    .map(|window| (window.offset, window.text.chars().count()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn whitespace_is_normalized_but_paragraphs_survive() {
        let input = "A  \t  lot\r\nof   spacing\n\n\n\nnext\u{a0}paragraph\n\n";
        assert_eq!(normalize_text(input), "A lot\nof spacing\n\nnext paragraph");
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(
            ChunkingConfig::new(0, 0),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            ChunkingConfig::new(10, 10),
            Err(IngestError::InvalidChunkConfig(_))
        ));

        let forged = ChunkingConfig {
            chunk_size: 4,
            overlap: 9,
            lookahead: 0,
        };
        assert!(split("text", forged).is_err());
    }

    #[test]
    fn empty_text_produces_no_windows() -> Result<(), IngestError> {
        let config = ChunkingConfig::new(10, 2)?;
        assert_eq!(split("", config)?.count(), 0);
        Ok(())
    }

    #[test]
    fn short_text_is_a_single_window() -> Result<(), IngestError> {
        let config = ChunkingConfig::new(1_000, 200)?;
        let text = "x".repeat(50);
        let windows: Vec<_> = split(&text, config)?.collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].offset, 0);
        assert_eq!(windows[0].text, text);
        Ok(())
    }

    #[test]
    fn thousand_by_two_hundred_over_2500_chars() -> Result<(), IngestError> {
        let config = ChunkingConfig::new(1_000, 200)?;
        let text = "abcdefghij".repeat(250);
        assert_eq!(
            offsets_and_lengths(&text, config),
            vec![(0, 1_000), (800, 1_000), (1_600, 900)]
        );
        Ok(())
    }

    #[test]
    fn chunk_count_matches_stride_formula_on_unbroken_text() -> Result<(), IngestError> {
        for chunk_size in 1..=12usize {
            for overlap in 0..chunk_size {
                let config = ChunkingConfig::new(chunk_size, overlap)?;
                for length in 0..=40usize {
                    let text = "a".repeat(length);
                    let expected = if length == 0 {
                        0
                    } else if length <= chunk_size {
                        1
                    } else {
                        (length - overlap).div_ceil(chunk_size - overlap)
                    };
                    assert_eq!(
                        split(&text, config)?.count(),
                        expected,
                        "c={chunk_size} o={overlap} L={length}"
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn natural_text_keeps_window_invariants() -> Result<(), IngestError> {
        let text = "The pump draws fluid from the reservoir. Pressure rises quickly!\n\n\
                    Check the relief valve before start-up. Is the gauge reading zero? \
                    Replace worn seals every season and log each inspection carefully."
            .repeat(6);
        let config = ChunkingConfig::new(120, 30)?;
        let windows = offsets_and_lengths(&text, config);
        let total = text.chars().count();

        assert!(windows.len() > 1);
        for pair in windows.windows(2) {
            let (first_offset, first_len) = pair[0];
            let (second_offset, _) = pair[1];
            assert!(first_len <= 120);
            assert!(second_offset - first_offset <= config.stride());
            assert!(second_offset < first_offset + 120);
            assert_eq!(first_offset + first_len - second_offset, 30);
        }

        let (last_offset, last_len) = windows[windows.len() - 1];
        assert_eq!(last_offset + last_len, total);
        Ok(())
    }

    #[test]
    fn prefers_paragraph_then_sentence_then_word() -> Result<(), IngestError> {
        let config = ChunkingConfig::new(20, 0)?.with_lookahead(8);

        let paragraph: Vec<_> = split("Alpha beta. Gam\n\nDelta epsilon zeta", config)?.collect();
        assert_eq!(paragraph[0].text, "Alpha beta. Gam\n\n");

        let sentence: Vec<_> = split("Alpha beta. Gamma delta epsilon", config)?.collect();
        assert_eq!(sentence[0].text, "Alpha beta. ");

        let word: Vec<_> = split("Alphabetagam delta epsilon zeta", config)?.collect();
        assert_eq!(word[0].text, "Alphabetagam delta ");

        let unbroken = "z".repeat(30);
        let hard: Vec<_> = split(&unbroken, config)?.collect();
        assert_eq!(hard[0].text.len(), 20);
        Ok(())
    }

    #[test]
    fn offsets_count_characters_not_bytes() -> Result<(), IngestError> {
        let config = ChunkingConfig::new(4, 1)?.with_lookahead(0);
        let windows: Vec<_> = split("äöüßéèêë", config)?.collect();
        assert_eq!(windows[0].text, "äöüß");
        assert_eq!(windows[1].offset, 3);
        assert_eq!(windows[1].text, "ßéèê");
        Ok(())
    }

    #[test]
    fn chunk_ids_depend_on_source_and_offset_only() -> Result<(), IngestError> {
        let config = ChunkingConfig::new(10, 2)?;
        let document = Document::new("notes.txt", "0123456789abcdefghij").with_metadata("k", "v");

        let first: Vec<Chunk> = chunk_document(&document, config)?.collect();
        let second: Vec<Chunk> = chunk_document(&document, config)?.collect();
        assert_eq!(first, second);
        assert_eq!(first[0].chunk_id, make_chunk_id("notes.txt", 0));
        assert_eq!(first[1].offset, 8);
        assert_eq!(first[1].metadata.get("k").map(String::as_str), Some("v"));
        assert_ne!(make_chunk_id("notes.txt", 8), make_chunk_id("other.txt", 8));
        Ok(())
    }
}
