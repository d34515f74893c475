use std::collections::VecDeque;

use super::extractor::PageText;

#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
    /// 1-based page for paged formats.
    pub page: Option<usize>,
}

/// Recursive character splitter.
///
/// Text is cut on the first separator that occurs in it; pieces that are still
/// longer than `chunk_size` are cut again with the remaining separators, and
/// hard-cut once none are left. Pieces are then merged back into chunks of at
/// most `chunk_size` characters, each sharing up to `chunk_overlap` characters
/// with its predecessor. Lengths are counted in `char`s.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: Vec<String>) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators,
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.split_recursive(text, &self.separators, &mut out);
        out
    }

    fn split_recursive(&self, text: &str, separators: &[String], out: &mut Vec<String>) {
        let position = separators
            .iter()
            .position(|sep| !sep.is_empty() && text.contains(sep.as_str()));

        let (pieces, remaining): (Vec<&str>, &[String]) = match position {
            Some(i) => (text.split_inclusive(separators[i].as_str()).collect(), &separators[i + 1..]),
            None => (vec![text], &separators[..0]),
        };

        let mut good: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                good.push(piece);
                continue;
            }

            if !good.is_empty() {
                self.merge(&good, out);
                good.clear();
            }

            if remaining.is_empty() {
                self.hard_cut(piece, out);
            } else {
                self.split_recursive(piece, remaining, out);
            }
        }

        if !good.is_empty() {
            self.merge(&good, out);
        }
    }

    fn merge(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_chunk(&window, out);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, popped)) => total -= popped,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        push_chunk(&window, out);
    }

    fn hard_cut(&self, piece: &str, out: &mut Vec<String>) {
        let chars: Vec<char> = piece.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                out.push(chunk.to_string());
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }
}

fn push_chunk(window: &VecDeque<(&str, usize)>, out: &mut Vec<String>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Chunk every page, numbering chunks across the whole document.
pub fn chunk_pages(pages: &[PageText], splitter: &TextSplitter) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    for page in pages {
        for text in splitter.split_text(&page.text) {
            chunks.push(TextChunk {
                text,
                chunk_index: chunks.len(),
                page: page.page,
            });
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_separators() -> Vec<String> {
        ["\n\n", "\n", ".", "。", "！", "？"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_text() {
        let splitter = TextSplitter::new(100, 10, default_separators());
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let splitter = TextSplitter::new(100, 10, default_separators());
        assert_eq!(splitter.split_text("  short  "), vec!["short".to_string()]);
    }

    #[test]
    fn test_chunks_never_exceed_size() {
        let paragraph = "The company reduced scope 1 emissions across all sites. \
                         Renewable energy now covers most of the electricity demand.\n";
        let text = paragraph.repeat(40);
        let splitter = TextSplitter::new(200, 50, default_separators());
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 200, "chunk too long: {}", char_len(chunk));
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_cjk_punctuation_is_multibyte_safe() {
        let text = "緯創資通致力於永續發展。我們持續推動減碳行動！供應鏈管理是否符合要求？".repeat(10);
        let splitter = TextSplitter::new(40, 10, default_separators());
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 40);
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = (0..40)
            .map(|i| format!("Sentence {:02} is here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let splitter = TextSplitter::new(100, 30, default_separators());
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let first_sentence = format!("{}.", pair[1].split('.').next().unwrap());
            assert!(
                pair[0].contains(&first_sentence),
                "{:?} does not overlap {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "a".repeat(250);
        let splitter = TextSplitter::new(100, 20, default_separators());
        let chunks = splitter.split_text(&text);

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| char_len(c) <= 100));
    }

    #[test]
    fn test_chunk_pages_numbers_across_pages() {
        let pages = vec![
            PageText { page: Some(1), text: "First page.".to_string() },
            PageText { page: Some(2), text: "Second page.".to_string() },
        ];
        let splitter = TextSplitter::new(100, 10, default_separators());
        let chunks = chunk_pages(&pages, &splitter);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].page, Some(2));
    }
}
