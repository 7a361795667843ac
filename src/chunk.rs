//! Token-bounded source chunker.
//!
//! Splits file contents into [`Chunk`]s that respect a `max_tokens` limit.
//! Splitting prefers blank-line boundaries, then line boundaries, and only
//! hard-splits a single line when it alone exceeds the limit.
//!
//! Each chunk carries its index and a SHA-256 hash of its text.

use sha2::{Digest, Sha256};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub hash: String,
}

/// Rough token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Split text into chunks of at most `max_tokens` estimated tokens.
/// Returns chunks with contiguous indices starting at 0, never empty.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;

    if text.chars().count() <= max_chars {
        return vec![make_chunk(0, text)];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        if para.trim().is_empty() {
            continue;
        }
        let para_len = para.chars().count();
        let would_be = if current.is_empty() {
            para_len
        } else {
            current.chars().count() + 2 + para_len
        };

        if would_be > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if para_len > max_chars {
            split_lines(para, max_chars, &mut pieces);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .iter()
        .enumerate()
        .map(|(i, p)| make_chunk(i, p))
        .collect()
}

/// Pack the lines of an oversized paragraph into pieces of `max_chars`.
fn split_lines(para: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut buf = String::new();
    for line in para.lines() {
        let line_len = line.chars().count();
        let would_be = if buf.is_empty() {
            line_len
        } else {
            buf.chars().count() + 1 + line_len
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for part in chars.chunks(max_chars) {
                pieces.push(part.iter().collect());
            }
            continue;
        }
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(line);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }
}

fn make_chunk(index: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Chunk {
        index,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_chars(max_tokens: usize) -> usize {
        max_tokens * CHARS_PER_TOKEN
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("fn main() {}", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "fn main() {}");
    }

    #[test]
    fn empty_text() {
        let chunks = chunk_text("", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn paragraphs_split_under_limit() {
        let text = (0..40)
            .map(|i| format!("fn f{}() {{ call({}); }}", i, i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 20);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.text.chars().count() <= max_chars(20), "chunk {} too big", i);
        }
    }

    #[test]
    fn long_paragraph_splits_on_lines() {
        let text = (0..100)
            .map(|i| format!("let x{} = {};", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text(&text, 25);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= max_chars(25));
            assert!(!c.text.starts_with('\n'));
        }
        let joined: String = chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join("\n");
        assert_eq!(joined, text);
    }

    #[test]
    fn single_huge_line_hard_splits() {
        let text = "é".repeat(100);
        let chunks = chunk_text(&text, 5);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.text.chars().count() == 20));
    }

    #[test]
    fn deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text(text, 2);
        let c2 = chunk_text(text, 2);
        assert_eq!(c1, c2);
    }
}
