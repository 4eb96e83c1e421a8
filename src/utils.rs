use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)").unwrap());

/// Packs whole sentences into chunks of at most `max_chars` characters,
/// preserving order. A single sentence longer than the limit is split at
/// word boundaries, and a single word longer than the limit at char
/// boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut sentences = Vec::new();
    for m in SENTENCE.find_iter(text) {
        let s = m.as_str().trim();
        if !s.is_empty() {
            sentences.push(s.to_string());
        }
    }
    if sentences.is_empty() {
        if text.trim().is_empty() {
            return Vec::new();
        }
        warn!("No sentence breaks found; treating whole text as one sentence");
        sentences.push(text.trim().to_string());
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for s in sentences {
        for piece in split_oversized(&s, max_chars) {
            let piece_len = piece.chars().count();
            if current.is_empty() {
                current = piece;
            } else if current.chars().count() + 1 + piece_len <= max_chars {
                current.push(' ');
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::replace(&mut current, piece));
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_oversized(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let words: Vec<String> = if word.chars().count() > max_chars {
            let chars: Vec<char> = word.chars().collect();
            chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
        } else {
            vec![word.to_string()]
        };
        for w in words {
            if current.is_empty() {
                current = w;
            } else if current.chars().count() + 1 + w.chars().count() <= max_chars {
                current.push(' ');
                current.push_str(&w);
            } else {
                pieces.push(std::mem::replace(&mut current, w));
            }
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Collapses runs of spaces inside lines and runs of blank lines into a
/// single paragraph break.
pub fn collapse_whitespace(text: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(words.join(" "));
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs.join("\n\n")
}

/// File-name stem derived from a post title: lowercase ascii alphanumerics
/// separated by single dashes.
pub fn slugify(title: &str, max_len: usize) -> String {
    let mut slug = String::new();
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= max_len {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "story".to_string() } else { slug }
}
