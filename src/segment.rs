//! Boundary-aware text truncation and overlapping chunking.

use regex::Regex;
use std::sync::LazyLock;

/// Sentence terminators: a lowercase letter, comma, or closing paren,
/// then `.`/`!`/`?`, then whitespace or end of window. The leading
/// character class keeps decimals ("3.14") and ellipses from matching.
static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z,)][.!?](\s|$)").expect("sentence regex"));

/// Words that end with a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "inc", "ltd", "dept",
    "approx", "fig", "eq", "vol", "no", "gen", "gov", "eg", "ie",
];

/// Bare top-level domains ("example.com") are not sentence ends either.
const TLDS: &[&str] = &["com", "org", "net", "io", "edu", "gov", "co"];

/// Largest byte index at or below `index` that sits on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Whether the terminator candidate at `match_start` belongs to an
/// abbreviation, an initial, or a domain name rather than a sentence end.
fn is_abbreviation(text: &str, match_start: usize) -> bool {
    let before = &text[..=match_start];
    let word_start = before
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8());
    let word = &text[word_start..=match_start];
    let lower = word.to_lowercase();

    // Initials like "J." or dotted forms like "U.S".
    let letters: String = word.chars().filter(|c| c.is_alphabetic()).collect();
    if !letters.is_empty()
        && letters.len() <= 2
        && word.chars().next().is_some_and(|c| c.is_uppercase() || letters.len() == 1)
    {
        return true;
    }

    ABBREVIATIONS.contains(&lower.as_str()) || TLDS.contains(&lower.as_str())
}

/// Best cut position inside `window`, searching the trailing 30% first.
///
/// Tier order: sentence end, paragraph break, heading line, single
/// newline, then (anywhere) the last word boundary, then the full window.
fn find_last_boundary(window: &str) -> usize {
    // Boundaries in the leading 70% would discard too much of the window.
    let min_pos = window.len().saturating_mul(7) / 10;

    let mut best_sentence: Option<usize> = None;
    for m in SENTENCE_RE.find_iter(window) {
        let cut = m.start() + 2; // one byte for the guard char, one for the terminator
        if cut >= min_pos && !is_abbreviation(window, m.start()) {
            best_sentence = Some(cut);
        }
    }
    if let Some(pos) = best_sentence {
        return pos;
    }

    if let Some(pos) = window.rfind("\n\n") {
        if pos >= min_pos {
            return pos;
        }
    }

    if let Some(pos) = window.rfind("\n#") {
        if pos >= min_pos {
            return pos;
        }
    }

    if let Some(pos) = window.rfind('\n') {
        if pos >= min_pos {
            return pos;
        }
    }

    if let Some(pos) = window.rfind(|c: char| c.is_whitespace()) {
        if pos > 0 {
            return pos;
        }
    }

    window.len()
}

/// Returns a prefix of at most `max_chars` bytes ending at the best
/// natural boundary. Text that already fits is returned unchanged. The
/// cut never lands inside a multi-byte codepoint.
pub fn truncate_at_boundary(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }

    let safe_end = floor_char_boundary(text, max_chars);
    if safe_end == 0 {
        return "";
    }

    let window = &text[..safe_end];
    let pos = find_last_boundary(window);
    &text[..pos]
}

/// Splits `text` into overlapping chunks cut at natural boundaries.
///
/// Each chunk spans at most `chunk_size` bytes. The next chunk starts
/// `overlap` bytes before the previous cut, advanced rightward to the
/// next word boundary so no chunk opens mid-word. Every input byte is
/// covered by at least one chunk.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let remaining = text.len() - start;
        if remaining <= chunk_size {
            chunks.push(text[start..].to_string());
            break;
        }

        let window_end = floor_char_boundary(text, start + chunk_size);
        let window = &text[start..window_end];
        let mut boundary = find_last_boundary(window);
        if boundary == 0 {
            boundary = window.len();
        }
        let actual_end = start + boundary;
        chunks.push(text[start..actual_end].to_string());

        let mut next = floor_char_boundary(text, actual_end.saturating_sub(overlap));
        if let Some(off) = text[next..actual_end].find(|c: char| c.is_whitespace()) {
            let ws = next + off;
            let after = text[ws..]
                .char_indices()
                .find(|(_, c)| !c.is_whitespace())
                .map(|(i, _)| ws + i)
                .unwrap_or(ws);
            if after < actual_end {
                next = after;
            }
        }

        // Forward progress even when the overlap window has no whitespace.
        start = if next <= start { actual_end } else { next };
    }

    chunks
}
