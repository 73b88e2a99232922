// Text Processing Service
// Tokenisation helpers shared by the metrics engine and the batch orchestrator

use regex::Regex;
use std::sync::OnceLock;

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^.!?]+[.!?]+").expect("sentence regex"))
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\n+").expect("paragraph regex"))
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("word regex"))
}

/// Collapse every whitespace run (newlines included) into one space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Runs of non-terminal characters closed by `.`, `!` or `?`.
/// Text with no terminal punctuation yields no sentences here.
pub fn match_sentences(text: &str) -> Vec<&str> {
    sentence_re().find_iter(text).map(|m| m.as_str()).collect()
}

/// Like [`match_sentences`], but falls back to the whole text as one sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let sentences = match_sentences(text);
    if sentences.is_empty() {
        vec![text]
    } else {
        sentences
    }
}

/// Paragraphs separated by two or more consecutive newlines; blank ones dropped.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    paragraph_re()
        .split(text)
        .filter(|p| !p.trim().is_empty())
        .collect()
}

/// Whitespace-delimited token count.
pub fn whitespace_word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Lower-cased `\w+` tokens (Unicode word characters, so accented letters stay inside words).
pub fn lowercase_words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    word_re()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Split into consecutive slices of at most `chunk_chars` characters.
/// Boundaries fall on char boundaries; the last chunk may be shorter.
pub fn chunk_by_chars(text: &str, chunk_chars: usize) -> Vec<&str> {
    let chunk_chars = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut count = 0usize;

    for (idx, _) in text.char_indices() {
        if count == chunk_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(&text[start..]);
    }

    chunks
}

/// First `max_chars` characters of `text`.
pub fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Short excerpt with a trailing ellipsis, used for fallback heatmap rows.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    format!("{}...", take_chars(text, max_chars))
}
