//! Evidence snippet matching against the note text
//!
//! Model-returned snippets are accepted only when they can be located in
//! the notes under a tolerant normalization. Three tiers, in order:
//! exact substring, sentence-majority, then in-order meaningful words.

use regex::Regex;
use std::sync::OnceLock;

/// Fraction of sentences that must match in tier two
pub const SENTENCE_MATCH_RATIO: f64 = 0.60;

/// Fraction of meaningful words that must match in order in tier three
pub const WORD_MATCH_RATIO: f64 = 0.70;

/// Sentences at or below this length are ignored in tier two
pub const MIN_SENTENCE_LEN: usize = 5;

/// Words at or below this length are ignored in tier three
pub const MIN_WORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "was", "were", "with", "without", "that", "this", "then", "from", "into",
    "onto", "over", "under", "upon", "there", "which", "while", "after", "before", "during",
    "their", "them", "they", "been", "being", "have", "has", "had", "not", "for", "are",
];

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]").expect("static regex"))
}

/// Normalize text for matching: lowercase, expand literal `\n`, strip
/// ellipses and bracketed inserts, normalize dash/quote/apostrophe
/// variants, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mut s = text.to_lowercase();
    s = s.replace("\\n", " ");
    s = s.replace("...", " ").replace('\u{2026}', " ");
    s = bracket_re().replace_all(&s, " ").into_owned();
    s = s
        .replace(['\u{2013}', '\u{2014}', '\u{2212}'], "-")
        .replace(['\u{201c}', '\u{201d}', '\u{201e}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Matcher over one note body; normalizes the note once
pub struct NoteMatcher {
    normalized: String,
}

impl NoteMatcher {
    pub fn new(note_text: &str) -> Self {
        Self {
            normalized: normalize(note_text),
        }
    }

    /// Accept a snippet if (a) its normalized form is a substring, or
    /// (b) at least 60% of its sentences (length > 5) are substrings, or
    /// (c) at least 70% of its meaningful words appear in order.
    pub fn matches(&self, snippet: &str) -> bool {
        let snippet = normalize(snippet);
        if snippet.is_empty() {
            return false;
        }

        if self.normalized.contains(&snippet) {
            return true;
        }

        if self.sentence_match(&snippet) {
            return true;
        }

        self.word_match(&snippet)
    }

    fn sentence_match(&self, snippet: &str) -> bool {
        let sentences: Vec<&str> = snippet
            .split(['.', '!', '?', ';'])
            .map(str::trim)
            .filter(|s| s.len() > MIN_SENTENCE_LEN)
            .collect();
        if sentences.is_empty() {
            return false;
        }

        let matched = sentences
            .iter()
            .filter(|s| self.normalized.contains(*s))
            .count();
        matched as f64 / sentences.len() as f64 >= SENTENCE_MATCH_RATIO
    }

    fn word_match(&self, snippet: &str) -> bool {
        let words: Vec<&str> = snippet
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| w.len() > MIN_WORD_LEN && !is_stop_word(w))
            .collect();
        if words.is_empty() {
            return false;
        }

        // Words must appear in order: each search resumes past the
        // previous match.
        let mut position = 0usize;
        let mut matched = 0usize;
        for word in &words {
            if let Some(found) = self.normalized[position..].find(word) {
                matched += 1;
                position += found + word.len();
            }
        }

        matched as f64 / words.len() as f64 >= WORD_MATCH_RATIO
    }
}
