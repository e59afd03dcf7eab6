//! Prompt tokenization
//!
//! Prompts and catalog vocabulary go through the same normalization, so phrase
//! matching is a plain comparison of stemmed token sequences. Every token can be
//! claimed once; later grounding passes only see what earlier ones left.

use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

lazy_static! {
    static ref QUOTED: Regex = Regex::new(r#"["\x{201C}\x{201D}]([^"\x{201C}\x{201D}]*)["\x{201C}\x{201D}]"#).unwrap();
    static ref LETTER_HYPHEN: Regex = Regex::new(r"([a-z])-([a-z])").unwrap();
}

pub const LITERAL_PREFIX: &str = "qlit";

/// Replace double-quoted literals with `qlitN` markers.
pub fn extract_literals(prompt: &str) -> (String, Vec<String>) {
    let mut literals = Vec::new();
    let replaced = QUOTED.replace_all(prompt, |caps: &regex::Captures| {
        let marker = format!(" {}{} ", LITERAL_PREFIX, literals.len());
        literals.push(caps[1].trim().to_string());
        marker
    });
    (replaced.into_owned(), literals)
}

/// Lowercase, split letter-hyphen-letter, and drop everything but letters,
/// digits, hyphens and decimal points.
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut split = lower;
    // Twice, so alternating runs like "a-b-c" are fully split.
    for _ in 0..2 {
        split = LETTER_HYPHEN.replace_all(&split, "$1 $2").into_owned();
    }

    let chars: Vec<char> = split.chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        let keep = match c {
            'a'..='z' | '0'..='9' | '-' => true,
            '.' => {
                let prev = i > 0 && chars[i - 1].is_ascii_digit();
                let next = chars.get(i + 1).map(|n| n.is_ascii_digit()).unwrap_or(false);
                prev && next
            }
            _ => false,
        };
        out.push(if keep { *c } else { ' ' });
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Crude plural folding: "viewers" and "viewer" compare equal.
pub fn stem(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Normalized, stemmed tokens of a vocabulary phrase.
pub fn phrase_stems(phrase: &str) -> Vec<String> {
    normalize(phrase).split(' ').filter(|t| !t.is_empty()).map(stem).collect()
}

#[derive(Debug, Clone)]
pub struct PromptTokens {
    pub words: Vec<String>,
    stems: Vec<String>,
    consumed: Vec<bool>,
    joined: String,
    offsets: Vec<usize>,
}

impl PromptTokens {
    pub fn new(normalized: &str) -> Self {
        let words: Vec<String> = normalized.split_whitespace().map(|w| w.to_string()).collect();
        let stems = words.iter().map(|w| stem(w)).collect();
        let mut offsets = Vec::with_capacity(words.len());
        let mut pos = 0;
        for word in &words {
            offsets.push(pos);
            pos += word.len() + 1;
        }
        Self {
            consumed: vec![false; words.len()],
            joined: words.join(" "),
            words,
            stems,
            offsets,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Space-joined words; byte offsets map back through [`Self::token_range`].
    pub fn text(&self) -> &str {
        &self.joined
    }

    pub fn is_consumed(&self, index: usize) -> bool {
        self.consumed.get(index).copied().unwrap_or(true)
    }

    pub fn is_free(&self, range: &Range<usize>) -> bool {
        range.end <= self.len() && range.clone().all(|i| !self.consumed[i])
    }

    pub fn consume(&mut self, range: Range<usize>) {
        for i in range {
            if let Some(slot) = self.consumed.get_mut(i) {
                *slot = true;
            }
        }
    }

    pub fn stem_at(&self, index: usize) -> &str {
        &self.stems[index]
    }

    /// Tokens covered by the byte span `[start, end)` of [`Self::text`].
    pub fn token_range(&self, start: usize, end: usize) -> Range<usize> {
        let first = self.offsets.iter().rposition(|&o| o <= start).unwrap_or(0);
        let last = self.offsets.iter().rposition(|&o| o < end).map(|i| i + 1).unwrap_or(first);
        first..last.max(first)
    }

    /// Whether `phrase` (already stemmed) occurs at `start` over free tokens.
    pub fn matches_at(&self, start: usize, phrase: &[String]) -> bool {
        let range = start..start + phrase.len();
        !phrase.is_empty()
            && self.is_free(&range)
            && phrase.iter().zip(range).all(|(p, i)| &self.stems[i] == p)
    }

    /// Start positions of every free occurrence of `phrase`.
    pub fn find_all(&self, phrase: &[String]) -> Vec<usize> {
        if phrase.is_empty() || phrase.len() > self.len() {
            return Vec::new();
        }
        (0..=self.len() - phrase.len())
            .filter(|&start| self.matches_at(start, phrase))
            .collect()
    }

    /// Indices of free tokens, in order.
    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| !self.consumed[i]).collect()
    }

    /// Literal index if the token is a `qlitN` marker.
    pub fn literal_at(&self, index: usize) -> Option<usize> {
        self.words
            .get(index)?
            .strip_prefix(LITERAL_PREFIX)?
            .parse()
            .ok()
    }
}
