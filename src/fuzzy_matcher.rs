use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Typo-tolerant matcher for prompt words against catalog vocabulary
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) for considering two strings as matches
    pub similarity_threshold: f64,
    /// Words shorter than this only ever match exactly
    pub min_length: usize,
    /// Whether to normalize strings before comparison
    pub normalize: bool,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.93,
            min_length: 5,
            normalize: true,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
            ..Self::default()
        }
    }

    /// Normalize a string for fuzzy matching
    /// - Converts to lowercase
    /// - Removes punctuation
    /// - Collapses whitespace
    pub fn normalize_string(&self, s: &str) -> String {
        if !self.normalize {
            return s.to_lowercase();
        }

        let stripped: String = s
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();

        WHITESPACE.replace_all(stripped.trim(), " ").to_string()
    }

    /// Jaro-Winkler similarity of the normalized strings, 0.0-1.0
    pub fn similarity(&self, s1: &str, s2: &str) -> f64 {
        let norm1 = self.normalize_string(s1);
        let norm2 = self.normalize_string(s2);
        jaro_winkler(&norm1, &norm2)
    }

    pub fn is_match(&self, s1: &str, s2: &str) -> bool {
        if s1.chars().count() < self.min_length || s2.chars().count() < self.min_length {
            return self.normalize_string(s1) == self.normalize_string(s2);
        }
        self.similarity(s1, s2) >= self.similarity_threshold
    }

    /// Best candidate for `word`, if any clears the threshold.
    ///
    /// Ties keep the earliest candidate, so callers control precedence through
    /// ordering.
    pub fn find_best_match<'a, I>(&self, word: &str, candidates: I) -> Option<(&'a str, f64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(&'a str, f64)> = None;
        for candidate in candidates {
            if !self.is_match(word, candidate) {
                continue;
            }
            let score = self.similarity(word, candidate);
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((candidate, score)),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_string() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.normalize_string("  Chat   Toxicity! "), "chat toxicity");
    }

    #[test]
    fn test_typos_match() {
        let matcher = FuzzyMatcher::default();
        assert!(matcher.is_match("toxicty", "toxicity"));
        assert!(matcher.is_match("sentimnet", "sentiment"));
        assert!(!matcher.is_match("toxicity", "sentiment"));
    }

    #[test]
    fn test_short_words_need_exact_match() {
        let matcher = FuzzyMatcher::default();
        assert!(!matcher.is_match("pek", "peak"));
        assert!(matcher.is_match("Peak", "peak"));
    }

    #[test]
    fn test_find_best_match() {
        let matcher = FuzzyMatcher::default();
        let candidates = ["sentiment", "toxicity", "viewership"];
        let (best, score) = matcher
            .find_best_match("viewrship", candidates.iter().copied())
            .unwrap();
        assert_eq!(best, "viewership");
        assert!(score >= 0.93);

        assert!(matcher
            .find_best_match("category", candidates.iter().copied())
            .is_none());
    }
}
