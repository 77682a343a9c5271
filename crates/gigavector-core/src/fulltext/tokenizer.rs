//! Language-aware tokenization for the full-text index.

use super::stemmer;
use super::stopwords;
use super::Language;

/// A token produced by [`Tokenizer::tokenize`].
///
/// `position` is the token's index in the raw token stream, assigned
/// before stopword removal so phrase adjacency survives dropped words the
/// same way for documents and queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Normalized (lowercased, stemmed) term.
    pub term: String,
    /// Position in the original token stream.
    pub position: u32,
}

/// Splits text on non-alphanumeric boundaries, lowercases, removes
/// stopwords and optionally stems.
#[derive(Debug, Clone, Copy)]
pub struct Tokenizer {
    language: Language,
    stemming: bool,
}

impl Tokenizer {
    /// Creates a tokenizer for the given language.
    #[must_use]
    pub fn new(language: Language, stemming: bool) -> Self {
        Self { language, stemming }
    }

    /// The tokenizer's language.
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    /// Tokenizes `text` and also returns the raw token count (the BM25
    /// document length, counted before stopword removal).
    #[must_use]
    pub fn tokenize_with_length(&self, text: &str) -> (Vec<Token>, u32) {
        let tokens = self.tokenize(text);
        let raw_len = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .count() as u32;
        (tokens, raw_len)
    }

    /// Tokenizes `text` into normalized terms with positions.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position: u32 = 0;
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() {
                continue;
            }
            let lowered = raw.to_lowercase();
            let current = position;
            position += 1;
            if stopwords::is_stopword(self.language, &lowered) {
                continue;
            }
            let term = if self.stemming {
                stemmer::stem(self.language, &lowered)
            } else {
                lowered
            };
            tokens.push(Token {
                term,
                position: current,
            });
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn english() -> Tokenizer {
        Tokenizer::new(Language::English, true)
    }

    #[test]
    fn test_splits_and_lowercases() {
        let tokens = Tokenizer::new(Language::English, false).tokenize("Hello, World! 42");
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["hello", "world", "42"]);
    }

    #[test]
    fn test_stopwords_removed_but_positions_kept() {
        let tokens = english().tokenize("the quick brown fox");
        let pairs: Vec<(&str, u32)> = tokens.iter().map(|t| (t.term.as_str(), t.position)).collect();
        // "the" is dropped, yet "quick" keeps position 1.
        assert_eq!(pairs, vec![("quick", 1), ("brown", 2), ("fox", 3)]);
    }

    #[test]
    fn test_stemming_collapses_inflections() {
        let a = english().tokenize("searching documents");
        let b = english().tokenize("searched document");
        assert_eq!(a[0].term, b[0].term);
        assert_eq!(a[1].term, b[1].term);
    }

    #[test]
    fn test_german_stopwords() {
        let tokens = Tokenizer::new(Language::German, false).tokenize("der schnelle Fuchs");
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["schnelle", "fuchs"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(english().tokenize("").is_empty());
        assert!(english().tokenize("  ,,, !!").is_empty());
    }
}
