//! Analyzer trait and the analyzers shipped with the crate.

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;
use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

/// Turns field text into tokens.
pub trait Analyzer: Send + Sync + Debug {
    /// Analyze `text` belonging to `field`.
    fn analyze(&self, field: &str, text: &str) -> Result<TokenStream>;

    /// Name used in diagnostics.
    fn name(&self) -> &'static str;
}

/// Splits on Unicode word boundaries and lowercases each word.
#[derive(Debug, Clone)]
pub struct StandardAnalyzer {
    lowercase: bool,
}

impl StandardAnalyzer {
    pub fn new() -> Self {
        StandardAnalyzer { lowercase: true }
    }

    /// Keep the original case of every token.
    pub fn case_sensitive() -> Self {
        StandardAnalyzer { lowercase: false }
    }
}

impl Default for StandardAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, _field: &str, text: &str) -> Result<TokenStream> {
        let tokens: Vec<Token> = text
            .unicode_word_indices()
            .map(|(start, word)| {
                let term = if self.lowercase {
                    word.to_lowercase()
                } else {
                    word.to_string()
                };
                Token::new(term, start, start + word.len())
            })
            .collect();
        Ok(Box::new(tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}

/// Splits on whitespace, leaving tokens untouched.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceAnalyzer;

impl WhitespaceAnalyzer {
    pub fn new() -> Self {
        WhitespaceAnalyzer
    }
}

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, _field: &str, text: &str) -> Result<TokenStream> {
        let mut tokens = Vec::new();
        let mut start: Option<usize> = None;
        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    tokens.push(Token::new(&text[s..i], s, i));
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            tokens.push(Token::new(&text[s..], s, text.len()));
        }
        Ok(Box::new(tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "whitespace"
    }
}

/// Dispatches to a per-field analyzer, falling back to a default.
#[derive(Debug, Clone)]
pub struct PerFieldAnalyzer {
    default: Arc<dyn Analyzer>,
    fields: AHashMap<String, Arc<dyn Analyzer>>,
}

impl PerFieldAnalyzer {
    pub fn new(default: Arc<dyn Analyzer>) -> Self {
        PerFieldAnalyzer {
            default,
            fields: AHashMap::new(),
        }
    }

    pub fn add_analyzer<S: Into<String>>(&mut self, field: S, analyzer: Arc<dyn Analyzer>) {
        self.fields.insert(field.into(), analyzer);
    }

    pub fn get_analyzer(&self, field: &str) -> &Arc<dyn Analyzer> {
        self.fields.get(field).unwrap_or(&self.default)
    }
}

impl Analyzer for PerFieldAnalyzer {
    fn analyze(&self, field: &str, text: &str) -> Result<TokenStream> {
        self.get_analyzer(field).analyze(field, text)
    }

    fn name(&self) -> &'static str {
        "per_field"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(stream: TokenStream) -> Vec<String> {
        stream.map(|t| t.text).collect()
    }

    #[test]
    fn test_standard_analyzer() {
        let analyzer = StandardAnalyzer::new();
        let tokens: Vec<Token> = analyzer.analyze("f", "The Quick-brown fox.").unwrap().collect();
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["the", "quick", "brown", "fox"]);
        assert_eq!((tokens[1].start_offset, tokens[1].end_offset), (4, 9));
        assert!(tokens.iter().all(|t| t.position_increment == 1));
    }

    #[test]
    fn test_whitespace_analyzer_offsets() {
        let analyzer = WhitespaceAnalyzer::new();
        let tokens: Vec<Token> = analyzer.analyze("f", "  a  Bc d ").unwrap().collect();
        assert_eq!(
            tokens,
            vec![Token::new("a", 2, 3), Token::new("Bc", 5, 7), Token::new("d", 8, 9)]
        );
        assert_eq!(analyzer.analyze("f", "").unwrap().count(), 0);
    }

    #[test]
    fn test_per_field_analyzer() {
        let mut analyzer = PerFieldAnalyzer::new(Arc::new(StandardAnalyzer::new()));
        analyzer.add_analyzer("id", Arc::new(WhitespaceAnalyzer::new()));
        assert_eq!(texts(analyzer.analyze("id", "AB-1").unwrap()), vec!["AB-1"]);
        assert_eq!(
            texts(analyzer.analyze("body", "AB-1").unwrap()),
            vec!["ab", "1"]
        );
    }
}
