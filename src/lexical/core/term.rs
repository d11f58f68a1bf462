//! Terms and per-term dictionary entries.

use std::fmt;

/// A (field, text) pair. Terms order by field name, then by the bytes of
/// their text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term {
    field: String,
    text: String,
}

impl Term {
    pub fn new<F: Into<String>, T: Into<String>>(field: F, text: T) -> Self {
        Term {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}

/// Dictionary entry for one term of one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermInfo {
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Start of the term's postings in `.frq`.
    pub frq_ptr: u64,
    /// Start of the term's positions in `.prx`.
    pub prx_ptr: u64,
    /// Distance from `frq_ptr` to the term's skip data. Zero when the term
    /// has fewer postings than the skip interval.
    pub skip_offset: u32,
}

impl TermInfo {
    pub fn new(doc_freq: u32, frq_ptr: u64, prx_ptr: u64, skip_offset: u32) -> Self {
        TermInfo {
            doc_freq,
            frq_ptr,
            prx_ptr,
            skip_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_ordering() {
        let mut terms = vec![
            Term::new("b", "a"),
            Term::new("a", "b"),
            Term::new("a", "B"),
            Term::new("a", "ab"),
        ];
        terms.sort();
        let rendered: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, vec!["a:B", "a:ab", "a:b", "b:a"]);
    }
}
