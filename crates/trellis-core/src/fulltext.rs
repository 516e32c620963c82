//! # Full-Text Matching
//!
//! Tokenizer and query matcher used by stores for full-text indexes.
//!
//! Query syntax:
//! - whitespace separated terms, all of which must match
//! - `key:term` restricts a term to entries written under `key`
//! - a trailing `*` turns a term into a prefix match
//!
//! Matching is case-insensitive over alphanumeric tokens.

/// Split text into lower-case alphanumeric tokens.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    key: Option<String>,
    text: String,
    prefix: bool,
}

impl Term {
    fn matches(&self, key: &str, value: &str) -> bool {
        if self.key.as_deref().is_some_and(|k| k != key) {
            return false;
        }
        tokenize(value).iter().any(|token| {
            if self.prefix {
                token.starts_with(&self.text)
            } else {
                *token == self.text
            }
        })
    }
}

/// A parsed full-text query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulltextQuery {
    terms: Vec<Term>,
}

impl FulltextQuery {
    /// Parse a query expression. Terms that reduce to nothing are dropped.
    #[must_use]
    pub fn parse(expression: &str) -> Self {
        let terms = expression
            .split_whitespace()
            .filter_map(|raw| {
                let (key, rest) = match raw.split_once(':') {
                    Some((k, r)) if !k.is_empty() => (Some(k.to_string()), r),
                    _ => (None, raw),
                };
                let prefix = rest.ends_with('*');
                let text = rest.trim_end_matches('*').to_lowercase();
                if text.is_empty() {
                    return None;
                }
                Some(Term { key, text, prefix })
            })
            .collect();
        Self { terms }
    }

    /// True if the query has no usable terms; such a query matches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Check whether one element's `(key, value)` entries satisfy every term.
    pub fn matches<'a>(&self, entries: impl Iterator<Item = (&'a str, &'a str)> + Clone) -> bool {
        !self.is_empty()
            && self
                .terms
                .iter()
                .all(|term| entries.clone().any(|(k, v)| term.matches(k, v)))
    }
}
