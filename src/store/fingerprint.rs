//! Candidate fingerprints for duplicate detection.
//!
//! A fingerprint is the normalized title plus a set of salient keyphrases
//! drawn from title and body. Case, punctuation, and whitespace variants
//! of the same title produce identical fingerprints.

use std::collections::BTreeSet;

/// Words too common to distinguish tickets.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "before", "but", "by", "can", "could", "do", "for",
    "from", "has", "have", "if", "in", "into", "is", "it", "its", "lets", "need", "needs", "of",
    "on", "or", "our", "please", "should", "so", "that", "the", "their", "then", "this", "to",
    "up", "we", "will", "with", "would", "you",
];

/// Normalized representation of a ticket candidate or record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    normalized_title: String,
    keyphrases: BTreeSet<String>,
}

impl Fingerprint {
    /// Build a fingerprint from a title and body.
    pub fn of(title: &str, body: &str) -> Self {
        let normalized_title = normalize(title);
        let mut keyphrases: BTreeSet<String> = tokens(&normalized_title).collect();
        keyphrases.extend(tokens(&normalize(body)));
        Self {
            normalized_title,
            keyphrases,
        }
    }

    /// Stable key for working-set storage and bucket selection.
    pub fn key(&self) -> &str {
        &self.normalized_title
    }

    pub fn normalized_title(&self) -> &str {
        &self.normalized_title
    }

    pub fn keyphrases(&self) -> &BTreeSet<String> {
        &self.keyphrases
    }

    /// Tokens of the normalized title (stopwords removed).
    pub fn title_tokens(&self) -> BTreeSet<String> {
        tokens(&self.normalized_title).collect()
    }
}

/// Lowercase, strip punctuation to spaces, collapse whitespace.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim_end().to_string()
}

fn tokens(normalized: &str) -> impl Iterator<Item = String> + '_ {
    normalized
        .split_whitespace()
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(t))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_whitespace_variants_match() {
        let a = Fingerprint::of("Fix the Login Bug", "");
        let b = Fingerprint::of("fix   the login bug", "");
        let c = Fingerprint::of("FIX THE LOGIN BUG!", "");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn punctuation_stripped_from_key() {
        let fp = Fingerprint::of("Fix login-bug: retry fails?", "");
        assert_eq!(fp.key(), "fix login bug retry fails");
    }

    #[test]
    fn keyphrases_skip_stopwords_and_short_tokens() {
        let fp = Fingerprint::of("Fix the login bug", "We should do it by Friday");
        assert!(fp.keyphrases().contains("login"));
        assert!(fp.keyphrases().contains("friday"));
        assert!(!fp.keyphrases().contains("the"));
        assert!(!fp.keyphrases().contains("we"));
        assert!(!fp.keyphrases().contains("do"));
    }

    #[test]
    fn body_contributes_keyphrases_but_not_key() {
        let a = Fingerprint::of("Fix login bug", "crash on submit");
        let b = Fingerprint::of("Fix login bug", "different details");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.keyphrases(), b.keyphrases());
    }

    #[test]
    fn different_titles_differ() {
        let a = Fingerprint::of("Fix login bug", "");
        let b = Fingerprint::of("Add dark mode", "");
        assert_ne!(a.key(), b.key());
    }
}
