//! Similarity scoring between fingerprints.
//!
//! The matching strategy sits behind a capability trait so it can be
//! swapped (lexical vs. embedding-based) without touching the resolver's
//! decision logic.

use std::collections::BTreeSet;

use crate::store::fingerprint::Fingerprint;

/// Scores how alike two fingerprints are, in [0, 1].
pub trait Similarity: Send + Sync {
    fn score(&self, a: &Fingerprint, b: &Fingerprint) -> f32;
}

/// Token-overlap similarity: Jaccard over title tokens blended with
/// Jaccard over keyphrases. Deterministic and cheap; identical
/// normalized titles always score 1.0.
pub struct LexicalSimilarity {
    title_weight: f32,
}

impl Default for LexicalSimilarity {
    fn default() -> Self {
        Self { title_weight: 0.6 }
    }
}

impl LexicalSimilarity {
    pub fn new(title_weight: f32) -> Self {
        Self {
            title_weight: title_weight.clamp(0.0, 1.0),
        }
    }
}

impl Similarity for LexicalSimilarity {
    fn score(&self, a: &Fingerprint, b: &Fingerprint) -> f32 {
        if a.normalized_title() == b.normalized_title() {
            return 1.0;
        }
        let title = jaccard(&a.title_tokens(), &b.title_tokens());
        let phrases = jaccard(a.keyphrases(), b.keyphrases());
        self.title_weight * title + (1.0 - self.title_weight) * phrases
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}
