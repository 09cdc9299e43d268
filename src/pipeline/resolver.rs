//! Duplicate resolution against the working set.

use std::sync::Arc;

use tracing::debug;

use crate::pipeline::similarity::Similarity;
use crate::pipeline::types::Resolution;
use crate::store::fingerprint::Fingerprint;
use crate::store::working_set::TicketRecord;

/// Classifies candidates as New, Merge, or Suppress.
///
/// Deterministic for a fixed working-set snapshot and similarity
/// function — the pipeline's only non-determinism lives upstream in the
/// extractor.
pub struct DuplicateResolver {
    similarity: Arc<dyn Similarity>,
    threshold: f32,
}

impl DuplicateResolver {
    pub fn new(similarity: Arc<dyn Similarity>, threshold: f32) -> Self {
        Self {
            similarity,
            threshold,
        }
    }

    /// Resolve a candidate fingerprint against a working-set snapshot.
    ///
    /// The best match at or above the threshold decides the outcome:
    /// open record → Merge, closed record → Suppress, none → New.
    /// Score ties break toward the most-recently-updated record.
    pub fn resolve(&self, fingerprint: &Fingerprint, records: &[TicketRecord]) -> Resolution {
        let mut best: Option<(&TicketRecord, f32)> = None;

        for record in records {
            let score = self.similarity.score(fingerprint, &record.fingerprint);
            if score < self.threshold {
                continue;
            }
            best = match best {
                None => Some((record, score)),
                Some((current, current_score)) => {
                    if score > current_score
                        || (score == current_score && record.updated_at > current.updated_at)
                    {
                        Some((record, score))
                    } else {
                        Some((current, current_score))
                    }
                }
            };
        }

        match best {
            None => Resolution::New,
            Some((record, score)) => {
                debug!(
                    fingerprint = %fingerprint.key(),
                    ticket_id = %record.ticket_id,
                    score,
                    open = record.status.is_open(),
                    "Candidate matched existing ticket"
                );
                if record.status.is_open() {
                    Resolution::Merge {
                        ticket_id: record.ticket_id.clone(),
                        score,
                    }
                } else {
                    Resolution::Suppress {
                        ticket_id: record.ticket_id.clone(),
                        score,
                    }
                }
            }
        }
    }
}
