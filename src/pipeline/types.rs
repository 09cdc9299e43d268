//! Shared types for the extraction pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference back to the utterance a candidate was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// A proposed ticket awaiting deduplication and classification.
///
/// Created by the extractor; its terminal state is published, merged,
/// or suppressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketCandidate {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub suggested_type: Option<String>,
    pub suggested_priority: Option<String>,
    /// Extraction confidence in [0, 1]; already clamped and filtered.
    pub confidence: f32,
    pub sources: Vec<SourceRef>,
}

/// Duplicate resolver decision for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No known ticket matches — admit as new.
    New,
    /// Matches an open ticket — append context there instead of creating.
    Merge { ticket_id: String, score: f32 },
    /// Matches a closed ticket — do not reopen, do not create.
    Suppress { ticket_id: String, score: f32 },
}

impl Resolution {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Merge { .. } => "merge",
            Self::Suppress { .. } => "suppress",
        }
    }
}

/// What finally happened to a candidate.
#[derive(Debug, Clone)]
pub enum Disposition {
    Published { ticket_id: String },
    Merged { ticket_id: String },
    Suppressed { ticket_id: String },
    Failed { reason: String },
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::Merged { .. } => "merged",
            Self::Suppressed { .. } => "suppressed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one candidate's trip through resolve/classify/publish.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub candidate_id: Uuid,
    pub title: String,
    pub disposition: Disposition,
}

/// Result of processing one window.
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub window_id: Uuid,
    pub outcomes: Vec<CandidateOutcome>,
    pub processed_at: DateTime<Utc>,
}

impl WindowReport {
    pub fn published_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.disposition, Disposition::Published { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_labels() {
        assert_eq!(Resolution::New.label(), "new");
        assert_eq!(
            Resolution::Merge {
                ticket_id: "AI-1".into(),
                score: 0.9
            }
            .label(),
            "merge"
        );
        assert_eq!(
            Resolution::Suppress {
                ticket_id: "AI-2".into(),
                score: 0.95
            }
            .label(),
            "suppress"
        );
    }

    #[test]
    fn report_counts_published() {
        let report = WindowReport {
            window_id: Uuid::new_v4(),
            outcomes: vec![
                CandidateOutcome {
                    candidate_id: Uuid::new_v4(),
                    title: "a".into(),
                    disposition: Disposition::Published {
                        ticket_id: "AI-1".into(),
                    },
                },
                CandidateOutcome {
                    candidate_id: Uuid::new_v4(),
                    title: "b".into(),
                    disposition: Disposition::Merged {
                        ticket_id: "AI-2".into(),
                    },
                },
            ],
            processed_at: Utc::now(),
        };
        assert_eq!(report.published_count(), 1);
    }
}
