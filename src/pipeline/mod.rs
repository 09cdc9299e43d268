//! The extraction pipeline.
//!
//! Flow per window: extract candidates (LLM, non-deterministic) → for
//! each candidate: resolve against the working set → classify
//! properties → publish or merge. Windows touching the same thread are
//! serialized; everything else may run concurrently. Resolve+publish
//! for a candidate runs under its fingerprint's bucket guard.

pub mod classifier;
pub mod extractor;
pub mod publisher;
pub mod resolver;
pub mod similarity;
pub mod types;

pub use classifier::PropertyClassifier;
pub use extractor::CandidateExtractor;
pub use publisher::TicketPublisher;
pub use resolver::DuplicateResolver;
pub use similarity::{LexicalSimilarity, Similarity};
pub use types::{CandidateOutcome, Disposition, Resolution, TicketCandidate, WindowReport};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{AllowedValues, PipelineConfig};
use crate::error::{Error, TrackerError};
use crate::ingest::window::TranscriptWindow;
use crate::llm::provider::LlmProvider;
use crate::store::fingerprint::Fingerprint;
use crate::store::working_set::{TicketRecord, WorkingSet};
use crate::tracker::Tracker;

/// The assembled pipeline. "Process one window" is the single operation
/// the hosting shell consumes.
pub struct Pipeline {
    extractor: CandidateExtractor,
    resolver: DuplicateResolver,
    classifier: PropertyClassifier,
    publisher: TicketPublisher,
    working_set: Arc<WorkingSet>,
    tracker: Arc<dyn Tracker>,
    /// Per-thread serialization: windows from the same thread process
    /// in order to preserve chronological extraction.
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tracker: Arc<dyn Tracker>,
        similarity: Arc<dyn Similarity>,
        allowed: AllowedValues,
        config: PipelineConfig,
    ) -> Arc<Self> {
        let working_set = WorkingSet::new();
        let extractor = CandidateExtractor::new(
            llm,
            allowed.clone(),
            config.min_confidence,
            config.inference_timeout,
            config.extract_retry.clone(),
        );
        let resolver = DuplicateResolver::new(similarity, config.similarity_threshold);
        let classifier = PropertyClassifier::new(allowed);
        let publisher = TicketPublisher::new(
            tracker.clone(),
            working_set.clone(),
            config.publish_retry.clone(),
        );

        Arc::new(Self {
            extractor,
            resolver,
            classifier,
            publisher,
            working_set,
            tracker,
            thread_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn working_set(&self) -> &Arc<WorkingSet> {
        &self.working_set
    }

    /// Seed (or re-seed) the working set from the tracker's open tickets.
    pub async fn refresh_working_set(&self) -> Result<usize, TrackerError> {
        let tickets = self.tracker.open_tickets().await?;
        let records = tickets
            .into_iter()
            .map(|t| TicketRecord {
                fingerprint: Fingerprint::of(&t.title, ""),
                ticket_id: t.id,
                title: t.title,
                issue_type: t.issue_type,
                priority: t.priority,
                created_at: t.created_at,
                updated_at: t.updated_at,
                status: t.status,
            })
            .collect();
        Ok(self.working_set.seed(records).await)
    }

    /// Process one transcript window end to end.
    ///
    /// Extraction failure defers the whole window (`Error::Extract`);
    /// per-candidate failures are captured in the report and never
    /// abort the remaining candidates.
    pub async fn process_window(&self, window: TranscriptWindow) -> Result<WindowReport, Error> {
        let thread_lock = self.thread_lock(&window).await;
        let _serialized = thread_lock.lock().await;

        info!(
            window_id = %window.id,
            channel = %window.channel,
            utterances = window.utterances.len(),
            "Processing window"
        );

        // The long inference call runs before any working-set guard is
        // taken.
        let candidates = self.extractor.extract(&window).await?;
        info!(
            window_id = %window.id,
            candidates = candidates.len(),
            "Extraction complete"
        );

        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            outcomes.push(self.process_candidate(candidate).await);
        }

        let report = WindowReport {
            window_id: window.id,
            outcomes,
            processed_at: Utc::now(),
        };
        info!(
            window_id = %report.window_id,
            published = report.published_count(),
            total = report.outcomes.len(),
            "Window processed"
        );
        Ok(report)
    }

    /// Process a batch of windows concurrently.
    ///
    /// Windows are independent units of work; windows touching the same
    /// thread still serialize on their thread lock. A deferred window is
    /// logged and skipped, never failing the batch.
    pub async fn process_windows(&self, windows: Vec<TranscriptWindow>) -> Vec<WindowReport> {
        let count = windows.len();
        let results =
            futures::future::join_all(windows.into_iter().map(|w| self.process_window(w))).await;

        let reports: Vec<WindowReport> = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Window deferred");
                    None
                }
            })
            .collect();
        info!(processed = reports.len(), total = count, "Batch complete");
        reports
    }

    /// Resolve, classify, and publish one candidate.
    ///
    /// Runs under the candidate's fingerprint bucket guard. Once the
    /// tracker-mutating call starts it is awaited to completion or
    /// explicit failure; there is no abort path past that point.
    async fn process_candidate(&self, candidate: TicketCandidate) -> CandidateOutcome {
        let fingerprint = Fingerprint::of(&candidate.title, &candidate.body);
        let _guard = self.working_set.lock_bucket(fingerprint.key()).await;

        let snapshot = self.working_set.snapshot().await;
        let resolution = self.resolver.resolve(&fingerprint, &snapshot);
        info!(
            candidate_id = %candidate.id,
            title = %candidate.title,
            resolution = resolution.label(),
            "Candidate resolved"
        );

        let disposition = match resolution {
            Resolution::New => {
                let (issue_type, priority) = self.classifier.classify(&candidate);
                match self
                    .publisher
                    .publish_new(&candidate, &fingerprint, &issue_type, &priority)
                    .await
                {
                    Ok(ticket_id) => Disposition::Published { ticket_id },
                    Err(e) => {
                        warn!(
                            candidate_id = %candidate.id,
                            error = %e,
                            "Publish failed, candidate remains eligible"
                        );
                        Disposition::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Resolution::Merge { ticket_id, .. } => {
                match self
                    .publisher
                    .merge_into(&candidate, &ticket_id, fingerprint.key())
                    .await
                {
                    Ok(()) => Disposition::Merged { ticket_id },
                    Err(e) => {
                        warn!(
                            candidate_id = %candidate.id,
                            ticket_id = %ticket_id,
                            error = %e,
                            "Merge comment failed"
                        );
                        Disposition::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Resolution::Suppress { ticket_id, score } => {
                info!(
                    candidate_id = %candidate.id,
                    ticket_id = %ticket_id,
                    score,
                    "Candidate suppressed against closed ticket"
                );
                Disposition::Suppressed { ticket_id }
            }
        };

        CandidateOutcome {
            candidate_id: candidate.id,
            title: candidate.title,
            disposition,
        }
    }

    async fn thread_lock(&self, window: &TranscriptWindow) -> Arc<Mutex<()>> {
        let key = window
            .thread
            .clone()
            .unwrap_or_else(|| format!("channel:{}", window.channel));
        let mut locks = self.thread_locks.lock().await;
        locks.entry(key).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::error::{LlmError, TrackerError};
    use crate::ingest::event::Utterance;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason};
    use crate::llm::retry::RetryPolicy;
    use crate::store::working_set::TicketStatus;
    use crate::tracker::{CreatedTicket, NewTicket, RemoteTicket};

    /// LLM returning the same response for every call.
    struct FixedLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
            (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    /// Tracker that counts mutations and can pre-seed tickets.
    struct CountingTracker {
        creates: AtomicU32,
        comments: AtomicU32,
        seeded: Vec<RemoteTicket>,
    }

    impl CountingTracker {
        fn empty() -> Arc<Self> {
            Arc::new(Self {
                creates: AtomicU32::new(0),
                comments: AtomicU32::new(0),
                seeded: Vec::new(),
            })
        }

        fn with_open_ticket(id: &str, title: &str) -> Arc<Self> {
            let now = Utc::now();
            Arc::new(Self {
                creates: AtomicU32::new(0),
                comments: AtomicU32::new(0),
                seeded: vec![RemoteTicket {
                    id: id.into(),
                    title: title.into(),
                    issue_type: "Bug".into(),
                    priority: "High".into(),
                    status: TicketStatus::Open,
                    created_at: now,
                    updated_at: now,
                }],
            })
        }
    }

    #[async_trait]
    impl Tracker for CountingTracker {
        fn name(&self) -> &str {
            "counting"
        }

        async fn open_tickets(&self) -> Result<Vec<RemoteTicket>, TrackerError> {
            Ok(self.seeded.clone())
        }

        async fn create_ticket(&self, _ticket: &NewTicket) -> Result<CreatedTicket, TrackerError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CreatedTicket {
                id: format!("AI-{n}"),
                url: None,
            })
        }

        async fn append_comment(&self, _ticket_id: &str, _body: &str) -> Result<(), TrackerError> {
            self.comments.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const BUG_RESPONSE: &str = r#"[{"title": "Fix login bug", "body": "Login fails before Friday deadline.", "type": "Bug", "priority": "High", "confidence": 0.9, "sources": [1]}]"#;

    fn pipeline(llm_response: &str, tracker: Arc<CountingTracker>) -> Arc<Pipeline> {
        let config = PipelineConfig {
            extract_retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            publish_retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        };
        Pipeline::new(
            Arc::new(FixedLlm {
                response: llm_response.into(),
            }),
            tracker,
            Arc::new(LexicalSimilarity::default()),
            AllowedValues::jira_defaults(),
            config,
        )
    }

    fn window(texts: &[(&str, &str)]) -> TranscriptWindow {
        TranscriptWindow {
            id: Uuid::new_v4(),
            channel: "C123".into(),
            thread: Some("t1".into()),
            utterances: texts
                .iter()
                .enumerate()
                .map(|(i, (author, text))| Utterance {
                    author: (*author).into(),
                    timestamp: Utc.timestamp_opt(1_726_660_000 + i as i64 * 10, 0).unwrap(),
                    text: (*text).into(),
                    thread: Some("t1".into()),
                    channel: "C123".into(),
                })
                .collect(),
        }
    }

    fn bug_window() -> TranscriptWindow {
        window(&[
            ("alice", "Let's fix the login bug before Friday"),
            ("bob", "agreed"),
        ])
    }

    #[tokio::test]
    async fn new_candidate_publishes_once() {
        let tracker = CountingTracker::empty();
        let pipeline = pipeline(BUG_RESPONSE, tracker.clone());

        let report = pipeline.process_window(bug_window()).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert!(matches!(
            report.outcomes[0].disposition,
            Disposition::Published { .. }
        ));
        assert_eq!(tracker.creates.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.working_set().len().await, 1);
    }

    #[tokio::test]
    async fn reprocessing_same_window_merges_not_creates() {
        let tracker = CountingTracker::empty();
        let pipeline = pipeline(BUG_RESPONSE, tracker.clone());

        pipeline.process_window(bug_window()).await.unwrap();
        let second = pipeline.process_window(bug_window()).await.unwrap();

        assert!(matches!(
            second.outcomes[0].disposition,
            Disposition::Merged { .. }
        ));
        // Exactly one ticket ever created; the second pass commented.
        assert_eq!(tracker.creates.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.comments.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.working_set().len().await, 1);
    }

    #[tokio::test]
    async fn seeded_open_ticket_causes_merge() {
        let tracker = CountingTracker::with_open_ticket("AI-99", "Fix login bug");
        let pipeline = pipeline(BUG_RESPONSE, tracker.clone());
        pipeline.refresh_working_set().await.unwrap();

        let report = pipeline.process_window(bug_window()).await.unwrap();
        match &report.outcomes[0].disposition {
            Disposition::Merged { ticket_id } => assert_eq!(ticket_id, "AI-99"),
            other => panic!("Expected Merged, got {other:?}"),
        }
        assert_eq!(tracker.creates.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.comments.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_ticket_suppresses() {
        let now = Utc::now();
        let tracker = Arc::new(CountingTracker {
            creates: AtomicU32::new(0),
            comments: AtomicU32::new(0),
            seeded: vec![RemoteTicket {
                id: "AI-7".into(),
                title: "Fix login bug".into(),
                issue_type: "Bug".into(),
                priority: "High".into(),
                status: TicketStatus::Closed,
                created_at: now,
                updated_at: now,
            }],
        });
        let pipeline = pipeline(BUG_RESPONSE, tracker.clone());
        pipeline.refresh_working_set().await.unwrap();

        let report = pipeline.process_window(bug_window()).await.unwrap();
        assert!(matches!(
            report.outcomes[0].disposition,
            Disposition::Suppressed { .. }
        ));
        assert_eq!(tracker.creates.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.comments.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_same_fingerprint_candidates_create_once() {
        let tracker = CountingTracker::empty();
        let pipeline = pipeline(BUG_RESPONSE, tracker.clone());

        // Same conversation in two different threads so window
        // serialization doesn't mask the bucket guard.
        let mut window_a = bug_window();
        window_a.thread = Some("t-a".into());
        let mut window_b = bug_window();
        window_b.thread = Some("t-b".into());

        let (a, b) = tokio::join!(
            pipeline.process_window(window_a),
            pipeline.process_window(window_b)
        );
        a.unwrap();
        b.unwrap();

        // One admitted as New, the other merged into it.
        assert_eq!(tracker.creates.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.comments.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.working_set().len().await, 1);
    }

    #[tokio::test]
    async fn batch_processes_windows_concurrently() {
        let tracker = CountingTracker::empty();
        let pipeline = pipeline(BUG_RESPONSE, tracker.clone());

        let mut window_a = bug_window();
        window_a.thread = Some("t-a".into());
        let mut window_b = bug_window();
        window_b.thread = Some("t-b".into());

        let reports = pipeline.process_windows(vec![window_a, window_b]).await;
        assert_eq!(reports.len(), 2);
        // Same fingerprint from both windows: one created, one merged.
        assert_eq!(tracker.creates.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.comments.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_extraction_produces_empty_report() {
        let tracker = CountingTracker::empty();
        let pipeline = pipeline("[]", tracker.clone());

        let report = pipeline
            .process_window(window(&[("alice", "lunch anyone?")]))
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(tracker.creates.load(Ordering::SeqCst), 0);
    }
}
