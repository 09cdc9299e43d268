//! Candidate extraction — the one non-deterministic pipeline stage.
//!
//! One inference request per transcript window. The request carries the
//! transcript, a fixed instruction describing the structured output, and
//! the closed sets of valid type/priority values. Everything downstream
//! is deterministic, so failures here degrade to "no candidates" or a
//! deferred window, never to garbage flowing on.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AllowedValues;
use crate::error::ExtractError;
use crate::ingest::window::TranscriptWindow;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::{RetryPolicy, with_retries};
use crate::pipeline::types::{SourceRef, TicketCandidate};

/// Max tokens for the extraction call.
const EXTRACT_MAX_TOKENS: u32 = 1024;

/// Temperature for extraction (deterministic-ish).
const EXTRACT_TEMPERATURE: f32 = 0.1;

/// Extracts ticket candidates from transcript windows.
pub struct CandidateExtractor {
    llm: Arc<dyn LlmProvider>,
    allowed: AllowedValues,
    min_confidence: f32,
    inference_timeout: Duration,
    retry: RetryPolicy,
}

impl CandidateExtractor {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        allowed: AllowedValues,
        min_confidence: f32,
        inference_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            allowed,
            min_confidence,
            inference_timeout,
            retry,
        }
    }

    /// Extract zero or more candidates from a window.
    ///
    /// Inference failures are retried with backoff; exhausting retries
    /// fails the window with `Unavailable` (defer, not fatal). An
    /// unparseable response yields zero candidates instead of an error.
    pub async fn extract(
        &self,
        window: &TranscriptWindow,
    ) -> Result<Vec<TicketCandidate>, ExtractError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extraction_system_prompt(&self.allowed)),
            ChatMessage::user(build_extraction_user_prompt(window)),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS);

        let response = with_retries(&self.retry, "extract", |_attempt| {
            let request = request.clone();
            async move {
                match tokio::time::timeout(self.inference_timeout, self.llm.complete(request))
                    .await
                {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!(
                        "inference timed out after {:?}",
                        self.inference_timeout
                    )),
                }
            }
        })
        .await
        .map_err(|last_error| ExtractError::Unavailable {
            window_id: window.id,
            attempts: self.retry.max_attempts,
            last_error,
        })?;

        let candidates = match parse_candidates(&response.content, window) {
            Ok(candidates) => candidates,
            Err(reason) => {
                // Partial or garbled extraction is worse than none.
                warn!(
                    window_id = %window.id,
                    error = %reason,
                    raw_response = %response.content,
                    "Unparseable extraction response, treating as zero candidates"
                );
                return Ok(Vec::new());
            }
        };

        let total = candidates.len();
        let kept: Vec<TicketCandidate> = candidates
            .into_iter()
            .filter(|c| c.confidence >= self.min_confidence)
            .collect();
        if kept.len() < total {
            debug!(
                window_id = %window.id,
                dropped = total - kept.len(),
                min_confidence = self.min_confidence,
                "Dropped low-confidence candidates"
            );
        }
        Ok(kept)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_extraction_system_prompt(allowed: &AllowedValues) -> String {
    format!(
        "You are a work-item extraction engine. Read a team chat transcript and \
         identify actionable work items worth filing as tickets.\n\n\
         Respond with ONLY a JSON array. Each element:\n\
         {{\"title\": \"...\", \"body\": \"...\", \"type\": \"...\", \"priority\": \"...\", \
         \"confidence\": 0.0, \"sources\": [1]}}\n\n\
         Rules:\n\
         - \"type\" must be one of: {}\n\
         - \"priority\" must be one of: {}\n\
         - \"sources\" lists the transcript line numbers the item came from\n\
         - Titles are short and imperative; bodies give 1-3 sentences of context. \
         Never leave the body empty.\n\
         - Infer elevated priority when the discussion mentions a deadline or urgency.\n\
         - Only include work someone actually requested or committed to.\n\
         - \"confidence\" is your certainty in [0,1] that this is a real, distinct work item.\n\
         - Return [] when the transcript contains no actionable work.",
        allowed.issue_types.join(", "),
        allowed.priorities.join(", "),
    )
}

fn build_extraction_user_prompt(window: &TranscriptWindow) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("Channel: {}\n", window.channel));
    if let Some(ref thread) = window.thread {
        prompt.push_str(&format!("Thread: {thread}\n"));
    }
    prompt.push_str("\nTranscript:\n");
    prompt.push_str(&window.transcript());
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Raw candidate as the model emits it.
#[derive(Debug, serde::Deserialize)]
struct RawCandidate {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(rename = "type", default)]
    issue_type: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    sources: Vec<serde_json::Value>,
}

/// Parse the model response into candidates.
fn parse_candidates(
    raw: &str,
    window: &TranscriptWindow,
) -> Result<Vec<TicketCandidate>, String> {
    let json_str = extract_json_array(raw);
    let raw_candidates: Vec<RawCandidate> = if json_str.trim_start().starts_with('{') {
        // Single-object responses happen; tolerate them.
        vec![serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?]
    } else {
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?
    };

    Ok(raw_candidates
        .into_iter()
        .filter_map(|raw| into_candidate(raw, window))
        .collect())
}

fn into_candidate(raw: RawCandidate, window: &TranscriptWindow) -> Option<TicketCandidate> {
    let title = raw.title.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let mut sources: Vec<SourceRef> = raw
        .sources
        .iter()
        .filter_map(|value| {
            let line = match value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            }?;
            window.utterances.get((line as usize).checked_sub(1)?)
        })
        .map(|u| SourceRef {
            author: u.author.clone(),
            timestamp: u.timestamp,
        })
        .collect();

    // No usable line references: attribute the whole window.
    if sources.is_empty() {
        sources = window
            .utterances
            .iter()
            .map(|u| SourceRef {
                author: u.author.clone(),
                timestamp: u.timestamp,
            })
            .collect();
    }

    Some(TicketCandidate {
        id: Uuid::new_v4(),
        title,
        body: raw.body.trim().to_string(),
        suggested_type: raw.issue_type.filter(|s| !s.trim().is_empty()),
        suggested_priority: raw.priority.filter(|s| !s.trim().is_empty()),
        confidence: raw.confidence.clamp(0.0, 1.0),
        sources,
    })
}

/// Extract a JSON array from model output (handles markdown wrapping).
fn extract_json_array(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('[') || inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::Mutex;

    use super::*;
    use crate::error::LlmError;
    use crate::ingest::event::Utterance;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    /// Mock LLM that plays back scripted responses in order.
    struct MockLlm {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    impl MockLlm {
        fn new(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }

        fn ok(response: &str) -> Arc<Self> {
            Self::new(vec![Ok(response.to_string())])
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-extract"
        }

        fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
            (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let scripted = self
                .responses
                .lock()
                .await
                .pop_front()
                .expect("mock ran out of scripted responses");
            scripted.map(|content| CompletionResponse {
                content,
                input_tokens: 100,
                output_tokens: 50,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn test_window() -> TranscriptWindow {
        TranscriptWindow {
            id: Uuid::new_v4(),
            channel: "C123".into(),
            thread: None,
            utterances: vec![
                Utterance {
                    author: "alice".into(),
                    timestamp: Utc.timestamp_opt(1_726_660_000, 0).unwrap(),
                    text: "Let's fix the login bug before Friday".into(),
                    thread: None,
                    channel: "C123".into(),
                },
                Utterance {
                    author: "bob".into(),
                    timestamp: Utc.timestamp_opt(1_726_660_010, 0).unwrap(),
                    text: "agreed".into(),
                    thread: None,
                    channel: "C123".into(),
                },
            ],
        }
    }

    fn extractor(llm: Arc<MockLlm>) -> CandidateExtractor {
        CandidateExtractor::new(
            llm,
            AllowedValues::jira_defaults(),
            0.5,
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
        )
    }

    const BUG_RESPONSE: &str = r#"[{"title": "Fix login bug", "body": "Login fails; deadline Friday.", "type": "Bug", "priority": "High", "confidence": 0.9, "sources": [1]}]"#;

    #[tokio::test]
    async fn extracts_candidate_from_array() {
        let window = test_window();
        let candidates = extractor(MockLlm::ok(BUG_RESPONSE))
            .extract(&window)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.title, "Fix login bug");
        assert_eq!(candidate.suggested_type.as_deref(), Some("Bug"));
        assert_eq!(candidate.suggested_priority.as_deref(), Some("High"));
        assert_eq!(candidate.sources.len(), 1);
        assert_eq!(candidate.sources[0].author, "alice");
    }

    #[tokio::test]
    async fn handles_markdown_wrapped_response() {
        let raw = format!("Here's what I found:\n```json\n{BUG_RESPONSE}\n```");
        let window = test_window();
        let candidates = extractor(MockLlm::ok(&raw)).extract(&window).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn empty_array_means_no_actionable_work() {
        let window = test_window();
        let candidates = extractor(MockLlm::ok("[]")).extract(&window).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn malformed_response_yields_zero_candidates() {
        let window = test_window();
        let candidates = extractor(MockLlm::ok("I couldn't process that transcript, sorry!"))
            .extract(&window)
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn low_confidence_candidates_dropped() {
        let raw = r#"[
            {"title": "Fix login bug", "body": "x", "confidence": 0.9},
            {"title": "Maybe refactor something", "body": "y", "confidence": 0.3}
        ]"#;
        let window = test_window();
        let candidates = extractor(MockLlm::ok(raw)).extract(&window).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Fix login bug");
    }

    #[tokio::test]
    async fn confidence_clamped_to_unit_interval() {
        let raw = r#"[{"title": "Fix login bug", "body": "x", "confidence": 1.7}]"#;
        let window = test_window();
        let candidates = extractor(MockLlm::ok(raw)).extract(&window).await.unwrap();
        assert_eq!(candidates[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn empty_title_dropped() {
        let raw = r#"[{"title": "  ", "body": "no title", "confidence": 0.9}]"#;
        let window = test_window();
        let candidates = extractor(MockLlm::ok(raw)).extract(&window).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn invalid_source_lines_fall_back_to_whole_window() {
        let raw = r#"[{"title": "Fix login bug", "body": "x", "confidence": 0.9, "sources": [99]}]"#;
        let window = test_window();
        let candidates = extractor(MockLlm::ok(raw)).extract(&window).await.unwrap();
        assert_eq!(candidates[0].sources.len(), window.utterances.len());
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let llm = MockLlm::new(vec![
            Err(LlmError::RequestFailed {
                provider: "mock".into(),
                reason: "rate limited".into(),
            }),
            Ok(BUG_RESPONSE.to_string()),
        ]);
        let window = test_window();
        let candidates = extractor(llm).extract(&window).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_defer_window() {
        let failure = || {
            Err(LlmError::RequestFailed {
                provider: "mock".into(),
                reason: "down".into(),
            })
        };
        let llm = MockLlm::new(vec![failure(), failure(), failure()]);
        let window = test_window();
        let err = extractor(llm).extract(&window).await.unwrap_err();
        match err {
            ExtractError::Unavailable {
                window_id,
                attempts,
                ..
            } => {
                assert_eq!(window_id, window.id);
                assert_eq!(attempts, 3);
            }
        }
    }

    #[test]
    fn system_prompt_names_allowed_values() {
        let prompt = build_extraction_system_prompt(&AllowedValues::jira_defaults());
        assert!(prompt.contains("Task, Story, Bug, Epic"));
        assert!(prompt.contains("Highest, High, Medium, Low, Lowest"));
        assert!(prompt.contains("deadline"));
    }

    #[test]
    fn user_prompt_contains_transcript() {
        let window = test_window();
        let prompt = build_extraction_user_prompt(&window);
        assert!(prompt.contains("Channel: C123"));
        assert!(prompt.contains("alice: Let's fix the login bug before Friday"));
        assert!(prompt.contains("2. ["));
    }

    #[test]
    fn extract_json_array_variants() {
        assert_eq!(extract_json_array("[1, 2]"), "[1, 2]");
        assert_eq!(extract_json_array("```json\n[1]\n```"), "[1]");
        assert_eq!(extract_json_array("The result: [1] done"), "[1]");
    }
}
