//! Ticket publishing — the only tracker-mutating component.
//!
//! Create calls are retried with backoff; the working set is re-checked
//! before each attempt so a retried failure can never double-create. A
//! record is inserted only after the tracker confirms the create, so a
//! failed publish leaves no partial state and the candidate stays
//! eligible for reprocessing as New.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::PublishError;
use crate::llm::retry::RetryPolicy;
use crate::pipeline::types::TicketCandidate;
use crate::store::fingerprint::Fingerprint;
use crate::store::working_set::{TicketRecord, TicketStatus, WorkingSet};
use crate::tracker::{NewTicket, Tracker};

/// Publishes admitted candidates and records them in the working set.
pub struct TicketPublisher {
    tracker: Arc<dyn Tracker>,
    working_set: Arc<WorkingSet>,
    retry: RetryPolicy,
}

impl TicketPublisher {
    pub fn new(tracker: Arc<dyn Tracker>, working_set: Arc<WorkingSet>, retry: RetryPolicy) -> Self {
        Self {
            tracker,
            working_set,
            retry,
        }
    }

    /// Create a ticket for a New candidate and record it.
    ///
    /// Caller must hold the bucket guard for `fingerprint`. Returns the
    /// created (or already-recorded) ticket id.
    pub async fn publish_new(
        &self,
        candidate: &TicketCandidate,
        fingerprint: &Fingerprint,
        issue_type: &str,
        priority: &str,
    ) -> Result<String, PublishError> {
        let ticket = NewTicket {
            title: candidate.title.clone(),
            body: render_body(candidate),
            issue_type: issue_type.to_string(),
            priority: priority.to_string(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            // A record appearing under this fingerprint means the ticket
            // already exists (seed refresh, or an earlier attempt that
            // reached the tracker). Creating again would duplicate it.
            if let Some(existing) = self.working_set.get(fingerprint.key()).await {
                info!(
                    ticket_id = %existing.ticket_id,
                    fingerprint = %fingerprint.key(),
                    "Ticket already recorded, skipping create"
                );
                return Ok(existing.ticket_id);
            }

            match self.tracker.create_ticket(&ticket).await {
                Ok(created) => {
                    let now = Utc::now();
                    self.working_set
                        .insert(TicketRecord {
                            ticket_id: created.id.clone(),
                            title: candidate.title.clone(),
                            fingerprint: fingerprint.clone(),
                            issue_type: issue_type.to_string(),
                            priority: priority.to_string(),
                            created_at: now,
                            updated_at: now,
                            status: TicketStatus::Open,
                        })
                        .await;
                    info!(
                        ticket_id = %created.id,
                        title = %candidate.title,
                        issue_type = %issue_type,
                        priority = %priority,
                        "Published ticket"
                    );
                    return Ok(created.id);
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        title = %candidate.title,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Ticket create failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(PublishError::Failed {
                        title: candidate.title.clone(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Append a Merge candidate's context to an existing ticket.
    ///
    /// Touches the record's updated-at on success. No new tracker entity.
    pub async fn merge_into(
        &self,
        candidate: &TicketCandidate,
        ticket_id: &str,
        fingerprint_key: &str,
    ) -> Result<(), PublishError> {
        let comment = render_merge_comment(candidate);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.tracker.append_comment(ticket_id, &comment).await {
                Ok(()) => {
                    self.working_set.touch(fingerprint_key, Utc::now()).await;
                    info!(
                        ticket_id = %ticket_id,
                        title = %candidate.title,
                        "Merged candidate into existing ticket"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        ticket_id = %ticket_id,
                        attempt,
                        error = %e,
                        "Comment append failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(PublishError::Failed {
                        title: candidate.title.clone(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }
}

fn render_body(candidate: &TicketCandidate) -> String {
    let mut body = candidate.body.clone();
    if body.is_empty() {
        body = candidate.title.clone();
    }
    body.push_str("\n\n");
    body.push_str(&render_sources(candidate));
    body
}

fn render_merge_comment(candidate: &TicketCandidate) -> String {
    let mut comment = String::from("Raised again in chat:\n");
    comment.push_str(if candidate.body.is_empty() {
        &candidate.title
    } else {
        &candidate.body
    });
    comment.push_str("\n\n");
    comment.push_str(&render_sources(candidate));
    comment
}

fn render_sources(candidate: &TicketCandidate) -> String {
    let mut authors: Vec<&str> = candidate.sources.iter().map(|s| s.author.as_str()).collect();
    authors.dedup();
    match (candidate.sources.first(), authors.is_empty()) {
        (Some(first), false) => format!(
            "From the conversation at {} ({})",
            first.timestamp.format("%Y-%m-%d %H:%M UTC"),
            authors.join(", ")
        ),
        _ => String::new(),
    }
}
