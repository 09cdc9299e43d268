//! Issue tracker boundary — pure I/O, no pipeline logic.

pub mod jira;

pub use jira::{JiraConfig, JiraTracker};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TrackerError;
use crate::store::working_set::TicketStatus;

/// A ticket as reported by the tracker (working-set seeding).
#[derive(Debug, Clone)]
pub struct RemoteTicket {
    pub id: String,
    pub title: String,
    pub issue_type: String,
    pub priority: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a ticket the publisher wants created.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub body: String,
    pub issue_type: String,
    pub priority: String,
}

/// Result of a create call.
#[derive(Debug, Clone)]
pub struct CreatedTicket {
    pub id: String,
    pub url: Option<String>,
}

/// Trait for issue tracker backends.
///
/// All three operations must be idempotent-safe from the caller's side
/// under retry; the publisher checks working-set state before retrying
/// a create.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Tracker name (for logging).
    fn name(&self) -> &str;

    /// Open tickets in the configured project scope.
    async fn open_tickets(&self) -> Result<Vec<RemoteTicket>, TrackerError>;

    /// Create a ticket, returning its id.
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<CreatedTicket, TrackerError>;

    /// Append a comment to an existing ticket.
    async fn append_comment(&self, ticket_id: &str, body: &str) -> Result<(), TrackerError>;
}
