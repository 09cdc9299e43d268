//! Jira Cloud tracker client.
//!
//! REST v3, basic auth (account email + API token). Bodies are rendered
//! as Atlassian Document Format. Every call carries a timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::store::working_set::TicketStatus;
use crate::tracker::{CreatedTicket, NewTicket, RemoteTicket, Tracker};

/// Page size for the seed search.
const SEARCH_PAGE_SIZE: usize = 100;

/// Connection settings for a Jira Cloud site.
#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: SecretString,
    pub project_key: String,
    pub timeout: Duration,
}

/// Jira Cloud client.
pub struct JiraTracker {
    config: JiraConfig,
    client: reqwest::Client,
}

impl JiraTracker {
    pub fn new(config: JiraConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/rest/api/3/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn get_json(&self, operation: &str, url: &str, query: &[(&str, String)]) -> Result<Value, TrackerError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .basic_auth(&self.config.email, Some(self.config.api_token.expose_secret()))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| TrackerError::RequestFailed {
                operation: operation.into(),
                reason: e.to_string(),
            })?;
        self.parse_json(operation, response).await
    }

    async fn post_json(&self, operation: &str, url: &str, body: &Value) -> Result<Value, TrackerError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .basic_auth(&self.config.email, Some(self.config.api_token.expose_secret()))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| TrackerError::RequestFailed {
                operation: operation.into(),
                reason: e.to_string(),
            })?;
        self.parse_json(operation, response).await
    }

    async fn parse_json(&self, operation: &str, response: reqwest::Response) -> Result<Value, TrackerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Status {
                operation: operation.into(),
                status: status.as_u16(),
                body,
            });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response.json().await.map_err(|e| TrackerError::InvalidResponse {
            operation: operation.into(),
            reason: e.to_string(),
        })
    }

    /// Issue type names valid for the configured project.
    pub async fn fetch_issue_types(&self) -> Result<Vec<String>, TrackerError> {
        let data = self
            .get_json(
                "createmeta",
                &self.api_url("issue/createmeta"),
                &[
                    ("projectKeys", self.config.project_key.clone()),
                    ("expand", "projects.issuetypes".into()),
                ],
            )
            .await?;

        let types: Vec<String> = data["projects"]
            .as_array()
            .and_then(|projects| projects.first())
            .and_then(|project| project["issuetypes"].as_array())
            .map(|issue_types| {
                issue_types
                    .iter()
                    .filter_map(|t| t["name"].as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        debug!(count = types.len(), "Fetched issue types");
        Ok(types)
    }

    /// Priority names configured on the site.
    pub async fn fetch_priorities(&self) -> Result<Vec<String>, TrackerError> {
        let data = self
            .get_json("priority", &self.api_url("priority"), &[])
            .await?;

        let priorities: Vec<String> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|p| p["name"].as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        debug!(count = priorities.len(), "Fetched priorities");
        Ok(priorities)
    }
}

#[async_trait]
impl Tracker for JiraTracker {
    fn name(&self) -> &str {
        "jira"
    }

    async fn open_tickets(&self) -> Result<Vec<RemoteTicket>, TrackerError> {
        let jql = format!(
            "project = {} ORDER BY updated DESC",
            self.config.project_key
        );
        let mut tickets = Vec::new();
        let mut start_at = 0usize;

        loop {
            let page = self
                .get_json(
                    "search",
                    &self.api_url("search"),
                    &[
                        ("jql", jql.clone()),
                        ("startAt", start_at.to_string()),
                        ("maxResults", SEARCH_PAGE_SIZE.to_string()),
                        (
                            "fields",
                            "summary,issuetype,priority,status,created,updated".into(),
                        ),
                    ],
                )
                .await?;

            let issues = page["issues"].as_array().cloned().unwrap_or_default();
            if issues.is_empty() {
                break;
            }
            let page_len = issues.len();

            for issue in issues {
                match parse_remote_ticket(&issue) {
                    Some(ticket) => tickets.push(ticket),
                    None => warn!("Skipping unparseable issue in search results"),
                }
            }

            start_at += page_len;
            if page_len < SEARCH_PAGE_SIZE {
                break;
            }
        }

        info!(count = tickets.len(), project = %self.config.project_key, "Fetched tracker tickets");
        Ok(tickets)
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<CreatedTicket, TrackerError> {
        let body = json!({
            "fields": {
                "project": { "key": self.config.project_key },
                "summary": ticket.title,
                "description": text_to_adf(&ticket.body),
                "issuetype": { "name": ticket.issue_type },
                "priority": { "name": ticket.priority },
            }
        });

        let data = self
            .post_json("create_ticket", &self.api_url("issue"), &body)
            .await?;

        let key = data["key"]
            .as_str()
            .ok_or_else(|| TrackerError::InvalidResponse {
                operation: "create_ticket".into(),
                reason: "response missing issue key".into(),
            })?
            .to_string();

        let url = format!(
            "{}/browse/{key}",
            self.config.base_url.trim_end_matches('/')
        );
        info!(ticket_id = %key, "Created tracker ticket");
        Ok(CreatedTicket {
            id: key,
            url: Some(url),
        })
    }

    async fn append_comment(&self, ticket_id: &str, body: &str) -> Result<(), TrackerError> {
        let payload = json!({ "body": text_to_adf(body) });
        self.post_json(
            "append_comment",
            &self.api_url(&format!("issue/{ticket_id}/comment")),
            &payload,
        )
        .await?;
        info!(ticket_id = %ticket_id, "Appended tracker comment");
        Ok(())
    }
}

fn parse_remote_ticket(issue: &Value) -> Option<RemoteTicket> {
    let id = issue["key"].as_str()?.to_string();
    let fields = &issue["fields"];
    let title = fields["summary"].as_str()?.to_string();
    let issue_type = fields["issuetype"]["name"].as_str().unwrap_or("Task").to_string();
    let priority = fields["priority"]["name"].as_str().unwrap_or("Medium").to_string();
    let status = parse_status(fields);
    let created_at = parse_jira_datetime(fields["created"].as_str().unwrap_or(""));
    let updated_at = parse_jira_datetime(fields["updated"].as_str().unwrap_or(""));

    Some(RemoteTicket {
        id,
        title,
        issue_type,
        priority,
        status,
        created_at,
        updated_at,
    })
}

/// A "done" status category means the ticket is closed for merge purposes.
fn parse_status(fields: &Value) -> TicketStatus {
    match fields["status"]["statusCategory"]["key"].as_str() {
        Some("done") => TicketStatus::Closed,
        _ => TicketStatus::Open,
    }
}

/// Jira datetimes look like `2026-08-07T10:11:12.000+0000`.
fn parse_jira_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            if !raw.is_empty() {
                warn!(raw = %raw, "Unparseable tracker datetime, using now");
            }
            Utc::now()
        })
}

/// Convert plain text to Atlassian Document Format: one paragraph, line
/// breaks as hardBreak nodes.
fn text_to_adf(text: &str) -> Value {
    if text.is_empty() {
        return json!({
            "type": "doc",
            "version": 1,
            "content": [{ "type": "paragraph" }],
        });
    }

    let mut content = Vec::new();
    let parts: Vec<&str> = text.split('\n').collect();
    for (i, chunk) in parts.iter().enumerate() {
        if !chunk.is_empty() {
            content.push(json!({ "type": "text", "text": chunk }));
        }
        if i < parts.len() - 1 {
            content.push(json!({ "type": "hardBreak" }));
        }
    }

    json!({
        "type": "doc",
        "version": 1,
        "content": [{ "type": "paragraph", "content": content }],
    })
}
