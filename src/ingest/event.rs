//! Raw conversation events and their normalization into utterances.
//!
//! The transport delivers Slack-shaped message events. Normalization
//! validates required fields, drops bot/system noise, and strips markup
//! into plain text while keeping mentions and links as opaque tokens so
//! the extractor sees intent, not markup.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NormalizeError;

/// Message subtypes that never yield an utterance.
const IGNORED_SUBTYPES: &[&str] = &[
    "bot_message",
    "message_changed",
    "message_deleted",
    "channel_join",
    "channel_leave",
];

/// A raw inbound conversation event, transport-shaped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

/// A canonical utterance. Immutable once normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub thread: Option<String>,
    pub channel: String,
}

/// Converts raw events into utterances. Pure transformation, no side
/// effects beyond logging.
pub struct Normalizer {
    mention_labeled: Regex,
    mention_bare: Regex,
    broadcast: Regex,
    link_labeled: Regex,
    link_bare: Regex,
    bold: Regex,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            mention_labeled: Regex::new(r"<@([A-Z0-9]+)\|([^>]+)>").unwrap(),
            mention_bare: Regex::new(r"<@([A-Z0-9]+)>").unwrap(),
            broadcast: Regex::new(r"<!(here|channel|everyone)(?:\|[^>]*)?>").unwrap(),
            link_labeled: Regex::new(r"<(https?://[^|>]+)\|([^>]+)>").unwrap(),
            link_bare: Regex::new(r"<(https?://[^>]+)>").unwrap(),
            bold: Regex::new(r"\*([^*\n]+)\*").unwrap(),
        }
    }

    /// Normalize one event into zero-or-one utterance.
    ///
    /// Bot/system messages yield `Ok(None)`. Events missing author, text,
    /// or timestamp fail with `MalformedEvent`; the caller logs and drops.
    pub fn normalize(&self, event: &RawEvent) -> Result<Option<Utterance>, NormalizeError> {
        if event.bot_id.is_some() {
            debug!("Skipping bot message");
            return Ok(None);
        }
        if let Some(ref subtype) = event.subtype {
            if IGNORED_SUBTYPES.contains(&subtype.as_str()) {
                debug!(subtype = %subtype, "Skipping system message");
                return Ok(None);
            }
        }

        let author = required(&event.user, "author")?;
        let raw_text = required(&event.text, "text")?;
        let ts = required(&event.ts, "timestamp")?;
        let channel = required(&event.channel, "channel")?;

        let timestamp = parse_slack_ts(&ts)?;
        let text = self.strip_markup(&raw_text);

        if text.is_empty() {
            debug!(author = %author, "Event text empty after markup stripping");
            return Ok(None);
        }

        Ok(Some(Utterance {
            author,
            timestamp,
            text,
            thread: event.thread_ts.clone(),
            channel,
        }))
    }

    /// Strip transport markup into plain text.
    ///
    /// Mentions become `@label` tokens, links become `label (url)`, and
    /// formatting characters are removed.
    pub fn strip_markup(&self, text: &str) -> String {
        let text = self.mention_labeled.replace_all(text, "@$2");
        let text = self.mention_bare.replace_all(&text, "@$1");
        let text = self.broadcast.replace_all(&text, "@$1");
        let text = self.link_labeled.replace_all(&text, "$2 ($1)");
        let text = self.link_bare.replace_all(&text, "$1");
        let text = self.bold.replace_all(&text, "$1");

        text.replace("```", "")
            .replace('`', "")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .trim()
            .to_string()
    }
}

fn required(field: &Option<String>, name: &str) -> Result<String, NormalizeError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value.clone()),
        _ => Err(NormalizeError::MalformedEvent {
            reason: format!("missing {name}"),
        }),
    }
}

/// Parse a transport timestamp like `"1726660000.000123"`.
fn parse_slack_ts(ts: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let malformed = || NormalizeError::MalformedEvent {
        reason: format!("unparseable timestamp '{ts}'"),
    };

    let (secs_part, frac_part) = match ts.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (ts, ""),
    };

    let secs: i64 = secs_part.parse().map_err(|_| malformed())?;
    let micros: u32 = if frac_part.is_empty() {
        0
    } else {
        // Slack uses 6 fractional digits; pad or truncate defensively.
        let mut digits = frac_part.to_string();
        digits.truncate(6);
        while digits.len() < 6 {
            digits.push('0');
        }
        digits.parse().map_err(|_| malformed())?
    };

    Utc.timestamp_opt(secs, micros * 1_000)
        .single()
        .ok_or_else(malformed)
}
