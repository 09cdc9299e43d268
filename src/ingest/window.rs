//! Transcript windows — bounded slices of one thread's conversation.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ingest::event::Utterance;

/// An ordered sequence of utterances from a single thread, used as the
/// unit of extraction context. Transient; constructed per cycle.
#[derive(Debug, Clone)]
pub struct TranscriptWindow {
    pub id: Uuid,
    pub channel: String,
    pub thread: Option<String>,
    pub utterances: Vec<Utterance>,
}

impl TranscriptWindow {
    /// Time spanned from first to last utterance.
    pub fn span(&self) -> chrono::Duration {
        match (self.utterances.first(), self.utterances.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => chrono::Duration::zero(),
        }
    }

    /// Render the window as numbered transcript lines for the extractor.
    pub fn transcript(&self) -> String {
        self.utterances
            .iter()
            .enumerate()
            .map(|(i, u)| {
                format!(
                    "{}. [{}] {}: {}",
                    i + 1,
                    u.timestamp.format("%H:%M:%S"),
                    u.author,
                    u.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Accumulates utterances into windows keyed by (channel, thread).
///
/// A window closes when it reaches the utterance bound or its span
/// exceeds the time bound. Utterances stay ordered by timestamp within
/// a window; exact duplicate deliveries are dropped.
pub struct WindowBuilder {
    max_utterances: usize,
    max_span: chrono::Duration,
    pending: HashMap<(String, String), Vec<Utterance>>,
    seen: HashSet<(String, String, DateTime<Utc>)>,
}

impl WindowBuilder {
    pub fn new(max_utterances: usize, max_span: Duration) -> Self {
        Self {
            max_utterances,
            max_span: chrono::Duration::from_std(max_span)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            pending: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Add an utterance. Returns a window when the addition closes one.
    pub fn push(&mut self, utterance: Utterance) -> Option<TranscriptWindow> {
        let seen_key = (
            utterance.channel.clone(),
            utterance.author.clone(),
            utterance.timestamp,
        );
        if !self.seen.insert(seen_key) {
            return None;
        }

        let key = (utterance.channel.clone(), thread_key(&utterance));
        let bucket = self.pending.entry(key.clone()).or_default();

        // Insert preserving timestamp order; equal timestamps keep
        // arrival order.
        let position = bucket.partition_point(|u| u.timestamp <= utterance.timestamp);
        bucket.insert(position, utterance);

        let span = match (bucket.first(), bucket.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => chrono::Duration::zero(),
        };

        if bucket.len() >= self.max_utterances || span > self.max_span {
            let utterances = self.pending.remove(&key).unwrap_or_default();
            return Some(make_window(utterances));
        }
        None
    }

    /// Drain all partially-filled windows (end of cycle).
    pub fn flush(&mut self) -> Vec<TranscriptWindow> {
        let mut windows: Vec<TranscriptWindow> = self
            .pending
            .drain()
            .map(|(_, utterances)| make_window(utterances))
            .collect();
        windows.sort_by_key(|w| w.utterances.first().map(|u| u.timestamp));
        self.seen.clear();
        windows
    }

    /// Number of utterances currently buffered.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}

fn thread_key(utterance: &Utterance) -> String {
    utterance
        .thread
        .clone()
        .unwrap_or_else(|| format!("channel:{}", utterance.channel))
}

fn make_window(utterances: Vec<Utterance>) -> TranscriptWindow {
    let channel = utterances
        .first()
        .map(|u| u.channel.clone())
        .unwrap_or_default();
    let thread = utterances.first().and_then(|u| u.thread.clone());
    TranscriptWindow {
        id: Uuid::new_v4(),
        channel,
        thread,
        utterances,
    }
}
