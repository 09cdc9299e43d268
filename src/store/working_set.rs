//! The working set — keyed index of known tickets used for deduplication.
//!
//! An explicit keyed store with per-bucket serialization: resolve+publish
//! for a candidate runs under its fingerprint's bucket guard, so two
//! concurrent candidates that collapse to the same fingerprint cannot
//! both be admitted as new. Record reads and writes take a short-lived
//! map lock and are never held across an await of an external call.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::store::fingerprint::Fingerprint;

/// Number of bucket guards. Same-key candidates always share a bucket.
const BUCKET_COUNT: usize = 16;

/// Tracker-side status as the working set cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    Closed,
}

impl TicketStatus {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A known ticket. Created on publish, touched on merge, never deleted
/// by the pipeline.
#[derive(Debug, Clone)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub title: String,
    pub fingerprint: Fingerprint,
    pub issue_type: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TicketStatus,
}

/// Fingerprint-keyed ticket index with per-bucket guards.
pub struct WorkingSet {
    records: RwLock<HashMap<String, TicketRecord>>,
    buckets: Vec<Arc<Mutex<()>>>,
}

impl WorkingSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: RwLock::new(HashMap::new()),
            buckets: (0..BUCKET_COUNT).map(|_| Arc::new(Mutex::new(()))).collect(),
        })
    }

    /// Acquire the bucket guard for a fingerprint key. Held across a
    /// candidate's resolve+publish; at most one holder per bucket.
    pub async fn lock_bucket(&self, key: &str) -> OwnedMutexGuard<()> {
        let index = bucket_index(key);
        self.buckets[index].clone().lock_owned().await
    }

    /// Snapshot of all records for a deterministic resolver pass.
    pub async fn snapshot(&self) -> Vec<TicketRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<TicketRecord> {
        self.records.read().await.get(key).cloned()
    }

    /// Insert a record keyed by its fingerprint. Replacing an existing
    /// record for the same key means the caller skipped the bucket guard.
    pub async fn insert(&self, record: TicketRecord) {
        let key = record.fingerprint.key().to_string();
        info!(
            ticket_id = %record.ticket_id,
            fingerprint = %key,
            "Recording ticket in working set"
        );
        let previous = self.records.write().await.insert(key.clone(), record);
        if let Some(previous) = previous {
            warn!(
                fingerprint = %key,
                replaced = %previous.ticket_id,
                "Replaced existing record for fingerprint"
            );
        }
    }

    /// Touch a record's updated-at after a merge.
    pub async fn touch(&self, key: &str, at: DateTime<Utc>) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(record) => {
                record.updated_at = at;
                true
            }
            None => {
                debug!(fingerprint = %key, "Touch on unknown fingerprint");
                false
            }
        }
    }

    /// Replace the contents from a tracker snapshot (startup seed or
    /// periodic reload).
    pub async fn seed(&self, records: Vec<TicketRecord>) -> usize {
        let mut map = self.records.write().await;
        map.clear();
        for record in records {
            map.insert(record.fingerprint.key().to_string(), record);
        }
        let count = map.len();
        info!(count, "Working set seeded");
        count
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn bucket_index(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % BUCKET_COUNT
}
