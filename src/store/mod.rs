//! Durable pipeline state: fingerprints and the deduplication working set.

pub mod fingerprint;
pub mod working_set;

pub use fingerprint::Fingerprint;
pub use working_set::{TicketRecord, TicketStatus, WorkingSet};
