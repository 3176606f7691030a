//! Audit Trail
//!
//! Append-only, tamper-evident record of evidence lifecycle events with
//! page-level integrity proofs and the fingerprint table that arbitrates
//! duplicate uploads.

pub mod event;
pub mod store;

pub use event::{
    EventKind, EventOutcome, EventPayload, EvidenceFingerprint, LifecycleEvent,
};
pub use store::{AuditPage, AuditStore, EventFilter, MAX_PAGE_LIMIT, MIN_PAGE_LIMIT};
