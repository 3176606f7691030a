//! Ledger Anchoring
//!
//! Client for the external immutable ledger: submits lifecycle events as
//! gateway transactions with a bounded timeout and per-signer queueing, and
//! queries previously anchored events by actor or subject.

pub mod client;
pub mod query;

pub use client::{AnchorOutcome, AnchorReceipt, LedgerClient, SubmissionState};
pub use query::AnchoredEvent;
