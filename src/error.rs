use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for custody operations.
///
/// Ledger-side failures are split by retry semantics: `LedgerUnavailable` and
/// `LedgerTimeout` are transient (retry anchoring later, never re-run the local
/// action), `LedgerRejected` and `DuplicateOnLedger` are terminal.
#[derive(Error, Debug)]
pub enum CustodyError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid actor identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid page bounds: offset={offset}, limit={limit} (limit must be 1..=100)")]
    InvalidPageBounds { offset: u64, limit: u64 },

    #[error("Duplicate evidence: {0} already has a recorded fingerprint")]
    DuplicateEvidence(String),

    #[error("No upload recorded for evidence {0}")]
    NoPriorUpload(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger submission timed out: {0}")]
    LedgerTimeout(String),

    #[error("Ledger rejected submission: {0}")]
    LedgerRejected(String),

    #[error("Ledger already holds a registration for {0}")]
    DuplicateOnLedger(String),
}

impl From<sqlx::Error> for CustodyError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for CustodyError {
    fn from(err: std::io::Error) -> Self {
        Self::IoFailure(format!("Stream error: {}", err))
    }
}

impl From<serde_json::Error> for CustodyError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("JSON serialization error: {}", err))
    }
}

/// Anchoring failure kinds reported back in lifecycle outcomes.
///
/// A failed anchor never unwinds the local audit append, so the failure is
/// data, not an error path: the caller inspects it to decide whether to retry
/// anchoring later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorFailure {
    Unavailable,
    Timeout,
    Rejected,
    DuplicateOnLedger,
}

impl AnchorFailure {
    /// Classify a custody error as an anchor failure, if it is one.
    pub fn from_error(err: &CustodyError) -> Option<Self> {
        match err {
            CustodyError::LedgerUnavailable(_) => Some(Self::Unavailable),
            CustodyError::LedgerTimeout(_) => Some(Self::Timeout),
            CustodyError::LedgerRejected(_) => Some(Self::Rejected),
            CustodyError::DuplicateOnLedger(_) => Some(Self::DuplicateOnLedger),
            _ => None,
        }
    }

    /// Transient failures may be retried with the same payload.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }
}
