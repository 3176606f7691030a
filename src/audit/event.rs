//! Lifecycle Events
//!
//! One event is recorded per action attempt on a piece of evidence. Events
//! are immutable once appended and carry a kind-specific, strongly typed
//! payload rather than an open metadata map.

use crate::error::CustodyError;
use crate::hashing::ContentDigest;
use crate::identity::LedgerAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four lifecycle actions tracked for chain of custody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Upload,
    View,
    Transfer,
    Export,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "UPLOAD",
            Self::View => "VIEW",
            Self::Transfer => "TRANSFER",
            Self::Export => "EXPORT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CustodyError> {
        match s {
            "UPLOAD" => Ok(Self::Upload),
            "VIEW" => Ok(Self::View),
            "TRANSFER" => Ok(Self::Transfer),
            "EXPORT" => Ok(Self::Export),
            other => Err(CustodyError::InvalidInput(format!(
                "Unknown event kind: {}",
                other
            ))),
        }
    }
}

/// Kind-specific event payload, one variant per lifecycle action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum EventPayload {
    Upload {
        content_hash: ContentDigest,
    },
    /// A verification attempt. Both fields are None when the content stream
    /// failed before a digest could be computed.
    View {
        recomputed_hash: Option<ContentDigest>,
        matches: Option<bool>,
    },
    Transfer {
        recipient_address: LedgerAddress,
    },
    Export {
        format: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Upload { .. } => EventKind::Upload,
            Self::View { .. } => EventKind::View,
            Self::Transfer { .. } => EventKind::Transfer,
            Self::Export { .. } => EventKind::Export,
        }
    }
}

/// Whether the recorded action attempt succeeded. A failed verification is
/// itself an auditable fact, recorded with `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventOutcome {
    Success,
    Failure,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CustodyError> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            other => Err(CustodyError::InvalidInput(format!(
                "Unknown event outcome: {}",
                other
            ))),
        }
    }
}

/// One recorded fact about an evidence item's handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub evidence_id: String,
    pub actor_address: LedgerAddress,
    pub payload: EventPayload,
    pub occurred_at: DateTime<Utc>,
    pub outcome: EventOutcome,
}

impl LifecycleEvent {
    pub fn new(
        evidence_id: String,
        actor_address: LedgerAddress,
        payload: EventPayload,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            evidence_id,
            actor_address,
            payload,
            occurred_at: Utc::now(),
            outcome,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Canonical string representation used for page integrity hashing.
    ///
    /// Pipe-delimited fixed field order; the payload is serialized through
    /// serde_json, whose struct-variant field order is declaration order and
    /// therefore stable across processes.
    pub fn canonical_string(&self) -> String {
        let payload_json =
            serde_json::to_string(&self.payload).unwrap_or_else(|_| "{}".to_string());
        format!(
            "id:{}|kind:{}|evidence_id:{}|actor:{}|occurred_at:{}|outcome:{}|payload:{}",
            self.id,
            self.kind().as_str(),
            self.evidence_id,
            self.actor_address.canonical(),
            self.occurred_at.to_rfc3339(),
            self.outcome.as_str(),
            payload_json
        )
    }
}

/// The stored fingerprint binding an evidence id to its content digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFingerprint {
    pub evidence_id: String,
    pub content_hash: ContentDigest,
    pub computed_at: DateTime<Utc>,
}
