//! Custody Coordinator
//!
//! Orchestrates lifecycle actions end to end: content hashing, duplicate and
//! tamper checks, the local audit append (the record of record), and the
//! best-effort ledger anchor. Local durability never depends on anchoring:
//! an anchor failure is reported in the outcome, not rolled back.

use crate::audit::{
    AuditPage, AuditStore, EventFilter, EventOutcome, EventPayload, LifecycleEvent,
};
use crate::error::{AnchorFailure, CustodyError};
use crate::hashing::{self, ContentDigest};
use crate::identity::{derive_address, LedgerAddress};
use crate::ledger::{AnchorOutcome, AnchorReceipt, AnchoredEvent, LedgerClient};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of an upload: always reports local durability and anchoring
/// separately. `anchored: false` with a failure kind means the caller may
/// retry anchoring later without re-uploading.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub evidence_id: String,
    pub content_hash: ContentDigest,
    pub recorded: bool,
    pub anchored: bool,
    pub receipt: Option<AnchorReceipt>,
    pub anchor_failure: Option<AnchorFailure>,
}

/// Result of a verification. A mismatch (`matches: false`) is a successful
/// verification that detected tampering; an unreadable stream is an
/// `IoFailure` error instead, never conflated with a mismatch.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub evidence_id: String,
    pub recomputed_hash: ContentDigest,
    pub stored_hash: ContentDigest,
    pub matches: bool,
    pub recorded: bool,
    pub anchored: bool,
    pub anchor_failure: Option<AnchorFailure>,
}

/// Result of a transfer or export.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleOutcome {
    pub evidence_id: String,
    pub event_id: Uuid,
    pub recorded: bool,
    pub anchored: bool,
    pub receipt: Option<AnchorReceipt>,
    pub anchor_failure: Option<AnchorFailure>,
}

pub struct CustodyCoordinator {
    store: AuditStore,
    // None = log-only mode (anchoring disabled or failed init).
    ledger: Option<LedgerClient>,
    // Fast-path serialization per evidence id. The fingerprint table's
    // primary key remains the arbiter; this lock only avoids racing the
    // hash-and-check work.
    evidence_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CustodyCoordinator {
    pub fn new(store: AuditStore, ledger: Option<LedgerClient>) -> Self {
        if ledger.is_none() {
            warn!("Running in log-only mode: lifecycle events will not be anchored");
        }
        Self {
            store,
            ledger,
            evidence_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn anchoring_enabled(&self) -> bool {
        self.ledger.is_some()
    }

    async fn lock_for(&self, evidence_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.evidence_locks.lock().await;
        locks
            .entry(evidence_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a lock map entry once no caller holds a clone. The map entry is
    /// the only remaining reference at strong_count 1, so eviction cannot
    /// race a waiter onto a second lock for the same id.
    async fn release_lock(&self, evidence_id: &str) {
        let mut locks = self.evidence_locks.lock().await;
        if let Some(entry) = locks.get(evidence_id) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(evidence_id);
            }
        }
    }

    /// Record a first upload: fingerprint the stream, reject duplicates
    /// before any ledger traffic, append the UPLOAD event, then anchor
    /// best-effort.
    pub async fn record_upload<R>(
        &self,
        evidence_id: &str,
        content: R,
        actor_identity: &str,
    ) -> Result<UploadOutcome, CustodyError>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_evidence_id(evidence_id)?;
        let actor = derive_address(actor_identity)?;

        // Hashing happens outside the per-id lock: large streams must not
        // serialize behind each other.
        let content_hash = hashing::hash_reader(content).await?;

        let lock = self.lock_for(evidence_id).await;
        let guard = lock.lock().await;
        let result = self.upload_locked(evidence_id, content_hash, actor).await;
        drop(guard);
        drop(lock);
        self.release_lock(evidence_id).await;
        result
    }

    async fn upload_locked(
        &self,
        evidence_id: &str,
        content_hash: ContentDigest,
        actor: LedgerAddress,
    ) -> Result<UploadOutcome, CustodyError> {
        if self.store.fingerprint(evidence_id).await?.is_some() {
            return Err(CustodyError::DuplicateEvidence(evidence_id.to_string()));
        }

        let event = LifecycleEvent::new(
            evidence_id.to_string(),
            actor,
            EventPayload::Upload {
                content_hash: content_hash.clone(),
            },
            EventOutcome::Success,
        );
        // One transaction for fingerprint and event, with the unique
        // constraint as the actual arbiter under concurrency: a storage
        // failure rolls both back, so a failed upload is always retryable.
        self.store
            .record_upload(evidence_id, &content_hash, &event)
            .await?;
        info!(evidence_id, hash = %content_hash, "Evidence upload recorded");

        let (anchored, receipt, anchor_failure) = self.anchor(&event).await;
        Ok(UploadOutcome {
            evidence_id: evidence_id.to_string(),
            content_hash,
            recorded: true,
            anchored,
            receipt,
            anchor_failure,
        })
    }

    /// Recompute a digest and compare it byte for byte against the stored
    /// fingerprint. The VIEW event is appended whatever the outcome: a failed
    /// verification is itself an auditable fact.
    pub async fn record_verification<R>(
        &self,
        evidence_id: &str,
        content: R,
        actor_identity: &str,
    ) -> Result<VerificationOutcome, CustodyError>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_evidence_id(evidence_id)?;
        let actor = derive_address(actor_identity)?;
        let stored = self
            .store
            .fingerprint(evidence_id)
            .await?
            .ok_or_else(|| CustodyError::NoPriorUpload(evidence_id.to_string()))?;

        let recomputed = match hashing::hash_reader(content).await {
            Ok(digest) => digest,
            Err(io_err) => {
                // Unreadable content is not a mismatch; record the failed
                // attempt and surface the I/O error distinctly.
                let event = LifecycleEvent::new(
                    evidence_id.to_string(),
                    actor,
                    EventPayload::View {
                        recomputed_hash: None,
                        matches: None,
                    },
                    EventOutcome::Failure,
                );
                self.store.append(&event).await?;
                return Err(io_err);
            }
        };

        let matches = recomputed == stored.content_hash;
        let event = LifecycleEvent::new(
            evidence_id.to_string(),
            actor,
            EventPayload::View {
                recomputed_hash: Some(recomputed.clone()),
                matches: Some(matches),
            },
            if matches {
                EventOutcome::Success
            } else {
                EventOutcome::Failure
            },
        );
        self.store.append(&event).await?;
        if !matches {
            warn!(evidence_id, "Verification mismatch: content does not match fingerprint");
        }

        let (anchored, _receipt, anchor_failure) = self.anchor(&event).await;
        Ok(VerificationOutcome {
            evidence_id: evidence_id.to_string(),
            recomputed_hash: recomputed,
            stored_hash: stored.content_hash,
            matches,
            recorded: true,
            anchored,
            anchor_failure,
        })
    }

    /// Transfer custody. The acting identity must be the current custodian;
    /// an unauthorized transfer is refused before anything is appended or
    /// anchored.
    pub async fn record_transfer(
        &self,
        evidence_id: &str,
        from_identity: &str,
        to_identity: &str,
    ) -> Result<LifecycleOutcome, CustodyError> {
        validate_evidence_id(evidence_id)?;
        let from = derive_address(from_identity)?;
        let to = derive_address(to_identity)?;
        if from == to {
            return Err(CustodyError::InvalidInput(
                "Cannot transfer evidence to the current custodian".to_string(),
            ));
        }

        let lock = self.lock_for(evidence_id).await;
        let guard = lock.lock().await;
        let result = self.transfer_locked(evidence_id, from, to).await;
        drop(guard);
        drop(lock);
        self.release_lock(evidence_id).await;
        result
    }

    async fn transfer_locked(
        &self,
        evidence_id: &str,
        from: LedgerAddress,
        to: LedgerAddress,
    ) -> Result<LifecycleOutcome, CustodyError> {
        let custodian = self.require_custodian(evidence_id).await?;
        if custodian != from {
            return Err(CustodyError::Unauthorized(format!(
                "{} is not the current custodian of {}",
                from, evidence_id
            )));
        }

        let event = LifecycleEvent::new(
            evidence_id.to_string(),
            from,
            EventPayload::Transfer {
                recipient_address: to,
            },
            EventOutcome::Success,
        );
        self.store.append(&event).await?;
        info!(evidence_id, "Custody transfer recorded");

        let (anchored, receipt, anchor_failure) = self.anchor(&event).await;
        Ok(LifecycleOutcome {
            evidence_id: evidence_id.to_string(),
            event_id: event.id,
            recorded: true,
            anchored,
            receipt,
            anchor_failure,
        })
    }

    /// Record an export of the evidence in the given format.
    pub async fn record_export(
        &self,
        evidence_id: &str,
        actor_identity: &str,
        format: &str,
    ) -> Result<LifecycleOutcome, CustodyError> {
        validate_evidence_id(evidence_id)?;
        let actor = derive_address(actor_identity)?;
        if format.trim().is_empty() {
            return Err(CustodyError::InvalidInput(
                "Export format must not be empty".to_string(),
            ));
        }

        self.require_custodian(evidence_id).await?;

        let event = LifecycleEvent::new(
            evidence_id.to_string(),
            actor,
            EventPayload::Export {
                format: format.to_string(),
            },
            EventOutcome::Success,
        );
        self.store.append(&event).await?;
        info!(evidence_id, format, "Evidence export recorded");

        let (anchored, receipt, anchor_failure) = self.anchor(&event).await;
        Ok(LifecycleOutcome {
            evidence_id: evidence_id.to_string(),
            event_id: event.id,
            recorded: true,
            anchored,
            receipt,
            anchor_failure,
        })
    }

    /// Locally recorded history for one actor, paginated.
    pub async fn events_for_actor(
        &self,
        actor_identity: &str,
        offset: u64,
        limit: u64,
    ) -> Result<AuditPage, CustodyError> {
        let actor = derive_address(actor_identity)?;
        self.store
            .page(offset, limit, &EventFilter::Actor(actor))
            .await
    }

    /// Locally recorded history for one evidence item.
    pub async fn events_for_subject(
        &self,
        evidence_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<AuditPage, CustodyError> {
        validate_evidence_id(evidence_id)?;
        self.store
            .page(offset, limit, &EventFilter::Subject(evidence_id.to_string()))
            .await
    }

    /// Privileged full-log read.
    pub async fn admin_events(&self, offset: u64, limit: u64) -> Result<AuditPage, CustodyError> {
        self.store.page(offset, limit, &EventFilter::All).await
    }

    /// Anchored (ledger-side) history for one evidence item.
    pub async fn ledger_history(
        &self,
        evidence_id: &str,
    ) -> Result<Vec<AnchoredEvent>, CustodyError> {
        let ledger = self.ledger.as_ref().ok_or_else(|| {
            CustodyError::ConfigurationError("Anchoring is disabled".to_string())
        })?;
        ledger.query_by_subject(evidence_id).await
    }

    /// Explicit retention purge, exposed for the admin surface only.
    pub async fn purge_older_than(
        &self,
        retention: chrono::Duration,
    ) -> Result<u64, CustodyError> {
        self.store.purge_older_than(retention).await
    }

    async fn require_custodian(&self, evidence_id: &str) -> Result<LedgerAddress, CustodyError> {
        self.store
            .current_custodian(evidence_id)
            .await?
            .ok_or_else(|| CustodyError::NoPriorUpload(evidence_id.to_string()))
    }

    /// Best-effort anchor of an appended event. Never fails the caller: the
    /// local append is already durable, so ledger trouble is reported as
    /// outcome data.
    async fn anchor(
        &self,
        event: &LifecycleEvent,
    ) -> (bool, Option<AnchorReceipt>, Option<AnchorFailure>) {
        let Some(ledger) = &self.ledger else {
            return (false, None, None);
        };

        match ledger.submit(event).await {
            Ok(AnchorOutcome::Committed(receipt)) => (true, Some(receipt), None),
            Ok(AnchorOutcome::Observed) => (true, None, None),
            Err(err) => {
                warn!(
                    evidence_id = %event.evidence_id,
                    error = %err,
                    "Anchoring failed; event remains locally recorded"
                );
                let failure =
                    AnchorFailure::from_error(&err).unwrap_or(AnchorFailure::Rejected);
                (false, None, Some(failure))
            }
        }
    }
}

fn validate_evidence_id(evidence_id: &str) -> Result<(), CustodyError> {
    if evidence_id.trim().is_empty() {
        return Err(CustodyError::InvalidInput(
            "Evidence id must not be empty".to_string(),
        ));
    }
    Ok(())
}
