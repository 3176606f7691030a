//! Append-Only Audit Store
//!
//! SQLite-backed store of record for lifecycle events and evidence
//! fingerprints. Events are insert-only: no update path exists, and the only
//! delete is the explicit administrative retention purge. The UNIQUE
//! constraint on `evidence_fingerprints.evidence_id` is the arbiter for
//! duplicate uploads.

use crate::audit::event::{
    EventKind, EventOutcome, EventPayload, EvidenceFingerprint, LifecycleEvent,
};
use crate::error::CustodyError;
use crate::hashing::ContentDigest;
use crate::identity::LedgerAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

pub const MIN_PAGE_LIMIT: u64 = 1;
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Which slice of the log a read addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Actor(LedgerAddress),
    Subject(String),
}

/// A bounded window over the event log, in insertion order (oldest appended
/// first), plus an integrity hash over exactly the returned events.
///
/// The hash is recomputed on every read and never persisted: it proves that a
/// specific response page was not altered, not that the whole log is intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    pub offset: u64,
    pub limit: u64,
    pub total: u64,
    pub events: Vec<LifecycleEvent>,
    pub page_integrity_hash: String,
}

impl AuditPage {
    /// Deterministic hash over a page's events: SHA-256 of the
    /// newline-joined canonical event strings. Identical page contents
    /// always yield the identical hash, so a client can recompute it
    /// independently.
    pub fn compute_integrity_hash(events: &[LifecycleEvent]) -> String {
        let joined = events
            .iter()
            .map(|e| e.canonical_string())
            .collect::<Vec<_>>()
            .join("\n");
        hex::encode(Sha256::digest(joined.as_bytes()))
    }
}

#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub async fn connect(database_url: &str) -> Result<Self, CustodyError> {
        let pool = SqlitePool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory store for tests.
    pub async fn in_memory() -> Result<Self, CustodyError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<(), CustodyError> {
        sqlx::raw_sql(include_str!("../../migrations/001_custody_schema.sql"))
            .execute(&self.pool)
            .await?;
        info!("Audit store migrations completed");
        Ok(())
    }

    /// Append a lifecycle event. This is the single write path of record;
    /// storage failure propagates as `StorageUnavailable` and the caller must
    /// treat the action as not durably recorded.
    pub async fn append(&self, event: &LifecycleEvent) -> Result<Uuid, CustodyError> {
        let payload_json = serde_json::to_string(&event.payload)?;

        sqlx::query(
            r#"
            INSERT INTO lifecycle_events
                (event_id, evidence_id, kind, actor_address, payload, occurred_at, outcome)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.evidence_id)
        .bind(event.kind().as_str())
        .bind(event.actor_address.canonical())
        .bind(payload_json)
        .bind(event.occurred_at.to_rfc3339())
        .bind(event.outcome.as_str())
        .execute(&self.pool)
        .await?;

        debug!(
            event_id = %event.id,
            kind = event.kind().as_str(),
            evidence_id = %event.evidence_id,
            "Appended lifecycle event"
        );
        Ok(event.id)
    }

    /// Read a page of events in insertion order (oldest appended first).
    ///
    /// `limit` outside `[1, 100]` is rejected with `InvalidPageBounds`. An
    /// offset past the end yields an empty page, not an error.
    pub async fn page(
        &self,
        offset: u64,
        limit: u64,
        filter: &EventFilter,
    ) -> Result<AuditPage, CustodyError> {
        if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(CustodyError::InvalidPageBounds { offset, limit });
        }

        let (where_clause, bind_value) = match filter {
            EventFilter::All => ("", None),
            EventFilter::Actor(addr) => ("WHERE actor_address = ?1", Some(addr.canonical())),
            EventFilter::Subject(id) => ("WHERE evidence_id = ?1", Some(id.clone())),
        };

        let count_sql = format!("SELECT COUNT(*) AS n FROM lifecycle_events {}", where_clause);
        let mut count_query = sqlx::query(&count_sql);
        if let Some(v) = &bind_value {
            count_query = count_query.bind(v.as_str());
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.try_get("n")?;

        let select_sql = format!(
            r#"
            SELECT event_id, evidence_id, kind, actor_address, payload, occurred_at, outcome
            FROM lifecycle_events {}
            ORDER BY seq ASC
            LIMIT {} OFFSET {}
            "#,
            where_clause, limit, offset
        );
        let mut select_query = sqlx::query(&select_sql);
        if let Some(v) = &bind_value {
            select_query = select_query.bind(v.as_str());
        }
        let rows = select_query.fetch_all(&self.pool).await?;

        let events = rows
            .into_iter()
            .map(decode_event)
            .collect::<Result<Vec<_>, _>>()?;

        let page_integrity_hash = AuditPage::compute_integrity_hash(&events);
        Ok(AuditPage {
            offset,
            limit,
            total: total as u64,
            events,
            page_integrity_hash,
        })
    }

    /// All events for one evidence item, oldest first. Used for custody
    /// projection and subject history.
    pub async fn events_for_subject(
        &self,
        evidence_id: &str,
    ) -> Result<Vec<LifecycleEvent>, CustodyError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, evidence_id, kind, actor_address, payload, occurred_at, outcome
            FROM lifecycle_events
            WHERE evidence_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(evidence_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_event).collect()
    }

    /// Record the fingerprint for a first successful upload. The primary key
    /// on evidence_id makes the store the arbiter of at-most-once: a second
    /// insert for the same id fails with `DuplicateEvidence` regardless of
    /// what any in-process fast path concluded.
    pub async fn record_fingerprint(
        &self,
        evidence_id: &str,
        content_hash: &ContentDigest,
    ) -> Result<EvidenceFingerprint, CustodyError> {
        let computed_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO evidence_fingerprints (evidence_id, content_hash, computed_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(evidence_id)
        .bind(content_hash.as_hex())
        .bind(computed_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(EvidenceFingerprint {
                evidence_id: evidence_id.to_string(),
                content_hash: content_hash.clone(),
                computed_at,
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(CustodyError::DuplicateEvidence(evidence_id.to_string()))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Record a first upload atomically: fingerprint insert and UPLOAD event
    /// append in one transaction. A storage failure on either statement rolls
    /// back both, so a fingerprint can never exist without the event that
    /// begins its audit trail, and a failed upload can always be retried.
    pub async fn record_upload(
        &self,
        evidence_id: &str,
        content_hash: &ContentDigest,
        event: &LifecycleEvent,
    ) -> Result<EvidenceFingerprint, CustodyError> {
        let computed_at = Utc::now();
        let payload_json = serde_json::to_string(&event.payload)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO evidence_fingerprints (evidence_id, content_hash, computed_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(evidence_id)
        .bind(content_hash.as_hex())
        .bind(computed_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(CustodyError::DuplicateEvidence(evidence_id.to_string()));
            }
            Err(other) => return Err(other.into()),
        }

        sqlx::query(
            r#"
            INSERT INTO lifecycle_events
                (event_id, evidence_id, kind, actor_address, payload, occurred_at, outcome)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.evidence_id)
        .bind(event.kind().as_str())
        .bind(event.actor_address.canonical())
        .bind(payload_json)
        .bind(event.occurred_at.to_rfc3339())
        .bind(event.outcome.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            event_id = %event.id,
            evidence_id,
            hash = %content_hash,
            "Recorded upload fingerprint and event"
        );
        Ok(EvidenceFingerprint {
            evidence_id: evidence_id.to_string(),
            content_hash: content_hash.clone(),
            computed_at,
        })
    }

    pub async fn fingerprint(
        &self,
        evidence_id: &str,
    ) -> Result<Option<EvidenceFingerprint>, CustodyError> {
        let row = sqlx::query(
            r#"
            SELECT evidence_id, content_hash, computed_at
            FROM evidence_fingerprints
            WHERE evidence_id = ?1
            "#,
        )
        .bind(evidence_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let content_hash = ContentDigest::from_hex(&r.try_get::<String, _>("content_hash")?)?;
            let computed_at = parse_timestamp(&r.try_get::<String, _>("computed_at")?)?;
            Ok(EvidenceFingerprint {
                evidence_id: r.try_get("evidence_id")?,
                content_hash,
                computed_at,
            })
        })
        .transpose()
    }

    /// Current custodian of an evidence item, replayed from its events:
    /// the uploader, superseded by each successful transfer's recipient.
    /// Status is a projection; nothing mutable is stored.
    pub async fn current_custodian(
        &self,
        evidence_id: &str,
    ) -> Result<Option<LedgerAddress>, CustodyError> {
        let events = self.events_for_subject(evidence_id).await?;
        let mut custodian = None;
        for event in &events {
            if event.outcome != EventOutcome::Success {
                continue;
            }
            match &event.payload {
                EventPayload::Upload { .. } => custodian = Some(event.actor_address.clone()),
                EventPayload::Transfer { recipient_address } => {
                    custodian = Some(recipient_address.clone())
                }
                _ => {}
            }
        }
        Ok(custodian)
    }

    /// Explicit administrative retention purge. Never called from any read
    /// path. Returns the number of events removed.
    pub async fn purge_older_than(
        &self,
        retention: chrono::Duration,
    ) -> Result<u64, CustodyError> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query("DELETE FROM lifecycle_events WHERE occurred_at < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, cutoff = %cutoff.to_rfc3339(), "Purged expired audit events");
        }
        Ok(removed)
    }
}

fn decode_event(row: SqliteRow) -> Result<LifecycleEvent, CustodyError> {
    let id_str: String = row.try_get("event_id")?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| CustodyError::StorageUnavailable(format!("Corrupt event id: {}", e)))?;
    let payload: EventPayload = serde_json::from_str(&row.try_get::<String, _>("payload")?)
        .map_err(|e| CustodyError::StorageUnavailable(format!("Corrupt event payload: {}", e)))?;

    // Sanity check: the stored kind column must agree with the payload tag.
    let kind = EventKind::parse(&row.try_get::<String, _>("kind")?)?;
    if kind != payload.kind() {
        return Err(CustodyError::StorageUnavailable(format!(
            "Event {} kind column disagrees with payload",
            id
        )));
    }

    Ok(LifecycleEvent {
        id,
        evidence_id: row.try_get("evidence_id")?,
        actor_address: LedgerAddress::parse(&row.try_get::<String, _>("actor_address")?)?,
        payload,
        occurred_at: parse_timestamp(&row.try_get::<String, _>("occurred_at")?)?,
        outcome: EventOutcome::parse(&row.try_get::<String, _>("outcome")?)?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, CustodyError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CustodyError::StorageUnavailable(format!("Corrupt timestamp {:?}: {}", s, e)))
}
