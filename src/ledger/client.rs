//! Ledger Gateway Client
//!
//! Submits lifecycle events to the external immutable ledger through its HTTP
//! gateway and classifies every failure by retry semantics. The gateway holds
//! custody of the signing key; this client authenticates with the signing
//! credential and serializes state-changing submissions per signer so the
//! ledger never sees two in-flight transactions from the same credential.

use crate::audit::{EventPayload, LifecycleEvent};
use crate::error::CustodyError;
use crate::identity::LedgerAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CREDENTIAL_HEX_LEN: usize = 64;

/// Proof that an event was committed to the ledger. Absence of a receipt
/// means "locally recorded, not anchored" — a representable state, not an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub event_ref: Uuid,
    pub ledger_tx_ref: String,
    pub block_sequence: u64,
    pub committed_at: DateTime<Utc>,
}

/// Result of submitting one event.
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorOutcome {
    /// A state-changing transaction was committed.
    Committed(AnchorReceipt),
    /// The event only required a read-only ledger lookup (VIEW).
    Observed,
}

impl AnchorOutcome {
    pub fn receipt(&self) -> Option<&AnchorReceipt> {
        match self {
            Self::Committed(receipt) => Some(receipt),
            Self::Observed => None,
        }
    }
}

/// Lifecycle of a single submission. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Submitted,
    Confirmed,
    Rejected,
}

impl SubmissionState {
    pub fn advance(self, next: SubmissionState) -> Result<SubmissionState, CustodyError> {
        let legal = matches!(
            (self, next),
            (Self::Pending, Self::Submitted)
                | (Self::Pending, Self::Rejected)
                | (Self::Submitted, Self::Confirmed)
                | (Self::Submitted, Self::Rejected)
        );
        if legal {
            Ok(next)
        } else {
            Err(CustodyError::InvalidInput(format!(
                "Illegal submission transition {:?} -> {:?}",
                self, next
            )))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected)
    }
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    tx_ref: String,
    block_sequence: u64,
}

#[derive(Clone, Debug)]
pub struct LedgerClient {
    endpoint: String,
    contract_ref: String,
    signing_credential: String,
    http: reqwest::Client,
    // Nonce discipline: one state-changing submission in flight per signer.
    submit_lock: Arc<Mutex<()>>,
}

impl LedgerClient {
    /// Validate configuration and probe the gateway. Fails fast with
    /// `ConfigurationError` on any problem; the caller decides whether to run
    /// in log-only mode instead.
    pub async fn connect(
        endpoint: &str,
        contract_ref: &str,
        signing_credential: &str,
        timeout: Duration,
    ) -> Result<Self, CustodyError> {
        validate_credential(signing_credential)?;
        validate_contract_ref(contract_ref)?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                CustodyError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        let client = Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            contract_ref: contract_ref.to_string(),
            signing_credential: signing_credential.to_string(),
            http,
            submit_lock: Arc::new(Mutex::new(())),
        };

        client.probe().await?;
        info!(endpoint = %client.endpoint, contract = %client.contract_ref, "Ledger client connected");
        Ok(client)
    }

    async fn probe(&self) -> Result<(), CustodyError> {
        let url = format!("{}/health", self.endpoint);
        let response = self.http.get(&url).send().await.map_err(|e| {
            CustodyError::ConfigurationError(format!("Ledger endpoint unreachable: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(CustodyError::ConfigurationError(format!(
                "Ledger endpoint health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Submit a lifecycle event. Blocks until the ledger confirms or the
    /// bounded timeout elapses. VIEW events take the read-only path and do
    /// not produce a transaction.
    pub async fn submit(&self, event: &LifecycleEvent) -> Result<AnchorOutcome, CustodyError> {
        let (operation, params) = match &event.payload {
            EventPayload::Upload { content_hash } => (
                "record-evidence",
                json!({ "content_hash": content_hash.as_hex() }),
            ),
            EventPayload::Transfer { recipient_address } => (
                "record-transfer",
                json!({ "recipient": recipient_address.canonical() }),
            ),
            EventPayload::Export { format } => ("record-export", json!({ "format": format })),
            EventPayload::View { .. } => {
                self.lookup_evidence(&event.evidence_id).await?;
                return Ok(AnchorOutcome::Observed);
            }
        };

        let mut state = SubmissionState::Pending;
        let url = format!("{}/transactions", self.endpoint);
        let body = json!({
            "contract": self.contract_ref,
            "operation": operation,
            "evidence_id": event.evidence_id,
            "actor": event.actor_address.canonical(),
            "event_ref": event.id,
            "params": params,
        });

        // Serialize submissions from this signer.
        let _guard = self.submit_lock.lock().await;

        debug!(operation, evidence_id = %event.evidence_id, "Submitting ledger transaction");
        let response = self
            .http
            .post(&url)
            .header("x-signing-credential", &self.signing_credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, &event.evidence_id))?;
        state = state.advance(SubmissionState::Submitted)?;

        let status = response.status();
        if !status.is_success() {
            state.advance(SubmissionState::Rejected)?;
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, evidence_id = %event.evidence_id, "Ledger rejected submission");
            return Err(classify_status(status, &event.evidence_id, &detail));
        }

        let confirmed: TransactionResponse = response.json().await.map_err(|e| {
            CustodyError::LedgerRejected(format!("Malformed transaction receipt: {}", e))
        })?;
        state.advance(SubmissionState::Confirmed)?;

        info!(
            tx_ref = %confirmed.tx_ref,
            block = confirmed.block_sequence,
            evidence_id = %event.evidence_id,
            "Ledger transaction confirmed"
        );
        Ok(AnchorOutcome::Committed(AnchorReceipt {
            event_ref: event.id,
            ledger_tx_ref: confirmed.tx_ref,
            block_sequence: confirmed.block_sequence,
            committed_at: Utc::now(),
        }))
    }

    /// Read-only evidence lookup, used for VIEW events. No transaction, no
    /// signer queue.
    pub async fn lookup_evidence(&self, evidence_id: &str) -> Result<(), CustodyError> {
        let url = format!(
            "{}/contracts/{}/evidence/{}",
            self.endpoint, self.contract_ref, evidence_id
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, evidence_id))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, evidence_id, ""));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn contract_ref(&self) -> &str {
        &self.contract_ref
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Address the gateway attributes this client's transactions to. Derived
    /// from the credential under the same convention as actor addresses.
    pub fn signer_address(&self) -> Result<LedgerAddress, CustodyError> {
        crate::identity::derive_address(&self.signing_credential)
    }
}

fn validate_credential(credential: &str) -> Result<(), CustodyError> {
    let hex_part = credential.strip_prefix("0x").ok_or_else(|| {
        CustodyError::ConfigurationError("Signing credential must start with 0x".to_string())
    })?;
    if hex_part.len() != CREDENTIAL_HEX_LEN || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CustodyError::ConfigurationError(format!(
            "Signing credential must be 0x + {} hex chars",
            CREDENTIAL_HEX_LEN
        )));
    }
    if hex_part.chars().all(|c| c == '0') {
        return Err(CustodyError::ConfigurationError(
            "Signing credential is a placeholder (all zeros)".to_string(),
        ));
    }
    Ok(())
}

fn validate_contract_ref(contract_ref: &str) -> Result<(), CustodyError> {
    if contract_ref.trim().is_empty() {
        return Err(CustodyError::ConfigurationError(
            "Contract reference is not configured".to_string(),
        ));
    }
    let zeroish = contract_ref
        .trim_start_matches("0x")
        .chars()
        .all(|c| c == '0');
    if zeroish {
        return Err(CustodyError::ConfigurationError(
            "Contract reference is a placeholder (all zeros)".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn classify_transport_error(err: reqwest::Error, subject: &str) -> CustodyError {
    if err.is_timeout() {
        CustodyError::LedgerTimeout(format!("{}: {}", subject, err))
    } else {
        CustodyError::LedgerUnavailable(format!("{}: {}", subject, err))
    }
}

pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    subject: &str,
    detail: &str,
) -> CustodyError {
    if status == reqwest::StatusCode::CONFLICT {
        CustodyError::DuplicateOnLedger(subject.to_string())
    } else if status.is_client_error() {
        CustodyError::LedgerRejected(format!("{} ({}): {}", subject, status, detail))
    } else {
        CustodyError::LedgerUnavailable(format!("{} ({}): {}", subject, status, detail))
    }
}
