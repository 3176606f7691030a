//! Ledger History Queries
//!
//! Read-only retrieval of previously anchored events from the gateway's
//! indexed event stream, by actor address or by evidence id. An empty result
//! set is a normal answer, not an error.

use crate::audit::EventKind;
use crate::error::CustodyError;
use crate::identity::LedgerAddress;
use crate::ledger::client::{classify_status, classify_transport_error, LedgerClient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An event as the ledger reports it back. `occurred_at` here is the block
/// commit time, not the local append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchoredEvent {
    pub kind: EventKind,
    pub actor: String,
    pub evidence_id: String,
    pub tx_ref: String,
    pub block_sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerClient {
    /// All anchored events attributed to one actor address.
    pub async fn query_by_actor(
        &self,
        actor: &LedgerAddress,
    ) -> Result<Vec<AnchoredEvent>, CustodyError> {
        self.query_events(&[("actor", actor.canonical())]).await
    }

    /// All anchored events for one evidence item.
    pub async fn query_by_subject(
        &self,
        evidence_id: &str,
    ) -> Result<Vec<AnchoredEvent>, CustodyError> {
        self.query_events(&[("evidence_id", evidence_id.to_string())])
            .await
    }

    async fn query_events(
        &self,
        params: &[(&str, String)],
    ) -> Result<Vec<AnchoredEvent>, CustodyError> {
        let url = format!("{}/events", self.endpoint());
        let subject = params
            .first()
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        let mut request = self
            .http()
            .get(&url)
            .query(&[("contract", self.contract_ref())]);
        for (key, value) in params {
            request = request.query(&[(*key, value.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(e, &subject))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // The gateway has no index entries for this topic yet.
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(classify_status(status, &subject, ""));
        }

        let events: Vec<AnchoredEvent> = response.json().await.map_err(|e| {
            CustodyError::LedgerRejected(format!("Malformed event stream response: {}", e))
        })?;
        debug!(count = events.len(), subject = %subject, "Ledger query returned");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::derive_address;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_CREDENTIAL: &str =
        "0x3c180ea7a7043108465cc18d93e264235c239f7f139402a01a6766ae95c04e3c";
    const TEST_CONTRACT: &str = "0xe9d819305b0c24175d1724bd12e3bc1bce8983da";

    async fn connected_client(server: &MockServer) -> LedgerClient {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        LedgerClient::connect(
            &server.uri(),
            TEST_CONTRACT,
            TEST_CREDENTIAL,
            Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_query_by_subject_parses_events() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("evidence_id", "EV-100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "kind": "UPLOAD",
                    "actor": "0x1111111111111111111111111111111111111111",
                    "evidence_id": "EV-100",
                    "tx_ref": "0xdeadbeef",
                    "block_sequence": 4,
                    "occurred_at": "2026-08-30T12:00:00Z"
                }
            ])))
            .mount(&server)
            .await;

        let events = client.query_by_subject("EV-100").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Upload);
        assert_eq!(events[0].block_sequence, 4);
    }

    #[tokio::test]
    async fn test_empty_result_is_ok() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let actor = derive_address("nobody-yet").unwrap();
        let events = client.query_by_actor(&actor).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_missing_index_treated_as_empty() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let events = client.query_by_subject("EV-none").await.unwrap();
        assert!(events.is_empty());
    }
}
