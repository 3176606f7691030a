//! End-to-end lifecycle tests against an in-memory audit store and a mock
//! ledger gateway.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use evidence_custody::audit::{AuditStore, EventKind, EventOutcome};
use evidence_custody::coordinator::CustodyCoordinator;
use evidence_custody::error::{AnchorFailure, CustodyError};
use evidence_custody::ledger::LedgerClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREDENTIAL: &str = "0x3c180ea7a7043108465cc18d93e264235c239f7f139402a01a6766ae95c04e3c";
const CONTRACT: &str = "0xe9d819305b0c24175d1724bd12e3bc1bce8983da";

async fn mock_gateway() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

async fn accepting_gateway() -> MockServer {
    let server = mock_gateway().await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tx_ref": "0xfeedface",
            "block_sequence": 42
        })))
        .mount(&server)
        .await;
    server
}

async fn coordinator_with(server: &MockServer) -> Arc<CustodyCoordinator> {
    let store = AuditStore::in_memory().await.unwrap();
    let ledger = LedgerClient::connect(&server.uri(), CONTRACT, CREDENTIAL, Duration::from_secs(5))
        .await
        .unwrap();
    Arc::new(CustodyCoordinator::new(store, Some(ledger)))
}

fn ten_megabytes() -> Vec<u8> {
    (0..10 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect()
}

#[tokio::test]
async fn full_custody_scenario() {
    let server = accepting_gateway().await;
    let coordinator = coordinator_with(&server).await;
    let content = ten_megabytes();

    // Upload a 10MB file: 64-hex digest, anchored, receipt present.
    let outcome = coordinator
        .record_upload("EV-100", Cursor::new(content.clone()), "investigator-1")
        .await
        .unwrap();
    assert_eq!(outcome.content_hash.as_hex().len(), 64);
    assert!(outcome.recorded);
    assert!(outcome.anchored);
    let receipt = outcome.receipt.as_ref().unwrap();
    assert_eq!(receipt.ledger_tx_ref, "0xfeedface");
    assert_eq!(receipt.block_sequence, 42);

    // The UPLOAD event is visible in subject history.
    let page = coordinator
        .events_for_subject("EV-100", 0, 10)
        .await
        .unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].kind(), EventKind::Upload);
    assert_eq!(page.events[0].outcome, EventOutcome::Success);

    // A second upload for the same id is a duplicate, whatever the bytes.
    let err = coordinator
        .record_upload("EV-100", Cursor::new(b"different".to_vec()), "investigator-2")
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::DuplicateEvidence(_)));

    // Verification with the original content matches.
    Mock::given(method("GET"))
        .and(path(format!("/contracts/{}/evidence/EV-100", CONTRACT)))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let verification = coordinator
        .record_verification("EV-100", Cursor::new(content.clone()), "investigator-1")
        .await
        .unwrap();
    assert!(verification.matches);
    assert!(verification.anchored);

    // A single flipped byte is detected.
    let mut tampered = content;
    tampered[5_000_000] ^= 0x01;
    let verification = coordinator
        .record_verification("EV-100", Cursor::new(tampered), "investigator-1")
        .await
        .unwrap();
    assert!(!verification.matches);

    // Transfer and export follow the same append-then-anchor pattern.
    let transfer = coordinator
        .record_transfer("EV-100", "investigator-1", "investigator-2")
        .await
        .unwrap();
    assert!(transfer.anchored);

    let export = coordinator
        .record_export("EV-100", "investigator-2", "pdf")
        .await
        .unwrap();
    assert!(export.anchored);

    // Full local history: upload, two views, transfer, export.
    let page = coordinator
        .events_for_subject("EV-100", 0, 10)
        .await
        .unwrap();
    let kinds: Vec<EventKind> = page.events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Upload,
            EventKind::View,
            EventKind::View,
            EventKind::Transfer,
            EventKind::Export
        ]
    );
}

#[tokio::test]
async fn anchoring_failure_does_not_unwind_local_record() {
    let server = mock_gateway().await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let coordinator = coordinator_with(&server).await;
    let outcome = coordinator
        .record_upload("EV-7", Cursor::new(b"some video".to_vec()), "investigator-1")
        .await
        .unwrap();

    // Locally recorded, not anchored, failure kind reported for later retry.
    assert!(outcome.recorded);
    assert!(!outcome.anchored);
    assert!(outcome.receipt.is_none());
    assert_eq!(outcome.anchor_failure, Some(AnchorFailure::Unavailable));
    assert!(outcome.anchor_failure.unwrap().is_transient());

    // The UPLOAD event is still on the local record.
    let page = coordinator.events_for_subject("EV-7", 0, 10).await.unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].kind(), EventKind::Upload);
}

#[tokio::test]
async fn ledger_duplicate_is_reported_as_terminal() {
    let server = mock_gateway().await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let coordinator = coordinator_with(&server).await;
    let outcome = coordinator
        .record_upload("EV-8", Cursor::new(b"bytes".to_vec()), "investigator-1")
        .await
        .unwrap();

    assert!(outcome.recorded);
    assert!(!outcome.anchored);
    assert_eq!(
        outcome.anchor_failure,
        Some(AnchorFailure::DuplicateOnLedger)
    );
    assert!(!outcome.anchor_failure.unwrap().is_transient());
}

#[tokio::test]
async fn page_results_are_stable_across_reads() {
    let server = accepting_gateway().await;
    let coordinator = coordinator_with(&server).await;

    for i in 0..5 {
        coordinator
            .record_upload(
                &format!("EV-{}", i),
                Cursor::new(format!("content {}", i).into_bytes()),
                "investigator-1",
            )
            .await
            .unwrap();
    }

    let first = coordinator.admin_events(1, 3).await.unwrap();
    let second = coordinator.admin_events(1, 3).await.unwrap();
    assert_eq!(first.page_integrity_hash, second.page_integrity_hash);
    assert_eq!(first.events, second.events);
    assert_eq!(first.total, 5);
}
