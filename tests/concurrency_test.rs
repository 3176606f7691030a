//! Concurrent upload race: the per-evidence-id lock is only a fast path, the
//! fingerprint table's primary key is the arbiter, and exactly one of many
//! racing uploads may win.

use std::io::Cursor;
use std::sync::Arc;

use evidence_custody::audit::{AuditStore, EventKind};
use evidence_custody::coordinator::CustodyCoordinator;
use evidence_custody::error::CustodyError;

#[tokio::test]
async fn fifty_concurrent_uploads_one_winner() {
    let store = AuditStore::in_memory().await.unwrap();
    let coordinator = Arc::new(CustodyCoordinator::new(store, None));

    let mut handles = Vec::new();
    for i in 0..50u32 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            coordinator
                .record_upload(
                    "EV-RACE",
                    Cursor::new(format!("distinct content {}", i).into_bytes()),
                    &format!("investigator-{}", i),
                )
                .await
        }));
    }

    let mut successes = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert!(outcome.recorded);
                successes += 1;
            }
            Err(CustodyError::DuplicateEvidence(id)) => {
                assert_eq!(id, "EV-RACE");
                duplicates += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(duplicates, 49);

    // Exactly one UPLOAD event was appended.
    let page = coordinator
        .events_for_subject("EV-RACE", 0, 100)
        .await
        .unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].kind(), EventKind::Upload);
}

#[tokio::test]
async fn uploads_for_different_ids_do_not_serialize_failures() {
    let store = AuditStore::in_memory().await.unwrap();
    let coordinator = Arc::new(CustodyCoordinator::new(store, None));

    let mut handles = Vec::new();
    for i in 0..20u32 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            coordinator
                .record_upload(
                    &format!("EV-{}", i),
                    Cursor::new(format!("content {}", i).into_bytes()),
                    "investigator-1",
                )
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let page = coordinator.admin_events(0, 100).await.unwrap();
    assert_eq!(page.total, 20);
}
