//! Concurrent promotions, lock waits and cancellation.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{artifact_at, ctx, persist_with_draft, TestStore};
use jax_artifacts::{ApprovalState, ArtifactError, OpContext};

#[test]
fn test_racing_transitions_from_same_state() {
    let t = TestStore::new();
    let artifact = artifact_at("rsi_momentum", "1.0.0", 0);
    persist_with_draft(&t.store, &artifact);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["alice", "bob"]
        .into_iter()
        .map(|actor| {
            let store = Arc::clone(&t.store);
            let barrier = Arc::clone(&barrier);
            let id = artifact.id;
            thread::spawn(move || {
                barrier.wait();
                store.update_approval_state(&ctx(), id, ApprovalState::Validated, actor, "race")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "results: {results:?}");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(ArtifactError::is_invalid_transition));

    let promotions = t.store.list_promotions(&ctx(), artifact.id).unwrap();
    assert_eq!(promotions.len(), 1);
    assert_eq!(promotions[0].from_state, ApprovalState::Draft);
    assert_eq!(
        t.store.get_approval(&ctx(), artifact.id).unwrap().state,
        ApprovalState::Validated
    );
}

#[test]
fn test_many_artifacts_promoted_in_parallel() {
    let t = TestStore::new();
    let artifacts: Vec<_> = (0..8)
        .map(|i| {
            let artifact = artifact_at(&format!("strategy_{i}"), "1.0.0", i);
            persist_with_draft(&t.store, &artifact);
            artifact
        })
        .collect();

    let handles: Vec<_> = artifacts
        .iter()
        .map(|artifact| {
            let store = Arc::clone(&t.store);
            let id = artifact.id;
            thread::spawn(move || {
                for to in [
                    ApprovalState::Validated,
                    ApprovalState::Reviewed,
                    ApprovalState::Approved,
                ] {
                    store.update_approval_state(&ctx(), id, to, "risk-desk", "").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(t.store.list_approved_artifacts(&ctx()).unwrap().len(), 8);
    let stats = t.store.stats(&ctx()).unwrap();
    assert_eq!(stats.promotions, 24);
    assert!(t.store.find_history_mismatches(&ctx()).unwrap().is_empty());
}

#[test]
fn test_deadline_while_waiting_for_write_lock() {
    let t = TestStore::new();
    let artifact = artifact_at("rsi_momentum", "1.0.0", 0);
    persist_with_draft(&t.store, &artifact);

    let holder = t.raw();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let started = Instant::now();
    let err = t
        .store
        .update_approval_state(
            &OpContext::with_timeout(Duration::from_millis(200)),
            artifact.id,
            ApprovalState::Validated,
            "ci",
            "",
        )
        .unwrap_err();
    assert!(matches!(err, ArtifactError::DeadlineExceeded), "got {err:?}");
    assert!(started.elapsed() >= Duration::from_millis(200));

    holder.execute_batch("ROLLBACK;").unwrap();
    assert_eq!(
        t.store.get_approval(&ctx(), artifact.id).unwrap().state,
        ApprovalState::Draft
    );
    assert!(t.store.list_promotions(&ctx(), artifact.id).unwrap().is_empty());
}

#[test]
fn test_cancel_while_waiting_for_write_lock() {
    let t = TestStore::new();
    let artifact = artifact_at("rsi_momentum", "1.0.0", 0);
    persist_with_draft(&t.store, &artifact);

    let holder = t.raw();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let op_ctx = OpContext::background();
    let canceller = {
        let op_ctx = op_ctx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            op_ctx.cancel();
        })
    };

    let started = Instant::now();
    let err = t
        .store
        .update_approval_state(&op_ctx, artifact.id, ApprovalState::Validated, "ci", "")
        .unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err, ArtifactError::Cancelled), "got {err:?}");
    // well inside the store's 5s busy timeout
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());

    holder.execute_batch("ROLLBACK;").unwrap();
    assert_eq!(
        t.store.get_approval(&ctx(), artifact.id).unwrap().state,
        ApprovalState::Draft
    );
}

#[test]
fn test_lock_released_in_time_lets_promotion_through() {
    let t = TestStore::new();
    let artifact = artifact_at("rsi_momentum", "1.0.0", 0);
    persist_with_draft(&t.store, &artifact);

    let path = t.db_path();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = thread::spawn(move || {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("BEGIN IMMEDIATE;").unwrap();
        locked_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(100));
        conn.execute_batch("COMMIT;").unwrap();
    });
    locked_rx.recv().unwrap();

    let promotion = t
        .store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Validated, "ci", "")
        .unwrap();
    holder.join().unwrap();
    assert_eq!(promotion.to_state, ApprovalState::Validated);
}
