//! Detection and repair of artifacts left without an approval.

mod common;

use common::{artifact_at, ctx, persist_with_draft, TestStore};
use jax_artifacts::artifact::ValidationInfo;
use jax_artifacts::{validation_run_reference, ApprovalState, ConstraintViolation, Reconciler};

#[test]
fn test_scan_and_repair_missing_approval() {
    let t = TestStore::new();
    let complete = artifact_at("alpha", "1.0.0", 0);
    persist_with_draft(&t.store, &complete);

    // Artifact written without its approval, as after a failed second step.
    let mut orphan = artifact_at("beta", "1.0.0", 1);
    let run_ref = validation_run_reference("bt-beta-1");
    orphan.validation = Some(ValidationInfo {
        backtest_run_id: run_ref,
        metrics: Default::default(),
        determinism_seed: 7,
        report_uri: Some("file:///reports/beta.html".into()),
    });
    orphan.seal().unwrap();
    t.store.create_artifact(&ctx(), &orphan).unwrap();

    let reconciler = Reconciler::new(t.store.clone());
    let report = reconciler.scan(&ctx()).unwrap();
    assert!(!report.is_consistent());
    assert_eq!(report.missing_approval.len(), 1);
    assert_eq!(report.missing_approval[0].artifact_uuid, orphan.id);
    assert_eq!(report.missing_approval[0].artifact_id, orphan.artifact_id);
    assert!(report.history_mismatches.is_empty());

    let repaired = reconciler.repair_missing_approval(&ctx(), orphan.id, "ops").unwrap();
    assert_eq!(repaired.state, ApprovalState::Draft);
    assert_eq!(repaired.validation_run_id, Some(run_ref));
    assert!(repaired.validation_passed);
    assert_eq!(repaired.validation_report_uri.as_deref(), Some("file:///reports/beta.html"));

    let stored = t.store.get_approval(&ctx(), orphan.id).unwrap();
    assert_eq!(stored, repaired);
    assert!(reconciler.scan(&ctx()).unwrap().is_consistent());
    assert_eq!(t.store.stats(&ctx()).unwrap().artifacts, 2);

    let err = reconciler
        .repair_missing_approval(&ctx(), orphan.id, "ops")
        .unwrap_err();
    assert_eq!(
        err.constraint(),
        Some(&ConstraintViolation::DuplicateApproval {
            artifact_uuid: orphan.id
        })
    );
}

#[test]
fn test_repair_all_without_evidence() {
    let t = TestStore::new();
    let first = artifact_at("alpha", "1.0.0", 0);
    let second = artifact_at("beta", "1.0.0", 1);
    t.store.create_artifact(&ctx(), &first).unwrap();
    t.store.create_artifact(&ctx(), &second).unwrap();

    let reconciler = Reconciler::new(t.store.clone());
    let repaired = reconciler.repair_all(&ctx(), "ops").unwrap();
    assert_eq!(repaired.len(), 2);
    assert!(repaired.iter().all(|a| a.validation_run_id.is_none() && !a.validation_passed));
    assert!(repaired
        .iter()
        .all(|a| a.state_change_reason.as_deref().unwrap_or_default().starts_with("approval record restored for")));
    assert_eq!(t.store.stats(&ctx()).unwrap().artifacts_missing_approval, 0);
}

#[test]
fn test_scan_reports_state_without_history() {
    let t = TestStore::new();
    let artifact = artifact_at("alpha", "1.0.0", 0);
    persist_with_draft(&t.store, &artifact);

    t.raw()
        .execute(
            "UPDATE artifact_approvals SET state = 'APPROVED' WHERE artifact_id = ?1",
            [artifact.id.to_string()],
        )
        .unwrap();

    let report = Reconciler::new(t.store.clone()).scan(&ctx()).unwrap();
    assert_eq!(report.history_mismatches.len(), 1);
    let mismatch = &report.history_mismatches[0];
    assert_eq!(mismatch.artifact_uuid, artifact.id);
    assert_eq!(mismatch.approval_state, ApprovalState::Approved);
    assert_eq!(mismatch.latest_promotion, None);
}

#[test]
fn test_history_follows_commit_order_when_clock_steps_back() {
    let t = TestStore::new();
    let artifact = artifact_at("alpha", "1.0.0", 0);
    persist_with_draft(&t.store, &artifact);
    t.store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Validated, "ci", "")
        .unwrap();

    // A later promotion stamped before the first one, as after an NTP step.
    let raw = t.raw();
    raw.execute(
        "INSERT INTO artifact_promotions (id, artifact_id, from_state, to_state, promoted_by, promoted_at)
         VALUES (?1, ?2, 'VALIDATED', 'REVIEWED', 'risk-desk', '2020-01-01T00:00:00.000000000Z')",
        [uuid::Uuid::new_v4().to_string(), artifact.id.to_string()],
    )
    .unwrap();
    raw.execute(
        "UPDATE artifact_approvals SET state = 'REVIEWED', previous_state = 'VALIDATED' WHERE artifact_id = ?1",
        [artifact.id.to_string()],
    )
    .unwrap();

    let promotions = t.store.list_promotions(&ctx(), artifact.id).unwrap();
    let targets: Vec<_> = promotions.iter().map(|p| p.to_state).collect();
    assert_eq!(targets, [ApprovalState::Validated, ApprovalState::Reviewed]);

    let history = t.store.list_promotion_history(&ctx(), 10).unwrap();
    assert_eq!(history[0].to_state, ApprovalState::Reviewed);

    let report = Reconciler::new(t.store.clone()).scan(&ctx()).unwrap();
    assert!(report.history_mismatches.is_empty(), "{:?}", report.history_mismatches);
}
