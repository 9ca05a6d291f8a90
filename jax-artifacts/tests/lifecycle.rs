//! Artifact lifecycle from backtest to revocation.

mod common;

use std::sync::Arc;

use common::{backtest_run, ctx, rsi_params, TestStore};
use jax_artifacts::{
    validation_run_reference, ApprovalState, ArtifactBuilder, ArtifactError, ConstraintViolation,
    RiskProfile,
};

// ============================================================================
// Full promotion path
// ============================================================================

#[test]
fn test_rsi_momentum_lifecycle() {
    let t = TestStore::new();
    let store = &t.store;
    let builder = ArtifactBuilder::new(t.store.clone());

    let run = backtest_run("bt-rsi-001", "rsi_momentum");
    let artifact = builder
        .build_from_backtest(&ctx(), "1.0.0", rsi_params(), &run, RiskProfile::default(), "researcher")
        .unwrap();
    artifact.verify_hash().unwrap();

    let approval = store.get_approval(&ctx(), artifact.id).unwrap();
    assert_eq!(approval.state, ApprovalState::Draft);
    assert!(store.list_promotions(&ctx(), artifact.id).unwrap().is_empty());

    let steps = [
        (ApprovalState::Validated, "backtest passed"),
        (ApprovalState::Reviewed, "parameters look sane"),
        (ApprovalState::Approved, "approved for paper trading"),
    ];
    for (i, (to, reason)) in steps.iter().enumerate() {
        let promotion = store
            .update_approval_state(&ctx(), artifact.id, *to, "risk-desk", reason)
            .unwrap();
        assert_eq!(promotion.to_state, *to);
        assert_eq!(store.list_promotions(&ctx(), artifact.id).unwrap().len(), i + 1);
    }

    // Skipping straight from REVIEWED to ACTIVE is refused.
    let t2 = TestStore::new();
    let other = ArtifactBuilder::new(t2.store.clone())
        .build_from_backtest(&ctx(), "1.0.0", rsi_params(), &run, RiskProfile::default(), "researcher")
        .unwrap();
    for to in [ApprovalState::Validated, ApprovalState::Reviewed] {
        t2.store.update_approval_state(&ctx(), other.id, to, "risk-desk", "").unwrap();
    }
    let err = t2
        .store
        .update_approval_state(&ctx(), other.id, ApprovalState::Active, "risk-desk", "skip")
        .unwrap_err();
    assert!(matches!(
        err,
        ArtifactError::InvalidTransition {
            from: ApprovalState::Reviewed,
            to: ApprovalState::Active
        }
    ));
    assert_eq!(t2.store.list_promotions(&ctx(), other.id).unwrap().len(), 2);

    store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Active, "ops", "go live")
        .unwrap();
    let approved = store.list_approved_artifacts(&ctx()).unwrap();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, artifact.id);

    store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Revoked, "risk-desk", "drawdown breach")
        .unwrap();
    assert!(store.list_approved_artifacts(&ctx()).unwrap().is_empty());

    // The artifact and its full history remain.
    let stored = store.get_artifact_by_id(&ctx(), artifact.id).unwrap();
    assert_eq!(stored, artifact);
    let history: Vec<_> = store
        .list_promotions(&ctx(), artifact.id)
        .unwrap()
        .into_iter()
        .map(|p| (p.from_state, p.to_state))
        .collect();
    assert_eq!(
        history,
        vec![
            (ApprovalState::Draft, ApprovalState::Validated),
            (ApprovalState::Validated, ApprovalState::Reviewed),
            (ApprovalState::Reviewed, ApprovalState::Approved),
            (ApprovalState::Approved, ApprovalState::Active),
            (ApprovalState::Active, ApprovalState::Revoked),
        ]
    );

    let approval = store.get_approval(&ctx(), artifact.id).unwrap();
    assert_eq!(approval.state, ApprovalState::Revoked);
    assert_eq!(approval.previous_state, Some(ApprovalState::Active));
    assert!(!approval.is_approved());
}

#[test]
fn test_revoked_is_terminal() {
    let t = TestStore::new();
    let artifact = common::artifact_at("rsi_momentum", "1.0.0", 0);
    common::persist_with_draft(&t.store, &artifact);

    t.store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Revoked, "risk-desk", "bad data")
        .unwrap();

    for to in ApprovalState::ALL {
        let err = t
            .store
            .update_approval_state(&ctx(), artifact.id, to, "risk-desk", "retry")
            .unwrap_err();
        assert!(err.is_invalid_transition(), "REVOKED -> {to} should be refused");
    }
    assert_eq!(t.store.list_promotions(&ctx(), artifact.id).unwrap().len(), 1);
}

// ============================================================================
// Approval side effects
// ============================================================================

#[test]
fn test_review_and_approval_stamps() {
    let t = TestStore::new();
    let artifact = common::artifact_at("rsi_momentum", "1.0.0", 0);
    common::persist_with_draft(&t.store, &artifact);

    t.store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Validated, "ci", "")
        .unwrap();
    let approval = t.store.get_approval(&ctx(), artifact.id).unwrap();
    assert!(approval.reviewer.is_none());
    assert!(approval.state_change_reason.is_none());

    t.store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Reviewed, "alice", "thresholds ok")
        .unwrap();
    let approval = t.store.get_approval(&ctx(), artifact.id).unwrap();
    assert_eq!(approval.reviewer.as_deref(), Some("alice"));
    assert_eq!(approval.review_notes.as_deref(), Some("thresholds ok"));
    assert!(approval.reviewed_at.is_some());
    assert!(approval.approved_by.is_none());

    t.store
        .update_approval_state(&ctx(), artifact.id, ApprovalState::Approved, "bob", "ship it")
        .unwrap();
    let approval = t.store.get_approval(&ctx(), artifact.id).unwrap();
    assert_eq!(approval.approved_by.as_deref(), Some("bob"));
    assert!(approval.approved_at.is_some());
    assert_eq!(approval.reviewer.as_deref(), Some("alice"));
    assert_eq!(approval.state_changed_by, "bob");
    assert_eq!(approval.previous_state, Some(ApprovalState::Reviewed));
    assert!(approval.is_approved());
    assert!(approval.is_usable());
}

#[test]
fn test_transition_by_artifact_id() {
    let t = TestStore::new();
    let artifact = common::artifact_at("rsi_momentum", "1.0.0", 0);
    common::persist_with_draft(&t.store, &artifact);

    let promotion = t
        .store
        .update_approval_state_by_artifact_id(
            &ctx(),
            &artifact.artifact_id,
            ApprovalState::Validated,
            "ci",
            "determinism check passed",
        )
        .unwrap();
    assert_eq!(promotion.artifact_uuid, artifact.id);
    assert_eq!(promotion.reason.as_deref(), Some("determinism check passed"));

    let err = t
        .store
        .update_approval_state_by_artifact_id(&ctx(), "strat_missing", ApprovalState::Validated, "ci", "")
        .unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Builder against a real store
// ============================================================================

#[test]
fn test_builder_records_validation_evidence() {
    let t = TestStore::new();
    let builder = ArtifactBuilder::new(t.store.clone()).with_schema_version("1.1.0");
    let run = backtest_run("bt-rsi-002", "rsi_momentum");

    let artifact = builder
        .build_from_backtest(&ctx(), "2.0.0", rsi_params(), &run, RiskProfile::default(), "researcher")
        .unwrap();
    assert_eq!(artifact.schema_version, "1.1.0");
    assert!(artifact.artifact_id.starts_with("strat_rsi_momentum_"));

    let run_ref = validation_run_reference("bt-rsi-002");
    let stored = t.store.get_artifact_by_artifact_id(&ctx(), &artifact.artifact_id).unwrap();
    stored.verify_hash().unwrap();
    let validation = stored.validation.as_ref().unwrap();
    assert_eq!(validation.backtest_run_id, run_ref);
    assert_eq!(validation.determinism_seed, 42);
    assert_eq!(stored.data_window.as_ref().unwrap().symbols, vec!["000001.SZ"]);

    let approval = t.store.get_approval(&ctx(), artifact.id).unwrap();
    assert_eq!(approval.state, ApprovalState::Draft);
    assert_eq!(approval.validation_run_id, Some(run_ref));
    assert!(approval.validation_passed);
    assert!(approval.state_change_reason.unwrap().contains("bt-rsi-002"));

    // Same strategy version again is a duplicate, and no second approval appears.
    let err = builder
        .build_from_backtest(&ctx(), "2.0.0", rsi_params(), &run, RiskProfile::default(), "researcher")
        .unwrap_err();
    assert_eq!(
        err.constraint(),
        Some(&ConstraintViolation::DuplicateStrategyVersion {
            name: "rsi_momentum".into(),
            version: "2.0.0".into(),
        })
    );
    assert_eq!(t.store.stats(&ctx()).unwrap().artifacts, 1);
}

#[test]
fn test_builder_shares_store_across_threads() {
    let t = TestStore::new();
    let builder = Arc::new(ArtifactBuilder::new(t.store.clone()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let builder = Arc::clone(&builder);
            std::thread::spawn(move || {
                let run = backtest_run(&format!("bt-{i}"), &format!("strategy_{i}"));
                builder
                    .build_from_backtest(&ctx(), "1.0.0", rsi_params(), &run, RiskProfile::default(), "researcher")
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = t.store.stats(&ctx()).unwrap();
    assert_eq!(stats.artifacts, 4);
    assert_eq!(stats.approvals_by_state.get(&ApprovalState::Draft), Some(&4));
    assert_eq!(stats.artifacts_missing_approval, 0);
}
