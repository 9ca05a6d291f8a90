//! Detection and repair of partially written artifacts.
//!
//! The builder writes an artifact and its approval in two steps. If the
//! second step fails the artifact is left without an approval, which keeps
//! it out of trading but also out of the workflow. The reconciler finds
//! those artifacts and gives them the DRAFT approval they should have had.
//! It also reports approvals whose state disagrees with the promotion log.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::approval::Approval;
use crate::context::OpContext;
use crate::error::Result;
use crate::store::{ArtifactStore, HistoryMismatch};

/// Artifact with no approval record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingApproval {
    pub artifact_uuid: Uuid,
    pub artifact_id: String,
    pub strategy_name: String,
    pub strategy_version: String,
}

/// Result of a reconciliation scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    /// Artifacts that need a DRAFT approval
    pub missing_approval: Vec<MissingApproval>,
    /// Approvals out of step with their promotion history
    pub history_mismatches: Vec<HistoryMismatch>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_approval.is_empty() && self.history_mismatches.is_empty()
    }
}

/// Finds and repairs inconsistencies between artifacts, approvals and
/// promotions.
pub struct Reconciler {
    store: Arc<ArtifactStore>,
}

impl Reconciler {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Read-only consistency scan.
    pub fn scan(&self, ctx: &OpContext) -> Result<ReconciliationReport> {
        let missing_approval: Vec<MissingApproval> = self
            .store
            .find_artifacts_missing_approval(ctx)?
            .into_iter()
            .map(|a| MissingApproval {
                artifact_uuid: a.id,
                artifact_id: a.artifact_id,
                strategy_name: a.strategy.name,
                strategy_version: a.strategy.version,
            })
            .collect();
        let history_mismatches = self.store.find_history_mismatches(ctx)?;

        let report = ReconciliationReport {
            missing_approval,
            history_mismatches,
        };

        if report.is_consistent() {
            info!("Artifact store is consistent");
        } else {
            warn!(
                missing_approval = report.missing_approval.len(),
                history_mismatches = report.history_mismatches.len(),
                "Artifact store needs reconciliation"
            );
        }
        Ok(report)
    }

    /// Create the DRAFT approval an artifact is missing.
    ///
    /// Fails with a duplicate-approval constraint if the artifact already
    /// has one, so repairing twice is harmless.
    pub fn repair_missing_approval(
        &self,
        ctx: &OpContext,
        artifact_uuid: Uuid,
        actor: &str,
    ) -> Result<Approval> {
        let artifact = self.store.get_artifact_by_id(ctx, artifact_uuid)?;

        let mut approval = Approval::new_draft(
            artifact.id,
            actor,
            format!("approval record restored for {}", artifact.artifact_id),
        );
        if let Some(run_ref) = artifact.backtest_run_id() {
            let report_uri = artifact.validation.as_ref().and_then(|v| v.report_uri.clone());
            approval = approval.with_validation(run_ref, true, report_uri);
        }

        self.store.create_approval(ctx, &approval)?;
        info!(
            artifact_id = %artifact.artifact_id,
            actor = %actor,
            "Restored missing draft approval"
        );
        Ok(approval)
    }

    /// Repair every artifact found without an approval.
    pub fn repair_all(&self, ctx: &OpContext, actor: &str) -> Result<Vec<Approval>> {
        let missing = self.store.find_artifacts_missing_approval(ctx)?;
        let mut repaired = Vec::with_capacity(missing.len());
        for artifact in missing {
            repaired.push(self.repair_missing_approval(ctx, artifact.id, actor)?);
        }
        info!(repaired = repaired.len(), "Reconciliation complete");
        Ok(repaired)
    }
}
