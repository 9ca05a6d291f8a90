//! Builds strategy artifacts from backtest runs.
//!
//! ```text
//!   research runtime ─► BacktestRun ─► ArtifactBuilder::build_from_backtest
//!                                         │  seal (SHA-256)
//!                                         │  create_artifact
//!                                         └► create_approval (DRAFT)
//! ```
//!
//! The artifact and its approval are written in two steps. When the second
//! step fails the artifact exists without an approval; it is never tradable
//! in that condition and the error says so, so the reconciler can repair it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use jax_common::config::ArtifactsConfig;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::approval::Approval;
use crate::artifact::{
    artifact_id_for, Artifact, DataWindow, RiskProfile, StrategyInfo, ValidationInfo,
    DEFAULT_SCHEMA_VERSION,
};
use crate::backtest::BacktestRun;
use crate::context::OpContext;
use crate::error::{ArtifactError, Result};
use crate::store::ArtifactStore;

/// Store surface the builder writes through.
pub trait ArtifactPersister: Send + Sync {
    fn create_artifact(&self, ctx: &OpContext, artifact: &Artifact) -> Result<()>;
    fn create_approval(&self, ctx: &OpContext, approval: &Approval) -> Result<()>;
}

impl ArtifactPersister for ArtifactStore {
    fn create_artifact(&self, ctx: &OpContext, artifact: &Artifact) -> Result<()> {
        ArtifactStore::create_artifact(self, ctx, artifact)
    }

    fn create_approval(&self, ctx: &OpContext, approval: &Approval) -> Result<()> {
        ArtifactStore::create_approval(self, ctx, approval)
    }
}

/// Stable UUID for an opaque backtest run id, so replays of the same run
/// always map to the same validation reference.
pub fn validation_run_reference(run_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, run_id.as_bytes())
}

/// Turns backtest results into persisted DRAFT artifacts.
pub struct ArtifactBuilder {
    store: Arc<dyn ArtifactPersister>,
    schema_version: String,
}

impl ArtifactBuilder {
    pub fn new(store: Arc<dyn ArtifactPersister>) -> Self {
        Self {
            store,
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
        }
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = schema_version.into();
        self
    }

    /// Builder stamping the schema version from shared configuration.
    pub fn from_config(store: Arc<dyn ArtifactPersister>, config: &ArtifactsConfig) -> Self {
        Self::new(store).with_schema_version(config.schema_version.clone())
    }

    /// Build, seal and persist an artifact for `run`, plus its DRAFT approval.
    ///
    /// Nothing is written if the artifact cannot be hashed. Store errors
    /// from the artifact insert are returned unchanged. A failed approval
    /// insert is reported as [`ArtifactError::ApprovalMissing`].
    ///
    /// The artifact id is stamped to the second, so two builds of the same
    /// strategy within one second collide with
    /// [`crate::error::ConstraintViolation::DuplicateArtifactId`] even when
    /// their versions differ. Batch pipelines must space such builds.
    pub fn build_from_backtest(
        &self,
        ctx: &OpContext,
        strategy_version: &str,
        params: BTreeMap<String, Value>,
        run: &BacktestRun,
        risk_profile: RiskProfile,
        created_by: &str,
    ) -> Result<Artifact> {
        let now = Utc::now();
        let run_ref = validation_run_reference(&run.run_id);

        let mut artifact = Artifact {
            id: Uuid::new_v4(),
            artifact_id: artifact_id_for(&run.strategy_id, &now),
            schema_version: self.schema_version.clone(),
            strategy: StrategyInfo {
                name: run.strategy_id.clone(),
                version: strategy_version.to_string(),
                code_ref: None,
                params,
            },
            data_window: Some(DataWindow {
                from: run.start_date,
                to: run.end_date,
                symbols: run.tested_symbols(),
            }),
            validation: Some(ValidationInfo {
                backtest_run_id: run_ref,
                metrics: run.metric_map()?,
                determinism_seed: run.seed,
                report_uri: None,
            }),
            risk_profile,
            hash: String::new(),
            signature: None,
            created_by: created_by.to_string(),
            created_at: now,
        };
        artifact.seal()?;

        self.store.create_artifact(ctx, &artifact).inspect_err(|err| {
            error!(
                artifact_id = %artifact.artifact_id,
                run_id = %run.run_id,
                error = %err,
                "Failed to save artifact"
            );
        })?;

        let approval = Approval::new_draft(
            artifact.id,
            created_by,
            format!("artifact created from backtest run {}", run.run_id),
        )
        .with_validation(run_ref, true, None);

        if let Err(err) = self.store.create_approval(ctx, &approval) {
            error!(
                artifact_id = %artifact.artifact_id,
                artifact_uuid = %artifact.id,
                error = %err,
                "Failed to create draft approval record; artifact needs reconciliation"
            );
            return Err(ArtifactError::ApprovalMissing {
                artifact_id: artifact.artifact_id,
                artifact_uuid: artifact.id,
                source: Box::new(err),
            });
        }

        info!(
            artifact_id = %artifact.artifact_id,
            strategy = %artifact.strategy.name,
            version = %artifact.strategy.version,
            hash = %&artifact.hash[..12],
            "Artifact built from backtest"
        );
        Ok(artifact)
    }
}
