//! Read side used by the trading runtime.
//!
//! Only APPROVED or ACTIVE artifacts are returned, and every artifact is
//! re-hashed before it is handed out. An artifact whose stored content no
//! longer matches its hash is refused.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::context::OpContext;
use crate::error::{ArtifactError, Result};
use crate::store::ArtifactStore;

/// Artifact skipped during a bulk load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedArtifact {
    pub artifact_id: String,
    pub reason: String,
}

/// Outcome of [`ApprovedArtifactLoader::load_approved`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<Artifact>,
    pub rejected: Vec<RejectedArtifact>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Loads verified, tradable artifacts.
pub struct ApprovedArtifactLoader {
    store: Arc<ArtifactStore>,
}

impl ApprovedArtifactLoader {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// All tradable artifacts that pass hash verification.
    ///
    /// Artifacts that fail verification are listed in the report instead of
    /// failing the whole load.
    pub fn load_approved(&self, ctx: &OpContext) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for artifact in self.store.list_approved_artifacts(ctx)? {
            match artifact.verify_hash() {
                Ok(()) => {
                    info!(
                        artifact_id = %artifact.artifact_id,
                        strategy = %artifact.strategy.name,
                        version = %artifact.strategy.version,
                        "Loaded approved artifact"
                    );
                    report.loaded.push(artifact);
                }
                Err(err) => {
                    warn!(
                        artifact_id = %artifact.artifact_id,
                        error = %err,
                        "Skipping artifact that failed verification"
                    );
                    report.rejected.push(RejectedArtifact {
                        artifact_id: artifact.artifact_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if report.loaded.is_empty() {
            warn!("No approved artifacts available; trading runtime will not generate signals");
        } else {
            info!(
                loaded = report.loaded.len(),
                rejected = report.rejected.len(),
                "Approved artifacts loaded"
            );
        }
        Ok(report)
    }

    /// Newest verified tradable artifact of a strategy.
    pub fn latest_approved(&self, ctx: &OpContext, strategy_name: &str) -> Result<Artifact> {
        let artifact = self.store.get_latest_approved_artifact(ctx, strategy_name)?;
        artifact.verify_hash()?;
        Ok(artifact)
    }

    /// A specific artifact, only if it is tradable and intact.
    pub fn get_verified(&self, ctx: &OpContext, artifact_uuid: Uuid) -> Result<Artifact> {
        let approval = self.store.get_approval(ctx, artifact_uuid)?;
        if !approval.is_usable() {
            return Err(ArtifactError::not_found("approved artifact", artifact_uuid));
        }
        let artifact = self.store.get_artifact_by_id(ctx, artifact_uuid)?;
        artifact.verify_hash()?;
        Ok(artifact)
    }
}
