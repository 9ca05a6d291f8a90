//! Error types for the artifact governance core.

use thiserror::Error;
use uuid::Uuid;

use crate::approval::ApprovalState;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Failure to produce the canonical byte form of an artifact.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// NaN or infinite value; these have no stable JSON representation.
    #[error("Non-finite number in field {field}")]
    NonFiniteNumber { field: String },

    #[error("Failed to serialize canonical payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A uniqueness, reference or integrity constraint rejected a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    #[error("an artifact with hash {hash} already exists")]
    DuplicateHash { hash: String },

    #[error("strategy {name} version {version} already exists")]
    DuplicateStrategyVersion { name: String, version: String },

    #[error(
        "artifact id {artifact_id} already exists; ids have one-second resolution, \
         so builds of one strategy must be a second apart"
    )]
    DuplicateArtifactId { artifact_id: String },

    #[error("artifact {artifact_uuid} already has an approval record")]
    DuplicateApproval { artifact_uuid: Uuid },

    #[error("validation run {run_id} is already recorded")]
    DuplicateValidationRun { run_id: Uuid },

    #[error("artifact {artifact_uuid} does not exist")]
    UnknownArtifact { artifact_uuid: Uuid },

    #[error("{0}")]
    Other(String),
}

/// Errors returned by the artifact gateway, builder, loader and reconciler.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Constraint violation: {0}")]
    Constraint(#[from] ConstraintViolation),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: ApprovalState,
        to: ApprovalState,
    },

    #[error("Hash mismatch for artifact {artifact_id}: stored {stored}, computed {computed}")]
    Integrity {
        artifact_id: String,
        stored: String,
        computed: String,
    },

    #[error(transparent)]
    Canonicalization(#[from] CanonicalError),

    /// The artifact row was committed but its approval record was not.
    /// The artifact is not tradable until the reconciler repairs it.
    #[error("Artifact {artifact_id} ({artifact_uuid}) was saved without an approval record: {source}")]
    ApprovalMissing {
        artifact_id: String,
        artifact_uuid: Uuid,
        #[source]
        source: Box<ArtifactError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ArtifactError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// The constraint that rejected the write, if any.
    pub fn constraint(&self) -> Option<&ConstraintViolation> {
        match self {
            Self::Constraint(violation) => Some(violation),
            _ => None,
        }
    }

    /// True for cancellation and deadline expiry.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
