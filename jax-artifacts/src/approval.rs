//! Approval workflow: states, allowed transitions and the per-artifact
//! approval record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of an artifact's approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    Draft,
    Validated,
    Reviewed,
    Approved,
    Active,
    Deprecated,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown approval state: {0}")]
pub struct UnknownStateError(pub String);

impl ApprovalState {
    pub const ALL: [ApprovalState; 7] = [
        Self::Draft,
        Self::Validated,
        Self::Reviewed,
        Self::Approved,
        Self::Active,
        Self::Deprecated,
        Self::Revoked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Validated => "VALIDATED",
            Self::Reviewed => "REVIEWED",
            Self::Approved => "APPROVED",
            Self::Active => "ACTIVE",
            Self::Deprecated => "DEPRECATED",
            Self::Revoked => "REVOKED",
        }
    }

    /// States reachable from this one in a single promotion.
    pub fn allowed_transitions(&self) -> &'static [ApprovalState] {
        use ApprovalState::*;
        match self {
            Draft => &[Validated, Revoked],
            Validated => &[Draft, Reviewed, Revoked],
            Reviewed => &[Draft, Approved, Revoked],
            Approved => &[Active, Deprecated, Revoked],
            Active => &[Deprecated, Revoked],
            Deprecated => &[Revoked],
            Revoked => &[],
        }
    }

    /// Whether `to` is a legal next state. A state never transitions to itself.
    pub fn can_transition_to(&self, to: ApprovalState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Whether artifacts in this state may be loaded by the trading runtime.
    pub fn is_tradable(&self) -> bool {
        matches!(self, Self::Approved | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStateError(s.to_string()))
    }
}

/// Approval record, exactly one per artifact.
///
/// Only this record changes over an artifact's lifetime; the artifact itself
/// is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    /// Internal UUID of the artifact this record governs.
    pub artifact_uuid: Uuid,
    pub state: ApprovalState,
    pub previous_state: Option<ApprovalState>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub validation_run_id: Option<Uuid>,
    pub validation_passed: bool,
    pub validation_report_uri: Option<String>,
    pub review_notes: Option<String>,
    pub reviewer: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub state_changed_by: String,
    pub state_changed_at: DateTime<Utc>,
    pub state_change_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    /// Fresh DRAFT record for a newly created artifact.
    pub fn new_draft(artifact_uuid: Uuid, created_by: &str, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            artifact_uuid,
            state: ApprovalState::Draft,
            previous_state: None,
            approved_by: None,
            approved_at: None,
            validation_run_id: None,
            validation_passed: false,
            validation_report_uri: None,
            review_notes: None,
            reviewer: None,
            reviewed_at: None,
            state_changed_by: created_by.to_string(),
            state_changed_at: now,
            state_change_reason: Some(reason.into()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the validation run that produced the artifact.
    pub fn with_validation(mut self, run_id: Uuid, passed: bool, report_uri: Option<String>) -> Self {
        self.validation_run_id = Some(run_id);
        self.validation_passed = passed;
        self.validation_report_uri = report_uri;
        self
    }

    /// True when the artifact may be used for live trading.
    pub fn is_approved(&self) -> bool {
        self.state.is_tradable()
    }

    /// Same predicate as [`Approval::is_approved`]; kept for callers that
    /// ask whether a strategy is usable rather than approved.
    pub fn is_usable(&self) -> bool {
        self.state.is_tradable()
    }

    pub fn can_transition_to(&self, to: ApprovalState) -> bool {
        self.state.can_transition_to(to)
    }
}

/// One state change in the append-only audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: Uuid,
    pub artifact_uuid: Uuid,
    pub from_state: ApprovalState,
    pub to_state: ApprovalState,
    pub promoted_by: String,
    pub promoted_at: DateTime<Utc>,
    pub reason: Option<String>,
    /// Snapshot of the approval's validation fields at promotion time.
    pub validation_data: Option<serde_json::Value>,
}
