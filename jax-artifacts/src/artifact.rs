//! Strategy artifact: an immutable, content-addressed snapshot of a strategy
//! configuration together with the evidence that justified it.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CanonicalError;

/// Schema version stamped on artifacts when none is configured.
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

/// Which strategy and which parameters the artifact pins down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub name: String,
    pub version: String,
    /// Source revision of the strategy code, when known.
    #[serde(default)]
    pub code_ref: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// Market data the artifact was validated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub symbols: Vec<String>,
}

/// Evidence from the backtest run that produced the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationInfo {
    pub backtest_run_id: Uuid,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub determinism_seed: i64,
    #[serde(default)]
    pub report_uri: Option<String>,
}

/// Risk limits the runtime enforces while trading the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub max_position_pct: f64,
    pub max_daily_loss: f64,
    pub allowed_order_types: Vec<String>,
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            max_position_pct: 0.2,
            max_daily_loss: 1000.0,
            allowed_order_types: vec!["LIMIT".to_string()],
        }
    }
}

/// An immutable strategy artifact.
///
/// `hash` is the lowercase hex SHA-256 of [`Artifact::canonical_payload`].
/// `id` and `signature` are excluded from the payload; everything else is
/// covered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Internal identifier, referenced by approvals and promotions.
    pub id: Uuid,
    /// Human-readable identifier, e.g. `strat_rsi_momentum_2025-01-01T00:00:00Z`.
    pub artifact_id: String,
    pub schema_version: String,
    pub strategy: StrategyInfo,
    pub data_window: Option<DataWindow>,
    pub validation: Option<ValidationInfo>,
    pub risk_profile: RiskProfile,
    pub hash: String,
    /// Reserved for detached signatures. Not covered by the hash.
    pub signature: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create a sealed artifact with no data window or validation evidence.
    pub fn new(
        name: &str,
        version: &str,
        params: BTreeMap<String, serde_json::Value>,
        risk_profile: RiskProfile,
        created_by: &str,
    ) -> Result<Self, CanonicalError> {
        let created_at = Utc::now();
        let mut artifact = Self {
            id: Uuid::new_v4(),
            artifact_id: artifact_id_for(name, &created_at),
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            strategy: StrategyInfo {
                name: name.to_string(),
                version: version.to_string(),
                code_ref: None,
                params,
            },
            data_window: None,
            validation: None,
            risk_profile,
            hash: String::new(),
            signature: None,
            created_by: created_by.to_string(),
            created_at,
        };
        artifact.seal()?;
        Ok(artifact)
    }

    /// Recompute and store the content hash. Call after the last field change.
    pub fn seal(&mut self) -> Result<(), CanonicalError> {
        self.hash = self.compute_hash()?;
        Ok(())
    }

    /// Run reference recorded as validation evidence, if any.
    pub fn backtest_run_id(&self) -> Option<Uuid> {
        self.validation.as_ref().map(|v| v.backtest_run_id)
    }
}

/// Human-readable artifact id: `strat_<strategy>_<RFC3339 seconds>`.
pub fn artifact_id_for(strategy_name: &str, at: &DateTime<Utc>) -> String {
    format!(
        "strat_{}_{}",
        strategy_name,
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
