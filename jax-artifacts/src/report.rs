//! Append-only record of a validation run against an artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub id: Uuid,
    pub artifact_uuid: Uuid,
    /// Unique per validation run; retrying a run is rejected by the store.
    pub run_id: Uuid,
    /// Kind of check, e.g. `determinism`, `walk_forward`, `out_of_sample`.
    pub test_type: String,
    pub passed: bool,
    pub metrics: Option<serde_json::Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub determinism_seed: Option<i64>,
    /// Free-form description of where the run executed.
    pub test_environment: Option<serde_json::Value>,
    pub report_uri: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn new(
        artifact_uuid: Uuid,
        run_id: Uuid,
        test_type: impl Into<String>,
        passed: bool,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let elapsed = completed_at - started_at;
        let duration_seconds = elapsed
            .num_nanoseconds()
            .map_or(elapsed.num_milliseconds() as f64 / 1e3, |ns| ns as f64 / 1e9);
        Self {
            id: Uuid::new_v4(),
            artifact_uuid,
            run_id,
            test_type: test_type.into(),
            passed,
            metrics: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            determinism_seed: None,
            test_environment: None,
            report_uri: None,
            started_at,
            completed_at,
            duration_seconds,
            created_at: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.determinism_seed = Some(seed);
        self
    }

    pub fn with_environment(mut self, environment: serde_json::Value) -> Self {
        self.test_environment = Some(environment);
        self
    }

    pub fn with_report_uri(mut self, uri: impl Into<String>) -> Self {
        self.report_uri = Some(uri.into());
        self
    }
}
