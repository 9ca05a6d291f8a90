//! Validation report rows.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::codec::{constraint_message, get_json, get_opt_json, get_ts, get_uuid, ts};
use super::ArtifactStore;
use crate::context::OpContext;
use crate::error::{ArtifactError, ConstraintViolation, Result};
use crate::report::ValidationReport;

const REPORT_COLUMNS: &str = "id, artifact_id, run_id, test_type, passed, metrics, errors, \
    warnings, determinism_seed, test_environment, report_uri, started_at, completed_at, \
    duration_seconds, created_at";

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<ValidationReport> {
    Ok(ValidationReport {
        id: get_uuid(row, 0)?,
        artifact_uuid: get_uuid(row, 1)?,
        run_id: get_uuid(row, 2)?,
        test_type: row.get(3)?,
        passed: row.get(4)?,
        metrics: get_opt_json(row, 5)?,
        errors: get_json(row, 6)?,
        warnings: get_json(row, 7)?,
        determinism_seed: row.get(8)?,
        test_environment: get_opt_json(row, 9)?,
        report_uri: row.get(10)?,
        started_at: get_ts(row, 11)?,
        completed_at: get_ts(row, 12)?,
        duration_seconds: row.get(13)?,
        created_at: get_ts(row, 14)?,
    })
}

impl ArtifactStore {
    /// Record a validation run. Each `run_id` may be recorded once.
    pub fn create_validation_report(&self, ctx: &OpContext, report: &ValidationReport) -> Result<()> {
        let metrics = report.metrics.as_ref().map(serde_json::to_string).transpose()?;
        let errors = serde_json::to_string(&report.errors)?;
        let warnings = serde_json::to_string(&report.warnings)?;
        let environment = report
            .test_environment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.run(ctx, |conn| {
            conn.execute(
                r#"
                INSERT INTO artifact_validation_reports (
                    id, artifact_id, run_id, test_type, passed, metrics, errors, warnings,
                    determinism_seed, test_environment, report_uri,
                    started_at, completed_at, duration_seconds, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
                params![
                    report.id.to_string(),
                    report.artifact_uuid.to_string(),
                    report.run_id.to_string(),
                    report.test_type,
                    report.passed,
                    metrics,
                    errors,
                    warnings,
                    report.determinism_seed,
                    environment,
                    report.report_uri,
                    ts(&report.started_at),
                    ts(&report.completed_at),
                    report.duration_seconds,
                    ts(&report.created_at),
                ],
            )
            .map_err(|err| -> ArtifactError {
                match constraint_message(&err) {
                    Some(msg) if msg.contains("artifact_validation_reports.run_id") => {
                        ConstraintViolation::DuplicateValidationRun {
                            run_id: report.run_id,
                        }
                        .into()
                    }
                    Some(msg) if msg.contains("FOREIGN KEY") => ConstraintViolation::UnknownArtifact {
                        artifact_uuid: report.artifact_uuid,
                    }
                    .into(),
                    Some(msg) => ConstraintViolation::Other(msg.to_string()).into(),
                    None => ArtifactError::from(err),
                }
            })?;
            Ok(())
        })?;

        debug!(
            artifact_uuid = %report.artifact_uuid,
            run_id = %report.run_id,
            test_type = %report.test_type,
            passed = report.passed,
            "Validation report recorded"
        );
        Ok(())
    }

    pub fn get_validation_report(&self, ctx: &OpContext, run_id: Uuid) -> Result<ValidationReport> {
        self.run(ctx, |conn| {
            let sql = format!("SELECT {REPORT_COLUMNS} FROM artifact_validation_reports WHERE run_id = ?1");
            Ok(conn
                .query_row(&sql, params![run_id.to_string()], row_to_report)
                .optional()?)
        })?
        .ok_or_else(|| ArtifactError::not_found("validation report", run_id))
    }

    /// Reports of one artifact, oldest first.
    pub fn list_validation_reports(
        &self,
        ctx: &OpContext,
        artifact_uuid: Uuid,
    ) -> Result<Vec<ValidationReport>> {
        self.run(ctx, |conn| {
            let sql = format!(
                "SELECT {REPORT_COLUMNS} FROM artifact_validation_reports WHERE artifact_id = ?1 \
                 ORDER BY created_at, rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![artifact_uuid.to_string()], row_to_report)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
