//! Database schema for the artifact store.
//!
//! ```text
//! strategy_artifacts           immutable, one row per artifact
//! artifact_approvals           one mutable row per artifact
//! artifact_promotions          append-only state change log
//! artifact_validation_reports  append-only validation run results
//! ```
//!
//! Immutability of artifacts and append-only behaviour of the two log tables
//! are enforced by triggers, so raw SQL cannot bypass them either.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Current schema version stored in `schema_version`.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS strategy_artifacts (
    id               TEXT PRIMARY KEY,
    artifact_id      TEXT NOT NULL UNIQUE,
    schema_version   TEXT NOT NULL,
    strategy_name    TEXT NOT NULL,
    strategy_version TEXT NOT NULL,
    code_ref         TEXT,
    params           TEXT NOT NULL,
    data_window_from TEXT,
    data_window_to   TEXT,
    symbols          TEXT,
    validation       TEXT,
    max_position_pct REAL NOT NULL,
    max_daily_loss   REAL NOT NULL,
    allowed_order_types TEXT NOT NULL,
    hash             TEXT NOT NULL UNIQUE CHECK (length(hash) = 64),
    signature        TEXT,
    payload          TEXT NOT NULL,
    created_by       TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    UNIQUE (strategy_name, strategy_version)
);

CREATE INDEX IF NOT EXISTS idx_artifacts_strategy_created
    ON strategy_artifacts(strategy_name, created_at DESC);

CREATE TABLE IF NOT EXISTS artifact_approvals (
    id                    TEXT PRIMARY KEY,
    artifact_id           TEXT NOT NULL UNIQUE REFERENCES strategy_artifacts(id),
    state                 TEXT NOT NULL CHECK (state IN
        ('DRAFT', 'VALIDATED', 'REVIEWED', 'APPROVED', 'ACTIVE', 'DEPRECATED', 'REVOKED')),
    previous_state        TEXT CHECK (previous_state IS NULL OR previous_state IN
        ('DRAFT', 'VALIDATED', 'REVIEWED', 'APPROVED', 'ACTIVE', 'DEPRECATED', 'REVOKED')),
    approved_by           TEXT,
    approved_at           TEXT,
    validation_run_id     TEXT,
    validation_passed     INTEGER NOT NULL DEFAULT 0,
    validation_report_uri TEXT,
    review_notes          TEXT,
    reviewer              TEXT,
    reviewed_at           TEXT,
    state_changed_by      TEXT NOT NULL,
    state_changed_at      TEXT NOT NULL,
    state_change_reason   TEXT,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_approvals_state ON artifact_approvals(state);

CREATE TABLE IF NOT EXISTS artifact_promotions (
    id              TEXT PRIMARY KEY,
    artifact_id     TEXT NOT NULL REFERENCES strategy_artifacts(id),
    from_state      TEXT NOT NULL,
    to_state        TEXT NOT NULL CHECK (to_state IN
        ('DRAFT', 'VALIDATED', 'REVIEWED', 'APPROVED', 'ACTIVE', 'DEPRECATED', 'REVOKED')),
    promoted_by     TEXT NOT NULL,
    promoted_at     TEXT NOT NULL,
    reason          TEXT,
    validation_data TEXT,
    CHECK (from_state <> to_state)
);

CREATE INDEX IF NOT EXISTS idx_promotions_artifact
    ON artifact_promotions(artifact_id, promoted_at);

CREATE TABLE IF NOT EXISTS artifact_validation_reports (
    id               TEXT PRIMARY KEY,
    artifact_id      TEXT NOT NULL REFERENCES strategy_artifacts(id),
    run_id           TEXT NOT NULL UNIQUE,
    test_type        TEXT NOT NULL,
    passed           INTEGER NOT NULL,
    metrics          TEXT,
    errors           TEXT NOT NULL DEFAULT '[]',
    warnings         TEXT NOT NULL DEFAULT '[]',
    determinism_seed INTEGER,
    test_environment TEXT,
    report_uri       TEXT,
    started_at       TEXT NOT NULL,
    completed_at     TEXT NOT NULL,
    duration_seconds REAL NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_artifact
    ON artifact_validation_reports(artifact_id, created_at);

CREATE TRIGGER IF NOT EXISTS trg_artifacts_immutable
BEFORE UPDATE ON strategy_artifacts
BEGIN
    SELECT RAISE(ABORT, 'strategy_artifacts rows are immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_artifacts_no_delete
BEFORE DELETE ON strategy_artifacts
BEGIN
    SELECT RAISE(ABORT, 'strategy_artifacts rows are immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_promotions_no_update
BEFORE UPDATE ON artifact_promotions
BEGIN
    SELECT RAISE(ABORT, 'artifact_promotions rows are append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_promotions_no_delete
BEFORE DELETE ON artifact_promotions
BEGIN
    SELECT RAISE(ABORT, 'artifact_promotions rows are append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_reports_no_update
BEFORE UPDATE ON artifact_validation_reports
BEGIN
    SELECT RAISE(ABORT, 'artifact_validation_reports rows are append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_reports_no_delete
BEFORE DELETE ON artifact_validation_reports
BEGIN
    SELECT RAISE(ABORT, 'artifact_validation_reports rows are append-only');
END;

CREATE VIEW IF NOT EXISTS v_tradable_artifacts AS
    SELECT a.*, ap.state AS approval_state
    FROM strategy_artifacts a
    JOIN artifact_approvals ap ON ap.artifact_id = a.id
    WHERE ap.state IN ('APPROVED', 'ACTIVE');

CREATE VIEW IF NOT EXISTS v_latest_artifact_per_strategy AS
    SELECT a.*
    FROM strategy_artifacts a
    WHERE a.created_at = (
        SELECT MAX(b.created_at) FROM strategy_artifacts b
        WHERE b.strategy_name = a.strategy_name
    );

CREATE VIEW IF NOT EXISTS v_promotion_history AS
    SELECT p.id,
           p.artifact_id AS artifact_uuid,
           a.artifact_id,
           a.strategy_name,
           a.strategy_version,
           p.from_state,
           p.to_state,
           p.promoted_by,
           p.promoted_at,
           p.reason,
           p.validation_data,
           p.rowid AS seq
    FROM artifact_promotions p
    JOIN strategy_artifacts a ON a.id = p.artifact_id;
"#;

/// Create or upgrade the schema. Safe to run from several processes at once.
pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    let current: Option<u32> = tx
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();

    match current {
        None => {
            tx.execute_batch(SCHEMA_V1)?;
            tx.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
            info!(version = SCHEMA_VERSION, "Created artifact store schema");
        }
        Some(v) if v == SCHEMA_VERSION => {
            debug!(version = v, "Artifact store schema up to date");
        }
        Some(v) => {
            warn!(
                expected = SCHEMA_VERSION,
                found = v,
                "Artifact store schema version mismatch"
            );
        }
    }

    tx.commit()?;
    Ok(())
}
