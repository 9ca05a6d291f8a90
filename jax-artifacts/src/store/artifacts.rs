//! Artifact rows: insert once, read many.

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec::{constraint_message, get_json, get_opt_json, get_opt_ts, get_ts, get_uuid, ts};
use super::ArtifactStore;
use crate::artifact::{Artifact, DataWindow, RiskProfile, StrategyInfo};
use crate::context::OpContext;
use crate::error::{ArtifactError, ConstraintViolation, Result};

pub(super) const ARTIFACT_COLUMNS: &str = "id, artifact_id, schema_version, strategy_name, \
    strategy_version, code_ref, params, data_window_from, data_window_to, symbols, validation, \
    max_position_pct, max_daily_loss, allowed_order_types, hash, signature, created_by, created_at";

pub(super) fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    let window_from = get_opt_ts(row, 7)?;
    let window_to = get_opt_ts(row, 8)?;
    let symbols: Option<Vec<String>> = get_opt_json(row, 9)?;
    let data_window = match (window_from, window_to) {
        (Some(from), Some(to)) => Some(DataWindow {
            from,
            to,
            symbols: symbols.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Artifact {
        id: get_uuid(row, 0)?,
        artifact_id: row.get(1)?,
        schema_version: row.get(2)?,
        strategy: StrategyInfo {
            name: row.get(3)?,
            version: row.get(4)?,
            code_ref: row.get(5)?,
            params: get_json(row, 6)?,
        },
        data_window,
        validation: get_opt_json(row, 10)?,
        risk_profile: RiskProfile {
            max_position_pct: row.get(11)?,
            max_daily_loss: row.get(12)?,
            allowed_order_types: get_json(row, 13)?,
        },
        hash: row.get(14)?,
        signature: row.get(15)?,
        created_by: row.get(16)?,
        created_at: get_ts(row, 17)?,
    })
}

/// Map an insert failure onto the constraint that caused it.
fn insert_error(err: rusqlite::Error, artifact: &Artifact) -> ArtifactError {
    let Some(message) = constraint_message(&err) else {
        return err.into();
    };

    let violation = if message.contains("strategy_artifacts.hash") {
        ConstraintViolation::DuplicateHash {
            hash: artifact.hash.clone(),
        }
    } else if message.contains("strategy_artifacts.strategy_name") {
        ConstraintViolation::DuplicateStrategyVersion {
            name: artifact.strategy.name.clone(),
            version: artifact.strategy.version.clone(),
        }
    } else if message.contains("strategy_artifacts.artifact_id") {
        ConstraintViolation::DuplicateArtifactId {
            artifact_id: artifact.artifact_id.clone(),
        }
    } else {
        ConstraintViolation::Other(message.to_string())
    };
    violation.into()
}

fn query_one(conn: &Connection, filter: &str, key: &str) -> Result<Option<Artifact>> {
    let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM strategy_artifacts WHERE {filter} = ?1");
    let artifact = conn
        .query_row(&sql, params![key], row_to_artifact)
        .optional()?;
    debug!(by = filter, key, found = artifact.is_some(), "Artifact lookup");
    Ok(artifact)
}

fn query_many(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Artifact>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, row_to_artifact)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

impl ArtifactStore {
    /// Persist a sealed artifact.
    ///
    /// The hash must match the content; duplicates of the hash, the
    /// `(name, version)` pair or the human-readable id are rejected with a
    /// typed [`ConstraintViolation`].
    pub fn create_artifact(&self, ctx: &OpContext, artifact: &Artifact) -> Result<()> {
        artifact.verify_hash()?;
        let payload = String::from_utf8_lossy(&artifact.canonical_payload()?).into_owned();

        let (window_from, window_to, symbols) = match &artifact.data_window {
            Some(w) => (
                Some(ts(&w.from)),
                Some(ts(&w.to)),
                Some(serde_json::to_string(&w.symbols)?),
            ),
            None => (None, None, None),
        };
        let validation = artifact
            .validation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let params_json = serde_json::to_string(&artifact.strategy.params)?;
        let order_types = serde_json::to_string(&artifact.risk_profile.allowed_order_types)?;

        self.run(ctx, |conn| {
            let tx = self.begin_immediate(ctx, conn)?;

            // Report content and version duplicates ahead of incidental
            // collisions on id or artifact_id.
            let exists = |sql: &str, args: &[&dyn rusqlite::ToSql]| -> rusqlite::Result<bool> {
                tx.query_row(sql, args, |row| row.get(0))
            };
            if exists(
                "SELECT EXISTS(SELECT 1 FROM strategy_artifacts WHERE hash = ?1)",
                params![artifact.hash],
            )? {
                return Err(ConstraintViolation::DuplicateHash {
                    hash: artifact.hash.clone(),
                }
                .into());
            }
            if exists(
                "SELECT EXISTS(SELECT 1 FROM strategy_artifacts \
                 WHERE strategy_name = ?1 AND strategy_version = ?2)",
                params![artifact.strategy.name, artifact.strategy.version],
            )? {
                return Err(ConstraintViolation::DuplicateStrategyVersion {
                    name: artifact.strategy.name.clone(),
                    version: artifact.strategy.version.clone(),
                }
                .into());
            }

            tx.execute(
                r#"
                INSERT INTO strategy_artifacts (
                    id, artifact_id, schema_version, strategy_name, strategy_version,
                    code_ref, params, data_window_from, data_window_to, symbols, validation,
                    max_position_pct, max_daily_loss, allowed_order_types, hash, signature,
                    payload, created_by, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                "#,
                params![
                    artifact.id.to_string(),
                    artifact.artifact_id,
                    artifact.schema_version,
                    artifact.strategy.name,
                    artifact.strategy.version,
                    artifact.strategy.code_ref,
                    params_json,
                    window_from,
                    window_to,
                    symbols,
                    validation,
                    artifact.risk_profile.max_position_pct,
                    artifact.risk_profile.max_daily_loss,
                    order_types,
                    artifact.hash,
                    artifact.signature,
                    payload,
                    artifact.created_by,
                    ts(&artifact.created_at),
                ],
            )
            .map_err(|e| insert_error(e, artifact))?;
            tx.commit()?;
            Ok(())
        })
        .inspect_err(|err| {
            if err.is_constraint() {
                warn!(artifact_id = %artifact.artifact_id, error = %err, "Artifact rejected");
            }
        })?;

        debug!(
            artifact_id = %artifact.artifact_id,
            strategy = %artifact.strategy.name,
            version = %artifact.strategy.version,
            hash = %artifact.hash,
            "Artifact created"
        );
        Ok(())
    }

    /// Fetch by internal UUID.
    pub fn get_artifact_by_id(&self, ctx: &OpContext, id: Uuid) -> Result<Artifact> {
        self.run(ctx, |conn| query_one(conn, "id", &id.to_string()))?
            .ok_or_else(|| ArtifactError::not_found("artifact", id))
    }

    /// Fetch by human-readable id, e.g. `strat_rsi_momentum_2025-01-01T00:00:00Z`.
    pub fn get_artifact_by_artifact_id(&self, ctx: &OpContext, artifact_id: &str) -> Result<Artifact> {
        self.run(ctx, |conn| query_one(conn, "artifact_id", artifact_id))?
            .ok_or_else(|| ArtifactError::not_found("artifact", artifact_id))
    }

    /// Fetch by content hash.
    pub fn get_artifact_by_hash(&self, ctx: &OpContext, hash: &str) -> Result<Artifact> {
        self.run(ctx, |conn| query_one(conn, "hash", hash))?
            .ok_or_else(|| ArtifactError::not_found("artifact", hash))
    }

    /// Whether an artifact with this content hash is already stored.
    pub fn hash_exists(&self, ctx: &OpContext, hash: &str) -> Result<bool> {
        self.run(ctx, |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM strategy_artifacts WHERE hash = ?1)",
                params![hash],
                |row| row.get(0),
            )?)
        })
    }

    /// Artifacts whose approval is APPROVED or ACTIVE, by strategy name and
    /// then newest first. One query; REVOKED artifacts never appear even if
    /// they were approved earlier.
    pub fn list_approved_artifacts(&self, ctx: &OpContext) -> Result<Vec<Artifact>> {
        self.run(ctx, |conn| {
            let sql = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM v_tradable_artifacts ORDER BY strategy_name, created_at DESC"
            );
            query_many(conn, &sql, [])
        })
    }

    /// Newest tradable artifact of one strategy.
    pub fn get_latest_approved_artifact(&self, ctx: &OpContext, strategy_name: &str) -> Result<Artifact> {
        self.run(ctx, |conn| {
            let sql = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM v_tradable_artifacts WHERE strategy_name = ?1 \
                 ORDER BY created_at DESC LIMIT 1"
            );
            Ok(conn
                .query_row(&sql, params![strategy_name], row_to_artifact)
                .optional()?)
        })?
        .ok_or_else(|| ArtifactError::not_found("approved artifact", strategy_name))
    }

    /// Newest artifact of every strategy regardless of approval state.
    pub fn list_latest_artifacts(&self, ctx: &OpContext) -> Result<Vec<Artifact>> {
        self.run(ctx, |conn| {
            let sql = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM v_latest_artifact_per_strategy ORDER BY strategy_name"
            );
            query_many(conn, &sql, [])
        })
    }

    /// Artifacts with no approval record, oldest first.
    pub fn find_artifacts_missing_approval(&self, ctx: &OpContext) -> Result<Vec<Artifact>> {
        self.run(ctx, |conn| {
            let sql = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM strategy_artifacts a \
                 WHERE NOT EXISTS (SELECT 1 FROM artifact_approvals ap WHERE ap.artifact_id = a.id) \
                 ORDER BY created_at"
            );
            query_many(conn, &sql, [])
        })
    }
}
