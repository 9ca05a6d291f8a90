//! Approval records and the promotion audit log.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::codec::{constraint_message, get_opt_json, get_opt_ts, get_opt_uuid, get_ts, get_uuid, ts};
use super::ArtifactStore;
use crate::approval::{Approval, ApprovalState, Promotion};
use crate::context::OpContext;
use crate::error::{ArtifactError, ConstraintViolation, Result};

const APPROVAL_COLUMNS: &str = "id, artifact_id, state, previous_state, approved_by, approved_at, \
    validation_run_id, validation_passed, validation_report_uri, review_notes, reviewer, \
    reviewed_at, state_changed_by, state_changed_at, state_change_reason, created_at, updated_at";

const PROMOTION_COLUMNS: &str =
    "id, artifact_id, from_state, to_state, promoted_by, promoted_at, reason, validation_data";

/// Promotion joined with the artifact it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionHistoryEntry {
    pub promotion_id: Uuid,
    pub artifact_uuid: Uuid,
    pub artifact_id: String,
    pub strategy_name: String,
    pub strategy_version: String,
    pub from_state: ApprovalState,
    pub to_state: ApprovalState,
    pub promoted_by: String,
    pub promoted_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Approval whose state disagrees with its newest promotion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryMismatch {
    pub artifact_uuid: Uuid,
    pub approval_state: ApprovalState,
    /// `None` when the approval left DRAFT without any promotion row.
    pub latest_promotion: Option<ApprovalState>,
}

fn row_to_approval(row: &Row<'_>) -> rusqlite::Result<Approval> {
    Ok(Approval {
        id: get_uuid(row, 0)?,
        artifact_uuid: get_uuid(row, 1)?,
        state: row.get(2)?,
        previous_state: row.get(3)?,
        approved_by: row.get(4)?,
        approved_at: get_opt_ts(row, 5)?,
        validation_run_id: get_opt_uuid(row, 6)?,
        validation_passed: row.get(7)?,
        validation_report_uri: row.get(8)?,
        review_notes: row.get(9)?,
        reviewer: row.get(10)?,
        reviewed_at: get_opt_ts(row, 11)?,
        state_changed_by: row.get(12)?,
        state_changed_at: get_ts(row, 13)?,
        state_change_reason: row.get(14)?,
        created_at: get_ts(row, 15)?,
        updated_at: get_ts(row, 16)?,
    })
}

fn row_to_promotion(row: &Row<'_>) -> rusqlite::Result<Promotion> {
    Ok(Promotion {
        id: get_uuid(row, 0)?,
        artifact_uuid: get_uuid(row, 1)?,
        from_state: row.get(2)?,
        to_state: row.get(3)?,
        promoted_by: row.get(4)?,
        promoted_at: get_ts(row, 5)?,
        reason: row.get(6)?,
        validation_data: get_opt_json(row, 7)?,
    })
}

fn query_approval(conn: &Connection, artifact_uuid: Uuid) -> rusqlite::Result<Option<Approval>> {
    let sql = format!("SELECT {APPROVAL_COLUMNS} FROM artifact_approvals WHERE artifact_id = ?1");
    conn.query_row(&sql, params![artifact_uuid.to_string()], row_to_approval)
        .optional()
}

fn insert_promotion(tx: &Transaction<'_>, promotion: &Promotion) -> Result<()> {
    let validation_data = promotion
        .validation_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    tx.execute(
        r#"
        INSERT INTO artifact_promotions (
            id, artifact_id, from_state, to_state, promoted_by, promoted_at, reason, validation_data
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            promotion.id.to_string(),
            promotion.artifact_uuid.to_string(),
            promotion.from_state,
            promotion.to_state,
            promotion.promoted_by,
            ts(&promotion.promoted_at),
            promotion.reason,
            validation_data,
        ],
    )?;
    Ok(())
}

impl ArtifactStore {
    /// Insert the approval record of an artifact. At most one per artifact.
    pub fn create_approval(&self, ctx: &OpContext, approval: &Approval) -> Result<()> {
        self.run(ctx, |conn| {
            conn.execute(
                r#"
                INSERT INTO artifact_approvals (
                    id, artifact_id, state, previous_state, approved_by, approved_at,
                    validation_run_id, validation_passed, validation_report_uri, review_notes,
                    reviewer, reviewed_at, state_changed_by, state_changed_at,
                    state_change_reason, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
                params![
                    approval.id.to_string(),
                    approval.artifact_uuid.to_string(),
                    approval.state,
                    approval.previous_state,
                    approval.approved_by,
                    approval.approved_at.as_ref().map(ts),
                    approval.validation_run_id.map(|id| id.to_string()),
                    approval.validation_passed,
                    approval.validation_report_uri,
                    approval.review_notes,
                    approval.reviewer,
                    approval.reviewed_at.as_ref().map(ts),
                    approval.state_changed_by,
                    ts(&approval.state_changed_at),
                    approval.state_change_reason,
                    ts(&approval.created_at),
                    ts(&approval.updated_at),
                ],
            )
            .map_err(|err| -> ArtifactError {
                match constraint_message(&err) {
                    Some(msg) if msg.contains("artifact_approvals.artifact_id") => {
                        ConstraintViolation::DuplicateApproval {
                            artifact_uuid: approval.artifact_uuid,
                        }
                        .into()
                    }
                    Some(msg) if msg.contains("FOREIGN KEY") => ConstraintViolation::UnknownArtifact {
                        artifact_uuid: approval.artifact_uuid,
                    }
                    .into(),
                    Some(msg) => ConstraintViolation::Other(msg.to_string()).into(),
                    None => ArtifactError::from(err),
                }
            })?;
            Ok(())
        })?;

        debug!(
            artifact_uuid = %approval.artifact_uuid,
            state = %approval.state,
            "Approval created"
        );
        Ok(())
    }

    /// Approval record of an artifact, by internal artifact UUID.
    pub fn get_approval(&self, ctx: &OpContext, artifact_uuid: Uuid) -> Result<Approval> {
        let approval = self.run(ctx, |conn| Ok(query_approval(conn, artifact_uuid)?))?;
        debug!(
            artifact_uuid = %artifact_uuid,
            state = ?approval.as_ref().map(|a| a.state),
            "Approval lookup"
        );
        approval.ok_or_else(|| ArtifactError::not_found("approval", artifact_uuid))
    }

    /// Move an artifact's approval to `to_state` and record the promotion.
    ///
    /// Runs in one immediate transaction: the state read, the transition
    /// check, the approval update and the promotion insert commit together
    /// or not at all. Concurrent promotions of the same artifact serialize,
    /// so exactly one of two racing requests from the same state succeeds.
    ///
    /// Entering REVIEWED stamps reviewer, review time and notes from `actor`
    /// and `reason`. Entering APPROVED stamps approver and approval time.
    pub fn update_approval_state(
        &self,
        ctx: &OpContext,
        artifact_uuid: Uuid,
        to_state: ApprovalState,
        actor: &str,
        reason: &str,
    ) -> Result<Promotion> {
        let reason = Some(reason.trim()).filter(|r| !r.is_empty()).map(str::to_string);

        let promotion = self.run(ctx, |conn| {
            let tx = self.begin_immediate(ctx, conn)?;

            let current = query_approval(&tx, artifact_uuid)?
                .ok_or_else(|| ArtifactError::not_found("approval", artifact_uuid))?;

            if !current.state.can_transition_to(to_state) {
                warn!(
                    artifact_uuid = %artifact_uuid,
                    from = %current.state,
                    to = %to_state,
                    actor = %actor,
                    "Rejected approval transition"
                );
                return Err(ArtifactError::InvalidTransition {
                    from: current.state,
                    to: to_state,
                });
            }

            let now = Utc::now();
            let now_text = ts(&now);
            tx.execute(
                r#"
                UPDATE artifact_approvals SET
                    state = ?1,
                    previous_state = state,
                    state_changed_by = ?2,
                    state_changed_at = ?3,
                    state_change_reason = ?4,
                    updated_at = ?3,
                    reviewer     = CASE WHEN ?1 = 'REVIEWED' THEN ?2 ELSE reviewer END,
                    reviewed_at  = CASE WHEN ?1 = 'REVIEWED' THEN ?3 ELSE reviewed_at END,
                    review_notes = CASE WHEN ?1 = 'REVIEWED' THEN ?4 ELSE review_notes END,
                    approved_by  = CASE WHEN ?1 = 'APPROVED' THEN ?2 ELSE approved_by END,
                    approved_at  = CASE WHEN ?1 = 'APPROVED' THEN ?3 ELSE approved_at END
                WHERE artifact_id = ?5
                "#,
                params![to_state, actor, now_text, reason, artifact_uuid.to_string()],
            )?;

            let promotion = Promotion {
                id: Uuid::new_v4(),
                artifact_uuid,
                from_state: current.state,
                to_state,
                promoted_by: actor.to_string(),
                promoted_at: now,
                reason: reason.clone(),
                validation_data: Some(json!({
                    "validation_run_id": current.validation_run_id,
                    "validation_passed": current.validation_passed,
                    "validation_report_uri": current.validation_report_uri,
                })),
            };
            insert_promotion(&tx, &promotion)?;

            ctx.check()?;
            tx.commit()?;
            Ok(promotion)
        })?;

        info!(
            artifact_uuid = %artifact_uuid,
            from = %promotion.from_state,
            to = %promotion.to_state,
            actor = %actor,
            "Approval state changed"
        );
        Ok(promotion)
    }

    /// [`ArtifactStore::update_approval_state`] addressed by human-readable id.
    pub fn update_approval_state_by_artifact_id(
        &self,
        ctx: &OpContext,
        artifact_id: &str,
        to_state: ApprovalState,
        actor: &str,
        reason: &str,
    ) -> Result<Promotion> {
        let artifact = self.get_artifact_by_artifact_id(ctx, artifact_id)?;
        self.update_approval_state(ctx, artifact.id, to_state, actor, reason)
    }

    /// Promotions of one artifact in commit order. Rows are appended under
    /// the write lock, so insertion order holds even if the clock steps back.
    pub fn list_promotions(&self, ctx: &OpContext, artifact_uuid: Uuid) -> Result<Vec<Promotion>> {
        self.run(ctx, |conn| {
            let sql = format!(
                "SELECT {PROMOTION_COLUMNS} FROM artifact_promotions WHERE artifact_id = ?1 \
                 ORDER BY rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![artifact_uuid.to_string()], row_to_promotion)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Most recent promotions across all artifacts, newest first.
    pub fn list_promotion_history(&self, ctx: &OpContext, limit: usize) -> Result<Vec<PromotionHistoryEntry>> {
        self.run(ctx, |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, artifact_uuid, artifact_id, strategy_name, strategy_version,
                       from_state, to_state, promoted_by, promoted_at, reason
                FROM v_promotion_history
                ORDER BY seq DESC
                LIMIT ?1
                "#,
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(PromotionHistoryEntry {
                    promotion_id: get_uuid(row, 0)?,
                    artifact_uuid: get_uuid(row, 1)?,
                    artifact_id: row.get(2)?,
                    strategy_name: row.get(3)?,
                    strategy_version: row.get(4)?,
                    from_state: row.get(5)?,
                    to_state: row.get(6)?,
                    promoted_by: row.get(7)?,
                    promoted_at: get_ts(row, 8)?,
                    reason: row.get(9)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Approvals whose current state is not the target of their newest
    /// promotion, or that left DRAFT without any promotion.
    pub fn find_history_mismatches(&self, ctx: &OpContext) -> Result<Vec<HistoryMismatch>> {
        self.run(ctx, |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT artifact_id, state, latest FROM (
                    SELECT ap.artifact_id,
                           ap.state,
                           (SELECT p.to_state FROM artifact_promotions p
                            WHERE p.artifact_id = ap.artifact_id
                            ORDER BY p.rowid DESC
                            LIMIT 1) AS latest
                    FROM artifact_approvals ap
                )
                WHERE (latest IS NULL AND state <> 'DRAFT')
                   OR (latest IS NOT NULL AND latest <> state)
                ORDER BY artifact_id
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(HistoryMismatch {
                    artifact_uuid: get_uuid(row, 0)?,
                    approval_state: row.get(1)?,
                    latest_promotion: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
