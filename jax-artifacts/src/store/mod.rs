//! SQLite persistence gateway for artifacts, approvals, promotions and
//! validation reports.
//!
//! Every operation opens its own connection, so the store is `Send + Sync`
//! without a shared lock and can be used from any number of threads or
//! processes. Writers serialize on SQLite's database lock; state changes run
//! inside `BEGIN IMMEDIATE` transactions so the read-check-write sequence of
//! a promotion cannot interleave with another writer.

mod approvals;
mod artifacts;
mod codec;
mod reports;
mod schema;

pub use approvals::{HistoryMismatch, PromotionHistoryEntry};
pub use schema::SCHEMA_VERSION;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jax_common::config::DatabaseConfig;
use rusqlite::{Connection, ErrorCode, OpenFlags, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::approval::ApprovalState;
use crate::context::OpContext;
use crate::error::{ArtifactError, Result};

/// SQLite virtual machine steps between cancellation checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// Longest single wait for the write lock before the context is re-checked.
/// The progress handler does not run while SQLite sleeps on a busy lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Row counts across the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub artifacts: u64,
    pub approvals_by_state: BTreeMap<ApprovalState, u64>,
    pub artifacts_missing_approval: u64,
    pub promotions: u64,
    pub validation_reports: u64,
}

impl StoreStats {
    pub fn tradable(&self) -> u64 {
        self.approvals_by_state
            .iter()
            .filter(|(state, _)| state.is_tradable())
            .map(|(_, count)| count)
            .sum()
    }
}

/// Transactional gateway over the artifact database.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl ArtifactStore {
    /// Open or create a store at the given path and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        schema::migrate(&mut conn)?;

        info!(path = ?path, schema_version = SCHEMA_VERSION, "Artifact store opened");
        Ok(Self { path, busy_timeout })
    }

    /// Open the store described by the shared configuration.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open(config.resolved_path(), config.busy_timeout())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection bound to `ctx`: the lock wait never outlives the
    /// deadline and running statements are interrupted once the context
    /// is cancelled or expired.
    fn connect(&self, ctx: &OpContext) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.busy_timeout(self.lock_wait(ctx))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let watch = ctx.clone();
        conn.progress_handler(PROGRESS_INTERVAL, Some(move || watch.should_interrupt()));
        Ok(conn)
    }

    /// How long one operation may wait for a lock.
    fn lock_wait(&self, ctx: &OpContext) -> Duration {
        // SQLite counts whole milliseconds; round up so a wait cut short by
        // the deadline ends after it.
        ctx.remaining().map_or(self.busy_timeout, |left| {
            (left + Duration::from_millis(1)).min(self.busy_timeout)
        })
    }

    /// Start a `BEGIN IMMEDIATE` transaction, waiting for the write lock in
    /// short slices so cancellation is noticed while another writer holds it.
    pub(crate) fn begin_immediate<'c>(
        &self,
        ctx: &OpContext,
        conn: &'c Connection,
    ) -> Result<Transaction<'c>> {
        let give_up = Instant::now() + self.lock_wait(ctx);
        loop {
            ctx.check()?;
            let left = give_up.saturating_duration_since(Instant::now());
            conn.busy_timeout((left + Duration::from_millis(1)).min(LOCK_POLL_INTERVAL))?;

            match Transaction::new_unchecked(conn, TransactionBehavior::Immediate) {
                Ok(tx) => {
                    tx.busy_timeout(self.lock_wait(ctx))?;
                    return Ok(tx);
                }
                Err(err) if is_busy(&err) && Instant::now() < give_up => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Run one gateway operation on a fresh connection.
    pub(crate) fn run<T, F>(&self, ctx: &OpContext, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        ctx.check()?;
        self.connect(ctx)
            .and_then(|mut conn| op(&mut conn))
            .map_err(|err| classify(ctx, err))
    }

    /// Counts for operator dashboards.
    pub fn stats(&self, ctx: &OpContext) -> Result<StoreStats> {
        self.run(ctx, |conn| {
            let count = |sql: &str| -> Result<u64> {
                Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
            };

            let mut stats = StoreStats {
                artifacts: count("SELECT COUNT(*) FROM strategy_artifacts")?,
                artifacts_missing_approval: count(
                    "SELECT COUNT(*) FROM strategy_artifacts a
                     WHERE NOT EXISTS (SELECT 1 FROM artifact_approvals ap WHERE ap.artifact_id = a.id)",
                )?,
                promotions: count("SELECT COUNT(*) FROM artifact_promotions")?,
                validation_reports: count("SELECT COUNT(*) FROM artifact_validation_reports")?,
                ..Default::default()
            };

            let mut stmt =
                conn.prepare("SELECT state, COUNT(*) FROM artifact_approvals GROUP BY state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, ApprovalState>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (state, n) = row?;
                stats.approvals_by_state.insert(state, n as u64);
            }

            debug!(artifacts = stats.artifacts, "Store stats collected");
            Ok(stats)
        })
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::DatabaseBusy)
}

/// Translate low-level failures into the error the caller should see.
fn classify(ctx: &OpContext, err: ArtifactError) -> ArtifactError {
    match err {
        ArtifactError::Database(rusqlite::Error::SqliteFailure(ref e, _))
            if e.code == ErrorCode::OperationInterrupted =>
        {
            ctx.interruption()
        }
        ArtifactError::Database(rusqlite::Error::SqliteFailure(ref e, _))
            if e.code == ErrorCode::DatabaseBusy && ctx.check().is_err() =>
        {
            ctx.interruption()
        }
        ArtifactError::Database(rusqlite::Error::FromSqlConversionFailure(column, _, source)) => {
            ArtifactError::CorruptRecord(format!("column {column}: {source}"))
        }
        ArtifactError::Database(rusqlite::Error::InvalidColumnType(column, name, ty)) => {
            ArtifactError::CorruptRecord(format!("column {column} ({name}) has type {ty}"))
        }
        other => other,
    }
}
