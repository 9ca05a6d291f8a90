//! Shared fixtures for artifact store integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jax_artifacts::artifact::artifact_id_for;
use jax_artifacts::{
    Approval, Artifact, ArtifactStore, BacktestMetrics, BacktestRun, OpContext, RiskProfile,
};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Store backed by a database file inside a temporary directory.
pub struct TestStore {
    pub dir: TempDir,
    pub store: Arc<ArtifactStore>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_busy_timeout(Duration::from_secs(5))
    }

    pub fn with_busy_timeout(busy_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("artifacts.db"), busy_timeout).unwrap();
        Self {
            dir,
            store: Arc::new(store),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }

    /// Raw connection for checks that bypass the gateway.
    pub fn raw(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(self.db_path()).unwrap()
    }
}

pub fn ctx() -> OpContext {
    OpContext::with_timeout(Duration::from_secs(30))
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn rsi_params() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("rsi_period".to_string(), json!(14)),
        ("buy_threshold".to_string(), json!(30)),
        ("sell_threshold".to_string(), json!(70)),
    ])
}

/// Sealed artifact created `offset_secs` after [`base_time`].
pub fn artifact_at(name: &str, version: &str, offset_secs: i64) -> Artifact {
    let mut artifact =
        Artifact::new(name, version, rsi_params(), RiskProfile::default(), "researcher").unwrap();
    artifact.created_at = base_time() + chrono::Duration::seconds(offset_secs);
    artifact.artifact_id = artifact_id_for(name, &artifact.created_at);
    artifact.seal().unwrap();
    artifact
}

/// Persist an artifact with a DRAFT approval.
pub fn persist_with_draft(store: &ArtifactStore, artifact: &Artifact) {
    store.create_artifact(&ctx(), artifact).unwrap();
    store
        .create_approval(&ctx(), &Approval::new_draft(artifact.id, "researcher", "initial draft"))
        .unwrap();
}

pub fn backtest_run(run_id: &str, strategy: &str) -> BacktestRun {
    BacktestRun {
        run_id: run_id.to_string(),
        strategy_id: strategy.to_string(),
        symbol: Some("000001.SZ".to_string()),
        symbols: Vec::new(),
        start_date: base_time(),
        end_date: base_time() + chrono::Duration::days(90),
        seed: 42,
        metrics: BacktestMetrics {
            total_trades: 120,
            winning_trades: 66,
            losing_trades: 54,
            win_rate: 0.55,
            total_return_pct: 18.4,
            max_drawdown: 7.25,
            sharpe_ratio: 1.42,
            profit_factor: 1.61,
            avg_r: 0.37,
        },
        duration_ms: 5_230,
    }
}
