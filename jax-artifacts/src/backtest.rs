//! Backtest output consumed by the artifact builder.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::finite_number;
use crate::error::CanonicalError;

/// Summary statistics of a backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub total_return_pct: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub avg_r: f64,
}

/// Result of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    /// Opaque run identifier assigned by the research runtime.
    pub run_id: String,
    pub strategy_id: String,
    /// Single instrument, used when `symbols` is empty.
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub seed: i64,
    pub metrics: BacktestMetrics,
    pub duration_ms: i64,
}

impl BacktestRun {
    /// Instruments the run covered.
    pub fn tested_symbols(&self) -> Vec<String> {
        if !self.symbols.is_empty() {
            return self.symbols.clone();
        }
        self.symbol
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }

    /// Metrics as recorded in an artifact's validation evidence.
    pub fn metric_map(&self) -> Result<BTreeMap<String, Value>, CanonicalError> {
        let m = &self.metrics;
        let mut out = BTreeMap::new();
        out.insert("total_trades".to_string(), Value::from(m.total_trades));
        out.insert("winning_trades".to_string(), Value::from(m.winning_trades));
        out.insert("losing_trades".to_string(), Value::from(m.losing_trades));
        for (key, value) in [
            ("win_rate", m.win_rate),
            ("total_return_pct", m.total_return_pct),
            ("max_drawdown", m.max_drawdown),
            ("sharpe_ratio", m.sharpe_ratio),
            ("profit_factor", m.profit_factor),
            ("avg_r", m.avg_r),
        ] {
            out.insert(
                key.to_string(),
                finite_number(&format!("validation.metrics.{key}"), value)?,
            );
        }
        out.insert("duration_ms".to_string(), Value::from(self.duration_ms));
        Ok(out)
    }
}
