//! Canonical byte form and SHA-256 content hash of an artifact.
//!
//! The canonical form is compact JSON with object keys sorted
//! lexicographically at every depth. It is written by hand instead of relying
//! on `serde_json::Map` ordering, which changes when any crate in the build
//! enables `preserve_order`.
//!
//! Timestamps are UTC RFC 3339 with a fixed nine-digit fraction, so two
//! artifacts that differ by a single nanosecond hash differently.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::artifact::Artifact;
use crate::error::{ArtifactError, CanonicalError};

/// Fixed-width UTC timestamp used in payloads and storage.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// JSON number for a finite float; NaN and infinities are rejected.
pub fn finite_number(field: &str, value: f64) -> Result<Value, CanonicalError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| CanonicalError::NonFiniteNumber {
            field: field.to_string(),
        })
}

/// Serialize a JSON value with sorted keys and no insignificant whitespace.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let mut out = Vec::with_capacity(512);
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<(), CanonicalError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(out, &map[key])?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl Artifact {
    /// Deterministic byte form covering every field except `id`, `hash` and
    /// `signature`.
    pub fn canonical_payload(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut strategy = Map::new();
        strategy.insert("name".into(), Value::from(self.strategy.name.as_str()));
        strategy.insert("version".into(), Value::from(self.strategy.version.as_str()));
        strategy.insert(
            "code_ref".into(),
            self.strategy.code_ref.as_deref().map_or(Value::Null, Value::from),
        );
        strategy.insert("params".into(), serde_json::to_value(&self.strategy.params)?);

        let risk = &self.risk_profile;
        let mut risk_profile = Map::new();
        risk_profile.insert(
            "max_position_pct".into(),
            finite_number("risk_profile.max_position_pct", risk.max_position_pct)?,
        );
        risk_profile.insert(
            "max_daily_loss".into(),
            finite_number("risk_profile.max_daily_loss", risk.max_daily_loss)?,
        );
        risk_profile.insert(
            "allowed_order_types".into(),
            serde_json::to_value(&risk.allowed_order_types)?,
        );

        let mut payload = Map::new();
        payload.insert("artifact_id".into(), Value::from(self.artifact_id.as_str()));
        payload.insert("schema_version".into(), Value::from(self.schema_version.as_str()));
        payload.insert("strategy".into(), Value::Object(strategy));
        payload.insert("risk_profile".into(), Value::Object(risk_profile));
        payload.insert("created_by".into(), Value::from(self.created_by.as_str()));
        payload.insert(
            "created_at".into(),
            Value::from(format_timestamp(&self.created_at)),
        );

        if let Some(window) = &self.data_window {
            let mut data_window = Map::new();
            data_window.insert("from".into(), Value::from(format_timestamp(&window.from)));
            data_window.insert("to".into(), Value::from(format_timestamp(&window.to)));
            data_window.insert("symbols".into(), serde_json::to_value(&window.symbols)?);
            payload.insert("data_window".into(), Value::Object(data_window));
        }

        if let Some(validation) = &self.validation {
            let mut evidence = Map::new();
            evidence.insert(
                "backtest_run_id".into(),
                Value::from(validation.backtest_run_id.to_string()),
            );
            evidence.insert("metrics".into(), serde_json::to_value(&validation.metrics)?);
            evidence.insert(
                "determinism_seed".into(),
                Value::from(validation.determinism_seed),
            );
            evidence.insert(
                "report_uri".into(),
                validation.report_uri.as_deref().map_or(Value::Null, Value::from),
            );
            payload.insert("validation".into(), Value::Object(evidence));
        }

        canonical_json(&Value::Object(payload))
    }

    /// SHA-256 of the canonical payload as 64 lowercase hex characters.
    pub fn compute_hash(&self) -> Result<String, CanonicalError> {
        let payload = self.canonical_payload()?;
        Ok(sha256_hex(&payload))
    }

    /// Recompute the hash and compare it with the stored one.
    pub fn verify_hash(&self) -> Result<(), ArtifactError> {
        let computed = self.compute_hash()?;
        if computed != self.hash {
            return Err(ArtifactError::Integrity {
                artifact_id: self.artifact_id.clone(),
                stored: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }
}
