//! Configuration validation for Jax services.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{ArtifactsConfig, Config, DatabaseConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.database.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = self.artifacts.validate() {
            errors.push(e);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.busy_timeout_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "database.busy_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "database.operation_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(path) = &self.path {
            if path.as_os_str().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "database.path".into(),
                });
            }
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for ArtifactsConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.schema_version.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "artifacts.schema_version".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "verbose".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "observability.log_level"));
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = Config::default();
        config.database.busy_timeout_ms = 0;
        config.observability.log_format = "xml".into();
        config.artifacts.schema_version = " ".into();

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }
}
