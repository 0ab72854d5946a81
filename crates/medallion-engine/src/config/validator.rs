//! Semantic validation for parsed pipeline configuration values.

use anyhow::{bail, Result};

use crate::config::types::{PipelineConfig, StateBackendKind, EXPECTED_HEADER};

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    match config.state.backend {
        StateBackendKind::Sqlite => {
            if config
                .state
                .path
                .as_ref()
                .is_some_and(|p| p.as_os_str().is_empty())
            {
                errors.push("state.path must not be empty".to_string());
            }
        }
        StateBackendKind::Postgres => {
            if config
                .state
                .connection
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
            {
                errors.push("state.backend 'postgres' requires state.connection".to_string());
            }
        }
    }

    if config.source.data_dir.as_os_str().is_empty() {
        errors.push("source.data_dir must not be empty".to_string());
    }

    if config.source.extension.trim_start_matches('.').trim().is_empty() {
        errors.push("source.extension must not be empty".to_string());
    }

    if config.source.expected_header.len() != EXPECTED_HEADER.len() {
        errors.push(format!(
            "source.expected_header must name exactly {} columns (timestamp, price, user_id), got {}",
            EXPECTED_HEADER.len(),
            config.source.expected_header.len()
        ));
    }
    for (i, column) in config.source.expected_header.iter().enumerate() {
        if column.trim().is_empty() {
            errors.push(format!("source.expected_header[{i}] is empty"));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for column in &config.source.expected_header {
        if !seen.insert(column.as_str()) {
            errors.push(format!("source.expected_header repeats column '{column}'"));
        }
    }

    if config.source.exclude.iter().any(|e| e.trim().is_empty()) {
        errors.push("source.exclude entries must not be blank".to_string());
    }

    if !errors.is_empty() {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SourceConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn postgres_requires_connection() {
        let mut config = PipelineConfig::default();
        config.state.backend = StateBackendKind::Postgres;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("requires state.connection"));

        config.state.connection = Some("host=localhost dbname=medallion".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn all_errors_are_reported_together() {
        let config = PipelineConfig {
            source: SourceConfig {
                extension: String::new(),
                expected_header: vec!["price".into(), "price".into(), " ".into()],
                exclude: vec![String::new()],
                ..SourceConfig::default()
            },
            ..PipelineConfig::default()
        };
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("source.extension"));
        assert!(err.contains("repeats column 'price'"));
        assert!(err.contains("expected_header[2] is empty"));
        assert!(err.contains("source.exclude"));
        assert!(!err.contains("exactly 3 columns"));
    }

    #[test]
    fn expected_header_must_have_three_columns() {
        let mut config = PipelineConfig::default();
        config.source.expected_header = vec!["ts".into(), "amount".into()];
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("exactly 3 columns"));

        config.source.expected_header = vec!["ts".into(), "amount".into(), "customer".into()];
        assert!(validate_config(&config).is_ok());
    }
}
