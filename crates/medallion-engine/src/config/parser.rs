//! Configuration YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;
use crate::config::validator::validate_config;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a configuration YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: PipelineConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse pipeline config YAML")?;
    Ok(config)
}

/// Parse a configuration YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

/// Load the configuration, or fall back to environment defaults when no
/// file is given, then apply `overrides` and validate the result.
///
/// # Errors
///
/// Returns an error if the file can't be parsed or the overridden
/// configuration fails validation.
pub fn load_config(
    path: Option<&Path>,
    overrides: impl FnOnce(&mut PipelineConfig),
) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => parse_config(path)?,
        None => PipelineConfig::from_env(),
    };
    overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}
