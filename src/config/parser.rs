use std::path::Path;
use crate::errors::ReconError;
use super::types::ReconConfig;
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

const MAX_CONFIG_BYTES: u64 = 1_048_576;

pub async fn parse_config(path: &Path) -> Result<ReconConfig, ReconError> {
    if !path.exists() {
        return Err(ReconError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(ReconError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<ReconConfig, ReconError> {
    if content.trim().is_empty() {
        return Ok(ReconConfig::default());
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;

    validate_schema(&yaml)?;

    let config: ReconConfig = serde_yaml::from_value(yaml)?;

    validate_semantics(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema. Findings are logged, not fatal.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), ReconError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| ReconError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| ReconError::Config(format!("Schema compilation error: {}", e)))?;

    if let Err(errors) = compiled.validate(&json_value) {
        for e in errors {
            warn!(validation_error = %format!("{} at {}", e, e.instance_path), "Config schema warning");
        }
    }

    Ok(())
}

/// Reject values the pipeline cannot run with.
fn validate_semantics(config: &ReconConfig) -> Result<(), ReconError> {
    if let Some(pipeline) = &config.pipeline {
        if pipeline.scan_batch_threshold == 0 {
            return Err(ReconError::Config("pipeline.scan_batch_threshold must be at least 1".into()));
        }
        if pipeline.max_attempts == 0 {
            return Err(ReconError::Config("pipeline.max_attempts must be at least 1".into()));
        }
        if pipeline.stall_cycles == 0 {
            return Err(ReconError::Config("pipeline.stall_cycles must be at least 1".into()));
        }
        if pipeline.max_cycles == 0 {
            return Err(ReconError::Config("pipeline.max_cycles must be at least 1".into()));
        }
    }

    if let Some(expand) = &config.expand {
        if expand.ipv4_prefix > 32 {
            return Err(ReconError::Config(format!(
                "expand.ipv4_prefix {} is out of range 0-32",
                expand.ipv4_prefix
            )));
        }
        if expand.ipv6_prefix > 128 {
            return Err(ReconError::Config(format!(
                "expand.ipv6_prefix {} is out of range 0-128",
                expand.ipv6_prefix
            )));
        }
    }

    if let Some(tools) = &config.tools {
        for (name, settings) in [
            ("resolver", &tools.resolver),
            ("classifier", &tools.classifier),
            ("scanner", &tools.scanner),
            ("prober", &tools.prober),
        ] {
            if settings.path.trim().is_empty() {
                return Err(ReconError::Config(format!("tools.{}.path must not be empty", name)));
            }
            if settings.timeout_secs == 0 {
                return Err(ReconError::Config(format!("tools.{}.timeout_secs must be at least 1", name)));
            }
        }
    }

    if let Some(classify) = &config.classify {
        if classify.cloud_keywords.iter().all(|k| k.trim().is_empty()) {
            warn!("classify.cloud_keywords is empty; every address will be treated as non-cloud");
        }
    }

    Ok(())
}
