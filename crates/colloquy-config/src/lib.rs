use std::path::{Path, PathBuf};

use colloquy_kernel::DialogModel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("invalid dialog model: {0}")]
    DialogModel(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub dialog: Dialog,
    pub skill: Skill,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Largest serialized session accepted by `save`; 0 disables the check.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialog {
    pub model_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub endpoint: String,
    pub timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "colloquy.session.".to_string()
}

fn default_max_length() -> usize {
    65_536
}

fn default_retry_max_attempts() -> usize {
    1
}

fn default_retry_backoff_ms() -> u64 {
    0
}

fn default_log_filter() -> String {
    "info".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let schema = read_schema(&locate_workspace_file("config/config.schema.json")?)?;
    validate_instance(&schema, &instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

pub fn load_dialog_model(path: &str) -> Result<DialogModel, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let instance: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let manifest = colloquy_contracts::contracts_manifest_v1();
    let contract = manifest
        .schema("dialog_model.schema.json")
        .ok_or_else(|| ConfigError::SchemaLoad("dialog model contract not embedded".to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(contract.body).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    validate_instance(&schema, &instance)?;

    // prompt values stay raw, so decode from the text rather than the tree
    let model: DialogModel =
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    model
        .verify()
        .map_err(|e| ConfigError::DialogModel(e.to_string()))?;
    Ok(model)
}

fn locate_workspace_file(relative: &str) -> Result<PathBuf, ConfigError> {
    [
        PathBuf::from(relative),
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(relative),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(format!(
            "{relative} not found in working directory or workspace"
        ))
    })
}

fn read_schema(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))
}

fn validate_instance(
    schema: &serde_json::Value,
    instance: &serde_json::Value,
) -> Result<(), ConfigError> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if cfg.store.ttl_secs == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "store.ttl_secs must be >= 1".to_string(),
        ));
    }
    if cfg.skill.retry_max_attempts == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "skill.retry_max_attempts must be >= 1".to_string(),
        ));
    }
    if !cfg.skill.endpoint.starts_with("http://") && !cfg.skill.endpoint.starts_with("https://")
    {
        return Err(ConfigError::UnsupportedConfig(format!(
            "skill.endpoint={} must be an http(s) URL",
            cfg.skill.endpoint
        )));
    }
    Ok(())
}
