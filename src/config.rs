//! Run configuration.
//!
//! A [`RunConfig`] is read once per run from a JSON file, checked against the
//! embedded schema, completed with built-in defaults and `PDR_DB_*`
//! environment overrides, and then only read. Subsystems reach their part of
//! it through the accessors.

pub mod database;

use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::format::InputFormat;
use crate::grid::{GridError, GridSpec};
use database::{DatabaseConfig, DatabaseKind, MissingField};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read configuration {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("configuration is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("unsupported database type '{0}', expected sqlite, mysql or postgresql")]
    UnsupportedDatabase(String),
    #[error("{kind} database configuration incomplete, missing: {}", missing.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", "))]
    IncompleteDatabase { kind: DatabaseKind, missing: Vec<MissingField> },
    #[error("invalid connection url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
}

/// Where the PDR installation lives and how its programs are called
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdrConfig {
    pub base_dir: PathBuf,
    pub model_name: String,
    pub pdr_file_name: String,
    pub onion_file_name: String,
    pub getctrlind_file_name: String,
    pub mrt_file_name: String,
    pub pdrinp_template_file: String,
    pub json_template_file: String,
    pub chem_database: String,
    pub chem_origin: String,
    /// used when the executable does not report a revision
    pub exe_revision: String,
    /// `YYYY-MM-DD`, used when the executable does not report a build date
    pub compilation_date: String,
    pub input_format: InputFormat,
    pub timeout_seconds: Option<u64>,
}

impl Default for PdrConfig {
    fn default() -> Self {
        PdrConfig {
            base_dir: PathBuf::from("."),
            model_name: "pdr_model".to_string(),
            pdr_file_name: "mockpdr".to_string(),
            onion_file_name: "mockonion".to_string(),
            getctrlind_file_name: "mockgetctrlind".to_string(),
            mrt_file_name: "mockmrt".to_string(),
            pdrinp_template_file: "PDRNEW.INP.template".to_string(),
            json_template_file: "pdr_config.json.template".to_string(),
            chem_database: "chem_rates_2022-10-21-ERS.dat".to_string(),
            chem_origin: "UDfA12".to_string(),
            exe_revision: "dev".to_string(),
            compilation_date: "2099-01-01".to_string(),
            input_format: InputFormat::Legacy,
            timeout_seconds: None,
        }
    }
}

impl PdrConfig {
    /// Installed location of an executable or input file below `base_dir`
    pub fn install_path(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    pub fn chem_database_path(&self) -> PathBuf {
        self.base_dir.join("pdrinpdata").join(&self.chem_database)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub username: String,
    pub email: Option<String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig { username: "pdrgrid".to_string(), email: None }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
}

/// Where result files are kept
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    /// root of all model directories, `pdr.base_dir` when unset
    pub base_dir: Option<PathBuf>,
}

/// Immutable settings for one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    database: DatabaseConfig,
    pdr: PdrConfig,
    parameters: Value,
    user: UserConfig,
    storage: StorageConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            database: DatabaseConfig::default(),
            pdr: PdrConfig::default(),
            parameters: default_parameters(),
            user: UserConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// The grid run when a configuration declares no `parameters`
pub fn default_parameters() -> Value {
    json!({
        "metal": ["100"],
        "dens": ["30"],
        "mass": ["-10"],
        "chi": ["10"],
        "alpha": 1.5,
        "rcore": 0.2
    })
}

impl RunConfig {
    /// Read, validate and complete a configuration file
    pub fn load(path: &Path) -> Result<RunConfig, ConfigError> {
        info!("Reading configuration: {}", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text)?;
        RunConfig::from_value(value, |key| std::env::var(key).ok())
    }

    /// Build from an already parsed document, with environment lookups through `env`
    pub fn from_value<F>(value: Value, env: F) -> Result<RunConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        validate(&value)?;
        let mut config: RunConfig = serde_json::from_value(value)?;
        config.database.apply_env(env)?;
        config.database.validate()?;
        info!("Database: {}", config.database.masked_url());
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file is given
    pub fn from_env() -> Result<RunConfig, ConfigError> {
        RunConfig::from_value(json!({}), |key| std::env::var(key).ok())
    }

    pub fn with_model_name(mut self, name: &str) -> RunConfig {
        self.pdr.model_name = name.to_string();
        self
    }

    pub fn with_input_format(mut self, format: InputFormat) -> RunConfig {
        self.pdr.input_format = format;
        self
    }

    pub fn with_base_dir(mut self, dir: &Path) -> RunConfig {
        self.pdr.base_dir = dir.to_path_buf();
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> RunConfig {
        self.database = database;
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> RunConfig {
        self.parameters = parameters;
        self
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn pdr(&self) -> &PdrConfig {
        &self.pdr
    }

    pub fn grid_value(&self) -> &Value {
        &self.parameters
    }

    pub fn grid_spec(&self) -> Result<GridSpec, GridError> {
        GridSpec::from_value(&self.parameters)
    }

    pub fn user(&self) -> &UserConfig {
        &self.user
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Directory holding one subdirectory per model
    pub fn model_root(&self) -> PathBuf {
        self.storage.base_dir.clone().unwrap_or_else(|| self.pdr.base_dir.clone())
    }

    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.model_root().join(model_name)
    }

    /// Copy safe to print
    pub fn redacted(&self) -> RunConfig {
        RunConfig { database: self.database.redacted(), ..self.clone() }
    }
}

/// Validate a configuration document against the embedded schema
fn validate(value: &Value) -> Result<(), ConfigError> {
    static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/config.json"));
    let schema: Value = serde_json::from_str(SCHEMA)?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| ConfigError::Schema(vec![format!("schema does not compile: {e}")]))?;

    let result = compiled.validate(value);
    if let Err(errors) = result {
        let messages: Vec<String> = errors
            .map(|e| {
                let message = format!("{} at {}", e, e.instance_path);
                warn!("Configuration error: {message}");
                message
            })
            .collect();
        return Err(ConfigError::Schema(messages));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn empty_document_gives_defaults() {
        let config = RunConfig::from_value(json!({}), no_env).unwrap();
        assert_eq!(config.database().path, "kosma_tau.db");
        assert_eq!(config.pdr().pdr_file_name, "mockpdr");
        assert_eq!(config.pdr().input_format, InputFormat::Legacy);
        assert_eq!(config.grid_spec().unwrap().dens, vec!["30"]);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = RunConfig::from_value(
            json!({"pdr": {"base_dir": "/opt/pdr", "input_format": "json"}, "database": {"path": ":memory:"}}),
            no_env,
        )
        .unwrap();
        assert_eq!(config.pdr().base_dir, PathBuf::from("/opt/pdr"));
        assert_eq!(config.pdr().input_format, InputFormat::Json);
        assert_eq!(config.pdr().onion_file_name, "mockonion");
        assert!(config.database().is_memory());
        assert_eq!(config.model_path("m1"), PathBuf::from("/opt/pdr/m1"));
    }

    #[test]
    fn schema_violations_are_reported() {
        let err = RunConfig::from_value(json!({"database": {"type": "oracle"}}), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(ref messages) if !messages.is_empty()));
    }

    #[test]
    fn environment_overrides_file() {
        let config = RunConfig::from_value(json!({"database": {"path": "file.db"}}), |key| {
            (key == "PDR_DB_FILE").then(|| "env.db".to_string())
        })
        .unwrap();
        assert_eq!(config.database().path, "env.db");
    }

    #[test]
    fn incomplete_server_config_is_rejected() {
        let err = RunConfig::from_value(json!({"database": {"type": "mysql"}}), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteDatabase { kind: DatabaseKind::Mysql, .. }));
    }

    #[test]
    fn storage_root_overrides_base_dir() {
        let config = RunConfig::from_value(
            json!({"pdr": {"base_dir": "/opt/pdr"}, "storage": {"type": "local", "base_dir": "/data/models"}}),
            no_env,
        )
        .unwrap();
        assert_eq!(config.model_path("grid"), PathBuf::from("/data/models/grid"));
    }
}
