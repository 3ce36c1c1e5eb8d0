use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ConfigError;

/// SQLite path that selects a private in-memory database
pub const MEMORY_PATH: &str = ":memory:";

/// Environment variables that override the file configuration, and the field each one sets
pub const ENV_OVERRIDES: [(&str, &str); 7] = [
    ("PDR_DB_TYPE", "type"),
    ("PDR_DB_HOST", "host"),
    ("PDR_DB_PORT", "port"),
    ("PDR_DB_DATABASE", "database"),
    ("PDR_DB_USERNAME", "username"),
    ("PDR_DB_PASSWORD", "password"),
    ("PDR_DB_FILE", "path"),
];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Sqlite,
    Mysql,
    Postgresql,
}

impl DatabaseKind {
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseKind::Sqlite => None,
            DatabaseKind::Mysql => Some(3306),
            DatabaseKind::Postgresql => Some(5432),
        }
    }

    fn scheme(&self) -> &str {
        match self {
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgresql => "postgresql",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

impl FromStr for DatabaseKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DatabaseKind::Sqlite),
            "mysql" => Ok(DatabaseKind::Mysql),
            "postgresql" | "postgres" => Ok(DatabaseKind::Postgresql),
            _ => Err(ConfigError::UnsupportedDatabase(s.to_string())),
        }
    }
}

/// Connection and pool settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DatabaseKind,
    pub path: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub pool_size: u32,
    pub max_overflow: u32,
    /// seconds a connection may live before it is replaced
    pub pool_recycle: u64,
    pub pool_pre_ping: bool,
    /// seconds to wait for a free connection
    pub pool_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            kind: DatabaseKind::Sqlite,
            path: "kosma_tau.db".to_string(),
            host: Some("localhost".to_string()),
            port: None,
            database: Some("kosma_tau".to_string()),
            username: Some("root".to_string()),
            password: None,
            pool_size: 5,
            max_overflow: 10,
            pool_recycle: 280,
            pool_pre_ping: true,
            pool_timeout: 30,
        }
    }
}

impl DatabaseConfig {
    /// SQLite database held in memory, mostly for tests and dry runs
    pub fn in_memory() -> DatabaseConfig {
        DatabaseConfig { path: MEMORY_PATH.to_string(), ..DatabaseConfig::default() }
    }

    pub fn sqlite_file(path: &str) -> DatabaseConfig {
        DatabaseConfig { path: path.to_string(), ..DatabaseConfig::default() }
    }

    pub fn is_memory(&self) -> bool {
        self.kind == DatabaseKind::Sqlite && self.path == MEMORY_PATH
    }

    /// Apply `PDR_DB_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, field) in ENV_OVERRIDES {
            let Some(value) = lookup(var) else { continue };
            debug!("Database {field} taken from {var}");
            match field {
                "type" => self.kind = value.parse()?,
                "host" => self.host = Some(value),
                "port" => match value.trim().parse::<u16>() {
                    Ok(port) => self.port = Some(port),
                    Err(_) => warn!("Invalid port value in {var}: {value}"),
                },
                "database" => self.database = Some(value),
                "username" => self.username = Some(value),
                "password" => self.password = Some(value),
                "path" => self.path = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// Check that the fields the backend needs are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing: Vec<MissingField> = match self.kind {
            DatabaseKind::Sqlite => {
                if self.path.trim().is_empty() {
                    vec![MissingField { field: "path", env_var: "PDR_DB_FILE" }]
                } else {
                    vec![]
                }
            }
            DatabaseKind::Mysql | DatabaseKind::Postgresql => [
                ("host", "PDR_DB_HOST", &self.host),
                ("database", "PDR_DB_DATABASE", &self.database),
                ("username", "PDR_DB_USERNAME", &self.username),
                ("password", "PDR_DB_PASSWORD", &self.password),
            ]
            .into_iter()
            .filter(|(_, _, value)| value.as_deref().map_or(true, |v| v.is_empty()))
            .map(|(field, env_var, _)| MissingField { field, env_var })
            .collect(),
        };

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::IncompleteDatabase { kind: self.kind, missing })
        }
    }

    /// Total connections the pool may hold
    pub fn max_connections(&self) -> u32 {
        (self.pool_size + self.max_overflow).max(1)
    }

    /// Connection URL with the password percent-encoded
    pub fn connection_url(&self) -> Result<Url, ConfigError> {
        match self.kind {
            DatabaseKind::Sqlite => {
                let mut url = Url::parse("sqlite://")?;
                url.set_path(&self.path);
                Ok(url)
            }
            DatabaseKind::Mysql | DatabaseKind::Postgresql => {
                let host = self.host.as_deref().unwrap_or("localhost");
                let port = self.port.or(self.kind.default_port()).unwrap_or_default();
                let database = self.database.as_deref().unwrap_or("kosma_tau");
                let mut url = Url::parse(&format!("{}://{host}:{port}/{database}", self.kind.scheme()))?;
                if let Some(username) = self.username.as_deref() {
                    url.set_username(username)
                        .map_err(|_| ConfigError::InvalidUrl(format!("cannot set username on {url}")))?;
                }
                if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
                    url.set_password(Some(password))
                        .map_err(|_| ConfigError::InvalidUrl(format!("cannot set password on {url}")))?;
                }
                Ok(url)
            }
        }
    }

    /// Connection URL safe to log
    pub fn masked_url(&self) -> String {
        match self.connection_url() {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(err) => format!("<invalid {} url: {err}>", self.kind),
        }
    }

    /// Copy with the password hidden
    pub fn redacted(&self) -> DatabaseConfig {
        DatabaseConfig {
            password: self.password.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }
}

/// A required field and the environment variable that can provide it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingField {
    pub field: &'static str,
    pub env_var: &'static str,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (set {})", self.field, self.env_var)
    }
}
