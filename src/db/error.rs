use rusqlite::ErrorCode;
use thiserror::Error;

use crate::config::database::DatabaseKind;
use crate::config::ConfigError;

/// Message fragments of connection failures that are worth retrying
const TRANSIENT_MARKERS: [&str; 12] = [
    "lost connection",
    "connection reset",
    "connection closed",
    "server has gone away",
    "gone away",
    "broken pipe",
    "connection refused",
    "timeout",
    "timed out",
    "ssl",
    "eof",
    "database is locked",
];

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("session is unusable until reset: {0}")]
    BrokenSession(String),
    #[error("stored value can't be decoded: {0}")]
    Decode(String),
    #[error("{0} databases are not supported by this build")]
    UnsupportedBackend(DatabaseKind),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How the retry wrapper treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    BrokenSession,
    Permanent,
}

impl PersistenceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PersistenceError::Pool(_) => ErrorClass::Transient,
            PersistenceError::Connection(message) => classify_message(message),
            PersistenceError::BrokenSession(_) => ErrorClass::BrokenSession,
            PersistenceError::Sqlite(err) => classify_sqlite(err),
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

fn classify_sqlite(err: &rusqlite::Error) -> ErrorClass {
    if let rusqlite::Error::SqliteFailure(failure, _) = err {
        match failure.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen => return ErrorClass::Transient,
            _ => {}
        }
    }
    classify_message(&err.to_string())
}

fn classify_message(message: &str) -> ErrorClass {
    let message = message.to_lowercase();
    if message.contains("within a transaction") {
        ErrorClass::BrokenSession
    } else if TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}
