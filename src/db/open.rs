use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::database::{DatabaseConfig, DatabaseKind};
use crate::db::diagnostics::{PoolDiagnostics, PoolEventHandler, PoolSnapshot};
use crate::db::error::PersistenceError;
use crate::db::retry::RetryPolicy;
use crate::db::session::Session;
use crate::db::store::Store;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

/// Idle file connections are closed after this long
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handle to the job database. Cloning is cheap; every clone uses the same pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    diagnostics: Arc<PoolDiagnostics>,
    retry: RetryPolicy,
    url: String,
}

impl Database {
    pub fn open(config: &DatabaseConfig) -> Result<Database, PersistenceError> {
        config.validate()?;
        let url = config.masked_url();
        if config.kind != DatabaseKind::Sqlite {
            warn!("Can't open {url}: only SQLite is linked into this build");
            return Err(PersistenceError::UnsupportedBackend(config.kind));
        }

        let diagnostics = Arc::new(PoolDiagnostics::default());
        let builder = r2d2::Pool::builder()
            .connection_timeout(Duration::from_secs(config.pool_timeout.max(1)))
            .test_on_check_out(config.pool_pre_ping)
            .event_handler(Box::new(PoolEventHandler::new(diagnostics.clone())));

        let (builder, manager) = if config.is_memory() {
            info!("Opening in-memory database");
            // one connection that is never replaced, or the data is gone
            let builder = builder
                .max_size(1)
                .min_idle(Some(1))
                .max_lifetime(None)
                .idle_timeout(None);
            (builder, SqliteConnectionManager::memory().with_init(init_memory))
        } else {
            let path = Path::new(&config.path);
            if !path.exists() { info!("Creating new database {}", path.display()) }
            let recycle = (config.pool_recycle > 0).then(|| Duration::from_secs(config.pool_recycle));
            let builder = builder
                .max_size(config.max_connections())
                .min_idle(Some(0))
                .max_lifetime(recycle)
                .idle_timeout(Some(IDLE_TIMEOUT));
            (builder, SqliteConnectionManager::file(path).with_init(init_file))
        };

        let pool = builder.build(manager)?;

        static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
        pool.get()?.execute_batch(SCHEMA)?;
        info!("Opened database {url}");

        Ok(Database { pool, diagnostics, retry: RetryPolicy::default(), url })
    }

    /// Use `retry` for every [`Store`] handed out from now on
    pub fn with_retry(mut self, retry: RetryPolicy) -> Database {
        self.retry = retry;
        self
    }

    pub fn session(&self) -> Session {
        Session::new(self.pool.clone(), self.diagnostics.clone())
    }

    /// A session whose operations are retried
    pub fn store(&self) -> Store {
        Store::new(self.session(), self.retry)
    }

    pub fn masked_url(&self) -> &str {
        &self.url
    }

    /// Check that a connection can run a trivial query
    pub fn test_connection(&self) -> bool {
        let result = self
            .pool
            .get()
            .map_err(PersistenceError::from)
            .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?));
        match result {
            Ok(1) => {
                info!("Database connection to {} OK", self.url);
                true
            }
            Ok(other) => {
                warn!("Unexpected connection test result {other}");
                false
            }
            Err(err) => {
                warn!("Database connection to {} failed: {err}", self.url);
                false
            }
        }
    }

    pub fn pool_status(&self) -> PoolSnapshot {
        let state = self.pool.state();
        PoolSnapshot {
            capacity: self.pool.max_size(),
            connections: state.connections,
            idle: state.idle_connections,
            checked_out: state.connections.saturating_sub(state.idle_connections),
            counters: self.diagnostics.counters(),
            recent: self.diagnostics.recent(),
        }
    }
}

fn init_memory(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", &true)
}

fn init_file(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", &true)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", &"WAL", |row| row.get::<_, String>(0))?;
    Ok(())
}
