use std::sync::Arc;

use log::{debug, warn};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::db::diagnostics::{PoolDiagnostics, PoolEventKind};
use crate::db::error::PersistenceError;
use crate::db::open::SqlitePool;

/// A unit of work against the database.
///
/// A connection is checked out on first use and handed back to the pool
/// after every commit or rollback, so an idle session holds nothing. If a
/// rollback fails the session is marked broken and refuses further work
/// until [`Session::reset`].
pub struct Session {
    pool: SqlitePool,
    diagnostics: Arc<PoolDiagnostics>,
    conn: Option<PooledConnection<SqliteConnectionManager>>,
    broken: bool,
}

impl Session {
    pub(crate) fn new(pool: SqlitePool, diagnostics: Arc<PoolDiagnostics>) -> Session {
        Session { pool, diagnostics, conn: None, broken: false }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Roll back whatever the current connection left open, hand it back
    /// to the pool and clear the broken flag.
    ///
    /// r2d2 can't evict a single connection, so a connection that still
    /// fails is caught by the pool's check-out test (`pool_pre_ping`).
    pub fn reset(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!("Rollback on reset failed: {e}");
                }
            }
            self.diagnostics.record(PoolEventKind::Reset, None);
        }
        self.broken = false;
        debug!("Session reset");
    }

    fn connection(&mut self) -> Result<&mut PooledConnection<SqliteConnectionManager>, PersistenceError> {
        if self.broken {
            return Err(PersistenceError::BrokenSession("a previous rollback failed".to_string()));
        }
        if self.conn.is_none() {
            self.conn = Some(self.pool.get()?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| PersistenceError::BrokenSession("no connection".to_string()))
    }

    fn release(&mut self) {
        self.conn = None;
    }

    /// Run `f` without a transaction and release the connection
    pub fn read<T, F>(&mut self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Connection) -> Result<T, PersistenceError>,
    {
        let conn = self.connection()?;
        let result = f(conn);
        self.release();
        result
    }

    /// Run `f` in a transaction. Commits on success; on any failure the
    /// transaction is rolled back before the error is returned.
    pub fn write<T, F>(&mut self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Connection) -> Result<T, PersistenceError>,
    {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let outcome = f(conn).and_then(|value| {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                self.release();
                Ok(value)
            }
            Err(err) => {
                let rolled_back = conn.is_autocommit() || conn.execute_batch("ROLLBACK").is_ok();
                if rolled_back {
                    debug!("Rolled back after error: {err}");
                    self.release();
                } else {
                    warn!("Rollback failed after error: {err}");
                    self.broken = true;
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::database::DatabaseConfig;
    use crate::db::{Database, PersistenceError};

    #[test]
    fn failed_work_is_rolled_back() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        let result: Result<(), _> = session.write(|conn| {
            conn.execute("INSERT INTO users (username, email) VALUES ('a', 'a@example.org')", [])?;
            Err(PersistenceError::Decode("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(!session.is_broken());
        let count: i64 = session
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn connections_go_back_to_the_pool() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut first = db.session();
        let mut second = db.session();
        first.write(|conn| Ok(conn.execute("INSERT INTO users (username) VALUES ('x')", [])?)).unwrap();
        // the in-memory pool holds a single connection, so this would time out if it leaked
        let n: i64 = second
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(n, 1);
        let status = db.pool_status();
        assert_eq!(status.checked_out, 0);
        assert!(status.counters.checkouts >= 3);
    }

    #[test]
    fn reset_hands_back_a_clean_connection() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        session.connection().unwrap().execute_batch("BEGIN").unwrap();
        session.reset();
        assert!(!session.is_broken());
        // single pooled connection, so this is the one that was reset
        let autocommit = session.read(|conn| Ok(conn.is_autocommit())).unwrap();
        assert!(autocommit);
        assert_eq!(db.pool_status().counters.resets, 1);
    }
}
