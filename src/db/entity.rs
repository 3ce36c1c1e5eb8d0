//! Lookup-or-insert of append-only rows.

use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::db::error::PersistenceError;
use crate::db::session::Session;

/// A row type identified by its natural key
pub trait Record {
    const TABLE: &'static str;
    /// Name used in log lines
    const ENTITY: &'static str;

    /// Column values written on insert
    fn columns(&self) -> Vec<(&'static str, Value)>;

    /// Column values that identify an existing row; all columns by default
    fn natural_key(&self) -> Vec<(&'static str, Value)> {
        self.columns()
    }
}

/// Result of [`Session::get_or_create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stored {
    pub id: i64,
    /// false when an existing row was found
    pub created: bool,
}

impl Session {
    /// Return the id of the row matching `record`'s natural key, inserting it
    /// first if there is none. Lookup and insert share one transaction.
    pub fn get_or_create<R: Record>(&mut self, record: &R) -> Result<Stored, PersistenceError> {
        let stored = self.write(|conn| {
            if let Some(id) = find(conn, R::TABLE, &record.natural_key())? {
                return Ok(Stored { id, created: false });
            }
            let id = insert(conn, R::TABLE, &record.columns())?;
            Ok(Stored { id, created: true })
        })?;

        if stored.created {
            info!("Created {} {}", R::ENTITY, stored.id);
        } else {
            debug!("Found existing {} {}", R::ENTITY, stored.id);
        }
        Ok(stored)
    }
}

fn find(conn: &Connection, table: &str, key: &[(&'static str, Value)]) -> Result<Option<i64>, PersistenceError> {
    let clauses: Vec<String> = key
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{column} IS ?{}", i + 1))
        .collect();
    let sql = if clauses.is_empty() {
        format!("SELECT id FROM {table} ORDER BY id LIMIT 1")
    } else {
        format!("SELECT id FROM {table} WHERE {} ORDER BY id LIMIT 1", clauses.join(" AND "))
    };
    let id = conn
        .query_row(&sql, params_from_iter(key.iter().map(|(_, value)| value)), |row| row.get(0))
        .optional()?;
    Ok(id)
}

fn insert(conn: &Connection, table: &str, columns: &[(&'static str, Value)]) -> Result<i64, PersistenceError> {
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let slots: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!("INSERT INTO {table} ({}) VALUES ({})", names.join(", "), slots.join(", "));
    conn.execute(&sql, params_from_iter(columns.iter().map(|(_, value)| value)))?;
    Ok(conn.last_insert_rowid())
}

/// Text column value, NULL for `None`
pub fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::database::DatabaseConfig;
    use crate::db::model::{ChemicalDatabaseRecord, UserRecord};
    use crate::db::Database;

    fn user(name: &str, email: Option<&str>) -> UserRecord {
        UserRecord { username: name.to_string(), email: email.map(str::to_string) }
    }

    #[test]
    fn identical_fields_give_the_same_row() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        let first = session.get_or_create(&user("markus", Some("m@example.org"))).unwrap();
        let second = session.get_or_create(&user("markus", Some("m@example.org"))).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn different_fields_give_a_new_row() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        let a = session.get_or_create(&user("markus", Some("m@example.org"))).unwrap();
        let b = session.get_or_create(&user("markus", Some("other@example.org"))).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn null_fields_match_null() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        let chem = ChemicalDatabaseRecord {
            file_name: "rates.dat".to_string(),
            full_path: "/opt/pdr/pdrinpdata/rates.dat".to_string(),
            origin: None,
        };
        let a = session.get_or_create(&chem).unwrap();
        let b = session.get_or_create(&chem).unwrap();
        assert_eq!(a.id, b.id);
        assert!(!b.created);
    }
}
