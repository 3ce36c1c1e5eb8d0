use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::db::entity::text;
use crate::db::error::PersistenceError;
use crate::db::job::state::JobState;
use crate::db::job::JobPaths;
use crate::db::model::timestamp;
use crate::db::session::Session;

impl Session {
    /// Set the job status and the active/pending flags it implies
    pub fn update_status(&mut self, job_id: i64, state: JobState) -> Result<(), PersistenceError> {
        let now = timestamp(&Utc::now());
        self.write(|conn| {
            let changed = match state.flags() {
                Some((active, pending)) => conn.execute(
                    "UPDATE jobs SET status = ?1, active = ?2, pending = ?3, time_updated = ?4 WHERE id = ?5",
                    params![state.as_str(), active, pending, now, job_id],
                )?,
                None => conn.execute(
                    "UPDATE jobs SET status = ?1, time_updated = ?2 WHERE id = ?3",
                    params![state.as_str(), now, job_id],
                )?,
            };
            require_job(changed, job_id)
        })?;
        info!("Updated job {job_id} status to '{state}'");
        Ok(())
    }

    /// Move the job to `running` and record when it started
    pub fn mark_started(&mut self, job_id: i64, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        let started = timestamp(&at);
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE jobs SET status = ?1, active = 1, pending = 0, time_of_start = ?2, time_updated = ?2 WHERE id = ?3",
                params![JobState::Running.as_str(), started, job_id],
            )?;
            require_job(changed, job_id)
        })?;
        info!("Job {job_id} started at {started}");
        Ok(())
    }

    /// Record when the program exited and how long it ran. The status is left alone.
    pub fn mark_finished(&mut self, job_id: i64, at: DateTime<Utc>, elapsed: Duration) -> Result<(), PersistenceError> {
        let finished = timestamp(&at);
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE jobs SET time_of_finish = ?1, execution_seconds = ?2, time_updated = ?1 WHERE id = ?3",
                params![finished, elapsed.as_secs_f64(), job_id],
            )?;
            require_job(changed, job_id)
        })?;
        info!("Job {job_id} ran for {:.1} s", elapsed.as_secs_f64());
        Ok(())
    }

    /// Write every set path field in one commit
    pub fn update_job_paths(&mut self, job_id: i64, paths: &JobPaths) -> Result<(), PersistenceError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.write(|conn| write_paths(conn, job_id, paths))?;
        info!("Updated output paths of job {job_id}");
        Ok(())
    }
}

fn write_paths(conn: &Connection, job_id: i64, paths: &JobPaths) -> Result<(), PersistenceError> {
    let assignments: Vec<String> = JobPaths::COLUMNS
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = COALESCE(?{}, {column})", i + 1))
        .collect();
    let sql = format!(
        "UPDATE jobs SET {}, time_updated = ?{} WHERE id = ?{}",
        assignments.join(", "),
        JobPaths::COLUMNS.len() + 1,
        JobPaths::COLUMNS.len() + 2
    );
    let mut values: Vec<Value> = paths.values().into_iter().map(text).collect();
    values.push(Value::Text(timestamp(&Utc::now())));
    values.push(Value::Integer(job_id));
    let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
    require_job(changed, job_id)
}

fn require_job(changed: usize, job_id: i64) -> Result<(), PersistenceError> {
    if changed == 0 {
        Err(PersistenceError::NotFound { entity: "job", id: job_id })
    } else {
        Ok(())
    }
}
