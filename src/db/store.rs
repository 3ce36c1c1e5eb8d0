use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::entity::{Record, Stored};
use crate::db::error::PersistenceError;
use crate::db::job::load::{ArtifactSummary, JobRecord, JobSummary};
use crate::db::job::state::JobState;
use crate::db::job::JobPaths;
use crate::db::retry::RetryPolicy;
use crate::db::session::Session;

/// A [`Session`] whose every operation goes through a [`RetryPolicy`]
pub struct Store {
    session: Session,
    retry: RetryPolicy,
}

impl Store {
    pub fn new(session: Session, retry: RetryPolicy) -> Store {
        Store { session, retry }
    }

    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    fn retried<T, F>(&mut self, op: F) -> Result<T, PersistenceError>
    where
        F: FnMut(&mut Session) -> Result<T, PersistenceError>,
    {
        let retry = self.retry;
        retry.run_with_session(&mut self.session, op)
    }

    pub fn get_or_create<R: Record>(&mut self, record: &R) -> Result<Stored, PersistenceError> {
        self.retried(|s| s.get_or_create(record))
    }

    pub fn update_status(&mut self, job_id: i64, state: JobState) -> Result<(), PersistenceError> {
        self.retried(|s| s.update_status(job_id, state))
    }

    pub fn mark_started(&mut self, job_id: i64, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.retried(|s| s.mark_started(job_id, at))
    }

    pub fn mark_finished(&mut self, job_id: i64, at: DateTime<Utc>, elapsed: Duration) -> Result<(), PersistenceError> {
        self.retried(|s| s.mark_finished(job_id, at, elapsed))
    }

    pub fn update_job_paths(&mut self, job_id: i64, paths: &JobPaths) -> Result<(), PersistenceError> {
        self.retried(|s| s.update_job_paths(job_id, paths))
    }

    pub fn load_job(&mut self, job_id: i64) -> Result<JobRecord, PersistenceError> {
        self.retried(|s| s.load_job(job_id))
    }

    pub fn jobs_for_model(&mut self, model_id: i64) -> Result<Vec<JobSummary>, PersistenceError> {
        self.retried(|s| s.jobs_for_model(model_id))
    }

    pub fn find_artifact_by_checksum(&mut self, sha256_sum: &str) -> Result<Option<ArtifactSummary>, PersistenceError> {
        self.retried(|s| s.find_artifact_by_checksum(sha256_sum))
    }

    pub fn find_artifact_by_path(&mut self, full_path: &str) -> Result<Option<ArtifactSummary>, PersistenceError> {
        self.retried(|s| s.find_artifact_by_path(full_path))
    }
}
