use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::db::error::PersistenceError;

/// Lifecycle of a job.
///
/// A job starts `pending`, becomes `running` when the PDR program is
/// launched and ends in exactly one terminal state. A job whose results
/// already exist goes straight from `pending` to `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    /// program exited 0
    Finished,
    /// program exited non-zero
    Problem,
    /// program killed after the configured timeout
    Error,
    Skipped,
    /// the program could not be run or the job could not be staged
    Exception,
    /// the program finished but its results could not be stored
    FailedStorage,
}

impl JobState {
    /// db column value
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Problem => "problem",
            JobState::Error => "error",
            JobState::Skipped => "skipped",
            JobState::Exception => "exception",
            JobState::FailedStorage => "failed_storage",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }

    /// `(active, pending)` flags implied by the state, `None` leaves them alone
    pub fn flags(&self) -> Option<(bool, bool)> {
        match self {
            JobState::Pending => None,
            JobState::Running => Some((true, false)),
            _ => Some((false, false)),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => JobState::Pending,
            "running" => JobState::Running,
            "finished" => JobState::Finished,
            "problem" => JobState::Problem,
            "error" => JobState::Error,
            "skipped" => JobState::Skipped,
            "exception" => JobState::Exception,
            "failed_storage" => JobState::FailedStorage,
            other => return Err(PersistenceError::Decode(format!("unknown job status '{other}'"))),
        })
    }
}
