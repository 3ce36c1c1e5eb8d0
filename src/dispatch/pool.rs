use std::sync::Arc;

use log::{error, info};
use tokio::sync::Semaphore;

use crate::db::Database;
use crate::dispatch::DispatchError;
use crate::sandbox::{run_instance, JobOutcome, RunContext};

/// How jobs are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    /// at most `workers` jobs at a time, each on its own thread
    Parallel { workers: usize },
}

/// Run one job with its own session. Every failure becomes an outcome.
fn run_one(job_id: i64, ctx: &RunContext, database: &Database) -> JobOutcome {
    let mut store = database.store();
    let outcome = match run_instance(job_id, ctx, &mut store) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("[Job {job_id}] {e}");
            let job_name = store.load_job(job_id).map(|job| job.job_name).unwrap_or_default();
            JobOutcome::exception(job_id, &job_name, &e.to_string())
        }
    };
    for line in &outcome.lines {
        info!("[Job {job_id}] {line}");
    }
    info!("[Job {job_id}] {} ended as {}", outcome.job_name, outcome.state);
    outcome
}

/// Run every job, returning outcomes in `job_ids` order
pub fn dispatch(job_ids: &[i64], ctx: &RunContext, database: &Database, mode: Mode) -> Result<Vec<JobOutcome>, DispatchError> {
    match mode {
        Mode::Sequential => Ok(job_ids.iter().map(|&id| run_one(id, ctx, database)).collect()),
        Mode::Parallel { workers } => parallel(job_ids, ctx, database, workers.max(1)),
    }
}

fn parallel(job_ids: &[i64], ctx: &RunContext, database: &Database, workers: usize) -> Result<Vec<JobOutcome>, DispatchError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(workers)
        .thread_name("pdrgrid-worker")
        .build()
        .map_err(DispatchError::Runtime)?;
    info!("Running {} jobs on {workers} workers", job_ids.len());

    runtime.block_on(async {
        let permits = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(job_ids.len());
        for &job_id in job_ids {
            let permit = Arc::clone(&permits).acquire_owned().await;
            let ctx = ctx.clone();
            let database = database.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                run_one(job_id, &ctx, &database)
            });
            handles.push((job_id, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (job_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("[Job {job_id}] worker failed: {e}");
                    JobOutcome::exception(job_id, "", &format!("worker failed: {e}"))
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    })
}
