//! Running a model: a grid of parameter combinations becomes database
//! entries and then jobs, run one after the other or on a bounded pool of
//! worker threads. One failing job never stops the others.

pub mod entries;
pub mod pool;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use log::{info, warn};
use thiserror::Error;

use crate::config::RunConfig;
use crate::db::{Database, JobState, PersistenceError};
use crate::grid::{generate, GridError, GridSpec};
use crate::provenance::ProvenanceError;
use crate::sandbox::{JobOutcome, RunContext, RunOptions};
use crate::storage::{open_storage, StorageError};

pub use entries::{create_database_entries, setup_model_directories, Entries};
pub use pool::{dispatch, Mode};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("can't create {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Provenance(#[from] ProvenanceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("can't start worker pool: {0}")]
    Runtime(std::io::Error),
}

/// Number of parallel workers: an explicit request capped at the available
/// CPUs, otherwise all CPUs but `reserved`, never less than one
pub fn worker_count(requested: Option<usize>, reserved: usize) -> usize {
    let available = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    match requested {
        Some(n) if n > 0 => n.min(available),
        _ => available.saturating_sub(reserved).max(1),
    }
}

/// Jobs of a grid run and how each of them ended
#[derive(Debug, Clone, PartialEq)]
pub struct GridRun {
    pub job_ids: Vec<i64>,
    pub outcomes: Vec<JobOutcome>,
}

impl GridRun {
    /// Number of jobs per final state
    pub fn tally(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.state.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.state, JobState::Finished | JobState::Skipped))
    }
}

fn run_grid(
    database: &Database,
    config: &RunConfig,
    spec: &GridSpec,
    model_name: &str,
    options: RunOptions,
    mode: Mode,
) -> Result<GridRun, DispatchError> {
    let model_path = config.model_path(model_name);
    setup_model_directories(&model_path)?;

    let points = generate(spec)?;
    info!("Model {model_name}: {} parameter combinations", points.len());

    let mut store = database.store();
    let entries = create_database_entries(&mut store, model_name, &model_path, &points, config)?;
    drop(store);

    let ctx = RunContext {
        config: Arc::new(config.clone()),
        storage: open_storage(config.storage(), &model_path)?,
        options,
    };
    let outcomes = dispatch(&entries.job_ids, &ctx, database, mode)?;

    let run = GridRun { job_ids: entries.job_ids, outcomes };
    for (state, count) in run.tally() {
        info!("{count} jobs {state}");
    }
    if !run.all_succeeded() {
        warn!("Some jobs of model {model_name} did not finish");
    }
    Ok(run)
}

/// Run every combination of the configured grid
pub fn run_parameter_grid(
    database: &Database,
    config: &RunConfig,
    model_name: &str,
    options: RunOptions,
    parallel: bool,
    workers: Option<usize>,
) -> Result<GridRun, DispatchError> {
    let spec = config.grid_spec()?;
    let mode = if parallel {
        Mode::Parallel { workers: worker_count(workers, spec.reserved_cpus) }
    } else {
        Mode::Sequential
    };
    run_grid(database, config, &spec, model_name, options, mode)
}

/// Run only the first combination of the configured grid, returning its job id
pub fn run_model(
    database: &Database,
    config: &RunConfig,
    model_name: &str,
    options: RunOptions,
) -> Result<Option<i64>, DispatchError> {
    let spec = config.grid_spec()?.first_only();
    let run = run_grid(database, config, &spec, model_name, options, Mode::Sequential)?;
    Ok(run.job_ids.first().copied())
}
