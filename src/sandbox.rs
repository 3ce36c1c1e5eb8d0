//! Running one job.
//!
//! Every job gets its own temporary [`Sandbox`](layout::Sandbox): the
//! installation's input directories are copied in, the programs are linked,
//! input files are rendered from the job's parameter set, and results are
//! handed to the model's [`Storage`] under names derived from the job name.
//! A job whose structure file is already stored is not run again.
//!
//! The job status is committed once, after all stages, so a terminal status
//! is never overwritten within a run.

pub mod collect;
pub mod execute;
pub mod layout;
pub mod onion;
pub mod stage;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use thiserror::Error;

use crate::config::RunConfig;
use crate::db::{JobRecord, JobState, PersistenceError, Store};
use crate::provenance::ProvenanceError;
use crate::storage::{Storage, StorageError};
use crate::template::{render_banner, TemplateError};
use execute::{Exit, Invocation};
use layout::{ResultNames, Sandbox, TEXTOUT};
use stage::Staged;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("I/O failed on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("executable {0} not found")]
    MissingExecutable(PathBuf),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Provenance(#[from] ProvenanceError),
}

/// `map_err` adapter attaching a path to an I/O error
pub(crate) fn io_at(path: &Path) -> impl Fn(io::Error) -> SandboxError {
    let path = path.to_path_buf();
    move |source| SandboxError::Io { path: path.clone(), source }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// run onion even when the PDR results are reused
    pub force_onion: bool,
    /// leave the sandbox on disk after the job
    pub keep_sandbox: bool,
    /// JSON template used instead of the installed one
    pub json_template: Option<PathBuf>,
}

/// What every job of a model run shares
#[derive(Clone)]
pub struct RunContext {
    pub config: Arc<RunConfig>,
    pub storage: Arc<dyn Storage>,
    pub options: RunOptions,
}

/// How a job ended, with lines describing what happened
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: i64,
    pub job_name: String,
    pub state: JobState,
    pub lines: Vec<String>,
}

impl JobOutcome {
    /// Outcome of a job that failed before it produced a status of its own
    pub fn exception(job_id: i64, job_name: &str, reason: &str) -> JobOutcome {
        JobOutcome {
            job_id,
            job_name: job_name.to_string(),
            state: JobState::Exception,
            lines: vec![format!("exception: {reason}")],
        }
    }
}

fn prepare(ctx: &RunContext, job: &JobRecord) -> Result<(Sandbox, Staged), SandboxError> {
    let sandbox = Sandbox::create(ctx.options.keep_sandbox).map_err(io_at(&std::env::temp_dir()))?;
    let pdr = ctx.config.pdr();
    let staged = stage::stage(&sandbox, pdr, Path::new(&job.executable_path), ctx.options.json_template.as_deref())?;
    stage::render_inputs(&sandbox, &staged, pdr, &job.parameters)?;
    Ok((sandbox, staged))
}

fn banner(sandbox: &Sandbox, stage: &str, job: &JobRecord) {
    let log = sandbox.join(TEXTOUT);
    let written = render_banner(stage, &job.job_name, job.id, &Utc::now())
        .map_err(SandboxError::from)
        .and_then(|text| execute::log_line(&log, &text).map_err(io_at(&log)));
    if let Err(e) = written {
        warn!("Can't write job banner: {e}");
    }
}

/// Run the PDR program and map how it ended to a job state
fn run_primary(
    sandbox: &Sandbox,
    staged: &Staged,
    ctx: &RunContext,
    store: &mut Store,
    job: &JobRecord,
    lines: &mut Vec<String>,
) -> Result<JobState, SandboxError> {
    store.mark_started(job.id, Utc::now())?;
    banner(sandbox, "Begin", job);

    let log = sandbox.join(TEXTOUT);
    let invocation = Invocation {
        program: &staged.pdr,
        args: &[],
        working_dir: sandbox.path(),
        log: &log,
        timeout: timeout(ctx),
    };
    let started = std::time::Instant::now();
    let state = match execute::run(&invocation) {
        Ok((Exit::Success, elapsed)) => {
            info!("PDR program finished without problems after {:.1} s", elapsed.as_secs_f64());
            lines.push(format!("pdr: finished in {:.1} s", elapsed.as_secs_f64()));
            JobState::Finished
        }
        Ok((Exit::Failure(code), _)) => {
            error!("PDR program failed with exit code {code:?}");
            lines.push(format!("pdr: exit code {code:?}"));
            JobState::Problem
        }
        Ok((Exit::TimedOut, elapsed)) => {
            error!("PDR program killed after {:.0} s", elapsed.as_secs_f64());
            lines.push(format!("pdr: killed after {:.0} s", elapsed.as_secs_f64()));
            JobState::Error
        }
        Err(e) => {
            error!("Can't run {}: {e}", staged.pdr.display());
            lines.push(format!("pdr: can't run {}: {e}", staged.pdr.display()));
            JobState::Exception
        }
    };

    banner(sandbox, "End", job);
    store.mark_finished(job.id, Utc::now(), started.elapsed())?;
    Ok(state)
}

/// Store results and record where they went. Only a successful run
/// registers its output as an artifact.
fn collect(
    sandbox: &Sandbox,
    ctx: &RunContext,
    store: &mut Store,
    job: &JobRecord,
    names: &ResultNames,
    succeeded: bool,
) -> Result<(), SandboxError> {
    let paths = collect::store_primary(sandbox, names, ctx.storage.as_ref())?;
    if succeeded {
        collect::register_artifact(store, job, sandbox, names, ctx.storage.as_ref())?;
    }
    store.update_job_paths(job.id, &paths)?;
    Ok(())
}

/// Reuse stored results instead of running the program
fn reuse(sandbox: &Sandbox, ctx: &RunContext, store: &mut Store, job: &JobRecord, names: &ResultNames) -> Result<(), SandboxError> {
    let paths = collect::restore_existing(sandbox, names, ctx.storage.as_ref())?;
    store.update_job_paths(job.id, &paths)?;
    collect::register_artifact(store, job, sandbox, names, ctx.storage.as_ref())?;
    Ok(())
}

fn is_storage(e: &SandboxError) -> bool {
    matches!(e, SandboxError::Storage(_) | SandboxError::Io { .. } | SandboxError::Provenance(_))
}

/// Run one job from staging to teardown.
///
/// Program failures end in a terminal job state and are reported through
/// the outcome. Any other failure after the job is loaded, such as staging
/// or a database update, returns an error and leaves the job `exception`
/// as far as the database still allows.
pub fn run_instance(job_id: i64, ctx: &RunContext, store: &mut Store) -> Result<JobOutcome, SandboxError> {
    let job = store.load_job(job_id)?;
    info!("Running job {} (id {job_id}) of model {}", job.job_name, job.model_name);

    run_loaded(&job, ctx, store).inspect_err(|e| {
        error!("Job {} (id {job_id}) failed: {e}", job.job_name);
        if let Err(update) = store.update_status(job_id, JobState::Exception) {
            warn!("Can't mark job {job_id} as exception: {update}");
        }
    })
}

fn run_loaded(job: &JobRecord, ctx: &RunContext, store: &mut Store) -> Result<JobOutcome, SandboxError> {
    let job_id = job.id;
    let (sandbox, staged) = prepare(ctx, job)?;

    let names = ResultNames::new(&job.job_name);
    let storage = ctx.storage.as_ref();
    let mut lines = Vec::new();

    let state = if storage.file_exists(&names.hdf5_struct()) {
        warn!("Results of {} exist, skipping the PDR program", job.job_name);
        let state = match reuse(&sandbox, ctx, store, job, &names) {
            Ok(()) => {
                lines.push(format!("pdr: reused {}", storage.locate(&names.hdf5_struct())));
                JobState::Skipped
            }
            Err(e) if is_storage(&e) => {
                error!("Can't reuse stored results: {e}");
                lines.push(format!("storage: {e}"));
                JobState::FailedStorage
            }
            Err(e) => return Err(e),
        };
        store.update_status(job_id, state)?;
        if state == JobState::Skipped && ctx.options.force_onion {
            lines.extend(onion::run_onion(&sandbox, &staged, &job.onion_species, &names, storage, timeout(ctx)));
        }
        state
    } else {
        let ran = run_primary(&sandbox, &staged, ctx, store, job, &mut lines)?;
        if ran == JobState::Finished {
            lines.extend(onion::run_onion(&sandbox, &staged, &job.onion_species, &names, storage, timeout(ctx)));
        }
        // results are collected after onion, which updates the structure file
        let state = match collect(&sandbox, ctx, store, job, &names, ran == JobState::Finished) {
            Ok(()) => ran,
            Err(e) if ran == JobState::Finished && is_storage(&e) => {
                error!("Can't store results of job {job_id}: {e}");
                lines.push(format!("storage: {e}"));
                JobState::FailedStorage
            }
            Err(e) if is_storage(&e) => {
                warn!("Can't store logs of job {job_id}: {e}");
                ran
            }
            Err(e) => return Err(e),
        };
        store.update_status(job_id, state)?;
        state
    };

    info!("Job {} (id {job_id}) ended as {state}", job.job_name);
    Ok(JobOutcome { job_id, job_name: job.job_name.clone(), state, lines })
}

fn timeout(ctx: &RunContext) -> Option<Duration> {
    ctx.config.pdr().timeout_seconds.map(Duration::from_secs)
}
