use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use pdrgrid::config::RunConfig;
use pdrgrid::db::Database;
use pdrgrid::dispatch::{run_model, run_parameter_grid, worker_count};
use pdrgrid::format::InputFormat;
use pdrgrid::grid::generate;
use pdrgrid::sandbox::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "pdrgrid", version, about = "Run grids of KOSMA-tau PDR models")]
struct Args {
    /// JSON configuration file, defaults and PDR_DB_* variables when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run only the first parameter combination
    #[arg(long, conflicts_with = "grid")]
    single: bool,

    /// Run every parameter combination (default)
    #[arg(long)]
    grid: bool,

    /// Run jobs in parallel
    #[arg(short, long)]
    parallel: bool,

    /// Number of parallel workers, all CPUs but the reserved ones when omitted
    #[arg(short, long)]
    workers: Option<usize>,

    /// Model name, overrides the configuration
    #[arg(short, long)]
    model_name: Option<String>,

    /// Run onion even for jobs whose PDR results are reused
    #[arg(long)]
    force_onion: bool,

    /// Keep job sandboxes after the run
    #[arg(long)]
    keep_tmp: bool,

    /// JSON template to use instead of the installed one
    #[arg(long)]
    json_template: Option<PathBuf>,

    /// Input format the PDR code reads, overrides the configuration
    #[arg(long, value_enum)]
    input_format: Option<InputFormat>,

    /// Print the configuration and parameter combinations, then exit
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    info!("pdrgrid {} starting", env!("CARGO_PKG_VERSION"));
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path).with_context(|| format!("Can't load configuration {}", path.display()))?,
        None => RunConfig::from_env().context("Can't build default configuration")?,
    };
    if let Some(name) = &args.model_name {
        config = config.with_model_name(name);
    }
    if let Some(format) = args.input_format {
        config = config.with_input_format(format);
    }
    let model_name = config.pdr().model_name.clone();

    if args.dry_run {
        return dry_run(&config, &args);
    }

    let database = Database::open(config.database()).context("Can't open database")?;
    if !database.test_connection() {
        bail!("Database {} is not reachable", database.masked_url());
    }

    let options = RunOptions {
        force_onion: args.force_onion,
        keep_sandbox: args.keep_tmp,
        json_template: args.json_template.clone(),
    };

    if args.single {
        match run_model(&database, &config, &model_name, options).context("Model run failed")? {
            Some(job_id) => println!("Job {job_id} done"),
            None => warn!("No parameter combination to run"),
        }
        return Ok(());
    }

    let run = run_parameter_grid(&database, &config, &model_name, options, args.parallel, args.workers)
        .context("Grid run failed")?;
    for outcome in &run.outcomes {
        println!("{} {} {}", outcome.job_id, outcome.job_name, outcome.state);
    }
    let tally = run.tally();
    println!("{} jobs: {:?}", run.job_ids.len(), tally);
    Ok(())
}

fn dry_run(config: &RunConfig, args: &Args) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    let spec = config.grid_spec().context("Invalid parameter grid")?;
    let spec = if args.single { spec.first_only() } else { spec };
    let points = generate(&spec).context("Can't generate parameter grid")?;
    println!("{} parameter combinations", points.len());
    for point in &points {
        println!(
            "{} {} {} {} {}",
            point.metal, point.density, point.mass, point.radiation, point.column
        );
    }
    if args.parallel {
        println!("{} workers", worker_count(args.workers, spec.reserved_cpus));
    }
    Ok(())
}
