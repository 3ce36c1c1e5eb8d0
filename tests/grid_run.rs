#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use pdrgrid::config::database::DatabaseConfig;
use pdrgrid::config::RunConfig;
use pdrgrid::db::{Database, JobState};
use pdrgrid::dispatch::{create_database_entries, dispatch, run_parameter_grid, setup_model_directories, Mode};
use pdrgrid::grid::generate;
use pdrgrid::sandbox::{RunContext, RunOptions};
use pdrgrid::storage::open_storage;

/// A PDR installation made of shell scripts
struct Install {
    root: TempDir,
}

impl Install {
    fn new(pdr_body: &str) -> Install {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        fs::create_dir_all(base.join("templates")).unwrap();
        fs::create_dir_all(base.join("pdrinpdata")).unwrap();
        fs::create_dir_all(base.join("onioninpdata")).unwrap();
        fs::write(base.join("templates/PDRNEW.INP.template"), "XNSUR KT_VARxnsur_\nMASS KT_VARmass_\nKT_VARspecies_\n")
            .unwrap();
        fs::write(base.join("pdrinpdata/chem_rates_2022-10-21-ERS.dat"), "rates").unwrap();
        fs::write(base.join("onioninpdata/ONION3.INP.CO"), "CO").unwrap();

        let install = Install { root };
        let counter = install.counter();
        install.script(
            "mockpdr",
            &format!(
                r#"if [ "$1" = "--version" ]; then
  echo "KOSMA-tau mock"
  echo "Revision: mock-7"
  echo "Binary compiled the Mar 14 2023 at 10:15:00"
  exit 0
fi
echo run >> {counter}
{pdr_body}
cp GRID_PARAM pdroutput/pdrout.hdf
cp PDRNEW.INP pdroutput/pdrstruct_s.hdf5
echo ctrl > pdroutput/CTRL_IND
mkdir -p Out
echo mrt > Out/line.dat
echo "PDR done""#,
                counter = counter.display()
            ),
        );
        install.script("mockonion", "sp=$(cat ONION3.INP); echo line > onionoutput/jerg_$sp.smli");
        install
    }

    fn script(&self, name: &str, body: &str) {
        let path = self.root.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn counter(&self) -> PathBuf {
        self.root.path().join("invocations")
    }

    fn invocations(&self) -> usize {
        fs::read_to_string(self.counter()).map(|s| s.lines().count()).unwrap_or(0)
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn database_file(&self) -> PathBuf {
        self.path().join("pdr.db")
    }

    fn config(&self, parameters: Value) -> RunConfig {
        let db = self.database_file();
        RunConfig::default()
            .with_base_dir(self.path())
            .with_database(DatabaseConfig::sqlite_file(&db.to_string_lossy()))
            .with_parameters(parameters)
    }
}

#[test]
fn two_point_grid_creates_two_jobs() {
    let install = Install::new("");
    let config = install.config(json!({
        "metal": ["100"], "dens": [3.0, 4.0], "mass": ["0"], "chi": [1.0], "species": ["CO"]
    }));
    let db = Database::open(config.database()).unwrap();

    let run = run_parameter_grid(&db, &config, "e2e", RunOptions::default(), false, None).unwrap();
    assert_eq!(run.job_ids.len(), 2);
    assert!(run.outcomes.iter().all(|o| o.state == JobState::Finished), "{:?}", run.outcomes);
    assert_eq!(install.invocations(), 2);

    let mut store = db.store();
    let first = store.load_job(run.job_ids[0]).unwrap();
    let second = store.load_job(run.job_ids[1]).unwrap();
    assert_eq!(first.job_name, "100_03_00_01_00");
    assert_eq!(second.job_name, "100_04_00_01_00");
    assert_ne!(first.parameter_set_id, second.parameter_set_id);
    assert_ne!(first.parameters, second.parameters);
    assert_eq!(first.executable_id, second.executable_id);
    assert_eq!(first.chemical_database_id, second.chemical_database_id);
    assert!(!first.active && !first.pending);
    assert!(first.execution_seconds.is_some());

    for job in [&first, &second] {
        let hdf = job.paths.output_hdf4_file.clone().unwrap();
        assert!(Path::new(&hdf).is_file());
        assert!(job.paths.output_mcdrt_zip_file.is_some());
        assert!(job.paths.input_pdrnew_inp_file.is_some());
        let artifact = store.find_artifact_by_path(&hdf).unwrap().unwrap();
        assert_eq!(artifact.job_id, job.id);
    }
    let model = config.model_path("e2e");
    assert!(model.join("oniongrid/ONION100_03_00_01_00.jerg_CO.smli").is_file());
    assert!(model.join("oniongrid/TEXTOUT100_04_00_01_00_CO").is_file());
}

#[test]
fn stored_results_are_reused() {
    let install = Install::new("");
    let config = install.config(json!({"metal": ["100"], "dens": ["30"], "mass": ["10"], "chi": ["10"], "species": ["CO"]}));
    let db = Database::open(config.database()).unwrap();

    let first = run_parameter_grid(&db, &config, "reuse", RunOptions::default(), false, None).unwrap();
    assert_eq!(first.outcomes[0].state, JobState::Finished);
    assert_eq!(install.invocations(), 1);

    let onion_log = config.model_path("reuse").join("oniongrid/TEXTOUT100_30_10_10_00_CO");
    assert!(onion_log.is_file());
    fs::remove_file(&onion_log).unwrap();

    let second = run_parameter_grid(&db, &config, "reuse", RunOptions::default(), false, None).unwrap();
    assert_eq!(second.job_ids, first.job_ids);
    assert_eq!(second.outcomes[0].state, JobState::Skipped);
    assert_eq!(install.invocations(), 1);
    assert!(!onion_log.exists());

    let options = RunOptions { force_onion: true, ..RunOptions::default() };
    let third = run_parameter_grid(&db, &config, "reuse", options, false, None).unwrap();
    assert_eq!(third.outcomes[0].state, JobState::Skipped);
    assert_eq!(install.invocations(), 1);
    assert!(onion_log.is_file());

    let job = db.store().load_job(first.job_ids[0]).unwrap();
    assert_eq!(job.state, JobState::Skipped);
    assert!(job.paths.output_hdf5_struct_file.is_some());
    assert!(job.paths.output_ctrl_ind_file.is_some());
}

#[test]
fn failing_job_does_not_stop_siblings() {
    let install = Install::new("if grep -q '^40$' GRID_PARAM; then cp GRID_PARAM pdroutput/pdrout.hdf; exit 3; fi");
    let config = install.config(json!({"metal": ["100"], "dens": ["30", "40", "50"], "mass": ["10"], "chi": ["10"], "species": []}));
    let db = Database::open(config.database()).unwrap();

    let run = run_parameter_grid(&db, &config, "mixed", RunOptions::default(), true, Some(2)).unwrap();
    let states: Vec<JobState> = run.outcomes.iter().map(|o| o.state).collect();
    assert_eq!(states, vec![JobState::Finished, JobState::Problem, JobState::Finished]);
    assert_eq!(run.outcomes.iter().map(|o| o.job_id).collect::<Vec<_>>(), run.job_ids);

    let mut store = db.store();
    let failed = store.load_job(run.job_ids[1]).unwrap();
    assert_eq!(failed.state, JobState::Problem);
    assert!(failed.paths.output_textout_file.is_some());
    // the partial result is kept but never registered as an artifact
    let hdf = failed.paths.output_hdf4_file.clone().unwrap();
    assert!(store.find_artifact_by_path(&hdf).unwrap().is_none());
    let finished = store.load_job(run.job_ids[0]).unwrap();
    let hdf = finished.paths.output_hdf4_file.clone().unwrap();
    assert!(store.find_artifact_by_path(&hdf).unwrap().is_some());
}

#[test]
fn database_failure_after_start_ends_in_exception() {
    let install = Install::new("");
    let config = install.config(json!({"metal": ["100"], "dens": ["30"], "mass": ["10"], "chi": ["10"], "species": []}));
    let db = Database::open(config.database()).unwrap();

    let model_path = config.model_path("stuck");
    setup_model_directories(&model_path).unwrap();
    let points = generate(&config.grid_spec().unwrap()).unwrap();
    let entries = create_database_entries(&mut db.store(), "stuck", &model_path, &points, &config).unwrap();

    // the job starts and runs, then recording its result fails
    let conn = rusqlite::Connection::open(install.database_file()).unwrap();
    conn.execute_batch("DROP TABLE output_artifacts").unwrap();
    drop(conn);

    let ctx = RunContext {
        config: Arc::new(config.clone()),
        storage: open_storage(config.storage(), &model_path).unwrap(),
        options: RunOptions::default(),
    };
    let outcomes = dispatch(&entries.job_ids, &ctx, &db, Mode::Sequential).unwrap();
    assert_eq!(outcomes[0].state, JobState::Exception);
    assert_eq!(install.invocations(), 1);

    let job = db.store().load_job(entries.job_ids[0]).unwrap();
    assert_eq!(job.state, JobState::Exception);
    assert!(!job.active && !job.pending);
}

#[test]
fn missing_executable_is_an_exception() {
    let install = Install::new("");
    fs::remove_file(install.path().join("mockpdr")).unwrap();
    fs::write(install.path().join("mockpdr"), "not a program").unwrap();
    let config = install.config(json!({"metal": ["100"], "dens": ["30"], "mass": ["10"], "chi": ["10"], "species": []}));
    let db = Database::open(config.database()).unwrap();

    let run = run_parameter_grid(&db, &config, "broken", RunOptions::default(), false, None).unwrap();
    assert_eq!(run.outcomes[0].state, JobState::Exception);
    assert_eq!(db.store().load_job(run.job_ids[0]).unwrap().state, JobState::Exception);
}
