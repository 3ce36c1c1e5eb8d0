use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::error::PersistenceError;
use crate::db::job::state::JobState;
use crate::db::job::JobPaths;
use crate::db::model::parse_timestamp;
use crate::db::session::Session;
use crate::parameters::{ParamValue, ParameterSet};

/// Everything the sandbox needs to run one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub job_name: String,
    pub model_id: i64,
    pub model_name: String,
    pub model_path: PathBuf,
    pub user_id: Option<i64>,
    pub parameter_set_id: i64,
    pub executable_id: i64,
    pub executable_path: String,
    pub chemical_database_id: Option<i64>,
    pub onion_species: Vec<String>,
    pub state: JobState,
    pub pending: bool,
    pub active: bool,
    pub time_of_start: Option<DateTime<Utc>>,
    pub time_of_finish: Option<DateTime<Utc>>,
    pub execution_seconds: Option<f64>,
    pub paths: JobPaths,
    pub parameters: ParameterSet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: i64,
    pub job_name: String,
    pub state: JobState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSummary {
    pub id: i64,
    pub job_id: i64,
    pub parameter_set_id: i64,
    pub full_path: String,
    pub sha256_sum: String,
}

static JOB_QUERY: &str = "SELECT j.id, j.job_name, j.model_id, m.name, m.output_path, j.user_id,
        j.parameter_set_id, j.executable_id, e.full_path, j.chemical_database_id, j.onion_species,
        j.status, j.pending, j.active, j.time_of_start, j.time_of_finish, j.execution_seconds,
        j.output_hdf4_file, j.output_hdf5_struct_file, j.output_hdf5_chem_file, j.output_textout_file,
        j.output_chemchk_file, j.output_mcdrt_zip_file, j.output_ctrl_ind_file,
        j.input_pdrnew_inp_file, j.input_json_file, j.log_file
    FROM jobs j
    JOIN models m ON m.id = j.model_id
    JOIN executables e ON e.id = j.executable_id
    WHERE j.id = ?1";

impl Session {
    pub fn load_job(&mut self, job_id: i64) -> Result<JobRecord, PersistenceError> {
        self.read(|conn| {
            let row = conn
                .query_row(JOB_QUERY, params![job_id], RawJob::from_row)
                .optional()?
                .ok_or(PersistenceError::NotFound { entity: "job", id: job_id })?;
            let parameters = load_parameter_set(conn, row.parameter_set_id)?;
            row.into_record(parameters)
        })
    }

    pub fn jobs_for_model(&mut self, model_id: i64) -> Result<Vec<JobSummary>, PersistenceError> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id, job_name, status FROM jobs WHERE model_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![model_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            let mut jobs = Vec::new();
            for row in rows {
                let (id, job_name, status) = row?;
                jobs.push(JobSummary { id, job_name, state: status.parse()? });
            }
            Ok(jobs)
        })
    }

    pub fn find_artifact_by_checksum(&mut self, sha256_sum: &str) -> Result<Option<ArtifactSummary>, PersistenceError> {
        self.find_artifact("sha256_sum", sha256_sum)
    }

    pub fn find_artifact_by_path(&mut self, full_path: &str) -> Result<Option<ArtifactSummary>, PersistenceError> {
        self.find_artifact("full_path", full_path)
    }

    fn find_artifact(&mut self, column: &str, value: &str) -> Result<Option<ArtifactSummary>, PersistenceError> {
        let sql = format!(
            "SELECT id, job_id, parameter_set_id, full_path, sha256_sum FROM output_artifacts
             WHERE {column} = ?1 ORDER BY id LIMIT 1"
        );
        self.read(|conn| {
            Ok(conn
                .query_row(&sql, params![value], |row| {
                    Ok(ArtifactSummary {
                        id: row.get(0)?,
                        job_id: row.get(1)?,
                        parameter_set_id: row.get(2)?,
                        full_path: row.get(3)?,
                        sha256_sum: row.get(4)?,
                    })
                })
                .optional()?)
        })
    }
}

/// Column values as stored, before decoding
struct RawJob {
    id: i64,
    job_name: String,
    model_id: i64,
    model_name: String,
    model_path: String,
    user_id: Option<i64>,
    parameter_set_id: i64,
    executable_id: i64,
    executable_path: String,
    chemical_database_id: Option<i64>,
    onion_species: Option<String>,
    status: String,
    pending: bool,
    active: bool,
    time_of_start: Option<String>,
    time_of_finish: Option<String>,
    execution_seconds: Option<f64>,
    paths: JobPaths,
}

impl RawJob {
    fn from_row(row: &Row) -> rusqlite::Result<RawJob> {
        Ok(RawJob {
            id: row.get(0)?,
            job_name: row.get(1)?,
            model_id: row.get(2)?,
            model_name: row.get(3)?,
            model_path: row.get(4)?,
            user_id: row.get(5)?,
            parameter_set_id: row.get(6)?,
            executable_id: row.get(7)?,
            executable_path: row.get(8)?,
            chemical_database_id: row.get(9)?,
            onion_species: row.get(10)?,
            status: row.get(11)?,
            pending: row.get(12)?,
            active: row.get(13)?,
            time_of_start: row.get(14)?,
            time_of_finish: row.get(15)?,
            execution_seconds: row.get(16)?,
            paths: JobPaths {
                output_hdf4_file: row.get(17)?,
                output_hdf5_struct_file: row.get(18)?,
                output_hdf5_chem_file: row.get(19)?,
                output_textout_file: row.get(20)?,
                output_chemchk_file: row.get(21)?,
                output_mcdrt_zip_file: row.get(22)?,
                output_ctrl_ind_file: row.get(23)?,
                input_pdrnew_inp_file: row.get(24)?,
                input_json_file: row.get(25)?,
                log_file: row.get(26)?,
            },
        })
    }

    fn into_record(self, parameters: ParameterSet) -> Result<JobRecord, PersistenceError> {
        Ok(JobRecord {
            id: self.id,
            job_name: self.job_name,
            model_id: self.model_id,
            model_name: self.model_name,
            model_path: PathBuf::from(self.model_path),
            user_id: self.user_id,
            parameter_set_id: self.parameter_set_id,
            executable_id: self.executable_id,
            executable_path: self.executable_path,
            chemical_database_id: self.chemical_database_id,
            onion_species: self
                .onion_species
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            state: self.status.parse()?,
            pending: self.pending,
            active: self.active,
            time_of_start: self.time_of_start.as_deref().and_then(parse_timestamp),
            time_of_finish: self.time_of_finish.as_deref().and_then(parse_timestamp),
            execution_seconds: self.execution_seconds,
            paths: self.paths,
            parameters,
        })
    }
}

fn load_parameter_set(conn: &Connection, id: i64) -> Result<ParameterSet, PersistenceError> {
    let (mut params, secondary) = conn
        .query_row(
            "SELECT zmetal, xnsur, mass, rtot, rcore, alpha, sint, preshh2, species, grid, secondary
             FROM parameter_sets WHERE id = ?1",
            params![id],
            |row| {
                let params = ParameterSet {
                    zmetal: row.get(0)?,
                    xnsur: row.get(1)?,
                    mass: row.get(2)?,
                    rtot: row.get(3)?,
                    rcore: row.get(4)?,
                    alpha: row.get(5)?,
                    sint: row.get(6)?,
                    preshh2: row.get(7)?,
                    species: row.get(8)?,
                    grid: row.get(9)?,
                    secondary: BTreeMap::new(),
                };
                Ok((params, row.get::<_, String>(10)?))
            },
        )
        .optional()?
        .ok_or(PersistenceError::NotFound { entity: "parameter set", id })?;

    params.secondary = serde_json::from_str::<BTreeMap<String, ParamValue>>(&secondary)
        .map_err(|e| PersistenceError::Decode(format!("secondary parameters of set {id}: {e}")))?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use crate::config::database::DatabaseConfig;
    use crate::db::job::state::JobState;
    use crate::db::job::JobPaths;
    use crate::db::model::{ExecutableRecord, ModelRecord, NewJob, ParameterSetRecord};
    use crate::db::{Database, PersistenceError, Session};
    use crate::grid::{generate, GridSpec};
    use crate::parameters::ParameterSet;

    fn seeded_job(session: &mut Session) -> (i64, ParameterSet) {
        let spec = GridSpec::from_value(&json!({"metal": ["100"], "dens": ["30"], "mass": ["-10"], "chi": ["10"]})).unwrap();
        let params = ParameterSet::from_point(&generate(&spec).unwrap()[0], &spec).unwrap();
        let model = session
            .get_or_create(&ModelRecord { name: "m".to_string(), output_path: "/tmp/m".to_string(), description: None })
            .unwrap();
        let exe = session
            .get_or_create(&ExecutableRecord {
                file_name: "mockpdr".to_string(),
                full_path: "/opt/pdr/mockpdr".to_string(),
                sha256_sum: "abc".to_string(),
                code_revision: Some("dev".to_string()),
                compilation_date: None,
            })
            .unwrap();
        let set = session.get_or_create(&ParameterSetRecord { model_id: model.id, params: &params }).unwrap();
        let user = session
            .get_or_create(&crate::db::model::UserRecord { username: "u".to_string(), email: None })
            .unwrap();
        let chem = session
            .get_or_create(&crate::db::model::ChemicalDatabaseRecord {
                file_name: "rates.dat".to_string(),
                full_path: "/opt/pdr/pdrinpdata/rates.dat".to_string(),
                origin: Some("UDfA12".to_string()),
            })
            .unwrap();
        let job = session
            .get_or_create(&NewJob {
                model_id: model.id,
                job_name: params.derived_name(),
                user_id: user.id,
                parameter_set_id: set.id,
                executable_id: exe.id,
                chemical_database_id: chem.id,
                output_directory: "/tmp/m".to_string(),
                output_hdf4_file: format!("pdr{}.hdf", params.derived_name()),
                onion_species: "CO C+".to_string(),
            })
            .unwrap();
        (job.id, params)
    }

    #[test]
    fn job_loads_with_its_parameters() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        let (job_id, params) = seeded_job(&mut session);
        let job = session.load_job(job_id).unwrap();
        assert_eq!(job.job_name, "100_30_-10_10_00");
        assert_eq!(job.state, JobState::Pending);
        assert!(job.pending);
        assert_eq!(job.onion_species, vec!["CO", "C+"]);
        assert_eq!(job.executable_path, "/opt/pdr/mockpdr");
        assert_eq!(job.parameters, params);
        assert_eq!(job.paths.output_hdf4_file.as_deref(), Some("pdr100_30_-10_10_00.hdf"));
    }

    #[test]
    fn status_updates_set_flags() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        let (job_id, _) = seeded_job(&mut session);

        session.mark_started(job_id, Utc::now()).unwrap();
        let running = session.load_job(job_id).unwrap();
        assert_eq!(running.state, JobState::Running);
        assert!(running.active && !running.pending);
        assert!(running.time_of_start.is_some());

        session.mark_finished(job_id, Utc::now(), Duration::from_millis(1500)).unwrap();
        session.update_status(job_id, JobState::Finished).unwrap();
        let done = session.load_job(job_id).unwrap();
        assert_eq!(done.state, JobState::Finished);
        assert!(!done.active && !done.pending);
        assert_eq!(done.execution_seconds, Some(1.5));

        let jobs = session.jobs_for_model(done.model_id).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state, JobState::Finished);
    }

    #[test]
    fn path_updates_keep_unset_fields() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        let (job_id, _) = seeded_job(&mut session);
        let paths = JobPaths {
            output_textout_file: Some("/tmp/m/pdrgrid/TEXTOUT100_30_-10_10_00".to_string()),
            ..JobPaths::default()
        };
        session.update_job_paths(job_id, &paths).unwrap();
        let job = session.load_job(job_id).unwrap();
        assert_eq!(job.paths.output_textout_file, paths.output_textout_file);
        assert_eq!(job.paths.output_hdf4_file.as_deref(), Some("pdr100_30_-10_10_00.hdf"));
    }

    #[test]
    fn missing_job_is_not_found() {
        let db = Database::open(&DatabaseConfig::in_memory()).unwrap();
        let mut session = db.session();
        assert!(matches!(
            session.update_status(42, JobState::Running),
            Err(PersistenceError::NotFound { entity: "job", id: 42 })
        ));
        assert!(matches!(session.load_job(42), Err(PersistenceError::NotFound { .. })));
        // the failed update was rolled back and the session is still usable
        assert!(!session.is_broken());
        assert!(session.find_artifact_by_path("/nowhere").unwrap().is_none());
    }
}
