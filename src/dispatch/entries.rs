use std::fs;
use std::path::Path;

use log::info;

use crate::config::RunConfig;
use crate::db::model::{ChemicalDatabaseRecord, ExecutableRecord, ModelRecord, NewJob, ParameterSetRecord, UserRecord};
use crate::db::Store;
use crate::dispatch::DispatchError;
use crate::grid::GridPoint;
use crate::parameters::ParameterSet;
use crate::provenance::executable_record;
use crate::sandbox::layout::{ONION_DIR, PRIMARY_DIR};

/// Create the result directories of a model
pub fn setup_model_directories(model_path: &Path) -> Result<(), DispatchError> {
    for dir in [PRIMARY_DIR, ONION_DIR] {
        let path = model_path.join(dir);
        fs::create_dir_all(&path).map_err(|source| DispatchError::Io { path: path.clone(), source })?;
    }
    info!("Model directories ready in {}", model_path.display());
    Ok(())
}

/// Ids of the rows a grid run works on, in grid order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entries {
    pub parameter_ids: Vec<i64>,
    pub job_ids: Vec<i64>,
}

/// Register everything a grid run refers to: the executable, user, model
/// and chemistry, then one parameter set and one pending job per point.
/// Rows that already exist are reused.
pub fn create_database_entries(
    store: &mut Store,
    model_name: &str,
    model_path: &Path,
    points: &[GridPoint],
    config: &RunConfig,
) -> Result<Entries, DispatchError> {
    let pdr = config.pdr();
    let spec = config.grid_spec()?;

    let executable: ExecutableRecord = executable_record(&pdr.install_path(&pdr.pdr_file_name), pdr)?;
    let executable_id = store.get_or_create(&executable)?.id;

    let user = config.user();
    let user_id = store
        .get_or_create(&UserRecord { username: user.username.clone(), email: user.email.clone() })?
        .id;
    info!("User: {}", user.username);

    let model_id = store
        .get_or_create(&ModelRecord {
            name: model_name.to_string(),
            output_path: model_path.to_string_lossy().into_owned(),
            description: None,
        })?
        .id;
    info!("Model {model_name} has id {model_id}");

    let chemistry = ChemicalDatabaseRecord {
        file_name: pdr.chem_database.clone(),
        full_path: pdr.chem_database_path().to_string_lossy().into_owned(),
        origin: Some(pdr.chem_origin.clone()),
    };
    let chemical_database_id = store.get_or_create(&chemistry)?.id;
    info!("Chemical database {} has id {chemical_database_id}", pdr.chem_database);

    let onion_species = spec.species.join(" ");
    let mut entries = Entries::default();
    for point in points {
        let params = ParameterSet::from_point(point, &spec)?;
        let parameter_set_id = store.get_or_create(&ParameterSetRecord { model_id, params: &params })?.id;

        let job_name = params.derived_name();
        let job = NewJob {
            model_id,
            output_hdf4_file: format!("pdr{job_name}.hdf"),
            job_name,
            user_id,
            parameter_set_id,
            executable_id,
            chemical_database_id,
            output_directory: model_path.to_string_lossy().into_owned(),
            onion_species: onion_species.clone(),
        };
        let stored = store.get_or_create(&job)?;
        info!("Job {} for {:?} (new: {})", stored.id, point, stored.created);

        entries.parameter_ids.push(parameter_set_id);
        entries.job_ids.push(stored.id);
    }
    info!("{} parameter sets, {} jobs", entries.parameter_ids.len(), entries.job_ids.len());
    Ok(entries)
}
