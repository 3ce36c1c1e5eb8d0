use std::fs::{self, File};
use std::io;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};

use crate::db::model::OutputArtifactRecord;
use crate::db::{JobPaths, JobRecord, Store, Stored};
use crate::provenance::file_digest;
use crate::sandbox::layout::{
    ResultNames, Sandbox, CHEMCHK_OUT, CTRL_IND, FLAT_INPUT, HDF4_OUT, HDF5_CHEM_OUT, HDF5_STRUCT_OUT, JSON_INPUT,
    MRT_DIR, TEXTOUT,
};
use crate::sandbox::{io_at, SandboxError};
use crate::storage::Storage;

const MRT_ARCHIVE: &str = "MCDRT.tar.gz";

/// Pack a directory into a gzipped tarball under its own name
pub fn archive_dir(dir: &Path, target: &Path) -> io::Result<()> {
    let name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| MRT_DIR.into());
    let encoder = GzEncoder::new(File::create(target)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(name, dir)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn put(sandbox: &Sandbox, storage: &dyn Storage, local: &str, remote: String) -> Result<Option<String>, SandboxError> {
    let path = sandbox.join(local);
    if !path.is_file() {
        return Ok(None);
    }
    storage.store_file(&path, &remote)?;
    Ok(Some(storage.locate(&remote)))
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut entries| entries.next().is_some()).unwrap_or(false)
}

/// Store the PDR program's results and inputs under the job's result names
pub fn store_primary(sandbox: &Sandbox, names: &ResultNames, storage: &dyn Storage) -> Result<JobPaths, SandboxError> {
    let mrt = sandbox.join(MRT_DIR);
    if has_entries(&mrt) {
        let archive = sandbox.join(MRT_ARCHIVE);
        archive_dir(&mrt, &archive).map_err(io_at(&archive))?;
    }
    let ctrl_ind = if sandbox.join("pdroutput").join(CTRL_IND).is_file() {
        format!("pdroutput/{CTRL_IND}")
    } else {
        CTRL_IND.to_string()
    };

    let textout = put(sandbox, storage, TEXTOUT, names.textout())?;
    let paths = JobPaths {
        log_file: textout.clone(),
        output_textout_file: textout,
        output_hdf4_file: put(sandbox, storage, HDF4_OUT, names.hdf4())?,
        output_hdf5_struct_file: put(sandbox, storage, HDF5_STRUCT_OUT, names.hdf5_struct())?,
        output_hdf5_chem_file: put(sandbox, storage, HDF5_CHEM_OUT, names.hdf5_chem())?,
        output_chemchk_file: put(sandbox, storage, CHEMCHK_OUT, names.chemchk())?,
        output_mcdrt_zip_file: put(sandbox, storage, MRT_ARCHIVE, names.mcdrt())?,
        input_pdrnew_inp_file: put(sandbox, storage, FLAT_INPUT, names.pdrnew())?,
        input_json_file: put(sandbox, storage, JSON_INPUT, names.json_input())?,
        output_ctrl_ind_file: put(sandbox, storage, &ctrl_ind, names.ctrl_ind())?,
    };
    info!("Stored results in {}", storage.locate(""));
    Ok(paths)
}

fn fetch(sandbox: &Sandbox, storage: &dyn Storage, remote: String, local: &str) -> Result<Option<String>, SandboxError> {
    if !storage.file_exists(&remote) {
        return Ok(None);
    }
    storage.retrieve_file(&remote, &sandbox.join(local))?;
    Ok(Some(storage.locate(&remote)))
}

fn existing(storage: &dyn Storage, remote: String) -> Option<String> {
    storage.file_exists(&remote).then(|| storage.locate(&remote))
}

/// Bring stored results of an earlier run back into the sandbox and
/// describe where they are
pub fn restore_existing(sandbox: &Sandbox, names: &ResultNames, storage: &dyn Storage) -> Result<JobPaths, SandboxError> {
    let textout = existing(storage, names.textout());
    let paths = JobPaths {
        log_file: textout.clone(),
        output_textout_file: textout,
        output_hdf4_file: fetch(sandbox, storage, names.hdf4(), HDF4_OUT)?,
        output_hdf5_struct_file: fetch(sandbox, storage, names.hdf5_struct(), HDF5_STRUCT_OUT)?,
        output_hdf5_chem_file: existing(storage, names.hdf5_chem()),
        output_chemchk_file: existing(storage, names.chemchk()),
        output_mcdrt_zip_file: existing(storage, names.mcdrt()),
        input_pdrnew_inp_file: existing(storage, names.pdrnew()),
        input_json_file: existing(storage, names.json_input()),
        output_ctrl_ind_file: fetch(sandbox, storage, names.ctrl_ind(), CTRL_IND)?,
    };
    info!("Reusing results of {}", names.hdf5_struct());
    Ok(paths)
}

/// Record the HDF result of a job, once per distinct content
pub fn register_artifact(
    store: &mut Store,
    job: &JobRecord,
    sandbox: &Sandbox,
    names: &ResultNames,
    storage: &dyn Storage,
) -> Result<Option<Stored>, SandboxError> {
    let hdf = sandbox.join(HDF4_OUT);
    if !hdf.is_file() {
        warn!("No {HDF4_OUT} for job {}, nothing to register", job.job_name);
        return Ok(None);
    }
    let digest = file_digest(&hdf)?;
    let structure = sandbox.join(HDF5_STRUCT_OUT);
    let struct_digest = if structure.is_file() { Some(file_digest(&structure)?) } else { None };

    let hdf_name = names.hdf4();
    let full_path = storage.locate(&hdf_name);
    if let Some(known) = store.find_artifact_by_path(&full_path)? {
        if known.parameter_set_id != job.parameter_set_id {
            warn!(
                "{full_path} is registered for parameter set {}, job {} has parameter set {}",
                known.parameter_set_id, job.id, job.parameter_set_id
            );
        }
    }

    let record = OutputArtifactRecord {
        job_id: job.id,
        executable_id: job.executable_id,
        parameter_set_id: job.parameter_set_id,
        model_id: job.model_id,
        file_name: ResultNames::file_name(&hdf_name).to_string(),
        full_path,
        sha256_sum: digest.sha256,
        file_size: digest.size as i64,
        modification_time: digest.modified,
        struct_file_name: struct_digest.as_ref().map(|_| ResultNames::file_name(&names.hdf5_struct()).to_string()),
        struct_sha256_sum: struct_digest.as_ref().map(|d| d.sha256.clone()),
        struct_file_size: struct_digest.as_ref().map(|d| d.size as i64),
    };
    let stored = store.get_or_create(&record)?;
    if !stored.created {
        info!("Result of job {} already registered as artifact {}", job.job_name, stored.id);
    }
    Ok(Some(stored))
}

#[cfg(test)]
mod tests {
    use flate2::read::GzDecoder;

    use super::*;
    use crate::storage::LocalStorage;

    fn sandbox_with_results() -> Sandbox {
        let sandbox = Sandbox::create(false).unwrap();
        for dir in ["pdroutput", "Out"] {
            fs::create_dir_all(sandbox.join(dir)).unwrap();
        }
        fs::write(sandbox.join(TEXTOUT), "log").unwrap();
        fs::write(sandbox.join(HDF4_OUT), "hdf").unwrap();
        fs::write(sandbox.join(HDF5_STRUCT_OUT), "struct").unwrap();
        fs::write(sandbox.join("Out/line.dat"), "mrt").unwrap();
        fs::write(sandbox.join(FLAT_INPUT), "input").unwrap();
        fs::write(sandbox.join(CTRL_IND), "ctrl").unwrap();
        sandbox
    }

    #[test]
    fn primary_results_get_job_names() {
        let sandbox = sandbox_with_results();
        let model = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(model.path()).unwrap();
        let names = ResultNames::new("0100_30_10_20_00");

        let paths = store_primary(&sandbox, &names, &storage).unwrap();
        assert_eq!(paths.output_hdf4_file, Some(storage.locate("pdrgrid/pdr0100_30_10_20_00.hdf")));
        assert_eq!(paths.log_file, paths.output_textout_file);
        assert!(paths.output_hdf5_chem_file.is_none());
        assert!(paths.input_json_file.is_none());
        assert!(storage.file_exists("pdrgrid/CTRL_IND0100_30_10_20_00"));

        let archive = File::open(model.path().join("pdrgrid/MCDRT0100_30_10_20_00.tar.gz")).unwrap();
        let mut entries = tar::Archive::new(GzDecoder::new(archive));
        let listed: Vec<String> = entries
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(listed.iter().any(|p| p == "Out/line.dat"));
    }

    #[test]
    fn stored_results_come_back() {
        let first = sandbox_with_results();
        let model = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(model.path()).unwrap();
        let names = ResultNames::new("0100_30_10_20_00");
        store_primary(&first, &names, &storage).unwrap();

        let second = Sandbox::create(false).unwrap();
        fs::create_dir_all(second.join("pdroutput")).unwrap();
        let paths = restore_existing(&second, &names, &storage).unwrap();
        assert_eq!(fs::read_to_string(second.join(HDF5_STRUCT_OUT)).unwrap(), "struct");
        assert_eq!(fs::read_to_string(second.join(CTRL_IND)).unwrap(), "ctrl");
        assert!(paths.output_mcdrt_zip_file.is_some());
        assert!(paths.output_chemchk_file.is_none());
    }
}
