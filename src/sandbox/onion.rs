use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{error, info, warn};

use crate::sandbox::execute::{self, Exit, Invocation};
use crate::sandbox::layout::{ResultNames, Sandbox, CTRL_IND, HDF4_OUT, HDF5_STRUCT_OUT};
use crate::sandbox::stage::{link_or_copy, Staged};
use crate::sandbox::{io_at, SandboxError};
use crate::storage::Storage;

const ONION_LOG: &str = "onionoutput/TEXTOUT";

/// Files onion writes for one species
pub fn output_files(species: &str) -> [String; 6] {
    [
        format!("jerg_{species}.smli"),
        format!("jerg_{species}.srli"),
        format!("jtemp_{species}.smli"),
        format!("jtemp_{species}.smlc"),
        format!("linebt_{species}.out"),
        format!("ONION3_{species}.OUT"),
    ]
}

/// Remove what a previous species left and put this species' input in place
fn prepare(sandbox: &Sandbox, species: &str) -> Result<(), SandboxError> {
    for file in output_files(species) {
        let path = sandbox.join("onionoutput").join(file);
        if path.exists() {
            fs::remove_file(&path).map_err(io_at(&path))?;
        }
    }
    let log = sandbox.join(ONION_LOG);
    if log.exists() {
        fs::remove_file(&log).map_err(io_at(&log))?;
    }
    let input = sandbox.join("onioninpdata").join(format!("ONION3.INP.{species}"));
    let target = sandbox.join("ONION3.INP");
    fs::copy(&input, &target).map_err(io_at(&input))?;

    for (from, to) in [(HDF4_OUT, "pdrout.hdf"), (HDF5_STRUCT_OUT, "pdrstruct_s.hdf5")] {
        let source = sandbox.join(from);
        if source.is_file() {
            link_or_copy(&source, &sandbox.join(to))?;
        } else {
            warn!("No {from} for onion");
        }
    }
    Ok(())
}

fn ensure_ctrl_ind(sandbox: &Sandbox, staged: &Staged, timeout: Option<Duration>) -> Result<(), SandboxError> {
    if sandbox.join(CTRL_IND).exists() {
        return Ok(());
    }
    let Some(getctrlind) = &staged.getctrlind else {
        warn!("No {CTRL_IND} and no getctrlind program to make one");
        return Ok(());
    };
    let log = sandbox.join(ONION_LOG);
    let invocation = Invocation { program: getctrlind, args: &["pdrout.hdf"], working_dir: sandbox.path(), log: &log, timeout };
    match execute::run(&invocation).map_err(io_at(getctrlind))?.0 {
        Exit::Success => info!("{CTRL_IND} created"),
        other => error!("Couldn't create {CTRL_IND}: {other:?}"),
    }
    Ok(())
}

fn store_outputs(sandbox: &Sandbox, species: &str, names: &ResultNames, storage: &dyn Storage) -> Result<usize, SandboxError> {
    let mut stored = 0;
    for file in output_files(species) {
        let path = sandbox.join("onionoutput").join(&file);
        if path.is_file() {
            storage.store_file(&path, &names.onion(&file))?;
            stored += 1;
        }
    }
    let log = sandbox.join(ONION_LOG);
    if log.is_file() {
        storage.store_file(&log, &names.onion_textout(species))?;
    }
    Ok(stored)
}

/// Run onion for one species and store its outputs
pub fn run_species(
    sandbox: &Sandbox,
    staged: &Staged,
    onion: &Path,
    species: &str,
    names: &ResultNames,
    storage: &dyn Storage,
    timeout: Option<Duration>,
) -> Result<Exit, SandboxError> {
    prepare(sandbox, species)?;
    ensure_ctrl_ind(sandbox, staged, timeout)?;

    let log = sandbox.join(ONION_LOG);
    execute::log_line(&log, &format!("Running onion for {species}")).map_err(io_at(&log))?;
    let invocation = Invocation { program: onion, args: &["pdrout.hdf"], working_dir: sandbox.path(), log: &log, timeout };
    let (exit, _) = execute::run(&invocation).map_err(io_at(onion))?;

    let stored = store_outputs(sandbox, species, names, storage)?;
    info!("Onion for {species}: {exit:?}, stored {stored} files");
    Ok(exit)
}

/// Run onion for every species. Failures are reported per species and
/// never stop the others.
pub fn run_onion(
    sandbox: &Sandbox,
    staged: &Staged,
    species: &[String],
    names: &ResultNames,
    storage: &dyn Storage,
    timeout: Option<Duration>,
) -> Vec<String> {
    let Some(onion) = &staged.onion else {
        if !species.is_empty() {
            warn!("No onion program, skipping {} species", species.len());
        }
        return Vec::new();
    };
    species
        .iter()
        .map(|s| match run_species(sandbox, staged, onion, s, names, storage, timeout) {
            Ok(Exit::Success) => format!("onion {s}: done"),
            Ok(exit) => {
                warn!("Onion for {s} ended with {exit:?}");
                format!("onion {s}: {exit:?}")
            }
            Err(e) => {
                error!("Onion for {s} failed: {e}");
                format!("onion {s}: failed: {e}")
            }
        })
        .collect()
}
