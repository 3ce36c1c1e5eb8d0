use std::io;
use std::path::{Path, PathBuf};

use log::info;
use tempfile::TempDir;

/// Installation directories copied into every sandbox
pub const INPUT_DIRS: [&str; 4] = ["pdrinpdata", "onioninpdata", "In", "templates"];

/// Directories the programs write into
pub const OUTPUT_DIRS: [&str; 3] = ["pdroutput", "onionoutput", "Out"];

/// Where templates are looked for, relative to the sandbox or the installation
pub const TEMPLATE_DIRS: [&str; 3] = ["templates", "pdrinpdata/templates", "."];

/// Result directory of the PDR program, below the model directory
pub const PRIMARY_DIR: &str = "pdrgrid";

/// Result directory of the onion post-processor, below the model directory
pub const ONION_DIR: &str = "oniongrid";

pub const FLAT_INPUT: &str = "PDRNEW.INP";
pub const JSON_INPUT: &str = "pdr_config.json";
pub const GRID_PARAM: &str = "GRID_PARAM";
pub const CTRL_IND: &str = "CTRL_IND";
pub const TEXTOUT: &str = "pdroutput/TEXTOUT";
pub const HDF4_OUT: &str = "pdroutput/pdrout.hdf";
pub const HDF5_STRUCT_OUT: &str = "pdroutput/pdrstruct_s.hdf5";
pub const HDF5_CHEM_OUT: &str = "pdroutput/pdrchem_c.hdf5";
pub const CHEMCHK_OUT: &str = "pdroutput/chemchk.out";
pub const MRT_DIR: &str = "Out";

/// Private working directory of one job, removed when dropped unless kept
pub struct Sandbox {
    dir: TempDir,
    keep: bool,
}

impl Sandbox {
    pub fn create(keep: bool) -> io::Result<Sandbox> {
        let dir = tempfile::Builder::new().prefix("pdr-").disable_cleanup(keep).tempdir()?;
        info!("Created sandbox {}", dir.path().display());
        Ok(Sandbox { dir, keep })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        self.dir.path().join(relative)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.keep {
            info!("Keeping sandbox {}", self.dir.path().display());
        } else {
            info!("Removing sandbox {}", self.dir.path().display());
        }
    }
}

/// Storage names of a job's results, all derived from the job name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultNames {
    name: String,
}

impl ResultNames {
    pub fn new(job_name: &str) -> ResultNames {
        ResultNames { name: job_name.to_string() }
    }

    fn primary(&self, prefix: &str, suffix: &str) -> String {
        format!("{PRIMARY_DIR}/{prefix}{}{suffix}", self.name)
    }

    pub fn textout(&self) -> String {
        self.primary("TEXTOUT", "")
    }

    pub fn hdf4(&self) -> String {
        self.primary("pdr", ".hdf")
    }

    pub fn hdf5_struct(&self) -> String {
        self.primary("pdrstruct", ".hdf5")
    }

    pub fn hdf5_chem(&self) -> String {
        self.primary("pdrchem", ".hdf5")
    }

    pub fn chemchk(&self) -> String {
        self.primary("chemchk", ".out")
    }

    pub fn mcdrt(&self) -> String {
        self.primary("MCDRT", ".tar.gz")
    }

    pub fn pdrnew(&self) -> String {
        self.primary("PDRNEW", ".INP")
    }

    pub fn json_input(&self) -> String {
        self.primary("pdr_config", ".json")
    }

    pub fn ctrl_ind(&self) -> String {
        self.primary("CTRL_IND", "")
    }

    /// `file` is an onion output such as `jerg_CO.smli`
    pub fn onion(&self, file: &str) -> String {
        format!("{ONION_DIR}/ONION{}.{file}", self.name)
    }

    pub fn onion_textout(&self, species: &str) -> String {
        format!("{ONION_DIR}/TEXTOUT{}_{species}", self.name)
    }

    /// File name part of a storage name
    pub fn file_name(remote: &str) -> &str {
        remote.rsplit('/').next().unwrap_or(remote)
    }
}
