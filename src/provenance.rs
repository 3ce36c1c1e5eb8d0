//! Where results came from: content digests of executables and output files,
//! and the revision and build date an executable reports about itself.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::PdrConfig;
use crate::db::model::ExecutableRecord;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("can't read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Content digest and size of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub sha256: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Hex SHA-256 of a file's content
pub fn sha256_file(path: &Path) -> Result<String, ProvenanceError> {
    Ok(file_digest(path)?.sha256)
}

pub fn file_digest(path: &Path) -> Result<FileDigest, ProvenanceError> {
    let failed = |source| ProvenanceError::Io { path: path.to_path_buf(), source };
    let mut file = File::open(path).map_err(failed)?;
    let metadata = file.metadata().map_err(failed)?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).map_err(failed)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(FileDigest {
        sha256: hex::encode(hasher.finalize()),
        size: metadata.len(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    })
}

/// Revision reported in `--version` output.
///
/// Tried in order: a `Revision:` line, the word following `revision`
/// anywhere, the last word of the second to last line.
pub fn parse_revision(output: &str) -> Option<String> {
    for line in output.lines() {
        if line.to_lowercase().contains("revision:") {
            if let Some((_, rest)) = line.split_once(':') {
                let revision = rest.trim();
                if !revision.is_empty() {
                    return Some(revision.to_string());
                }
            }
        }
    }

    let lower = output.to_lowercase();
    if let Some(at) = lower.find("revision") {
        let rest = lower.get(at + "revision".len()..).unwrap_or_default();
        if let Some(word) = rest.split_whitespace().next() {
            return Some(word.to_string());
        }
    }

    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() > 1 {
        return lines[lines.len() - 2].split_whitespace().last().map(str::to_string);
    }
    None
}

/// Build date from the last line of `--version` output,
/// `Binary compiled the Mar 14 2023 at 10:15:00`
pub fn parse_compilation_date(output: &str) -> Option<NaiveDateTime> {
    let last = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let date = last.strip_prefix("Binary compiled the").unwrap_or(last);
    let normalized = date.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %Y at %H:%M:%S").ok()
}

/// Stdout of `<exe> --version`, `None` when it can't be run
pub fn version_output(exe: &Path) -> Option<String> {
    match Command::new(exe).arg("--version").output() {
        Ok(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        Err(e) => {
            warn!("Can't run {} --version: {e}", exe.display());
            None
        }
    }
}

fn configured_date(pdr: &PdrConfig) -> Option<DateTime<Utc>> {
    match NaiveDate::parse_from_str(&pdr.compilation_date, "%Y-%m-%d") {
        Ok(date) => date.and_hms_opt(0, 0, 0).map(|d| d.and_utc()),
        Err(e) => {
            warn!("Configured compilation date '{}' is not YYYY-MM-DD: {e}", pdr.compilation_date);
            None
        }
    }
}

/// Describe the executable at `path`, falling back to the configured
/// revision and build date for what it doesn't report
pub fn executable_record(path: &Path, pdr: &PdrConfig) -> Result<ExecutableRecord, ProvenanceError> {
    let sha256_sum = sha256_file(path)?;
    let output = version_output(path);

    let code_revision = output.as_deref().and_then(parse_revision).unwrap_or_else(|| {
        warn!("No revision reported by {}, using '{}'", path.display(), pdr.exe_revision);
        pdr.exe_revision.clone()
    });
    let compilation_date = output
        .as_deref()
        .and_then(parse_compilation_date)
        .map(|d| d.and_utc())
        .or_else(|| configured_date(pdr));

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    info!("Executable {file_name}: revision {code_revision}, sha256 {sha256_sum}");

    Ok(ExecutableRecord {
        file_name,
        full_path: path.to_string_lossy().into_owned(),
        sha256_sum,
        code_revision: Some(code_revision),
        compilation_date,
    })
}
