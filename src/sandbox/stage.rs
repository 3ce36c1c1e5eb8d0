use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::PdrConfig;
use crate::format::InputFormat;
use crate::parameters::ParameterSet;
use crate::sandbox::layout::{Sandbox, FLAT_INPUT, GRID_PARAM, INPUT_DIRS, JSON_INPUT, OUTPUT_DIRS, TEMPLATE_DIRS};
use crate::sandbox::{io_at, SandboxError};
use crate::template::{locate_template, render_grid_param, render_json, render_text, Placeholders, TemplateError};

/// Programs and templates linked into a sandbox
#[derive(Debug, Default)]
pub struct Staged {
    pub pdr: PathBuf,
    pub onion: Option<PathBuf>,
    pub getctrlind: Option<PathBuf>,
    pub mrt: Option<PathBuf>,
    pub flat_template: Option<PathBuf>,
    pub json_template: Option<PathBuf>,
}

/// Recursively copy `from` into `to`
pub fn copy_tree(from: &Path, to: &Path) -> Result<(), SandboxError> {
    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(|e| SandboxError::Io { path: from.to_path_buf(), source: e.into() })?;
        let Ok(relative) = entry.path().strip_prefix(from) else { continue };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_at(&target))?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_at(&target))?;
        }
    }
    Ok(())
}

/// Symlink `target` to `source`, copying when links are unavailable
pub fn link_or_copy(source: &Path, target: &Path) -> Result<(), SandboxError> {
    if target.symlink_metadata().is_ok() {
        fs::remove_file(target).map_err(io_at(target))?;
    }
    #[cfg(unix)]
    {
        match std::os::unix::fs::symlink(source, target) {
            Ok(()) => return Ok(()),
            Err(e) => debug!("Can't link {}: {e}, copying", target.display()),
        }
    }
    fs::copy(source, target).map_err(io_at(target))?;
    Ok(())
}

fn link_program(sandbox: &Sandbox, source: &Path) -> Result<PathBuf, SandboxError> {
    let name = source.file_name().ok_or_else(|| SandboxError::MissingExecutable(source.to_path_buf()))?;
    let target = sandbox.join(name);
    link_or_copy(source, &target)?;
    Ok(target)
}

fn link_optional(sandbox: &Sandbox, source: PathBuf, role: &str) -> Result<Option<PathBuf>, SandboxError> {
    if source.is_file() {
        link_program(sandbox, &source).map(Some)
    } else {
        warn!("No {role} program at {}", source.display());
        Ok(None)
    }
}

/// First match for a template in the sandbox, then in the installation
fn find_template(sandbox: &Sandbox, install: &Path, name: &str) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = TEMPLATE_DIRS
        .iter()
        .map(|d| sandbox.join(d))
        .chain(TEMPLATE_DIRS.iter().map(|d| install.join(d)))
        .collect();
    locate_template(name, &dirs).ok()
}

fn link_template(sandbox: &Sandbox, found: Option<PathBuf>, name: &str) -> Result<Option<PathBuf>, SandboxError> {
    let Some(found) = found else { return Ok(None) };
    let target = sandbox.join(name);
    if found != target {
        link_or_copy(&found, &target)?;
    }
    Ok(Some(target))
}

/// Lay out a sandbox: output directories, copies of the installation's
/// input directories, links to the programs, chemistry and templates
pub fn stage(
    sandbox: &Sandbox,
    pdr: &PdrConfig,
    executable: &Path,
    json_override: Option<&Path>,
) -> Result<Staged, SandboxError> {
    for dir in OUTPUT_DIRS {
        let path = sandbox.join(dir);
        fs::create_dir_all(&path).map_err(io_at(&path))?;
    }
    for dir in INPUT_DIRS {
        let source = pdr.base_dir.join(dir);
        if source.is_dir() {
            copy_tree(&source, &sandbox.join(dir))?;
        } else {
            debug!("No {dir} in {}", pdr.base_dir.display());
        }
    }

    if !executable.is_file() {
        return Err(SandboxError::MissingExecutable(executable.to_path_buf()));
    }
    let mut staged = Staged { pdr: link_program(sandbox, executable)?, ..Staged::default() };
    staged.onion = link_optional(sandbox, pdr.install_path(&pdr.onion_file_name), "onion")?;
    staged.getctrlind = link_optional(sandbox, pdr.install_path(&pdr.getctrlind_file_name), "getctrlind")?;
    staged.mrt = link_optional(sandbox, pdr.install_path(&pdr.mrt_file_name), "mrt")?;

    let chemistry = pdr.chem_database_path();
    if chemistry.is_file() {
        let inpdata = sandbox.join("pdrinpdata");
        fs::create_dir_all(&inpdata).map_err(io_at(&inpdata))?;
        link_or_copy(&chemistry, &inpdata.join("chem_rates.dat"))?;
    } else {
        warn!("Chemical database {} not found", chemistry.display());
    }

    let flat = find_template(sandbox, &pdr.base_dir, &pdr.pdrinp_template_file);
    staged.flat_template = link_template(sandbox, flat, &pdr.pdrinp_template_file)?;
    let json = match json_override {
        Some(path) if path.is_file() => {
            info!("Using JSON template {}", path.display());
            Some(path.to_path_buf())
        }
        Some(path) => {
            return Err(TemplateError::NotFound { name: path.display().to_string(), searched: Vec::new() }.into())
        }
        None => find_template(sandbox, &pdr.base_dir, &pdr.json_template_file),
    };
    staged.json_template = link_template(sandbox, json, &pdr.json_template_file)?;

    info!("Staged sandbox {}", sandbox.path().display());
    Ok(staged)
}

fn missing(format: InputFormat, active: InputFormat, name: &str, searched: Vec<PathBuf>) -> Result<(), SandboxError> {
    if format == active {
        Err(TemplateError::NotFound { name: name.to_string(), searched }.into())
    } else {
        warn!("No {format} template {name}, not writing that input");
        Ok(())
    }
}

/// Write `PDRNEW.INP`, `pdr_config.json` and `GRID_PARAM` for a parameter set
pub fn render_inputs(
    sandbox: &Sandbox,
    staged: &Staged,
    pdr: &PdrConfig,
    params: &ParameterSet,
) -> Result<(), SandboxError> {
    let placeholders = Placeholders::from_parameter_set(params);
    let searched: Vec<PathBuf> = TEMPLATE_DIRS.iter().map(|d| sandbox.join(d)).collect();

    match &staged.flat_template {
        Some(path) => {
            let template = fs::read_to_string(path).map_err(io_at(path))?;
            let rendered = render_text(FLAT_INPUT, &template, &placeholders);
            let target = sandbox.join(FLAT_INPUT);
            fs::write(&target, rendered.output).map_err(io_at(&target))?;
            info!("Wrote {FLAT_INPUT}");
        }
        None => missing(InputFormat::Legacy, pdr.input_format, &pdr.pdrinp_template_file, searched.clone())?,
    }

    match &staged.json_template {
        Some(path) => {
            let template = fs::read_to_string(path).map_err(io_at(path))?;
            let rendered = render_json(JSON_INPUT, &template, &placeholders)?;
            let target = sandbox.join(JSON_INPUT);
            let text = serde_json::to_string_pretty(&rendered.output).map_err(TemplateError::from)?;
            fs::write(&target, text).map_err(io_at(&target))?;
            info!("Wrote {JSON_INPUT}");
        }
        None => missing(InputFormat::Json, pdr.input_format, &pdr.json_template_file, searched)?,
    }

    let grid_param = render_grid_param(&params.codes())?;
    let target = sandbox.join(GRID_PARAM);
    fs::write(&target, grid_param).map_err(io_at(&target))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_parameters;
    use crate::grid::{generate, GridSpec};

    fn params() -> ParameterSet {
        let spec = GridSpec::from_value(&default_parameters()).unwrap();
        let point = generate(&spec).unwrap().remove(0);
        ParameterSet::from_point(&point, &spec).unwrap()
    }

    fn install() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        fs::create_dir_all(base.join("pdrinpdata/templates")).unwrap();
        fs::create_dir_all(base.join("onioninpdata")).unwrap();
        fs::write(base.join("pdrinpdata/templates/PDRNEW.INP.template"), "XNSUR KT_VARxnsur_\nKT_VARspecies_\n").unwrap();
        fs::write(base.join("onioninpdata/ONION3.INP.CO"), "co").unwrap();
        fs::write(base.join("pdrinpdata/chem_rates_2022-10-21-ERS.dat"), "rates").unwrap();
        fs::write(base.join("mockpdr"), "#!/bin/sh\n").unwrap();
        root
    }

    #[test]
    fn copies_inputs_and_links_programs() {
        let root = install();
        let pdr = PdrConfig { base_dir: root.path().to_path_buf(), ..PdrConfig::default() };
        let sandbox = Sandbox::create(false).unwrap();
        let staged = stage(&sandbox, &pdr, &root.path().join("mockpdr"), None).unwrap();

        for dir in OUTPUT_DIRS {
            assert!(sandbox.join(dir).is_dir());
        }
        assert!(sandbox.join("onioninpdata/ONION3.INP.CO").is_file());
        assert_eq!(fs::read_to_string(sandbox.join("pdrinpdata/chem_rates.dat")).unwrap(), "rates");
        assert_eq!(staged.pdr, sandbox.join("mockpdr"));
        assert!(staged.onion.is_none());
        // the sandbox copy wins over the installation
        assert_eq!(staged.flat_template, Some(sandbox.join("PDRNEW.INP.template")));
        assert!(staged.json_template.is_none());
    }

    #[test]
    fn missing_program_is_an_error() {
        let root = install();
        let pdr = PdrConfig { base_dir: root.path().to_path_buf(), ..PdrConfig::default() };
        let sandbox = Sandbox::create(false).unwrap();
        let err = stage(&sandbox, &pdr, &root.path().join("nopdr"), None).unwrap_err();
        assert!(matches!(err, SandboxError::MissingExecutable(_)));
    }

    #[test]
    fn renders_active_format_and_tolerates_the_other() {
        let root = install();
        let pdr = PdrConfig { base_dir: root.path().to_path_buf(), ..PdrConfig::default() };
        let sandbox = Sandbox::create(false).unwrap();
        let staged = stage(&sandbox, &pdr, &root.path().join("mockpdr"), None).unwrap();
        let params = params();
        render_inputs(&sandbox, &staged, &pdr, &params).unwrap();
        let input = fs::read_to_string(sandbox.join(FLAT_INPUT)).unwrap();
        assert!(input.starts_with("XNSUR "));
        assert!(input.contains("SPECIES  "));
        assert!(!sandbox.join(JSON_INPUT).exists());
        assert_eq!(fs::read_to_string(sandbox.join(GRID_PARAM)).unwrap().lines().count(), 6);

        let json_only = PdrConfig { input_format: InputFormat::Json, ..pdr };
        let err = render_inputs(&sandbox, &staged, &json_only, &params).unwrap_err();
        assert!(matches!(err, SandboxError::Template(TemplateError::NotFound { .. })));
    }

    #[test]
    fn user_json_template_replaces_located_one() {
        let root = install();
        let own = root.path().join("mine.json");
        fs::write(&own, r#"{"density": "${xnsur}"}"#).unwrap();
        let pdr = PdrConfig { base_dir: root.path().to_path_buf(), input_format: InputFormat::Json, ..PdrConfig::default() };
        let sandbox = Sandbox::create(false).unwrap();
        let staged = stage(&sandbox, &pdr, &root.path().join("mockpdr"), Some(&own)).unwrap();
        render_inputs(&sandbox, &staged, &pdr, &params()).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(sandbox.join(JSON_INPUT)).unwrap()).unwrap();
        assert!(written["density"].is_number());
    }
}
