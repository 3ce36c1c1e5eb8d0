//! Input file rendering.
//!
//! Templates name their parameters either as `${name}` or as
//! `KT_VAR<name>_`. A [`Placeholders`] table maps names to typed values and is
//! applied by [`render_text`] for the flat `PDRNEW.INP` format or by
//! [`render_json`] for the structured JSON format.

mod files;
mod render;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::parameters::{ParamValue, ParameterSet};

pub use files::{render_banner, render_grid_param};
pub use render::{format_json_number, format_scientific, render_json, render_text, Rendered};

pub const PLACEHOLDER_PREFIX: &str = "KT_VAR";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template {name} not found in {}", searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotFound { name: String, searched: Vec<PathBuf> },
    #[error("template is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("can't render template {name}: {reason}")]
    Render { name: String, reason: String },
}

/// A typed template value
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderValue {
    Int(i64),
    Float(f64),
    Text(String),
    /// rendered as one `SPECIES` line per entry
    Species(Vec<String>),
    /// rendered as the `*MODEL GRID` marker when set
    Flag(bool),
}

impl From<&ParamValue> for PlaceholderValue {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Int(i) => PlaceholderValue::Int(*i),
            ParamValue::Float(x) => PlaceholderValue::Float(*x),
            ParamValue::Text(s) => PlaceholderValue::Text(s.clone()),
        }
    }
}

/// Placeholder name to value table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placeholders {
    values: BTreeMap<String, PlaceholderValue>,
}

impl Placeholders {
    pub fn new() -> Placeholders {
        Placeholders::default()
    }

    pub fn from_parameter_set(params: &ParameterSet) -> Placeholders {
        let mut table = Placeholders::new();
        for (name, value) in [
            ("xnsur", params.xnsur),
            ("mass", params.mass),
            ("rtot", params.rtot),
            ("rcore", params.rcore),
            ("alpha", params.alpha),
            ("sint", params.sint),
            ("zmetal", params.zmetal),
            ("preshh2", params.preshh2),
        ] {
            table.insert(name, PlaceholderValue::Float(value));
        }
        table.insert(
            "species",
            PlaceholderValue::Species(params.species.split_whitespace().map(str::to_string).collect()),
        );
        table.insert("grid", PlaceholderValue::Flag(params.grid));
        for (name, value) in &params.secondary {
            table.insert(name, PlaceholderValue::from(value));
        }
        debug!("Placeholder table holds {} values", table.len());
        table
    }

    pub fn insert(&mut self, name: &str, value: PlaceholderValue) -> &mut Placeholders {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PlaceholderValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries with longer names first, so no name is replaced inside a longer one
    fn by_length(&self) -> Vec<(&String, &PlaceholderValue)> {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

/// Both spellings of a placeholder
pub fn spellings(name: &str) -> [String; 2] {
    [format!("${{{name}}}"), format!("{PLACEHOLDER_PREFIX}{name}_")]
}

/// Find `name` in the first of `dirs` that has it
pub fn locate_template(name: &str, dirs: &[PathBuf]) -> Result<PathBuf, TemplateError> {
    for dir in dirs {
        let candidate = dir.join(name);
        if candidate.is_file() {
            debug!("Found template {}", candidate.display());
            return Ok(candidate);
        }
    }
    Err(TemplateError::NotFound { name: name.to_string(), searched: dirs.to_vec() })
}

/// `locate_template` for a single directory
pub fn template_in(dir: &Path, name: &str) -> Option<PathBuf> {
    locate_template(name, &[dir.to_path_buf()]).ok()
}
