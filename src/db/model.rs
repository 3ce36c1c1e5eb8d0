//! Row types stored with [`Session::get_or_create`](crate::db::Session::get_or_create).

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;

use crate::db::entity::{text, Record};
use crate::parameters::ParameterSet;

/// Timestamps are stored as RFC 3339 text
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.with_timezone(&Utc))
}

/// A named grid run and the directory holding its results
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    pub name: String,
    pub output_path: String,
    pub description: Option<String>,
}

impl Record for ModelRecord {
    const TABLE: &'static str = "models";
    const ENTITY: &'static str = "model";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::Text(self.name.clone())),
            ("output_path", Value::Text(self.output_path.clone())),
            ("description", text(self.description.as_deref())),
        ]
    }

    fn natural_key(&self) -> Vec<(&'static str, Value)> {
        self.columns().into_iter().take(2).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub email: Option<String>,
}

impl Record for UserRecord {
    const TABLE: &'static str = "users";
    const ENTITY: &'static str = "user";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("username", Value::Text(self.username.clone())),
            ("email", text(self.email.as_deref())),
        ]
    }
}

/// A PDR program binary, identified by content
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableRecord {
    pub file_name: String,
    pub full_path: String,
    pub sha256_sum: String,
    pub code_revision: Option<String>,
    pub compilation_date: Option<DateTime<Utc>>,
}

impl Record for ExecutableRecord {
    const TABLE: &'static str = "executables";
    const ENTITY: &'static str = "executable";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("sha256_sum", Value::Text(self.sha256_sum.clone())),
            ("file_name", Value::Text(self.file_name.clone())),
            ("code_revision", text(self.code_revision.as_deref())),
            ("full_path", Value::Text(self.full_path.clone())),
            ("compilation_date", text(self.compilation_date.as_ref().map(timestamp).as_deref())),
        ]
    }

    fn natural_key(&self) -> Vec<(&'static str, Value)> {
        self.columns().into_iter().take(3).collect()
    }
}

/// Chemical reaction rate file
#[derive(Debug, Clone, PartialEq)]
pub struct ChemicalDatabaseRecord {
    pub file_name: String,
    pub full_path: String,
    pub origin: Option<String>,
}

impl Record for ChemicalDatabaseRecord {
    const TABLE: &'static str = "chemical_databases";
    const ENTITY: &'static str = "chemical database";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("file_name", Value::Text(self.file_name.clone())),
            ("full_path", Value::Text(self.full_path.clone())),
            ("origin", text(self.origin.as_deref())),
        ]
    }
}

/// A [`ParameterSet`] owned by a model
#[derive(Debug, Clone, Copy)]
pub struct ParameterSetRecord<'a> {
    pub model_id: i64,
    pub params: &'a ParameterSet,
}

impl Record for ParameterSetRecord<'_> {
    const TABLE: &'static str = "parameter_sets";
    const ENTITY: &'static str = "parameter set";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        let p = self.params;
        vec![
            ("model_id", Value::Integer(self.model_id)),
            ("zmetal", Value::Real(p.zmetal)),
            ("xnsur", Value::Real(p.xnsur)),
            ("mass", Value::Real(p.mass)),
            ("rtot", Value::Real(p.rtot)),
            ("rcore", Value::Real(p.rcore)),
            ("alpha", Value::Real(p.alpha)),
            ("sint", Value::Real(p.sint)),
            ("preshh2", Value::Real(p.preshh2)),
            ("species", Value::Text(p.species.clone())),
            ("grid", Value::Integer(i64::from(p.grid))),
            ("secondary", Value::Text(p.secondary_json())),
        ]
    }
}

/// A job to be created in state `pending`
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub model_id: i64,
    pub job_name: String,
    pub user_id: i64,
    pub parameter_set_id: i64,
    pub executable_id: i64,
    pub chemical_database_id: i64,
    pub output_directory: String,
    pub output_hdf4_file: String,
    /// onion species, space separated
    pub onion_species: String,
}

impl Record for NewJob {
    const TABLE: &'static str = "jobs";
    const ENTITY: &'static str = "job";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        let mut columns = self.natural_key();
        columns.extend([
            ("output_directory", Value::Text(self.output_directory.clone())),
            ("output_hdf4_file", Value::Text(self.output_hdf4_file.clone())),
            ("onion_species", Value::Text(self.onion_species.clone())),
            ("status", Value::Text("pending".to_string())),
            ("pending", Value::Integer(1)),
            ("active", Value::Integer(0)),
        ]);
        columns
    }

    fn natural_key(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("model_id", Value::Integer(self.model_id)),
            ("job_name", Value::Text(self.job_name.clone())),
            ("user_id", Value::Integer(self.user_id)),
            ("parameter_set_id", Value::Integer(self.parameter_set_id)),
            ("executable_id", Value::Integer(self.executable_id)),
            ("chemical_database_id", Value::Integer(self.chemical_database_id)),
        ]
    }
}

/// A result file registered once per distinct content
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifactRecord {
    pub job_id: i64,
    pub executable_id: i64,
    pub parameter_set_id: i64,
    pub model_id: i64,
    pub file_name: String,
    pub full_path: String,
    pub sha256_sum: String,
    pub file_size: i64,
    pub modification_time: Option<DateTime<Utc>>,
    pub struct_file_name: Option<String>,
    pub struct_sha256_sum: Option<String>,
    pub struct_file_size: Option<i64>,
}

impl Record for OutputArtifactRecord {
    const TABLE: &'static str = "output_artifacts";
    const ENTITY: &'static str = "output artifact";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("sha256_sum", Value::Text(self.sha256_sum.clone())),
            ("job_id", Value::Integer(self.job_id)),
            ("executable_id", Value::Integer(self.executable_id)),
            ("parameter_set_id", Value::Integer(self.parameter_set_id)),
            ("model_id", Value::Integer(self.model_id)),
            ("file_name", Value::Text(self.file_name.clone())),
            ("full_path", Value::Text(self.full_path.clone())),
            ("file_size", Value::Integer(self.file_size)),
            ("modification_time", text(self.modification_time.as_ref().map(timestamp).as_deref())),
            ("struct_file_name", text(self.struct_file_name.as_deref())),
            ("struct_sha256_sum", text(self.struct_sha256_sum.as_deref())),
            ("struct_file_size", self.struct_file_size.map_or(Value::Null, Value::Integer)),
        ]
    }

    fn natural_key(&self) -> Vec<(&'static str, Value)> {
        self.columns().into_iter().take(1).collect()
    }
}
