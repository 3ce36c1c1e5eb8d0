//! Physical parameter vectors for a single simulation run.
//!
//! A [`ParameterSet`] is the primary vector derived from one grid point plus
//! the secondary model switches. Secondary values keep the exact names the
//! input templates use (`indStr`, `Xhtry`, ...), and are stored sorted so the
//! serialised form is canonical.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::grid::code::{decode, decode_log, encode, format_code};
use crate::grid::{GridError, GridPoint, GridSpec};

/// Scalar parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl ParamValue {
    fn from_json(key: &str, value: &Value) -> Result<ParamValue, GridError> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(ParamValue::Int(i)),
                None => n.as_f64().map(ParamValue::Float).ok_or_else(|| malformed(key, value)),
            },
            Value::Bool(b) => Ok(ParamValue::Int(i64::from(*b))),
            Value::String(s) => Ok(ParamValue::Text(s.clone())),
            Value::Array(items) => {
                let words: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                Ok(ParamValue::Text(words.join(" ")))
            }
            _ => Err(malformed(key, value)),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(x) => Some(*x),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn malformed(key: &str, value: &Value) -> GridError {
    GridError::Malformed {
        key: key.to_string(),
        reason: format!("unsupported value {value}"),
    }
}

/// Default secondary switches of the PDR code
pub fn secondary_defaults() -> BTreeMap<String, ParamValue> {
    use ParamValue::{Float as F, Int as I, Text as T};
    let table: Vec<(&str, ParamValue)> = vec![
        ("sigd", F(1.9e-21)),
        ("cosray", F(2.0e-16)),
        ("beta", F(-1.0)),
        ("preshco", F(0.0)),
        ("ifuvmeth", I(1)),
        ("idustmet", I(1)),
        ("ifuvtype", I(2)),
        ("fuvtemp", F(2.0e4)),
        ("fuvstring", T("Lyalpha.fuv".to_string())),
        ("inewgam", I(0)),
        ("iscatter", I(-1)),
        ("ihtclgas", I(1)),
        ("tgasc", F(50.0)),
        ("ihtcldust", I(1)),
        ("tdustc", F(20.0)),
        ("ipehmeth", I(1)),
        ("indXpeh", I(4)),
        ("ihtclpah", I(1)),
        ("indStr", I(1)),
        ("inds", I(4)),
        ("indx", I(7)),
        ("d2gratio1", F(8.27485e-3)),
        ("d2gratio2", F(2.27746e-3)),
        ("d2gratio3", F(3.75578e-4)),
        ("d2gratio4", F(3.75578e-4)),
        ("d2gratio5", F(0.0)),
        ("d2gratio6", F(0.0)),
        ("d2gratio7", F(0.0)),
        ("d2gratio8", F(0.0)),
        ("d2gratio9", F(0.0)),
        ("d2gratio10", F(0.0)),
        ("ih2meth", I(1)),
        ("ih2onpah", I(0)),
        ("h2formc", F(2.121e-17)),
        ("ih2shld", I(0)),
        ("h2_structure", I(0)),
        ("h2_h_coll_rates", I(3)),
        ("h2_h_reactive_colls", I(1)),
        ("h2_use_gbar", I(1)),
        ("h2_quad_a", I(1)),
        ("ifh2des", I(1)),
        ("ifcrdes", I(2)),
        ("ifphdes", I(1)),
        ("ifthdes", I(1)),
        ("bindsites", F(1.5e15)),
        ("ifchemheat", I(0)),
        ("ifheat_alfven", I(0)),
        ("alfven_velocity", F(3.3e5)),
        ("alfven_column", F(4.0e20)),
        ("temp_start", F(0.0)),
        ("itmeth", I(2)),
        ("ichemeth", I(0)),
        ("inewtonstep", I(1)),
        ("omega_neg", F(5.0)),
        ("omega_pos", F(2.0)),
        ("lambda", F(0.5)),
        ("use_conservation", I(1)),
        ("rescaleQF", I(0)),
        ("precondLR", I(0)),
        ("resortQF", I(0)),
        ("nconv_time", I(0)),
        ("time_dependent", I(0)),
        ("use_dlsodes", I(1)),
        ("use_dlsoda", I(0)),
        ("use_dvodpk", I(0)),
        ("first_time_step_yrs", F(1.0e-10)),
        ("max_time_yrs", F(1.0e7)),
        ("num_time_steps", I(0)),
        ("rtol_chem", F(1.0e-2)),
        ("atol_chem", F(1.0e-10)),
        ("Xhtry", F(1.0e6)),
        ("Niter", I(60)),
        ("rtol_iter", F(3.0e-2)),
        ("step1", F(100.0)),
        ("step2", F(200.0)),
        ("ihdfout", I(4)),
        ("dbglvl", I(0)),
        ("elfrac4", F(8.51e-2)),
        ("elfrac12", F(2.34e-4)),
        ("elfrac13", F(3.52e-6)),
        ("elfrac14", F(8.32e-5)),
        ("elfrac16", F(4.47e-4)),
        ("elfrac18", F(8.93e-7)),
        ("elfrac19", F(6.68e-9)),
        ("elfrac20", F(6.9e-5)),
        ("elfrac23", F(2.0e-7)),
        ("elfrac24", F(3.2e-6)),
        ("elfrac27", F(2.8e-6)),
        ("elfrac28", F(3.17e-6)),
        ("elfrac31", F(1.17e-7)),
        ("elfrac32", F(7.41e-6)),
        ("elfrac35", F(1.0e-7)),
        ("elfrac39", F(1.35e-7)),
        ("elfrac40", F(3.29e-6)),
        ("elfrac41", F(2.2e-6)),
        ("elfrac56", F(1.0e-6)),
    ];
    table.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Cloud mass in solar masses from total radius (cm) and surface density
pub fn compute_mass(rtot: f64, density: f64, alpha: f64, rcore: f64) -> f64 {
    let shell = 9.0 - 3.0 * alpha;
    8.41629e-58
        * ((12.0 * density * PI * rtot.powi(3)) / shell
            - (4.0 * density * PI * rtot.powi(3) * rcore.powf(3.0 - alpha) * alpha) / shell)
}

/// Cloud radius (cm) from mass in solar masses and surface density
pub fn compute_radius(mass: f64, density: f64, alpha: f64, rcore: f64) -> f64 {
    let shell = 9.0 - 3.0 * alpha;
    let profile = (12.0 * density * PI) / shell
        - (4.0 * density * PI * rcore.powf(3.0 - alpha) * alpha) / shell;
    1.05916e19 * (mass / profile).cbrt()
}

/// One complete, immutable parameter vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub zmetal: f64,
    pub xnsur: f64,
    pub mass: f64,
    pub rtot: f64,
    pub rcore: f64,
    pub alpha: f64,
    pub sint: f64,
    pub preshh2: f64,
    /// chemistry network, space separated
    pub species: String,
    pub grid: bool,
    pub secondary: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn from_point(point: &GridPoint, spec: &GridSpec) -> Result<ParameterSet, GridError> {
        let xnsur = decode(&point.density)?;
        let mass = decode(&point.mass)?;
        let mut params = ParameterSet {
            zmetal: decode_log(&point.metal)? * 0.01,
            xnsur,
            mass,
            rtot: compute_radius(mass, xnsur, spec.alpha, spec.rcore),
            rcore: spec.rcore,
            alpha: spec.alpha,
            sint: decode(&point.radiation)?,
            preshh2: decode(&point.column)?,
            species: spec.chemistry.clone(),
            grid: false,
            secondary: secondary_defaults(),
        };
        for (key, value) in &spec.non_default_parameters {
            params.apply_override(key, value)?;
        }
        Ok(params)
    }

    /// Override one value by name. Names match case-insensitively so that
    /// `indstr` in a configuration file reaches `indStr`.
    pub fn apply_override(&mut self, key: &str, value: &Value) -> Result<(), GridError> {
        let parsed = ParamValue::from_json(key, value)?;
        let number = || parsed.as_f64().ok_or_else(|| malformed(key, value));
        match key.to_ascii_lowercase().as_str() {
            "zmetal" => self.zmetal = number()?,
            "xnsur" => self.xnsur = number()?,
            "mass" => self.mass = number()?,
            "rtot" => self.rtot = number()?,
            "rcore" => self.rcore = number()?,
            "alpha" => self.alpha = number()?,
            "sint" => self.sint = number()?,
            "preshh2" => self.preshh2 = number()?,
            "grid" => self.grid = number()? != 0.0,
            "species" => self.species = parsed.to_string(),
            _ => {
                let name = self
                    .secondary
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case(key))
                    .cloned()
                    .unwrap_or_else(|| key.to_string());
                self.secondary.insert(name, parsed);
            }
        }
        Ok(())
    }

    /// The job name shared by every output file of this vector
    pub fn derived_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            format_code((100.0 * self.zmetal).round() as i64),
            encode(self.xnsur),
            encode(self.mass),
            encode(self.sint),
            encode(self.preshh2)
        )
    }

    /// Codes in `GRID_PARAM` order: metal, density, mass, radiation, column
    pub fn codes(&self) -> [String; 5] {
        let mut parts = self.derived_name().split('_').map(str::to_string).collect::<Vec<_>>();
        parts.resize(5, String::new());
        [
            parts[0].clone(),
            parts[1].clone(),
            parts[2].clone(),
            parts[3].clone(),
            parts[4].clone(),
        ]
    }

    /// Canonical JSON of the secondary values
    pub fn secondary_json(&self) -> String {
        serde_json::to_string(&self.secondary).unwrap_or_else(|_| "{}".to_string())
    }
}
