//! Parameter grid enumeration.
//!
//! A [`GridSpec`] is read from the `parameters` object of the run
//! configuration. [`generate`] turns it into the ordered list of
//! [`GridPoint`]s that become one ParameterSet and one Job each: either the
//! exhaustive Cartesian product of the declared lists or a random sample drawn
//! from the integer-log range they span.

pub mod code;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Column code used when a grid declares no H2 shielding column
pub const DEFAULT_COLUMN: &str = "00";
pub const DEFAULT_ALPHA: f64 = 1.5;
pub const DEFAULT_RCORE: f64 = 0.2;
pub const DEFAULT_RANDOM_MODELS: usize = 50;
pub const DEFAULT_RESERVED_CPUS: usize = 2;

/// Onion species computed when a grid names none
pub const DEFAULT_SPECIES: [&str; 11] = [
    "CO", "C+", "C", "O", "13C+", "13C", "13CO", "OH", "CH+", "HCO+", "H13CO+",
];

/// Chemistry network used when a grid names none
pub const DEFAULT_CHEMISTRY: &str = "HE+ HE H+ H2+ H3+ C CH C+ CH+ CH2+ CH2 CH3+ CH3 \
    CH4+ CH4 CH5+ CN CN+ HCN HCN+ CO CO+ HCO+ HCO CO2 CO2+ H2CO H2CO+ \
    13C 13CH 13CO 13C+ 13CH+ 13CH2+ 13CO+ H13CO+ N N2 N2+ N2H+ NO NO+ O \
    O+ OH OH+ H2O H2O+ H3O+ O2 O2+ 18O C18O 13C18O O18O O18O+ 18OH 18OH+ \
    H218O H218O+ H318O+ SO SO+ SO2 SO2+ HSO2+ S S+ SI SI+ SIH SIH+ \
    SIH2+ SIO SIO+ SIOH+ CH3OH+ CH3O CH3OH H2O2 JH JC JCH JCH2 JCH3 JCH4 \
    JCN JHCN JCO JHCO JCO2 JH2CO JCH3O JCH3OH JN JN2 JNO JO JOH JH2O \
    JH2O2 JO2 JSO JSO2 JS";

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("missing required grid parameter '{0}'")]
    MissingParameter(String),
    #[error("grid parameter '{0}' has no values")]
    EmptyParameter(String),
    #[error("grid parameter '{key}' is malformed: {reason}")]
    Malformed { key: String, reason: String },
    #[error("invalid parameter code '{0}'")]
    InvalidCode(String),
}

/// One combination of encoded grid values
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridPoint {
    pub metal: String,
    pub density: String,
    pub mass: String,
    pub radiation: String,
    pub column: String,
}

/// Validated grid configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub metal: Vec<String>,
    pub dens: Vec<String>,
    pub mass: Vec<String>,
    pub chi: Vec<String>,
    pub col: Vec<String>,
    pub species: Vec<String>,
    pub chemistry: String,
    pub alpha: f64,
    pub rcore: f64,
    pub non_default_parameters: Map<String, Value>,
    pub random: bool,
    pub random_count: usize,
    pub seed: Option<u64>,
    pub reserved_cpus: usize,
}

impl GridSpec {
    pub fn from_value(value: &Value) -> Result<GridSpec, GridError> {
        let params = value.as_object().ok_or_else(|| GridError::Malformed {
            key: "parameters".to_string(),
            reason: "expected an object".to_string(),
        })?;

        let col = match params.get("col") {
            Some(v) => codes("col", v)?,
            None => vec![DEFAULT_COLUMN.to_string()],
        };

        let species = match params.get("species") {
            Some(v) => string_list("species", v)?,
            None => DEFAULT_SPECIES.iter().map(|s| s.to_string()).collect(),
        };

        let chemistry = match params.get("chemistry") {
            Some(v) => string_list("chemistry", v)?.join(" "),
            None => DEFAULT_CHEMISTRY.split_whitespace().collect::<Vec<_>>().join(" "),
        };

        let non_default_parameters = match params.get("non_default_parameters") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => return Err(GridError::Malformed {
                key: "non_default_parameters".to_string(),
                reason: "expected an object".to_string(),
            }),
        };

        let spec = GridSpec {
            metal: required_codes(params, "metal")?,
            dens: required_codes(params, "dens")?,
            mass: required_codes(params, "mass")?,
            chi: required_codes(params, "chi")?,
            col,
            species,
            chemistry,
            alpha: number(params, "alpha")?.unwrap_or(DEFAULT_ALPHA),
            rcore: number(params, "rcore")?.unwrap_or(DEFAULT_RCORE),
            non_default_parameters,
            random: params.get("create_random_models").and_then(Value::as_bool).unwrap_or(false),
            random_count: unsigned(params, "random_model_num")?
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_RANDOM_MODELS),
            seed: unsigned(params, "seed")?,
            reserved_cpus: unsigned(params, "reserved_cpus")?
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_RESERVED_CPUS),
        };
        debug!("Parsed grid {:?}", spec);
        Ok(spec)
    }

    /// Number of points an exhaustive enumeration yields
    pub fn combinations(&self) -> usize {
        self.metal.len() * self.dens.len() * self.mass.len() * self.chi.len() * self.col.len()
    }

    /// Collapse every list to its first value
    pub fn first_only(&self) -> GridSpec {
        let first = |v: &Vec<String>| v.iter().take(1).cloned().collect::<Vec<_>>();
        GridSpec {
            metal: first(&self.metal),
            dens: first(&self.dens),
            mass: first(&self.mass),
            chi: first(&self.chi),
            col: first(&self.col),
            random: false,
            ..self.clone()
        }
    }
}

/// Enumerate the grid, exhaustively or by random sampling
pub fn generate(spec: &GridSpec) -> Result<Vec<GridPoint>, GridError> {
    let points = if spec.random {
        sample(spec)?
    } else {
        product(spec)
    };
    info!("Grid yields {} parameter combinations", points.len());
    Ok(points)
}

fn product(spec: &GridSpec) -> Vec<GridPoint> {
    let mut points = Vec::with_capacity(spec.combinations());
    for metal in &spec.metal {
        for density in &spec.dens {
            for mass in &spec.mass {
                for radiation in &spec.chi {
                    for column in &spec.col {
                        points.push(GridPoint {
                            metal: metal.clone(),
                            density: density.clone(),
                            mass: mass.clone(),
                            radiation: radiation.clone(),
                            column: column.clone(),
                        });
                    }
                }
            }
        }
    }
    points
}

fn sample(spec: &GridSpec) -> Result<Vec<GridPoint>, GridError> {
    let mut rng = match spec.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let n = spec.random_count;
    info!("Drawing {n} random models");

    let metal = draw(&spec.metal, n, &mut rng)?;
    let density = draw(&spec.dens, n, &mut rng)?;
    let mass = draw(&spec.mass, n, &mut rng)?;
    let radiation = draw(&spec.chi, n, &mut rng)?;
    let column = draw(&spec.col, n, &mut rng)?;

    Ok((0..n)
        .map(|i| GridPoint {
            metal: metal[i].clone(),
            density: density[i].clone(),
            mass: mass[i].clone(),
            radiation: radiation[i].clone(),
            column: column[i].clone(),
        })
        .collect())
}

/// Draw `n` codes from the inclusive integer range spanned by `values`
fn draw(values: &[String], n: usize, rng: &mut StdRng) -> Result<Vec<String>, GridError> {
    if values.len() == 1 {
        return Ok(vec![values[0].clone(); n]);
    }
    let mut low = i64::MAX;
    let mut high = i64::MIN;
    for value in values {
        let v = code::decode_log(value)?;
        low = low.min(v.floor() as i64);
        high = high.max(v.ceil() as i64);
    }
    Ok((0..n).map(|_| code::format_code(rng.random_range(low..=high))).collect())
}

fn required_codes(params: &Map<String, Value>, key: &str) -> Result<Vec<String>, GridError> {
    match params.get(key) {
        Some(v) => codes(key, v),
        None => Err(GridError::MissingParameter(key.to_string())),
    }
}

/// Read a list of codes, keeping numbers in their JSON textual form
fn codes(key: &str, value: &Value) -> Result<Vec<String>, GridError> {
    let items = match value {
        Value::Array(items) => items.clone(),
        Value::String(_) | Value::Number(_) => vec![value.clone()],
        _ => return Err(GridError::Malformed {
            key: key.to_string(),
            reason: "expected a list of codes".to_string(),
        }),
    };
    if items.is_empty() {
        return Err(GridError::EmptyParameter(key.to_string()));
    }
    items
        .iter()
        .map(|item| {
            let text = match item {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                other => return Err(GridError::InvalidCode(other.to_string())),
            };
            code::decode_log(&text)?;
            Ok(text)
        })
        .collect()
}

fn string_list(key: &str, value: &Value) -> Result<Vec<String>, GridError> {
    match value {
        Value::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(GridError::Malformed {
                    key: key.to_string(),
                    reason: format!("expected strings, found {other}"),
                }),
            })
            .collect(),
        _ => Err(GridError::Malformed {
            key: key.to_string(),
            reason: "expected a string or a list of strings".to_string(),
        }),
    }
}

fn number(params: &Map<String, Value>, key: &str) -> Result<Option<f64>, GridError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| GridError::Malformed {
            key: key.to_string(),
            reason: format!("'{s}' is not a number"),
        }),
        Some(other) => Err(GridError::Malformed {
            key: key.to_string(),
            reason: format!("'{other}' is not a number"),
        }),
    }
}

fn unsigned(params: &Map<String, Value>, key: &str) -> Result<Option<u64>, GridError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| GridError::Malformed {
            key: key.to_string(),
            reason: format!("'{v}' is not a non-negative integer"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn spec(value: Value) -> GridSpec {
        GridSpec::from_value(&value).unwrap()
    }

    #[test]
    fn missing_required_key_is_a_configuration_error() {
        let err = GridSpec::from_value(&json!({"metal": ["100"], "dens": ["30"], "mass": ["-10"]}));
        assert_eq!(err, Err(GridError::MissingParameter("chi".to_string())));
    }

    #[test]
    fn malformed_code_is_rejected() {
        let err = GridSpec::from_value(&json!({
            "metal": ["100"], "dens": ["3.0.1"], "mass": ["-10"], "chi": ["10"]
        }));
        assert_eq!(err, Err(GridError::InvalidCode("3.0.1".to_string())));
    }

    #[test]
    fn empty_list_is_rejected() {
        let err = GridSpec::from_value(&json!({
            "metal": [], "dens": ["30"], "mass": ["-10"], "chi": ["10"]
        }));
        assert_eq!(err, Err(GridError::EmptyParameter("metal".to_string())));
    }

    #[test]
    fn numbers_and_strings_are_both_accepted() {
        let s = spec(json!({"metal": [100], "dens": ["30", 40], "mass": [-10], "chi": ["10"]}));
        assert_eq!(s.dens, vec!["30", "40"]);
        assert_eq!(s.mass, vec!["-10"]);
        assert_eq!(s.col, vec!["00"]);
        assert_eq!(s.alpha, 1.5);
        assert_eq!(s.species.len(), DEFAULT_SPECIES.len());
    }

    #[test]
    fn exhaustive_grid_is_ordered_product() {
        let s = spec(json!({
            "metal": ["100"], "dens": ["30", "40"], "mass": ["-10"], "chi": ["10", "20"]
        }));
        let points = generate(&s).unwrap();
        let names: Vec<String> = points
            .iter()
            .map(|p| format!("{}_{}_{}_{}_{}", p.metal, p.density, p.mass, p.radiation, p.column))
            .collect();
        assert_eq!(names, vec![
            "100_30_-10_10_00",
            "100_30_-10_20_00",
            "100_40_-10_10_00",
            "100_40_-10_20_00",
        ]);
    }

    #[test]
    fn first_only_keeps_one_combination() {
        let s = spec(json!({
            "metal": ["100", "50"], "dens": ["30", "40"], "mass": ["-10", "0"], "chi": ["10", "20"],
            "create_random_models": true
        }));
        let single = s.first_only();
        assert_eq!(single.combinations(), 1);
        assert_eq!(generate(&single).unwrap()[0].density, "30");
    }

    #[test]
    fn single_element_lists_are_never_drawn() {
        let s = spec(json!({
            "metal": ["100"], "dens": ["30"], "mass": ["-10"], "chi": ["10"],
            "create_random_models": true, "random_model_num": 7
        }));
        let points = generate(&s).unwrap();
        assert_eq!(points.len(), 7);
        assert!(points.iter().all(|p| p.density == "30" && p.metal == "100"));
    }

    #[test]
    fn random_draws_stay_in_bounds_and_are_reproducible() {
        let value = json!({
            "metal": ["100"], "dens": ["30", "60"], "mass": ["-10", "5"], "chi": ["0", "9"],
            "create_random_models": true, "random_model_num": 40, "seed": 7
        });
        let first = generate(&spec(value.clone())).unwrap();
        let second = generate(&spec(value)).unwrap();
        assert_eq!(first, second);
        for p in &first {
            let d = code::decode_log(&p.density).unwrap();
            assert!((30.0..=60.0).contains(&d));
            let m = code::decode_log(&p.mass).unwrap();
            assert!((-10.0..=5.0).contains(&m));
            assert_eq!(p.radiation.len(), 2, "codes are zero padded: {}", p.radiation);
        }
    }

    proptest! {
        #[test]
        fn exhaustive_count_is_product_of_lengths(
            metal in 1usize..4, dens in 1usize..5, mass in 1usize..4, chi in 1usize..5, col in 0usize..3
        ) {
            let list = |n: usize| (0..n).map(|i| Value::String(code::format_code(i as i64))).collect::<Vec<_>>();
            let mut value = json!({
                "metal": list(metal), "dens": list(dens), "mass": list(mass), "chi": list(chi)
            });
            if col > 0 {
                value["col"] = Value::Array(list(col));
            }
            let points = generate(&spec(value)).unwrap();
            prop_assert_eq!(points.len(), metal * dens * mass * chi * col.max(1));
        }
    }
}
