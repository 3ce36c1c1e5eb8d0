use std::fmt;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Input file format the PDR executable reads
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// flat `PDRNEW.INP`
    #[default]
    Legacy,
    /// structured `pdr_config.json`
    Json
}

impl fmt::Display for InputFormat {
      fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputFormat::Legacy => write!(f, "legacy"),
            InputFormat::Json => write!(f, "json")
        }
    }
}
