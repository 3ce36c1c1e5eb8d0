//! Decimal-log codes used to exchange physical grid values.
//!
//! A code is a short zero-padded integer string `n` standing for the physical
//! value `10^(0.1 * n)`. Codes end up in job names and output file names, so the
//! string form is canonical: single digits are always padded (`"05"`, `"-05"`)
//! and zero is written `"00"`.

use crate::grid::GridError;

/// Sentinel code for non-positive physical values
pub const NON_POSITIVE: &str = "-99";

/// Parse a code into its log value. Grids may declare fractional codes such as `"3.0"`.
pub fn decode_log(code: &str) -> Result<f64, GridError> {
    match code.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(GridError::InvalidCode(code.to_string())),
    }
}

/// Physical value of a code, `10^(0.1 * n)`
pub fn decode(code: &str) -> Result<f64, GridError> {
    decode_log(code).map(|n| 10f64.powf(0.1 * n))
}

/// Encode a physical value as a code, rounding to the nearest integer
pub fn encode(value: f64) -> String {
    if value > 0.0 && value.is_finite() {
        format_code((10.0 * value.log10()).round() as i64)
    } else {
        NON_POSITIVE.to_string()
    }
}

/// Canonical string form of an integer code
pub fn format_code(n: i64) -> String {
    if n < 0 {
        format!("-{:02}", n.unsigned_abs())
    } else {
        format!("{n:02}")
    }
}

/// Re-format an arbitrary code string in canonical form, e.g. `"5"` becomes `"05"`
pub fn normalize(code: &str) -> Result<String, GridError> {
    decode_log(code).map(|n| format_code(n.round() as i64))
}
