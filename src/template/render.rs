use std::sync::OnceLock;

use log::warn;
use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::template::{spellings, PlaceholderValue, Placeholders, TemplateError};

/// Rendered output and the placeholders left in it
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered<T> {
    pub output: T,
    pub unresolved: Vec<String>,
}

/// Number formatting of the flat input format.
///
/// Integral values below 1000 stay integers, very large or small magnitudes
/// use one-decimal scientific notation (`1.0e+03`).
pub fn format_scientific(value: f64) -> String {
    if value.fract() == 0.0 && (0.0..1000.0).contains(&value) {
        return format!("{}", value as i64);
    }
    if value >= 1000.0 || value < 0.1 {
        return exponent_form(value, 1);
    }
    shortest_float(value)
}

/// Number formatting for values spliced into a longer JSON string
pub fn format_json_number(value: f64) -> String {
    if value.abs() >= 1000.0 || value.abs() < 0.1 {
        exponent_form(value, 3)
    } else {
        format!("{value:.6}")
    }
}

/// `{:.Ne}` with a signed, two-digit exponent
fn exponent_form(value: f64, precision: usize) -> String {
    let raw = format!("{value:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => raw,
    }
}

/// Shortest representation that keeps a decimal point
fn shortest_float(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || text.contains('e') || !value.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}

fn flat_text(value: &PlaceholderValue) -> String {
    match value {
        PlaceholderValue::Int(i) => i.to_string(),
        PlaceholderValue::Float(x) => format_scientific(*x),
        PlaceholderValue::Text(s) => s.clone(),
        PlaceholderValue::Species(names) => names
            .iter()
            .map(|name| format!("SPECIES  {name}"))
            .collect::<Vec<_>>()
            .join("\n"),
        PlaceholderValue::Flag(true) => "*MODEL GRID".to_string(),
        PlaceholderValue::Flag(false) => String::new(),
    }
}

fn inline_json_text(value: &PlaceholderValue) -> String {
    match value {
        PlaceholderValue::Int(i) => i.to_string(),
        PlaceholderValue::Float(x) => format_json_number(*x),
        PlaceholderValue::Text(s) => s.clone(),
        PlaceholderValue::Species(names) => names.join(" "),
        PlaceholderValue::Flag(flag) => flag.to_string(),
    }
}

fn placeholder_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"KT_VAR\w+_").expect("placeholder pattern is valid"),
            Regex::new(r"\$\{\w+\}").expect("placeholder pattern is valid"),
        ]
    })
}

fn find_unresolved(text: &str, into: &mut Vec<String>) {
    for pattern in placeholder_patterns() {
        for m in pattern.find_iter(text) {
            let found = m.as_str().to_string();
            if !into.contains(&found) {
                into.push(found);
            }
        }
    }
}

fn warn_unresolved(name: &str, unresolved: &[String]) {
    if !unresolved.is_empty() {
        warn!("Unreplaced placeholders in {name}: {}", unresolved.join(", "));
    }
}

fn substitute(text: &str, placeholders: &Placeholders, format: fn(&PlaceholderValue) -> String) -> String {
    let mut output = text.to_string();
    for (name, value) in placeholders.by_length() {
        let [braced, prefixed] = spellings(name);
        if output.contains(&braced) || output.contains(&prefixed) {
            let replacement = format(value);
            output = output.replace(&braced, &replacement).replace(&prefixed, &replacement);
        }
    }
    output
}

/// Substitute placeholders into the flat input format
pub fn render_text(name: &str, template: &str, placeholders: &Placeholders) -> Rendered<String> {
    let output = substitute(template, placeholders, flat_text);
    let mut unresolved = Vec::new();
    find_unresolved(&output, &mut unresolved);
    warn_unresolved(name, &unresolved);
    Rendered { output, unresolved }
}

/// Substitute placeholders into a JSON template.
///
/// A string that is exactly one placeholder is replaced by the typed value.
/// Placeholders inside longer strings are spliced in as text. Every string
/// left afterwards is turned into an integer or a float where it parses as one.
pub fn render_json(name: &str, template: &str, placeholders: &Placeholders) -> Result<Rendered<Value>, TemplateError> {
    let parsed: Value = serde_json::from_str(template)?;
    let mut unresolved = Vec::new();
    let output = walk(parsed, placeholders, &mut unresolved);
    warn_unresolved(name, &unresolved);
    Ok(Rendered { output, unresolved })
}

fn walk(value: Value, placeholders: &Placeholders, unresolved: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => leaf(&s, placeholders, unresolved),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| walk(v, placeholders, unresolved)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, walk(v, placeholders, unresolved)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

fn leaf(text: &str, placeholders: &Placeholders, unresolved: &mut Vec<String>) -> Value {
    if let Some(value) = whole_placeholder(text, placeholders) {
        return typed(value);
    }
    let spliced = substitute(text, placeholders, inline_json_text);
    find_unresolved(&spliced, unresolved);
    coerce(spliced)
}

fn whole_placeholder<'a>(text: &str, placeholders: &'a Placeholders) -> Option<&'a PlaceholderValue> {
    let name = text
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .or_else(|| {
            text.strip_prefix(crate::template::PLACEHOLDER_PREFIX)
                .and_then(|rest| rest.strip_suffix('_'))
        })?;
    placeholders.get(name)
}

fn typed(value: &PlaceholderValue) -> Value {
    match value {
        PlaceholderValue::Int(i) => Value::from(*i),
        PlaceholderValue::Float(x) => float(*x).unwrap_or_else(|| Value::String(x.to_string())),
        PlaceholderValue::Text(s) => coerce(s.clone()),
        PlaceholderValue::Species(names) => Value::Array(names.iter().cloned().map(Value::String).collect()),
        PlaceholderValue::Flag(flag) => Value::Bool(*flag),
    }
}

fn float(x: f64) -> Option<Value> {
    Number::from_f64(x).map(Value::Number)
}

/// Integer if it parses as one, then float, else the string itself
fn coerce(text: String) -> Value {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(x) = trimmed.parse::<f64>() {
        if let Some(value) = float(x) {
            return value;
        }
    }
    Value::String(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn table(entries: &[(&str, PlaceholderValue)]) -> Placeholders {
        let mut placeholders = Placeholders::new();
        for (name, value) in entries {
            placeholders.insert(name, value.clone());
        }
        placeholders
    }

    #[test]
    fn scientific_formatting() {
        assert_eq!(format_scientific(0.0), "0");
        assert_eq!(format_scientific(5.0), "5");
        assert_eq!(format_scientific(999.0), "999");
        assert_eq!(format_scientific(1000.0), "1.0e+03");
        assert_eq!(format_scientific(12345.0), "1.2e+04");
        assert_eq!(format_scientific(0.05), "5.0e-02");
        assert_eq!(format_scientific(0.5), "0.5");
        assert_eq!(format_scientific(2.5), "2.5");
        assert_eq!(format_scientific(-3.0), "-3.0e+00");
    }

    #[test]
    fn json_number_formatting() {
        assert_eq!(format_json_number(10.0), "10.000000");
        assert_eq!(format_json_number(1e4), "1.000e+04");
        assert_eq!(format_json_number(0.001), "1.000e-03");
    }

    #[test]
    fn flat_template_substitution() {
        let placeholders = table(&[
            ("xnsur", PlaceholderValue::Float(1e4)),
            ("mass", PlaceholderValue::Float(10.0)),
            ("species", PlaceholderValue::Species(vec!["CO".into(), "C+".into()])),
            ("grid", PlaceholderValue::Flag(true)),
            ("ihtclgas", PlaceholderValue::Int(1)),
        ]);
        let template = "XNSUR KT_VARxnsur_\nMASS ${mass}\nKT_VARspecies_\nKT_VARgrid_\nIHTCLGAS KT_VARihtclgas_\n";
        let rendered = render_text("PDRNEW.INP", template, &placeholders);
        assert_eq!(
            rendered.output,
            "XNSUR 1.0e+04\nMASS 10\nSPECIES  CO\nSPECIES  C+\n*MODEL GRID\nIHTCLGAS 1\n"
        );
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn grid_flag_off_leaves_empty_line() {
        let placeholders = table(&[("grid", PlaceholderValue::Flag(false))]);
        let rendered = render_text("PDRNEW.INP", "A\nKT_VARgrid_\nB", &placeholders);
        assert_eq!(rendered.output, "A\n\nB");
    }

    #[test]
    fn unknown_placeholders_are_reported() {
        let rendered = render_text("PDRNEW.INP", "KT_VARunknown_ ${other} KT_VARunknown_", &Placeholders::new());
        assert_eq!(rendered.unresolved, vec!["KT_VARunknown_".to_string(), "${other}".to_string()]);
    }

    #[test]
    fn json_substitution_coerces_numbers() {
        let placeholders = table(&[
            ("chi", PlaceholderValue::Text("10.0".into())),
            ("dens", PlaceholderValue::Text("1e4".into())),
        ]);
        let rendered = render_json("pdr_config.json", r#"{"chi": "${chi}", "d": "KT_VARdens_"}"#, &placeholders).unwrap();
        assert_eq!(rendered.output, json!({"chi": 10.0, "d": 10000.0}));
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn json_whole_leaf_keeps_type() {
        let placeholders = table(&[
            ("n", PlaceholderValue::Int(3)),
            ("species", PlaceholderValue::Species(vec!["H2".into(), "CO".into()])),
            ("grid", PlaceholderValue::Flag(false)),
            ("mass", PlaceholderValue::Float(0.5)),
        ]);
        let template = r#"{"a": {"n": "${n}", "list": ["KT_VARspecies_"]}, "g": "${grid}", "label": "m=${mass}", "plain": "7", "word": "abc", "x": 1}"#;
        let rendered = render_json("t.json", template, &placeholders).unwrap();
        assert_eq!(
            rendered.output,
            json!({"a": {"n": 3, "list": [["H2", "CO"]]}, "g": false, "label": "m=0.500000", "plain": 7, "word": "abc", "x": 1})
        );
    }

    #[test]
    fn json_unresolved_placeholders_stay() {
        let rendered = render_json("t.json", r#"{"a": "${missing}"}"#, &Placeholders::new()).unwrap();
        assert_eq!(rendered.output, json!({"a": "${missing}"}));
        assert_eq!(rendered.unresolved, vec!["${missing}".to_string()]);
    }

    #[test]
    fn invalid_json_template_is_an_error() {
        let err = render_json("t.json", "{not json", &Placeholders::new()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidJson(_)));
    }
}
