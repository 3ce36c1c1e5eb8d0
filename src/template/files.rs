use chrono::{DateTime, Utc};
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::template::TemplateError;

/// Grid coordinates of a job, as read by the PDR program
#[derive(Serialize)]
struct GridParamContext<'a> {
    metal: &'a str,
    density: &'a str,
    mass: &'a str,
    radiation: &'a str,
    column: &'a str,
}

#[derive(Serialize)]
struct BannerContext<'a> {
    stage: &'a str,
    job_name: &'a str,
    job_id: i64,
    time: String,
}

fn render<C: Serialize>(name: &str, source: &str, context: &C) -> Result<String, TemplateError> {
    let failed = |e: tinytemplate::error::Error| TemplateError::Render { name: name.to_string(), reason: e.to_string() };
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, source).map_err(failed)?;
    tt.render(name, context).map_err(failed)
}

/// Render `GRID_PARAM` from the five grid codes
/// (metallicity, density, mass, radiation, column)
pub fn render_grid_param(codes: &[String; 5]) -> Result<String, TemplateError> {
    /// included GRID_PARAM template
    static GRID_PARAM: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/grid_param.txt"));
    let [metal, density, mass, radiation, column] = codes;
    let context = GridParamContext { metal, density, mass, radiation, column };
    render("grid_param", GRID_PARAM, &context)
}

/// Render the line written to a job log when a stage starts or ends
pub fn render_banner(stage: &str, job_name: &str, job_id: i64, at: &DateTime<Utc>) -> Result<String, TemplateError> {
    /// included banner template
    static BANNER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/banner.txt"));
    let context = BannerContext { stage, job_name, job_id, time: at.to_rfc2822() };
    render("banner", BANNER, &context)
}
