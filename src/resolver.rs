//! Turns a chart and a forecast hour into a concrete request.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use percent_encoding::percent_decode_str;
use reqwest::Url;
use thiserror::Error;

use crate::{
    config::{ChartSpec, Settings, Source},
    forecast::ForecastRun,
    template::{Key, Template, TemplateError, Vars},
    transport::RemotePath,
};

/// Local run directories are named after the init time in this format.
pub const RUN_DIR_FORMAT: &str = "%Y%m%d%H%M";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("chart `{chart}` refers to unknown source `{source_key}`")]
    UnknownSource { chart: String, source_key: String },
    #[error("cannot render template `{template}`")]
    Render {
        template: String,
        source: TemplateError,
    },
    #[error("`{url}` is not a valid URL")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("`{0}` has no file name")]
    NoFileName(String),
}

/// Everything needed to fetch and relay one chart image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub url: Url,
    pub file_name: String,
    pub local_dir: PathBuf,
    pub local_path: PathBuf,
    pub remote_dir: RemotePath,
}

pub struct ChartResolver<'a> {
    sources: &'a BTreeMap<String, Source>,
    local_root: &'a Path,
    target_dir: &'a Template,
}

impl<'a> ChartResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        ChartResolver {
            sources: &settings.sources,
            local_root: &settings.general.local_dir,
            target_dir: &settings.archive.target_dir,
        }
    }

    pub fn resolve(
        &self,
        chart: &ChartSpec,
        run: &ForecastRun,
        fcst_hour: u32,
    ) -> Result<ResolvedRequest, ResolveError> {
        let source = self
            .sources
            .get(&chart.source)
            .ok_or_else(|| ResolveError::UnknownSource {
                chart: chart.id.clone(),
                source_key: chart.source.clone(),
            })?;
        let source_upper = source.key.to_uppercase();

        let url_mask = chart.url_mask.as_ref().unwrap_or(&source.url_mask);
        let vars = Vars::new()
            .time(Key::FcstInit, run.init_time)
            .time(Key::FcstValid, run.valid_time(fcst_hour))
            .int(Key::FcstHour, i64::from(fcst_hour))
            .text(Key::Model, &chart.model)
            .text(Key::Variable, &chart.name);
        let url = render(url_mask, &vars)?;
        let url = Url::parse(&url).map_err(|source| ResolveError::InvalidUrl {
            url: url.clone(),
            source,
        })?;
        let file_name = file_name(&url)?;

        let local_dir = self
            .local_root
            .join(&source_upper)
            .join(run.init_time.format(RUN_DIR_FORMAT).to_string());
        let local_path = local_dir.join(&file_name);

        let vars = Vars::new()
            .time(Key::FcstDay, run.init_time)
            .text(Key::Source, &source_upper);
        let remote_dir = RemotePath::parse(&render(self.target_dir, &vars)?);

        Ok(ResolvedRequest {
            url,
            file_name,
            local_dir,
            local_path,
            remote_dir,
        })
    }
}

fn render(template: &Template, vars: &Vars<'_>) -> Result<String, ResolveError> {
    template.render(vars).map_err(|source| ResolveError::Render {
        template: template.to_string(),
        source,
    })
}

/// The last path segment, percent-decoded, so `2m%20temp_006.png` is stored
/// as `2m temp_006.png` locally and on the archive.
fn file_name(url: &Url) -> Result<String, ResolveError> {
    let no_name = || ResolveError::NoFileName(url.to_string());

    let raw = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .ok_or_else(no_name)?;
    let name = percent_decode_str(raw).decode_utf8().map_err(|_| no_name())?;

    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(no_name());
    }
    Ok(name.into_owned())
}

// -- Tests -------------------------------------------------------------------
