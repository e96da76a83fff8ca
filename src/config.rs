//! Settings file loading and load-time validation.
//!
//! The YAML file is deserialised into loosely typed `Raw*` structs and then
//! checked as a whole: templates are parsed against their key sets, hour sets
//! against the hour grammar, and the substitute graph for cycles. Nothing is
//! checked lazily at run time.

use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    forecast::{ForecastHours, HoursError},
    template::{Template, TemplateError, TemplateKind},
};

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file `{path}`")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed settings file")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("bad template in `{field}`")]
    Template { field: String, source: TemplateError },
    #[error("bad forecast hours in `{field}`")]
    Hours { field: String, source: HoursError },
    #[error("chart `{chart}` refers to unknown source `{source_key}`")]
    UnknownSource { chart: String, source_key: String },
    #[error("chart `{chart}` has unknown substitute `{substitute}`")]
    UnknownSubstitute { chart: String, substitute: String },
    #[error("`general.charts` lists unknown chart `{0}`")]
    UnknownChart(String),
    #[error("chart id `{0}` is defined twice")]
    DuplicateChart(String),
    #[error("substitute cycle: {}", .0.join(" -> "))]
    SubstituteCycle(Vec<String>),
    #[error("`{field}` must be within 1..=100, got {value}")]
    Quality { field: String, value: u32 },
    #[error("`{0}` must be at least 1")]
    Zero(String),
    #[error("`{0}` needs both a username and a password")]
    PartialCredentials(String),
}

// -- Typed settings ----------------------------------------------------------

/// A username/password pair. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// JPEG quality, always within `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u32) -> Option<Self> {
        (1..=100).contains(&value).then(|| Quality(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Source {
    pub key: String,
    pub url_mask: Template,
    pub credentials: Option<Credentials>,
    pub to_quality: Option<Quality>,
}

#[derive(Debug, Clone)]
pub struct ChartSpec {
    pub id: String,
    /// Variable identifier, bound to `{variable}`.
    pub name: String,
    pub source: String,
    pub model: String,
    pub substitute: Option<String>,
    pub url_mask: Option<Template>,
    pub to_quality: Option<Quality>,
    pub fcst_hours: Option<ForecastHours>,
    pub freq: u32,
}

#[derive(Debug, Clone)]
pub struct Archive {
    /// `host[:port]`; port 21 when omitted.
    pub address: String,
    pub credentials: Credentials,
    pub target_dir: Template,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct General {
    pub local_dir: PathBuf,
    pub default_hours: ForecastHours,
    pub concurrency: usize,
    pub max_substitution_depth: usize,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CopyJob {
    pub source_dir: Template,
    pub target_dir: Template,
    pub file_mask: Template,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub general: General,
    pub archive: Archive,
    pub sources: BTreeMap<String, Source>,
    pub charts: BTreeMap<String, ChartSpec>,
    /// Chart ids in the order they are processed.
    pub run_order: Vec<String>,
    pub copy: Option<CopyJob>,
}

impl Settings {
    /// Reads and validates a settings file. A relative `local_dir` is taken
    /// relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        Self::from_yaml(&text, base_dir)
    }

    pub fn from_yaml(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml_ng::from_str(text)?;
        Self::from_raw(raw, base_dir)
    }

    /// Chart-level quality, falling back to the chart's source.
    pub fn effective_quality(&self, chart: &ChartSpec) -> Option<Quality> {
        chart
            .to_quality
            .or_else(|| self.sources.get(&chart.source).and_then(|s| s.to_quality))
    }

    pub fn chart(&self, id: &str) -> Option<&ChartSpec> {
        self.charts.get(id)
    }

    fn from_raw(raw: RawConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        let general = build_general(raw.general.clone(), base_dir)?;
        let archive = build_archive(raw.archive)?;

        let mut sources = BTreeMap::new();
        for (key, src) in raw.sources {
            let source = build_source(&key, src)?;
            sources.insert(key, source);
        }

        let mut charts = BTreeMap::new();
        for (id, chart) in raw.charts {
            let chart = build_chart(&id, chart)?;
            charts.insert(id, chart);
        }

        let mut fanout_ids = Vec::new();
        for (source, models) in raw.fanout {
            for (model, spec) in models {
                for chart in expand_fanout(&source, &model, &spec)? {
                    if charts.contains_key(&chart.id) {
                        return Err(ConfigError::DuplicateChart(chart.id));
                    }
                    fanout_ids.push(chart.id.clone());
                    charts.insert(chart.id.clone(), chart);
                }
            }
        }

        for chart in charts.values() {
            if !sources.contains_key(&chart.source) {
                return Err(ConfigError::UnknownSource {
                    chart: chart.id.clone(),
                    source_key: chart.source.clone(),
                });
            }
            if let Some(sub) = &chart.substitute {
                if !charts.contains_key(sub) {
                    return Err(ConfigError::UnknownSubstitute {
                        chart: chart.id.clone(),
                        substitute: sub.clone(),
                    });
                }
            }
        }
        check_substitute_cycles(&charts)?;

        let mut run_order = match raw.general.charts {
            Some(selected) => {
                for id in &selected {
                    if !charts.contains_key(id) {
                        return Err(ConfigError::UnknownChart(id.clone()));
                    }
                }
                selected
            }
            None => charts
                .keys()
                .filter(|id| !fanout_ids.contains(id))
                .cloned()
                .collect(),
        };
        for id in fanout_ids {
            if !run_order.contains(&id) {
                run_order.push(id);
            }
        }

        let copy = raw.copy.map(build_copy).transpose()?;

        Ok(Settings {
            general,
            archive,
            sources,
            charts,
            run_order,
            copy,
        })
    }
}

// -- Raw file format ---------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    general: RawGeneral,
    archive: RawArchive,
    sources: BTreeMap<String, RawSource>,
    #[serde(default)]
    charts: BTreeMap<String, RawChart>,
    #[serde(default)]
    fanout: BTreeMap<String, BTreeMap<String, RawFanout>>,
    copy: Option<RawCopy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGeneral {
    local_dir: PathBuf,
    default_hours: String,
    charts: Option<Vec<String>>,
    concurrency: Option<usize>,
    max_substitution_depth: Option<usize>,
    http_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArchive {
    address: String,
    username: String,
    password: String,
    target_dir: String,
    ftp_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    url_mask: String,
    username: Option<String>,
    password: Option<String>,
    to_quality: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChart {
    name: String,
    source: String,
    model: String,
    substitute: Option<String>,
    url_mask: Option<String>,
    to_quality: Option<u32>,
    fcst_hours: Option<String>,
    freq: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFanout {
    variables: Vec<String>,
    fcst_hours: Option<String>,
    freq: Option<u32>,
    to_quality: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCopy {
    source_dir: String,
    target_dir: String,
    file_mask: String,
}

// -- Builders ----------------------------------------------------------------

fn template(text: &str, kind: TemplateKind, field: &str) -> Result<Template, ConfigError> {
    Template::parse(text, kind).map_err(|source| ConfigError::Template {
        field: field.to_string(),
        source,
    })
}

fn hours(text: &str, field: &str) -> Result<ForecastHours, ConfigError> {
    text.parse().map_err(|source| ConfigError::Hours {
        field: field.to_string(),
        source,
    })
}

fn quality(value: Option<u32>, field: &str) -> Result<Option<Quality>, ConfigError> {
    value
        .map(|v| {
            Quality::new(v).ok_or_else(|| ConfigError::Quality {
                field: field.to_string(),
                value: v,
            })
        })
        .transpose()
}

fn at_least_one<T: PartialEq + From<u8>>(value: T, field: &str) -> Result<T, ConfigError> {
    if value == T::from(0) {
        return Err(ConfigError::Zero(field.to_string()));
    }
    Ok(value)
}

fn build_general(raw: RawGeneral, base_dir: &Path) -> Result<General, ConfigError> {
    let local_dir = if raw.local_dir.is_absolute() {
        raw.local_dir
    } else {
        base_dir.join(raw.local_dir)
    };

    Ok(General {
        local_dir,
        default_hours: hours(&raw.default_hours, "general.default_hours")?,
        concurrency: at_least_one(raw.concurrency.unwrap_or(1), "general.concurrency")?,
        max_substitution_depth: raw.max_substitution_depth.unwrap_or(1),
        http_timeout: Duration::from_secs(
            raw.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        ),
    })
}

fn build_archive(raw: RawArchive) -> Result<Archive, ConfigError> {
    Ok(Archive {
        address: raw.address,
        credentials: Credentials {
            username: raw.username,
            password: raw.password,
        },
        target_dir: template(&raw.target_dir, TemplateKind::TargetDir, "archive.target_dir")?,
        timeout: Duration::from_secs(raw.ftp_timeout_secs.unwrap_or(DEFAULT_FTP_TIMEOUT_SECS)),
    })
}

fn build_source(key: &str, raw: RawSource) -> Result<Source, ConfigError> {
    let credentials = match (raw.username, raw.password) {
        (Some(username), Some(password)) => Some(Credentials { username, password }),
        (None, None) => None,
        _ => return Err(ConfigError::PartialCredentials(format!("sources.{key}"))),
    };

    Ok(Source {
        key: key.to_string(),
        url_mask: template(
            &raw.url_mask,
            TemplateKind::Url,
            &format!("sources.{key}.url_mask"),
        )?,
        credentials,
        to_quality: quality(raw.to_quality, &format!("sources.{key}.to_quality"))?,
    })
}

fn build_chart(id: &str, raw: RawChart) -> Result<ChartSpec, ConfigError> {
    let field = |name: &str| format!("charts.{id}.{name}");

    Ok(ChartSpec {
        id: id.to_string(),
        name: raw.name.trim().to_string(),
        source: raw.source,
        model: raw.model,
        substitute: raw
            .substitute
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        url_mask: raw
            .url_mask
            .map(|m| template(&m, TemplateKind::Url, &field("url_mask")))
            .transpose()?,
        to_quality: quality(raw.to_quality, &field("to_quality"))?,
        fcst_hours: raw
            .fcst_hours
            .map(|h| hours(&h, &field("fcst_hours")))
            .transpose()?,
        freq: at_least_one(raw.freq.unwrap_or(1), &field("freq"))?,
    })
}

fn expand_fanout(source: &str, model: &str, raw: &RawFanout) -> Result<Vec<ChartSpec>, ConfigError> {
    let field = |name: &str| format!("fanout.{source}.{model}.{name}");
    let fcst_hours = raw
        .fcst_hours
        .as_deref()
        .map(|h| hours(h, &field("fcst_hours")))
        .transpose()?;
    let to_quality = quality(raw.to_quality, &field("to_quality"))?;
    let freq = at_least_one(raw.freq.unwrap_or(1), &field("freq"))?;

    Ok(raw
        .variables
        .iter()
        .map(|variable| ChartSpec {
            id: format!("{source}/{model}/{variable}"),
            name: variable.clone(),
            source: source.to_string(),
            model: model.to_string(),
            substitute: None,
            url_mask: None,
            to_quality,
            fcst_hours: fcst_hours.clone(),
            freq,
        })
        .collect())
}

fn build_copy(raw: RawCopy) -> Result<CopyJob, ConfigError> {
    Ok(CopyJob {
        source_dir: template(&raw.source_dir, TemplateKind::CopyDir, "copy.source_dir")?,
        target_dir: template(&raw.target_dir, TemplateKind::CopyDir, "copy.target_dir")?,
        file_mask: template(&raw.file_mask, TemplateKind::CopyFile, "copy.file_mask")?,
    })
}

/// Every chart has at most one substitute, so following the chain from each
/// chart either ends or revisits a chart already on it.
fn check_substitute_cycles(charts: &BTreeMap<String, ChartSpec>) -> Result<(), ConfigError> {
    for start in charts.keys() {
        let mut chain = vec![start.clone()];
        let mut seen: HashSet<&str> = HashSet::from([start.as_str()]);
        let mut current = start.as_str();

        while let Some(next) = charts.get(current).and_then(|c| c.substitute.as_deref()) {
            chain.push(next.to_string());
            if !seen.insert(next) {
                return Err(ConfigError::SubstituteCycle(chain));
            }
            current = next;
        }
    }
    Ok(())
}

// -- Tests -------------------------------------------------------------------
