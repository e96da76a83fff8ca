//! Drives every chart and forecast hour through resolve, fetch, reduce and
//! upload.
//!
//! Each (chart, hour) pair is an independent unit of work. A unit that fails
//! is logged and recorded in the [`RunSummary`]; it never stops its siblings.

use std::{
    error::Error as StdError,
    fmt,
    path::PathBuf,
};

use chrono::{Datelike, NaiveDate};
use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument, Span};

use crate::{
    config::{ChartSpec, Settings},
    forecast::ForecastRun,
    reducer::{self, ImageCapability, ReduceError},
    resolver::{ChartResolver, ResolveError},
    transport::{DownloadError, Transport, UploadError},
};

#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("cannot create local directory `{}`", path.display())]
    LocalDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no usable download for chart `{chart}` (last tried `{url}`)")]
    Fetch {
        chart: String,
        url: String,
        source: DownloadError,
    },
    #[error("cannot reduce `{}`", path.display())]
    Reduce { path: PathBuf, source: ReduceError },
    #[error("reducer worker failed")]
    Worker(#[source] tokio::task::JoinError),
    #[error("cannot upload into `{remote_dir}`")]
    Upload {
        remote_dir: String,
        source: UploadError,
    },
}

/// One chart at one forecast hour.
#[derive(Debug, Clone, Copy)]
pub struct UnitOfWork<'a> {
    pub chart: &'a ChartSpec,
    pub fcst_hour: u32,
}

#[derive(Debug)]
pub struct Plan<'a> {
    pub units: Vec<UnitOfWork<'a>>,
    /// Charts left out because today is not one of their days.
    pub skipped: Vec<String>,
}

/// A unit that made it all the way to the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub remote: String,
    pub uploaded: PathBuf,
    pub reduced: bool,
    /// The substitute chart that supplied the image, if the primary failed.
    pub substitute: Option<String>,
}

#[derive(Debug)]
pub struct UnitFailure {
    pub chart: String,
    pub fcst_hour: u32,
    pub error: UnitError,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub substituted: usize,
    pub reduced: usize,
    pub not_started: usize,
    pub skipped_charts: Vec<String>,
    pub failures: Vec<UnitFailure>,
}

impl RunSummary {
    /// Something was attempted and nothing got through.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} succeeded ({} via substitute, {} reduced), {} failed",
            self.attempted,
            self.succeeded,
            self.substituted,
            self.reduced,
            self.failures.len()
        )?;
        if !self.skipped_charts.is_empty() {
            write!(f, ", skipped today: {}", self.skipped_charts.join(", "))?;
        }
        if self.not_started > 0 {
            write!(f, ", {} not started (cancelled)", self.not_started)?;
        }
        for failure in &self.failures {
            write!(
                f,
                "\n  {} +{}h: {}",
                failure.chart,
                failure.fcst_hour,
                error_chain(&failure.error)
            )?;
        }
        Ok(())
    }
}

/// `outer: inner: innermost`
pub fn error_chain(error: &dyn StdError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        text.push_str(": ");
        text.push_str(&e.to_string());
        source = e.source();
    }
    text
}

pub struct Pipeline<'a, T: Transport> {
    settings: &'a Settings,
    transport: T,
    resolver: ChartResolver<'a>,
    run: ForecastRun,
    today: NaiveDate,
    capability: ImageCapability,
    cancel: CancellationToken,
    progress: ProgressBar,
    span: Span,
}

impl<'a, T: Transport> Pipeline<'a, T> {
    /// `today` decides which charts run under their `freq`; `span` is the
    /// run's logging context and parents every unit's span.
    pub fn new(
        settings: &'a Settings,
        transport: T,
        run: ForecastRun,
        today: NaiveDate,
        span: Span,
    ) -> Self {
        Pipeline {
            settings,
            transport,
            resolver: ChartResolver::new(settings),
            run,
            today,
            capability: ImageCapability::detect(),
            cancel: CancellationToken::new(),
            progress: ProgressBar::hidden(),
            span,
        }
    }

    pub fn with_capability(mut self, capability: ImageCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Expands the given charts into units of work, in order.
    pub fn plan(&self, chart_ids: &[String]) -> Plan<'a> {
        let settings = self.settings;
        let mut plan = Plan {
            units: Vec::new(),
            skipped: Vec::new(),
        };

        for chart in chart_ids.iter().filter_map(|id| settings.chart(id)) {
            if self.today.day() % chart.freq != 0 {
                tracing::debug!(parent: &self.span, chart = %chart.id, freq = chart.freq, "not today");
                plan.skipped.push(chart.id.clone());
                continue;
            }
            let hours = chart
                .fcst_hours
                .as_ref()
                .unwrap_or(&settings.general.default_hours);
            plan.units.extend(
                hours
                    .hours()
                    .iter()
                    .map(|&fcst_hour| UnitOfWork { chart, fcst_hour }),
            );
        }

        plan
    }

    pub async fn run(&self, plan: Plan<'a>) -> RunSummary {
        let mut summary = RunSummary {
            skipped_charts: plan.skipped,
            ..RunSummary::default()
        };

        let wants_reduction = plan
            .units
            .iter()
            .any(|u| self.settings.effective_quality(u.chart).is_some());
        if wants_reduction && !self.capability.is_available() {
            warn!(parent: &self.span, "image support unavailable, no compression applied this run");
        }

        self.progress.set_length(plan.units.len() as u64);

        let results: Vec<_> = stream::iter(plan.units)
            .map(|unit| async move {
                if self.cancel.is_cancelled() {
                    return (unit, None);
                }
                let span = tracing::info_span!(
                    parent: &self.span,
                    "unit",
                    chart = %unit.chart.id,
                    hour = unit.fcst_hour
                );
                let result = self.run_unit(unit).instrument(span.clone()).await;
                if let Err(e) = &result {
                    tracing::error!(parent: &span, error = %error_chain(e), "unit failed");
                }
                self.progress.inc(1);
                (unit, Some(result))
            })
            .buffer_unordered(self.settings.general.concurrency)
            .collect()
            .await;

        for (unit, result) in results {
            match result {
                None => summary.not_started += 1,
                Some(Ok(outcome)) => {
                    tracing::debug!(
                        parent: &self.span,
                        chart = %unit.chart.id,
                        hour = unit.fcst_hour,
                        local = %outcome.uploaded.display(),
                        remote = %outcome.remote,
                        "relayed"
                    );
                    summary.attempted += 1;
                    summary.succeeded += 1;
                    summary.substituted += usize::from(outcome.substitute.is_some());
                    summary.reduced += usize::from(outcome.reduced);
                }
                Some(Err(error)) => {
                    summary.attempted += 1;
                    summary.failures.push(UnitFailure {
                        chart: unit.chart.id.clone(),
                        fcst_hour: unit.fcst_hour,
                        error,
                    });
                }
            }
        }

        self.progress.finish_with_message("Run complete");
        info!(parent: &self.span, "{summary}");

        summary
    }

    async fn run_unit(&self, unit: UnitOfWork<'a>) -> Result<Outcome, UnitError> {
        let max_depth = self.settings.general.max_substitution_depth;
        let mut chart = unit.chart;
        let mut depth = 0;

        let request = loop {
            let request = self.resolver.resolve(chart, &self.run, unit.fcst_hour)?;
            tokio::fs::create_dir_all(&request.local_dir)
                .await
                .map_err(|source| UnitError::LocalDir {
                    path: request.local_dir.clone(),
                    source,
                })?;

            let credentials = self
                .settings
                .sources
                .get(&chart.source)
                .and_then(|s| s.credentials.as_ref());

            info!(file = %request.file_name, url = %request.url, "downloading");
            let error = match self
                .transport
                .download(&request.url, &request.local_path, credentials)
                .await
            {
                Ok(()) => break request,
                Err(error) => error,
            };
            warn!(
                url = %request.url,
                status = ?error.status(),
                error = %error_chain(&error),
                "download failed"
            );

            let substitute = chart
                .substitute
                .as_deref()
                .and_then(|id| self.settings.chart(id));
            match substitute {
                Some(sub) if depth < max_depth => {
                    info!(substitute = %sub.id, "trying substitute");
                    chart = sub;
                    depth += 1;
                }
                _ => {
                    if let Some(sub) = substitute {
                        warn!(substitute = %sub.id, max_depth, "substitution depth exhausted");
                    }
                    return Err(UnitError::Fetch {
                        chart: chart.id.clone(),
                        url: request.url.to_string(),
                        source: error,
                    });
                }
            }
        };

        let quality = self
            .settings
            .effective_quality(chart)
            .filter(|_| self.capability.is_available());
        let (artifact, reduced) = match quality {
            Some(quality) => {
                let original = request.local_path.clone();
                let reduced = tokio::task::spawn_blocking(move || reducer::reduce(&original, quality))
                    .await
                    .map_err(UnitError::Worker)?
                    .map_err(|source| UnitError::Reduce {
                        path: request.local_path.clone(),
                        source,
                    })?;
                info!(path = %reduced.display(), quality = quality.get(), "low-res image saved");
                (reduced, true)
            }
            None => (request.local_path.clone(), false),
        };

        let remote = self
            .transport
            .upload(&artifact, &self.settings.archive, &request.remote_dir)
            .await
            .map_err(|source| UnitError::Upload {
                remote_dir: request.remote_dir.to_string(),
                source,
            })?;
        info!(%remote, "uploaded");

        Ok(Outcome {
            remote,
            uploaded: artifact,
            reduced,
            substitute: (depth > 0).then(|| chart.id.clone()),
        })
    }
}

// -- Tests -------------------------------------------------------------------
