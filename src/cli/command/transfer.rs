//! Download this run's charts and relay them to the archive.

use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;

use crate::{
    cli::{create_progress_bar, TransferArgs},
    config::Settings,
    forecast::ForecastRun,
    pipeline::{Pipeline, RunSummary},
    reducer::ImageCapability,
    transport::{http::build_client, HttpFtpTransport},
};

use super::{load_settings, wall_clock};

pub async fn transfer(config: &Path, args: &TransferArgs) -> Result<RunSummary> {
    let mut settings = load_settings(config)?;
    if let Some(concurrency) = args.concurrency {
        settings.general.concurrency = concurrency.max(1);
    }
    let chart_ids = select_charts(&settings, &args.charts)?;

    let now = wall_clock(&args.clock);
    let run = ForecastRun::from_wall_clock(now);
    let span = tracing::info_span!("run", init = %run);
    span.in_scope(|| tracing::info!(wall_clock = %now, charts = chart_ids.len(), "starting run"));

    let client = build_client(settings.general.http_timeout).context("cannot build HTTP client")?;
    let transport = HttpFtpTransport::new(client);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, letting in-flight units finish");
                cancel.cancel();
            }
        }
    });

    let pipeline = Pipeline::new(&settings, transport, run, now.date(), span)
        .with_capability(ImageCapability::detect())
        .with_cancellation(cancel);
    let plan = pipeline.plan(&chart_ids);
    let progress = if args.no_progress {
        ProgressBar::hidden()
    } else {
        create_progress_bar(plan.units.len() as u64, format!("Relaying {run} charts"))
    };

    let summary = pipeline.with_progress(progress).run(plan).await;
    interrupt.abort();

    Ok(summary)
}

/// The configured run order, narrowed to `only` when it is not empty.
fn select_charts(settings: &Settings, only: &[String]) -> Result<Vec<String>> {
    if only.is_empty() {
        return Ok(settings.run_order.clone());
    }
    for id in only {
        if settings.chart(id).is_none() {
            bail!("no chart `{id}` in settings");
        }
    }

    Ok(only.to_vec())
}

// -- Tests -------------------------------------------------------------------
