//! Copy this run's files from one archive directory to another.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::{
    cli::{create_spinner, ClockArgs},
    config::{CopyJob, Settings},
    forecast::ForecastRun,
    template::{Key, Vars},
    transport::{ftp::copy_blocking, RemotePath},
};

use super::{load_settings, wall_clock};

/// Returns the names that were copied.
pub async fn copy(config: &Path, clock: &ClockArgs) -> Result<Vec<String>> {
    let settings = load_settings(config)?;
    let job = settings
        .copy
        .as_ref()
        .ok_or_else(|| anyhow!("no `copy` section in `{}`", config.display()))?;

    let run = ForecastRun::from_wall_clock(wall_clock(clock));
    let (source_dir, target_dir, names) = render_job(job, &settings, &run)?;
    tracing::info!(init = %run, from = %source_dir, to = %target_dir, files = names.len(), "copying");

    let spinner = create_spinner(format!("Copying {source_dir} to {target_dir}"));
    let archive = settings.archive.clone();
    let copied = tokio::task::spawn_blocking(move || {
        copy_blocking(&archive, &source_dir, &target_dir, &names)
    })
    .await
    .context("copy worker failed")?
    .context("archive copy failed")?;
    spinner.finish_with_message(format!("Copied {} files", copied.len()));

    Ok(copied)
}

/// Source directory, target directory and the wanted file names, one per
/// default forecast hour.
fn render_job(
    job: &CopyJob,
    settings: &Settings,
    run: &ForecastRun,
) -> Result<(RemotePath, RemotePath, Vec<String>)> {
    let day = Vars::new().time(Key::FcstDay, run.init_time);
    let source_dir = RemotePath::parse(&job.source_dir.render(&day)?);
    let target_dir = RemotePath::parse(&job.target_dir.render(&day)?);

    let names = settings
        .general
        .default_hours
        .hours()
        .iter()
        .map(|&hour| {
            let vars = Vars::new()
                .time(Key::FcstDay, run.init_time)
                .int(Key::FcstHour, i64::from(hour));
            job.file_mask.render(&vars)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((source_dir, target_dir, names))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::NaiveDate;

    use super::*;
    use crate::config::tests::sample;

    #[test]
    fn should_render_copy_job_for_default_hours() {
        let settings = sample();
        let job = settings.copy.as_ref().unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(22, 15, 0)
            .unwrap();
        let run = ForecastRun::from_wall_clock(at);

        let (source, target, names) = render_job(job, &settings, &run).unwrap();

        assert_eq!(source.to_string(), "project/20240309/META");
        assert_eq!(target.to_string(), "public/20240309");
        assert_eq!(names, ["MSLP_000.png", "MSLP_006.png", "MSLP_012.png"]);
    }
}
