pub mod check;
pub mod copy;
pub mod transfer;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, Utc};
pub use check::check;
pub use copy::copy;
pub use transfer::transfer;

use crate::{cli::ClockArgs, config::Settings};

const SETTINGS_FILE: &str = "settings.yaml";

/// The explicit settings path, or `<config dir>/chartrelay/settings.yaml`,
/// or `settings.yaml` in the working directory.
pub fn settings_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    dirs::config_dir()
        .map(|dir| dir.join(env!("CARGO_PKG_NAME")).join(SETTINGS_FILE))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let settings = Settings::load(path)
        .with_context(|| format!("invalid settings in `{}`", path.display()))?;
    tracing::debug!(path = %path.display(), charts = settings.charts.len(), "settings loaded");

    Ok(settings)
}

/// The wall-clock time the run is based on.
pub fn wall_clock(clock: &ClockArgs) -> NaiveDateTime {
    match (clock.at, clock.local_time) {
        (Some(at), _) => at,
        (None, true) => Local::now().naive_local(),
        (None, false) => Utc::now().naive_utc(),
    }
}

// -- Tests -------------------------------------------------------------------
