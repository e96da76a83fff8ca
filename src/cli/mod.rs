//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDateTime;
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Relays weather charts from met-office websites to an FTP archive
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file [default: <config dir>/chartrelay/settings.yaml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Append logs to this file instead of stderr; `{datetime}` is replaced
    /// by the start time
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download this run's charts and relay them to the archive
    Transfer(TransferArgs),
    /// Copy this run's files between archive directories
    Copy(ClockArgs),
    /// Validate the settings file and list what would run
    Check,
}

#[derive(Args, Debug, Default)]
pub struct ClockArgs {
    /// Pretend the wall clock reads this time (YYYY-MM-DDTHH:MM)
    #[arg(long, value_parser = parse_wall_clock)]
    pub at: Option<NaiveDateTime>,

    /// Apply the run cutover to local time instead of UTC
    #[arg(long)]
    pub local_time: bool,
}

#[derive(Args, Debug, Default)]
pub struct TransferArgs {
    #[command(flatten)]
    pub clock: ClockArgs,

    /// Only these charts (repeatable)
    #[arg(long = "chart")]
    pub charts: Vec<String>,

    /// Units of work to run at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

fn parse_wall_clock(s: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| format!("`{s}` is not a YYYY-MM-DDTHH:MM time"))
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    )
}

// -- Tests -------------------------------------------------------------------
