//! Subscriber setup. `RUST_LOG` wins over `-v` when set.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use tracing_subscriber::EnvFilter;

const DATETIME_PLACEHOLDER: &str = "{datetime}";

pub fn init(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        None => builder.with_writer(std::io::stderr).try_init(),
        Some(path) => {
            let path = expand_log_path(path, &Local::now().format("%Y%m%dT%H%M%S").to_string());
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create log directory `{}`", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot open log file `{}`", path.display()))?;

            builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
    }
    .map_err(|e| anyhow!("cannot install log subscriber: {e}"))
}

fn default_directive(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("{}={level}", env!("CARGO_CRATE_NAME"))
}

fn expand_log_path(path: &Path, stamp: &str) -> PathBuf {
    let text = path.to_string_lossy();
    if text.contains(DATETIME_PLACEHOLDER) {
        PathBuf::from(text.replace(DATETIME_PLACEHOLDER, stamp))
    } else {
        path.to_path_buf()
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_raise_level_with_verbosity() {
        assert_eq!(default_directive(0), "chartrelay=info");
        assert_eq!(default_directive(1), "chartrelay=debug");
        assert_eq!(default_directive(5), "chartrelay=trace");
    }

    #[test]
    fn should_stamp_log_file_name() {
        assert_eq!(
            expand_log_path(Path::new("/var/log/relay_{datetime}.log"), "20240101T210000"),
            PathBuf::from("/var/log/relay_20240101T210000.log")
        );
        assert_eq!(
            expand_log_path(Path::new("relay.log"), "x"),
            PathBuf::from("relay.log")
        );
    }
}
