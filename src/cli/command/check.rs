//! Validate the settings file and list what would run.

use std::path::Path;

use anyhow::Result;

use crate::{config::Settings, reducer::ImageCapability};

use super::load_settings;

pub fn check(config: &Path) -> Result<()> {
    let settings = load_settings(config)?;
    print!("{}", describe(&settings, ImageCapability::detect()));

    Ok(())
}

fn describe(settings: &Settings, capability: ImageCapability) -> String {
    let mut out = String::new();

    for chart in settings.run_order.iter().filter_map(|id| settings.chart(id)) {
        let hours = chart
            .fcst_hours
            .as_ref()
            .unwrap_or(&settings.general.default_hours)
            .hours()
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&format!(
            "{:<24} {}/{} hours {hours}",
            chart.id, chart.source, chart.model
        ));
        if chart.freq > 1 {
            out.push_str(&format!(" every {} days", chart.freq));
        }
        if let Some(sub) = &chart.substitute {
            out.push_str(&format!(" substitute {sub}"));
        }
        if let Some(q) = settings.effective_quality(chart) {
            out.push_str(&format!(" quality {}", q.get()));
        }
        out.push('\n');
    }

    let image_support = if capability.is_available() {
        "available"
    } else {
        "unavailable, charts are relayed unreduced"
    };
    out.push_str(&format!(
        "archive {} into `{}`\nimage support {image_support}\n",
        settings.archive.address, settings.archive.target_dir
    ));

    out
}

// -- Tests -------------------------------------------------------------------
