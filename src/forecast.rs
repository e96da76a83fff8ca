//! Forecast runs and forecast-hour sets.

use std::{fmt, str::FromStr};

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

/// Wall-clock hour from which the 12Z run is used instead of the 00Z run.
pub const CUTOVER_HOUR: u32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A forecast initialization time, truncated to a synoptic hour.
pub struct ForecastRun {
    pub init_time: NaiveDateTime,
}

impl ForecastRun {
    /// Applies the cutover rule: from 21:00 the 12Z run of the same day is
    /// current, before that the 00Z run.
    pub fn from_wall_clock(now: NaiveDateTime) -> Self {
        let hour = if now.hour() >= CUTOVER_HOUR { 12 } else { 0 };
        let init_time = now.date().and_time(NaiveTime::MIN) + Duration::hours(hour);

        ForecastRun { init_time }
    }

    pub fn valid_time(&self, fcst_hour: u32) -> NaiveDateTime {
        self.init_time + Duration::hours(i64::from(fcst_hour))
    }
}

impl fmt::Display for ForecastRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Z", self.init_time.format("%Y-%m-%d %H"))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HoursError {
    #[error("empty forecast-hour set")]
    Empty,
    #[error("invalid forecast-hour token `{0}`")]
    Token(String),
    #[error("range `{0}` has a zero step")]
    ZeroStep(String),
}

/// An ordered set of forecast hours.
///
/// Parsed from comma-separated items, each either an integer or a
/// `start:stop[:step]` range with an exclusive stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastHours(Vec<u32>);

impl ForecastHours {
    pub fn hours(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for ForecastHours {
    type Err = HoursError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hours = Vec::new();

        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if item.contains(':') {
                hours.extend(parse_range(item)?);
            } else {
                hours.push(parse_hour(item)?);
            }
        }

        if hours.is_empty() {
            return Err(HoursError::Empty);
        }

        Ok(ForecastHours(hours))
    }
}

fn parse_hour(token: &str) -> Result<u32, HoursError> {
    token
        .trim()
        .parse::<u32>()
        .map_err(|_| HoursError::Token(token.to_string()))
}

fn parse_range(item: &str) -> Result<impl Iterator<Item = u32>, HoursError> {
    let parts: Vec<&str> = item.split(':').collect();
    let (start, stop, step) = match parts.as_slice() {
        [start, stop] => (parse_hour(start)?, parse_hour(stop)?, 1),
        [start, stop, step] => (parse_hour(start)?, parse_hour(stop)?, parse_hour(step)?),
        _ => return Err(HoursError::Token(item.to_string())),
    };
    if step == 0 {
        return Err(HoursError::ZeroStep(item.to_string()));
    }

    Ok((start..stop).step_by(step as usize))
}

// -- Tests -------------------------------------------------------------------
