use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanlensError};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Width of the buckets a time-series metric is computed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "1min")]
    Minute,
    #[default]
    #[serde(rename = "1hour")]
    Hour,
    #[serde(rename = "1day")]
    Day,
    #[serde(rename = "1week")]
    Week,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [Self::Minute, Self::Hour, Self::Day, Self::Week];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "1min",
            Self::Hour => "1hour",
            Self::Day => "1day",
            Self::Week => "1week",
        }
    }

    /// Denominator used by per-second rate expressions. A week counts as one day here,
    /// matching the warehouse rollups the rates are compared against.
    pub fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3600,
            Self::Day | Self::Week => 86_400,
        }
    }

    /// Distance between consecutive bucket starts.
    pub fn step_millis(self) -> i64 {
        match self {
            Self::Minute => MINUTE_MS,
            Self::Hour => HOUR_MS,
            Self::Day => DAY_MS,
            Self::Week => 7 * DAY_MS,
        }
    }
}

impl FromStr for Granularity {
    type Err = SpanlensError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1min" => Ok(Self::Minute),
            "1hour" => Ok(Self::Hour),
            "1day" => Ok(Self::Day),
            "1week" => Ok(Self::Week),
            _ => Err(SpanlensError::Parse(format!("unknown granularity: {s}"))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn granularity_to_second(granularity: Granularity) -> i64 {
    granularity.seconds()
}

/// Bucket start times (epoch ms) covering `[start_ms, end_ms]`. Minute and hour buckets
/// are aligned to their own width, day and week buckets to UTC midnight.
pub fn time_intervals(start_ms: i64, end_ms: i64, granularity: Granularity) -> Vec<i64> {
    if start_ms > end_ms {
        return Vec::new();
    }
    let align = match granularity {
        Granularity::Minute | Granularity::Hour => granularity.step_millis(),
        Granularity::Day | Granularity::Week => DAY_MS,
    };
    let step = granularity.step_millis();
    let Some(mut cursor) = start_ms.checked_sub(start_ms.rem_euclid(align)) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    while cursor <= end_ms {
        out.push(cursor);
        match cursor.checked_add(step) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    out
}

pub fn micros_to_millis(micros: i64) -> i64 {
    micros / 1000
}

pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now()
            - chrono::Duration::from_std(duration).map_err(|e| {
                SpanlensError::Parse(format!("failed to parse duration to chrono: {e}"))
            })?);
    }

    Err(SpanlensError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| SpanlensError::Parse(format!("invalid duration {input}: {e}")))
}
