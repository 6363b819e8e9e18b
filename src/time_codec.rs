//! Conversion between GTFS day-offset times (`HH:MM:SS`, hours may exceed 23)
//! and plain second counts since local midnight.
//!
//! Stop times are never represented with a clock type: a trip leaving at
//! `25:10:00` belongs to the service day it started on, which `NaiveTime`
//! cannot express.

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Timelike};

use crate::error::ScheduleError;

const SECONDS_PER_HOUR: i64 = 60 * 60;
const SECONDS_PER_MINUTE: i64 = 60;

/// Values that can be read as seconds since local midnight.
pub trait DaySeconds {
    fn day_seconds(&self) -> Result<i64, ScheduleError>;
}

impl DaySeconds for str {
    fn day_seconds(&self) -> Result<i64, ScheduleError> {
        let malformed = || ScheduleError::MalformedTime(self.to_string());
        let trimmed = self.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let parts: Vec<&str> = body.split(':').collect();
        if parts.len() != 3 {
            return Err(malformed());
        }

        let mut total: i64 = 0;
        for (part, unit) in parts.iter().zip([SECONDS_PER_HOUR, SECONDS_PER_MINUTE, 1]) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            let value: i64 = part.parse().map_err(|_| malformed())?;
            total = value
                .checked_mul(unit)
                .and_then(|seconds| total.checked_add(seconds))
                .ok_or_else(malformed)?;
        }

        Ok(if negative { -total } else { total })
    }
}

impl DaySeconds for String {
    fn day_seconds(&self) -> Result<i64, ScheduleError> {
        self.as_str().day_seconds()
    }
}

impl DaySeconds for NaiveTime {
    fn day_seconds(&self) -> Result<i64, ScheduleError> {
        Ok(wall_clock_seconds(self))
    }
}

impl DaySeconds for NaiveDateTime {
    fn day_seconds(&self) -> Result<i64, ScheduleError> {
        Ok(wall_clock_seconds(self))
    }
}

impl<Tz: TimeZone> DaySeconds for DateTime<Tz> {
    fn day_seconds(&self) -> Result<i64, ScheduleError> {
        Ok(wall_clock_seconds(self))
    }
}

/// Hours, minutes and seconds of a wall-clock timestamp, as seconds since midnight.
pub fn wall_clock_seconds<T: Timelike>(time: &T) -> i64 {
    i64::from(time.hour()) * SECONDS_PER_HOUR
        + i64::from(time.minute()) * SECONDS_PER_MINUTE
        + i64::from(time.second())
}

/// Parses either a `H:MM:SS` string or a wall-clock timestamp. There is no
/// upper bound: `24:15:00` is 87300.
pub fn parse_to_seconds<T: DaySeconds + ?Sized>(value: &T) -> Result<i64, ScheduleError> {
    value.day_seconds()
}

/// Renders seconds as `HH:MM:SS`. Hours are never truncated or wrapped, and
/// negative values keep their sign.
pub fn format_from_seconds(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let magnitude = seconds.unsigned_abs();
    format!(
        "{sign}{:02}:{:02}:{:02}",
        magnitude / 3600,
        magnitude % 3600 / 60,
        magnitude % 60
    )
}

/// A time supplied either as a second count or as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeValue {
    Seconds(i64),
    Text(String),
}

impl From<i64> for TimeValue {
    fn from(value: i64) -> Self {
        TimeValue::Seconds(value)
    }
}

impl From<&str> for TimeValue {
    fn from(value: &str) -> Self {
        TimeValue::Text(value.to_string())
    }
}

impl From<String> for TimeValue {
    fn from(value: String) -> Self {
        TimeValue::Text(value)
    }
}

/// Like [`format_from_seconds`], but text that is already `H+:MM:SS` is
/// returned untouched.
pub fn format_time(value: impl Into<TimeValue>) -> Result<String, ScheduleError> {
    match value.into() {
        TimeValue::Seconds(seconds) => Ok(format_from_seconds(seconds)),
        TimeValue::Text(text) if is_canonical(&text) => Ok(text),
        TimeValue::Text(text) => parse_to_seconds(text.as_str()).map(format_from_seconds),
    }
}

/// `H+:MM:SS` with digits only.
pub fn is_canonical(value: &str) -> bool {
    let mut parts = value.split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    !hours.is_empty()
        && digits(hours)
        && minutes.len() == 2
        && digits(minutes)
        && seconds.len() == 2
        && digits(seconds)
}

/// Left-pads the hour component to two digits so that `7:05:00` sorts before
/// `10:00:00` as a string.
pub fn normalize_width(time: &str) -> String {
    let time = time.trim();
    match time.split_once(':') {
        Some((hours, rest)) if hours.len() < 2 => format!("{hours:0>2}:{rest}"),
        _ => time.to_string(),
    }
}
