use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime};

use crate::error::ScheduleError;
use crate::feed::{ExceptionType, FeedStore};

/// Calendar dates are stored as `YYYYMMDD`.
pub const SERVICE_DATE_FORMAT: &str = "%Y%m%d";

const DATE_INPUT_FORMATS: [&str; 4] = ["%Y-%m-%d", SERVICE_DATE_FORMAT, "%Y/%m/%d", "%m/%d/%Y"];

/// Whether `calendar_dates` exception rows change the active service set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ExceptionPolicy {
    /// Weekly calendar rows only.
    #[default]
    Ignore,
    /// Added exceptions join the set, removed exceptions leave it.
    Apply,
}

pub fn parse_service_date(value: &str) -> Result<NaiveDate, ScheduleError> {
    let value = value.trim();
    for format in DATE_INPUT_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
        return Ok(date_time.date_naive());
    }
    if let Ok(date_time) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(date_time.date());
    }
    Err(ScheduleError::InvalidDate(value.to_string()))
}

pub fn format_service_date(date: NaiveDate) -> String {
    date.format(SERVICE_DATE_FORMAT).to_string()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Resolves which service ids run on a given day for an agency.
#[derive(Debug, Clone)]
pub struct ServiceCalendar<S> {
    store: S,
    exceptions: ExceptionPolicy,
}

impl<S: FeedStore> ServiceCalendar<S> {
    pub fn new(store: S, exceptions: ExceptionPolicy) -> Self {
        ServiceCalendar { store, exceptions }
    }

    /// `date` is parsed before any lookup happens; `None` means today.
    pub async fn resolve(
        &self,
        agency_key: &str,
        date: Option<&str>,
    ) -> Result<BTreeSet<String>, ScheduleError> {
        let date = match date {
            Some(value) => parse_service_date(value)?,
            None => today(),
        };
        self.services_on(agency_key, date).await
    }

    pub async fn services_on(
        &self,
        agency_key: &str,
        date: NaiveDate,
    ) -> Result<BTreeSet<String>, ScheduleError> {
        let date_formatted = format_service_date(date);
        let weekday = date.weekday();
        log::debug!(
            "Finding services of {} running on {:?} {}",
            agency_key,
            weekday,
            date_formatted
        );

        let rows = self
            .store
            .find_calendar_rows(agency_key, weekday, &date_formatted)
            .await?;
        let mut service_ids: BTreeSet<String> =
            rows.into_iter().map(|row| row.service_id).collect();

        if self.exceptions == ExceptionPolicy::Apply {
            let exceptions = self
                .store
                .find_calendar_dates(agency_key, &date_formatted)
                .await?;
            for exception in exceptions {
                match exception.exception_type {
                    ExceptionType::Added => {
                        service_ids.insert(exception.service_id);
                    }
                    ExceptionType::Removed => {
                        service_ids.remove(&exception.service_id);
                    }
                }
            }
        }

        log::info!(
            "{} services active for {} on {}",
            service_ids.len(),
            agency_key,
            date_formatted
        );
        Ok(service_ids)
    }
}
