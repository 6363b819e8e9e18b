//! Feed entities, lookup filters and the store interface the schedule
//! pipeline reads through. Every entity is scoped by `agency_key`.

use std::collections::BTreeSet;
use std::future::Future;

use chrono::Weekday;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct Agency {
    pub agency_key: String,
    pub agency_id: Option<String>,
    pub agency_name: String,
    pub agency_url: Option<String>,
    pub agency_timezone: Option<String>,
    pub agency_lang: Option<String>,
    pub agency_phone: Option<String>,
    pub agency_fare_url: Option<String>,
    /// Centre of the agency's service area, used by the nearby search.
    pub agency_center_lat: Option<f64>,
    pub agency_center_lon: Option<f64>,
    pub agency_bounds_sw_lat: Option<f64>,
    pub agency_bounds_sw_lon: Option<f64>,
    pub agency_bounds_ne_lat: Option<f64>,
    pub agency_bounds_ne_lon: Option<f64>,
    /// Milliseconds since the Unix epoch.
    pub date_last_updated: Option<i64>,
}

impl Agency {
    pub fn center(&self) -> Option<(f64, f64)> {
        self.agency_center_lat.zip(self.agency_center_lon)
    }
}

/// Weekly service pattern. Dates are `YYYYMMDD`, so string comparison is date
/// comparison.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalendarRow {
    pub agency_key: String,
    pub service_id: String,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub start_date: String,
    pub end_date: String,
}

impl CalendarRow {
    pub fn runs_on(&self, weekday: Weekday) -> bool {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    /// Inclusive on both ends.
    pub fn covers(&self, date: &str) -> bool {
        self.start_date.as_str() <= date && date <= self.end_date.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionType {
    Added,
    Removed,
}

impl ExceptionType {
    /// GTFS `exception_type` codes: 1 adds service, 2 removes it.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ExceptionType::Added),
            2 => Some(ExceptionType::Removed),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ExceptionType::Added => 1,
            ExceptionType::Removed => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalendarDate {
    pub agency_key: String,
    pub service_id: String,
    pub date: String,
    pub exception_type: ExceptionType,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct Trip {
    pub agency_key: String,
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub trip_headsign: Option<String>,
    pub trip_short_name: Option<String>,
    #[serde(default)]
    pub direction_id: i64,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct StopTime {
    pub agency_key: String,
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: i64,
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_headsign: Option<String>,
    pub pickup_type: Option<String>,
    pub drop_off_type: Option<String>,
    pub shape_dist_traveled: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct Stop {
    pub agency_key: String,
    pub stop_id: String,
    pub stop_code: Option<String>,
    pub stop_name: String,
    pub stop_desc: Option<String>,
    pub stop_lat: f64,
    pub stop_lon: f64,
    pub zone_id: Option<String>,
    pub stop_url: Option<String>,
    pub location_type: Option<String>,
    pub parent_station: Option<String>,
    pub stop_timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct Route {
    pub agency_key: String,
    pub route_id: String,
    pub agency_id: Option<String>,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_desc: Option<String>,
    pub route_type: i64,
    pub route_url: Option<String>,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
}

/// Equality or set-membership on an indexed id column. An empty `In` set
/// matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdFilter {
    #[default]
    Any,
    Equals(String),
    In(BTreeSet<String>),
}

impl IdFilter {
    pub fn equals(value: impl Into<String>) -> Self {
        IdFilter::Equals(value.into())
    }

    pub fn in_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IdFilter::In(values.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            IdFilter::Any => true,
            IdFilter::Equals(expected) => expected == value,
            IdFilter::In(values) => values.contains(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripFilter {
    pub trip_id: IdFilter,
    pub route_id: IdFilter,
    pub service_id: IdFilter,
}

/// Inclusive bounds on `departure_time`, in canonical width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartureWindow {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl DepartureWindow {
    pub fn contains(&self, departure_time: &str) -> bool {
        self.from
            .as_deref()
            .map_or(true, |from| from <= departure_time)
            && self.to.as_deref().map_or(true, |to| departure_time <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopTimeFilter {
    pub trip_id: IdFilter,
    pub stop_id: IdFilter,
    pub departure: DepartureWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTimeOrder {
    /// `stop_sequence`, then `trip_id`.
    StopSequence,
    /// `departure_time`, then `trip_id`, then `stop_sequence`.
    DepartureTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopFilter {
    pub stop_id: IdFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFilter {
    pub route_id: IdFilter,
}

/// Latitude/longitude square, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(lat: f64, lon: f64, radius: f64) -> Self {
        BoundingBox {
            min_lat: lat - radius,
            max_lat: lat + radius,
            min_lon: lon - radius,
            max_lon: lon + radius,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.min_lat <= lat && lat <= self.max_lat && self.min_lon <= lon && lon <= self.max_lon
    }
}

/// Read-only access to the stored feed. Implementations must apply the
/// filters exactly; the pipeline does not re-check them.
pub trait FeedStore: Send + Sync {
    fn find_agencies(&self) -> impl Future<Output = Result<Vec<Agency>, StoreError>> + Send;

    /// Calendar rows of the agency that run on `weekday` and whose date range
    /// contains `date` (`YYYYMMDD`).
    fn find_calendar_rows(
        &self,
        agency_key: &str,
        weekday: Weekday,
        date: &str,
    ) -> impl Future<Output = Result<Vec<CalendarRow>, StoreError>> + Send;

    fn find_calendar_dates(
        &self,
        agency_key: &str,
        date: &str,
    ) -> impl Future<Output = Result<Vec<CalendarDate>, StoreError>> + Send;

    fn find_trips(
        &self,
        agency_key: &str,
        filter: &TripFilter,
    ) -> impl Future<Output = Result<Vec<Trip>, StoreError>> + Send;

    fn find_stop_times(
        &self,
        agency_key: &str,
        filter: &StopTimeFilter,
        order: StopTimeOrder,
    ) -> impl Future<Output = Result<Vec<StopTime>, StoreError>> + Send;

    fn find_stops(
        &self,
        agency_key: &str,
        filter: &StopFilter,
    ) -> impl Future<Output = Result<Vec<Stop>, StoreError>> + Send;

    fn find_routes(
        &self,
        agency_key: &str,
        filter: &RouteFilter,
    ) -> impl Future<Output = Result<Vec<Route>, StoreError>> + Send;

    /// Stops of every agency inside `bounds`.
    fn find_stops_within(
        &self,
        bounds: &BoundingBox,
    ) -> impl Future<Output = Result<Vec<Stop>, StoreError>> + Send;

    /// Agencies whose centre lies inside `bounds`. Agencies without a centre
    /// are never returned.
    fn find_agencies_within(
        &self,
        bounds: &BoundingBox,
    ) -> impl Future<Output = Result<Vec<Agency>, StoreError>> + Send;
}
