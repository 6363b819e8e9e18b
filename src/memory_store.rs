use std::{path::Path, sync::Arc};

use chrono::Weekday;

use crate::error::StoreError;
use crate::feed::*;
use crate::time_codec::normalize_width;

/// Every entity of one or more feeds, as plain vectors. Serializes to the
/// JSON snapshot format accepted by `--snapshot`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FeedSnapshot {
    #[serde(default)]
    pub agencies: Vec<Agency>,
    #[serde(default)]
    pub calendars: Vec<CalendarRow>,
    #[serde(default)]
    pub calendar_dates: Vec<CalendarDate>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub stop_times: Vec<StopTime>,
    #[serde(default)]
    pub trips: Vec<Trip>,
}

/// A [`FeedStore`] answering every lookup by scanning an immutable snapshot.
#[derive(Debug, Clone)]
pub struct MemoryFeedStore {
    data: Arc<FeedSnapshot>,
}

impl MemoryFeedStore {
    pub fn new(mut snapshot: FeedSnapshot) -> Self {
        for stop_time in &mut snapshot.stop_times {
            stop_time.arrival_time = normalize_width(&stop_time.arrival_time);
            stop_time.departure_time = normalize_width(&stop_time.departure_time);
        }
        MemoryFeedStore {
            data: Arc::new(snapshot),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        log::info!("Loading feed snapshot from {:?}", path);
        let text = tokio::fs::read_to_string(path).await?;
        let snapshot: FeedSnapshot = serde_json::from_str(&text)?;
        log::info!(
            "Loaded {} trips and {} stop times",
            snapshot.trips.len(),
            snapshot.stop_times.len()
        );
        Ok(Self::new(snapshot))
    }
}

fn select<T: Clone>(rows: &[T], predicate: impl Fn(&T) -> bool) -> Vec<T> {
    rows.iter().filter(|row| predicate(row)).cloned().collect()
}

impl FeedStore for MemoryFeedStore {
    async fn find_agencies(&self) -> Result<Vec<Agency>, StoreError> {
        let mut agencies = self.data.agencies.clone();
        agencies.sort_by(|a, b| a.agency_key.cmp(&b.agency_key));
        Ok(agencies)
    }

    async fn find_calendar_rows(
        &self,
        agency_key: &str,
        weekday: Weekday,
        date: &str,
    ) -> Result<Vec<CalendarRow>, StoreError> {
        Ok(select(&self.data.calendars, |row| {
            row.agency_key == agency_key && row.runs_on(weekday) && row.covers(date)
        }))
    }

    async fn find_calendar_dates(
        &self,
        agency_key: &str,
        date: &str,
    ) -> Result<Vec<CalendarDate>, StoreError> {
        Ok(select(&self.data.calendar_dates, |row| {
            row.agency_key == agency_key && row.date == date
        }))
    }

    async fn find_trips(
        &self,
        agency_key: &str,
        filter: &TripFilter,
    ) -> Result<Vec<Trip>, StoreError> {
        let mut trips = select(&self.data.trips, |trip| {
            trip.agency_key == agency_key
                && filter.trip_id.matches(&trip.trip_id)
                && filter.route_id.matches(&trip.route_id)
                && filter.service_id.matches(&trip.service_id)
        });
        trips.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
        Ok(trips)
    }

    async fn find_stop_times(
        &self,
        agency_key: &str,
        filter: &StopTimeFilter,
        order: StopTimeOrder,
    ) -> Result<Vec<StopTime>, StoreError> {
        let mut stop_times = select(&self.data.stop_times, |stop_time| {
            stop_time.agency_key == agency_key
                && filter.trip_id.matches(&stop_time.trip_id)
                && filter.stop_id.matches(&stop_time.stop_id)
                && filter.departure.contains(&stop_time.departure_time)
        });
        match order {
            StopTimeOrder::StopSequence => stop_times.sort_by(|a, b| {
                (a.stop_sequence, &a.trip_id).cmp(&(b.stop_sequence, &b.trip_id))
            }),
            StopTimeOrder::DepartureTime => stop_times.sort_by(|a, b| {
                (&a.departure_time, &a.trip_id, a.stop_sequence).cmp(&(
                    &b.departure_time,
                    &b.trip_id,
                    b.stop_sequence,
                ))
            }),
        }
        Ok(stop_times)
    }

    async fn find_stops(
        &self,
        agency_key: &str,
        filter: &StopFilter,
    ) -> Result<Vec<Stop>, StoreError> {
        let mut stops = select(&self.data.stops, |stop| {
            stop.agency_key == agency_key && filter.stop_id.matches(&stop.stop_id)
        });
        stops.sort_by(|a, b| a.stop_id.cmp(&b.stop_id));
        Ok(stops)
    }

    async fn find_routes(
        &self,
        agency_key: &str,
        filter: &RouteFilter,
    ) -> Result<Vec<Route>, StoreError> {
        let mut routes = select(&self.data.routes, |route| {
            route.agency_key == agency_key && filter.route_id.matches(&route.route_id)
        });
        routes.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        Ok(routes)
    }

    async fn find_stops_within(&self, bounds: &BoundingBox) -> Result<Vec<Stop>, StoreError> {
        Ok(select(&self.data.stops, |stop| {
            bounds.contains(stop.stop_lat, stop.stop_lon)
        }))
    }

    async fn find_agencies_within(
        &self,
        bounds: &BoundingBox,
    ) -> Result<Vec<Agency>, StoreError> {
        Ok(select(&self.data.agencies, |agency| {
            agency
                .center()
                .is_some_and(|(lat, lon)| bounds.contains(lat, lon))
        }))
    }
}
