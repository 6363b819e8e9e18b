//! Joins services, trips, stop times, stops and routes into the nested
//! schedule objects returned to callers.
//!
//! Each operation is a chain of dependent lookups. Any store error aborts the
//! chain and is returned as is. Rows whose parent is missing under the
//! current filters (a stop time of an inactive trip, a trip whose route was
//! filtered out) are dropped rather than reported.

use std::collections::{BTreeSet, HashMap};

use chrono::Local;
use futures::future::try_join_all;

use crate::error::ScheduleError;
use crate::feed::*;
use crate::proximity::{self, DEFAULT_AGENCY_MAX_DISTANCE_KM, DEFAULT_MAX_DISTANCE_KM};
use crate::service_calendar::{parse_service_date, today, ExceptionPolicy, ServiceCalendar};
use crate::time_codec::{format_from_seconds, parse_to_seconds};

/// A stop served by a route, tagged with the first visit found for it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RouteStop {
    #[serde(flatten)]
    pub stop: Stop,
    pub direction_id: i64,
    pub stop_sequence: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScheduledTrip {
    #[serde(flatten)]
    pub trip: Trip,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Departure {
    #[serde(flatten)]
    pub stop_time: StopTime,
    pub trip: ScheduledTrip,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TripStop {
    #[serde(flatten)]
    pub stop_time: StopTime,
    pub stop: Vec<Stop>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct DepartureQuery {
    pub stop_id: String,
    pub route_id: Option<String>,
    /// Service day, defaults to today.
    pub date: Option<String>,
    pub from_time: Option<String>,
    pub to_time: Option<String>,
    /// Used to derive `to_time` from `from_time` when `to_time` is absent.
    pub time_offset: Option<String>,
}

/// Seconds of a window bound. Window bounds are never negative.
fn window_seconds(time: &str) -> Result<i64, ScheduleError> {
    let seconds = parse_to_seconds(time)?;
    if seconds < 0 {
        return Err(ScheduleError::MalformedTime(time.to_string()));
    }
    Ok(seconds)
}

/// Validated bounds for a departure query, rendered as canonical `HH:MM:SS`
/// so they compare correctly against stored departure times.
fn departure_window(query: &DepartureQuery) -> Result<DepartureWindow, ScheduleError> {
    let mut from = query.from_time.as_deref().map(window_seconds).transpose()?;
    let to = match (&query.to_time, &query.time_offset) {
        (Some(to_time), _) => Some(window_seconds(to_time)?),
        (None, Some(time_offset)) => {
            let offset = window_seconds(time_offset)?;
            let start = match from {
                Some(start) => start,
                None => {
                    let now = parse_to_seconds(&Local::now())?;
                    from = Some(now);
                    now
                }
            };
            let end = start
                .checked_add(offset)
                .ok_or_else(|| ScheduleError::MalformedTime(time_offset.clone()))?;
            Some(end)
        }
        (None, None) => None,
    };

    if let (Some(from), Some(to)) = (from, to) {
        if to < from {
            return Err(ScheduleError::InvertedWindow {
                from: format_from_seconds(from),
                to: format_from_seconds(to),
            });
        }
    }

    Ok(DepartureWindow {
        from: from.map(format_from_seconds),
        to: to.map(format_from_seconds),
    })
}

#[derive(Debug, Clone)]
pub struct SchedulePipeline<S> {
    store: S,
    calendar: ServiceCalendar<S>,
}

impl<S: FeedStore + Clone> SchedulePipeline<S> {
    pub fn new(store: S, exceptions: ExceptionPolicy) -> Self {
        SchedulePipeline {
            calendar: ServiceCalendar::new(store.clone(), exceptions),
            store,
        }
    }

    pub async fn list_agencies(&self) -> Result<Vec<Agency>, ScheduleError> {
        Ok(self.store.find_agencies().await?)
    }

    pub async fn list_routes(&self, agency_key: &str) -> Result<Vec<Route>, ScheduleError> {
        Ok(self
            .store
            .find_routes(agency_key, &RouteFilter::default())
            .await?)
    }

    pub async fn active_services(
        &self,
        agency_key: &str,
        date: Option<&str>,
    ) -> Result<BTreeSet<String>, ScheduleError> {
        self.calendar.resolve(agency_key, date).await
    }

    /// Stops served by `route_id`, ordered by `(stop_sequence, direction_id,
    /// stop_id)`. With a date, only trips of services active that day count.
    pub async fn list_stops_for_route(
        &self,
        agency_key: &str,
        route_id: &str,
        date: Option<&str>,
    ) -> Result<Vec<RouteStop>, ScheduleError> {
        let service_id = match date {
            Some(date) => IdFilter::In(self.calendar.resolve(agency_key, Some(date)).await?),
            None => IdFilter::Any,
        };

        log::info!("Finding trips of route {} ({})", route_id, agency_key);
        let trips = self
            .store
            .find_trips(
                agency_key,
                &TripFilter {
                    route_id: IdFilter::equals(route_id),
                    service_id,
                    ..Default::default()
                },
            )
            .await?;
        let direction_by_trip: HashMap<&str, i64> = trips
            .iter()
            .map(|trip| (trip.trip_id.as_str(), trip.direction_id))
            .collect();

        log::info!("Finding stop times of {} trips", trips.len());
        let stop_times = self
            .store
            .find_stop_times(
                agency_key,
                &StopTimeFilter {
                    trip_id: IdFilter::in_set(direction_by_trip.keys().copied()),
                    ..Default::default()
                },
                StopTimeOrder::StopSequence,
            )
            .await?;

        // First visit of each stop in sequence order.
        let mut first_visit: HashMap<&str, (i64, i64)> = HashMap::new();
        for stop_time in &stop_times {
            match direction_by_trip.get(stop_time.trip_id.as_str()) {
                Some(direction_id) => {
                    first_visit
                        .entry(stop_time.stop_id.as_str())
                        .or_insert((stop_time.stop_sequence, *direction_id));
                }
                None => log::debug!(
                    "Dropping stop time of trip {} outside route {}",
                    stop_time.trip_id,
                    route_id
                ),
            }
        }

        log::info!("Finding {} stops", first_visit.len());
        let stops = self
            .store
            .find_stops(
                agency_key,
                &StopFilter {
                    stop_id: IdFilter::in_set(first_visit.keys().copied()),
                },
            )
            .await?;

        let mut route_stops: Vec<RouteStop> = stops
            .into_iter()
            .filter_map(|stop| {
                let (stop_sequence, direction_id) = *first_visit.get(stop.stop_id.as_str())?;
                Some(RouteStop {
                    stop,
                    direction_id,
                    stop_sequence,
                })
            })
            .collect();
        route_stops.sort_by(|a, b| {
            (a.stop_sequence, a.direction_id, &a.stop.stop_id).cmp(&(
                b.stop_sequence,
                b.direction_id,
                &b.stop.stop_id,
            ))
        });
        Ok(route_stops)
    }

    /// Departures from a stop on one service day, earliest first, each with
    /// its trip and route nested.
    pub async fn list_departures_for_stop(
        &self,
        agency_key: &str,
        query: &DepartureQuery,
    ) -> Result<Vec<Departure>, ScheduleError> {
        let date = match query.date.as_deref() {
            Some(value) => parse_service_date(value)?,
            None => today(),
        };
        let departure = departure_window(query)?;
        let service_ids = self.calendar.services_on(agency_key, date).await?;

        log::info!(
            "Finding departures from stop {} between {:?} and {:?}",
            query.stop_id,
            departure.from,
            departure.to
        );
        let stop_times = self
            .store
            .find_stop_times(
                agency_key,
                &StopTimeFilter {
                    stop_id: IdFilter::equals(query.stop_id.as_str()),
                    departure,
                    ..Default::default()
                },
                StopTimeOrder::DepartureTime,
            )
            .await?;

        let trips = self
            .store
            .find_trips(
                agency_key,
                &TripFilter {
                    trip_id: IdFilter::in_set(stop_times.iter().map(|st| st.trip_id.as_str())),
                    service_id: IdFilter::In(service_ids),
                    ..Default::default()
                },
            )
            .await?;
        let trip_by_id: HashMap<&str, &Trip> = trips
            .iter()
            .map(|trip| (trip.trip_id.as_str(), trip))
            .collect();

        let scheduled: Vec<(StopTime, &Trip)> = stop_times
            .into_iter()
            .filter_map(|stop_time| {
                let trip = *trip_by_id.get(stop_time.trip_id.as_str())?;
                Some((stop_time, trip))
            })
            .collect();
        log::info!("{} departures run on {}", scheduled.len(), date);

        let route_id = match &query.route_id {
            Some(route_id) => IdFilter::equals(route_id.as_str()),
            None => IdFilter::in_set(scheduled.iter().map(|(_, trip)| trip.route_id.as_str())),
        };
        let routes = self
            .store
            .find_routes(agency_key, &RouteFilter { route_id })
            .await?;
        let route_by_id: HashMap<&str, &Route> = routes
            .iter()
            .map(|route| (route.route_id.as_str(), route))
            .collect();

        Ok(scheduled
            .into_iter()
            .filter_map(|(stop_time, trip)| {
                let route = *route_by_id.get(trip.route_id.as_str())?;
                Some(Departure {
                    stop_time,
                    trip: ScheduledTrip {
                        trip: trip.clone(),
                        route: route.clone(),
                    },
                })
            })
            .collect())
    }

    /// Stop times of a trip in sequence order, each with its stop record.
    /// The stop lookups run concurrently.
    pub async fn list_stops_for_trip(
        &self,
        agency_key: &str,
        trip_id: &str,
    ) -> Result<Vec<TripStop>, ScheduleError> {
        let stop_times = self
            .store
            .find_stop_times(
                agency_key,
                &StopTimeFilter {
                    trip_id: IdFilter::equals(trip_id),
                    ..Default::default()
                },
                StopTimeOrder::StopSequence,
            )
            .await?;
        log::info!("Finding stops of {} stop times", stop_times.len());

        let lookups = stop_times.into_iter().map(|stop_time| async move {
            let filter = StopFilter {
                stop_id: IdFilter::equals(stop_time.stop_id.as_str()),
            };
            let stop = self.store.find_stops(agency_key, &filter).await?;
            Ok::<_, ScheduleError>(TripStop { stop_time, stop })
        });
        try_join_all(lookups).await
    }

    /// Stops of any agency near a point. Without `max_distance` the radius is
    /// 10 kilometers whatever `unit` says.
    pub async fn stops_nearby(
        &self,
        lat: f64,
        lon: f64,
        max_distance: Option<f64>,
        unit: Option<&str>,
    ) -> Result<Vec<Stop>, ScheduleError> {
        let radius = proximity::search_radius(max_distance, unit, DEFAULT_MAX_DISTANCE_KM)?;
        log::info!("Finding stops within {} degrees of {},{}", radius, lat, lon);

        let candidates = self
            .store
            .find_stops_within(&BoundingBox::around(lat, lon, radius))
            .await?;
        Ok(proximity::rank_nearby(candidates, lat, lon, radius))
    }

    /// Agencies whose service-area centre is near a point. The default radius
    /// is 100 kilometers.
    pub async fn agencies_nearby(
        &self,
        lat: f64,
        lon: f64,
        max_distance: Option<f64>,
        unit: Option<&str>,
    ) -> Result<Vec<Agency>, ScheduleError> {
        let radius =
            proximity::search_radius(max_distance, unit, DEFAULT_AGENCY_MAX_DISTANCE_KM)?;
        log::info!("Finding agencies within {} degrees of {},{}", radius, lat, lon);

        let candidates = self
            .store
            .find_agencies_within(&BoundingBox::around(lat, lon, radius))
            .await?;
        Ok(proximity::rank_nearby(candidates, lat, lon, radius))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory_store::{FeedSnapshot, MemoryFeedStore};
    use chrono::Weekday;

    const MONDAY: &str = "2024-06-10";
    const SATURDAY: &str = "2024-06-15";
    const SUNDAY: &str = "2024-06-16";

    fn calendar(service_id: &str, weekdays: bool, saturday: bool) -> CalendarRow {
        CalendarRow {
            agency_key: "A".to_string(),
            service_id: service_id.to_string(),
            monday: weekdays,
            tuesday: weekdays,
            wednesday: weekdays,
            thursday: weekdays,
            friday: weekdays,
            saturday,
            sunday: false,
            start_date: "20240101".to_string(),
            end_date: "20241231".to_string(),
        }
    }

    fn trip(trip_id: &str, route_id: &str, service_id: &str, direction_id: i64) -> Trip {
        Trip {
            agency_key: "A".to_string(),
            trip_id: trip_id.to_string(),
            route_id: route_id.to_string(),
            service_id: service_id.to_string(),
            trip_headsign: None,
            trip_short_name: None,
            direction_id,
            block_id: None,
            shape_id: None,
        }
    }

    fn stop_time(trip_id: &str, stop_id: &str, sequence: i64, departure: &str) -> StopTime {
        StopTime {
            agency_key: "A".to_string(),
            trip_id: trip_id.to_string(),
            stop_id: stop_id.to_string(),
            stop_sequence: sequence,
            arrival_time: departure.to_string(),
            departure_time: departure.to_string(),
            stop_headsign: None,
            pickup_type: None,
            drop_off_type: None,
            shape_dist_traveled: None,
        }
    }

    fn stop(stop_id: &str, lat: f64, lon: f64) -> Stop {
        Stop {
            agency_key: "A".to_string(),
            stop_id: stop_id.to_string(),
            stop_code: None,
            stop_name: format!("Stop {stop_id}"),
            stop_desc: None,
            stop_lat: lat,
            stop_lon: lon,
            zone_id: None,
            stop_url: None,
            location_type: None,
            parent_station: None,
            stop_timezone: None,
        }
    }

    fn route(route_id: &str) -> Route {
        Route {
            agency_key: "A".to_string(),
            route_id: route_id.to_string(),
            agency_id: None,
            route_short_name: Some(route_id.to_string()),
            route_long_name: None,
            route_desc: None,
            route_type: 3,
            route_url: None,
            route_color: None,
            route_text_color: None,
        }
    }

    fn agency(agency_key: &str, lat: f64, lon: f64) -> Agency {
        serde_json::from_value(serde_json::json!({
            "agency_key": agency_key,
            "agency_name": format!("Agency {agency_key}"),
            "agency_center_lat": lat,
            "agency_center_lon": lon,
        }))
        .unwrap()
    }

    /// Weekday service `WK` and Saturday service `SAT`; stop `S1` is served
    /// around midnight by several trips.
    fn feed() -> FeedSnapshot {
        FeedSnapshot {
            agencies: vec![agency("A", 46.0, 11.0), agency("B", 45.5, 11.0), agency("C", 41.9, 12.5)],
            calendars: vec![calendar("WK", true, false), calendar("SAT", false, true)],
            routes: vec![route("R1"), route("R2")],
            stops: vec![stop("S1", 46.0, 11.0), stop("S2", 46.01, 11.0), stop("S3", 46.5, 11.0)],
            trips: vec![
                trip("T1", "R1", "WK", 0),
                trip("T2", "R2", "WK", 1),
                trip("T3", "R1", "SAT", 1),
                trip("T4", "R1", "WK", 0),
                trip("T5", "R1", "WK", 0),
            ],
            stop_times: vec![
                stop_time("T1", "S1", 1, "23:10:00"),
                stop_time("T1", "S2", 2, "23:20:00"),
                stop_time("T2", "S3", 4, "24:00:00"),
                stop_time("T2", "S1", 5, "24:15:00"),
                stop_time("T3", "S2", 1, "23:30:00"),
                stop_time("T3", "S1", 2, "23:40:00"),
                stop_time("T4", "S1", 1, "25:30:00"),
                stop_time("T5", "S1", 1, "22:00:00"),
                stop_time("T9", "S1", 1, "23:50:00"),
            ],
            ..Default::default()
        }
    }

    fn pipeline(snapshot: FeedSnapshot) -> SchedulePipeline<MemoryFeedStore> {
        SchedulePipeline::new(MemoryFeedStore::new(snapshot), ExceptionPolicy::Ignore)
    }

    fn route_stop_ids(stops: &[RouteStop]) -> Vec<(&str, i64, i64)> {
        stops
            .iter()
            .map(|rs| (rs.stop.stop_id.as_str(), rs.stop_sequence, rs.direction_id))
            .collect()
    }

    fn departure_trips(departures: &[Departure]) -> Vec<&str> {
        departures
            .iter()
            .map(|departure| departure.trip.trip.trip_id.as_str())
            .collect()
    }

    /// Fails every lookup of the named table, or every lookup for `"*"`.
    #[derive(Clone)]
    struct FailingStore {
        inner: MemoryFeedStore,
        table: &'static str,
    }

    impl FailingStore {
        fn check(&self, table: &str) -> Result<(), StoreError> {
            if self.table == "*" || self.table == table {
                Err(StoreError::Unavailable(format!("{table} offline")))
            } else {
                Ok(())
            }
        }
    }

    impl FeedStore for FailingStore {
        async fn find_agencies(&self) -> Result<Vec<Agency>, StoreError> {
            self.check("agencies")?;
            self.inner.find_agencies().await
        }

        async fn find_calendar_rows(
            &self,
            agency_key: &str,
            weekday: Weekday,
            date: &str,
        ) -> Result<Vec<CalendarRow>, StoreError> {
            self.check("calendars")?;
            self.inner.find_calendar_rows(agency_key, weekday, date).await
        }

        async fn find_calendar_dates(
            &self,
            agency_key: &str,
            date: &str,
        ) -> Result<Vec<CalendarDate>, StoreError> {
            self.check("calendar_dates")?;
            self.inner.find_calendar_dates(agency_key, date).await
        }

        async fn find_trips(
            &self,
            agency_key: &str,
            filter: &TripFilter,
        ) -> Result<Vec<Trip>, StoreError> {
            self.check("trips")?;
            self.inner.find_trips(agency_key, filter).await
        }

        async fn find_stop_times(
            &self,
            agency_key: &str,
            filter: &StopTimeFilter,
            order: StopTimeOrder,
        ) -> Result<Vec<StopTime>, StoreError> {
            self.check("stop_times")?;
            self.inner.find_stop_times(agency_key, filter, order).await
        }

        async fn find_stops(
            &self,
            agency_key: &str,
            filter: &StopFilter,
        ) -> Result<Vec<Stop>, StoreError> {
            self.check("stops")?;
            self.inner.find_stops(agency_key, filter).await
        }

        async fn find_routes(
            &self,
            agency_key: &str,
            filter: &RouteFilter,
        ) -> Result<Vec<Route>, StoreError> {
            self.check("routes")?;
            self.inner.find_routes(agency_key, filter).await
        }

        async fn find_stops_within(&self, bounds: &BoundingBox) -> Result<Vec<Stop>, StoreError> {
            self.check("stops")?;
            self.inner.find_stops_within(bounds).await
        }

        async fn find_agencies_within(
            &self,
            bounds: &BoundingBox,
        ) -> Result<Vec<Agency>, StoreError> {
            self.check("agencies")?;
            self.inner.find_agencies_within(bounds).await
        }
    }

    fn failing(table: &'static str) -> SchedulePipeline<FailingStore> {
        SchedulePipeline::new(
            FailingStore {
                inner: MemoryFeedStore::new(feed()),
                table,
            },
            ExceptionPolicy::Ignore,
        )
    }

    #[tokio::test]
    async fn route_stops_carry_direction_and_sequence() {
        let snapshot = FeedSnapshot {
            stops: vec![stop("S1", 0.0, 0.0), stop("S2", 0.0, 0.0), stop("S3", 0.0, 0.0)],
            trips: vec![trip("T1", "R1", "WK", 0), trip("T2", "R1", "WK", 1)],
            stop_times: vec![
                stop_time("T1", "S1", 1, "08:00:00"),
                stop_time("T1", "S2", 2, "08:10:00"),
                stop_time("T2", "S3", 1, "09:00:00"),
            ],
            ..Default::default()
        };
        let stops = pipeline(snapshot)
            .list_stops_for_route("A", "R1", None)
            .await
            .unwrap();
        assert_eq!(
            route_stop_ids(&stops),
            [("S1", 1, 0), ("S3", 1, 1), ("S2", 2, 0)]
        );
    }

    #[tokio::test]
    async fn route_stops_are_ordered_by_sequence() {
        let snapshot = FeedSnapshot {
            stops: ["S1", "S2", "S3", "S4"]
                .into_iter()
                .map(|id| stop(id, 0.0, 0.0))
                .collect(),
            trips: vec![trip("T1", "R1", "WK", 0)],
            stop_times: vec![
                stop_time("T1", "S4", 7, "08:30:00"),
                stop_time("T1", "S1", 3, "08:10:00"),
                stop_time("T1", "S3", 12, "08:50:00"),
                stop_time("T1", "S2", 1, "08:00:00"),
            ],
            ..Default::default()
        };
        let stops = pipeline(snapshot)
            .list_stops_for_route("A", "R1", None)
            .await
            .unwrap();
        let sequences: Vec<i64> = stops.iter().map(|rs| rs.stop_sequence).collect();
        assert_eq!(sequences, [1, 3, 7, 12]);
    }

    #[tokio::test]
    async fn route_stops_follow_the_service_day() {
        let pipeline = pipeline(feed());

        let saturday = pipeline
            .list_stops_for_route("A", "R1", Some(SATURDAY))
            .await
            .unwrap();
        assert_eq!(route_stop_ids(&saturday), [("S2", 1, 1), ("S1", 2, 1)]);

        let monday = pipeline
            .list_stops_for_route("A", "R1", Some(MONDAY))
            .await
            .unwrap();
        assert_eq!(route_stop_ids(&monday), [("S1", 1, 0), ("S2", 2, 0)]);

        let sunday = pipeline
            .list_stops_for_route("A", "R1", Some(SUNDAY))
            .await
            .unwrap();
        assert!(sunday.is_empty());
    }

    #[tokio::test]
    async fn departures_window_crosses_midnight() {
        let query = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(MONDAY.to_string()),
            from_time: Some("23:00:00".to_string()),
            time_offset: Some("02:00:00".to_string()),
            ..Default::default()
        };
        assert_eq!(departure_window(&query).unwrap().to.as_deref(), Some("25:00:00"));

        let departures = pipeline(feed())
            .list_departures_for_stop("A", &query)
            .await
            .unwrap();
        // T3 runs on Saturdays only and T9 has no trip record.
        assert_eq!(departure_trips(&departures), ["T1", "T2"]);
        assert_eq!(departures[1].stop_time.departure_time, "24:15:00");
        assert_eq!(departures[0].trip.route.route_id, "R1");
        assert_eq!(departures[1].trip.route.route_id, "R2");
    }

    #[tokio::test]
    async fn departures_respect_explicit_bounds_and_route() {
        let pipeline = pipeline(feed());

        let bounded = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(MONDAY.to_string()),
            from_time: Some("23:00:00".to_string()),
            to_time: Some("23:45:00".to_string()),
            time_offset: Some("05:00:00".to_string()),
            ..Default::default()
        };
        let departures = pipeline
            .list_departures_for_stop("A", &bounded)
            .await
            .unwrap();
        assert_eq!(departure_trips(&departures), ["T1"]);

        let on_route = DepartureQuery {
            stop_id: "S1".to_string(),
            route_id: Some("R2".to_string()),
            date: Some(MONDAY.to_string()),
            ..Default::default()
        };
        let departures = pipeline
            .list_departures_for_stop("A", &on_route)
            .await
            .unwrap();
        assert_eq!(departure_trips(&departures), ["T2"]);
    }

    #[tokio::test]
    async fn departures_without_window_cover_the_whole_day() {
        let query = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(SATURDAY.to_string()),
            ..Default::default()
        };
        let departures = pipeline(feed())
            .list_departures_for_stop("A", &query)
            .await
            .unwrap();
        assert_eq!(departure_trips(&departures), ["T3"]);
    }

    #[tokio::test]
    async fn departures_short_time_values_are_normalized() {
        let query = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(MONDAY.to_string()),
            from_time: Some("9:00:00".to_string()),
            ..Default::default()
        };
        assert_eq!(
            departure_window(&query).unwrap().from.as_deref(),
            Some("09:00:00")
        );
        let departures = pipeline(feed())
            .list_departures_for_stop("A", &query)
            .await
            .unwrap();
        assert_eq!(departure_trips(&departures), ["T5", "T1", "T2", "T4"]);
    }

    #[tokio::test]
    async fn departures_unpadded_minutes_compare_as_times() {
        let query = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(MONDAY.to_string()),
            from_time: Some("23:5:00".to_string()),
            to_time: Some("23:30:0".to_string()),
            ..Default::default()
        };
        let window = departure_window(&query).unwrap();
        assert_eq!(window.from.as_deref(), Some("23:05:00"));
        assert_eq!(window.to.as_deref(), Some("23:30:00"));

        let departures = pipeline(feed())
            .list_departures_for_stop("A", &query)
            .await
            .unwrap();
        assert_eq!(departure_trips(&departures), ["T1"]);
    }

    #[tokio::test]
    async fn negative_or_inverted_windows_are_rejected() {
        let pipeline = failing("*");
        let query = |from: &str, to: Option<&str>, offset: Option<&str>| DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(MONDAY.to_string()),
            from_time: Some(from.to_string()),
            to_time: to.map(str::to_string),
            time_offset: offset.map(str::to_string),
            ..Default::default()
        };

        let negative_offset = query("09:00:00", None, Some("-10:00:00"));
        assert!(matches!(
            pipeline.list_departures_for_stop("A", &negative_offset).await,
            Err(ScheduleError::MalformedTime(time)) if time == "-10:00:00"
        ));

        let negative_from = query("-01:00:00", Some("02:00:00"), None);
        assert!(matches!(
            pipeline.list_departures_for_stop("A", &negative_from).await,
            Err(ScheduleError::MalformedTime(_))
        ));

        let inverted = query("9:00:00", Some("8:30:00"), None);
        assert!(matches!(
            pipeline.list_departures_for_stop("A", &inverted).await,
            Err(ScheduleError::InvertedWindow { from, to }) if from == "09:00:00" && to == "08:30:00"
        ));

        let empty_offset = departure_window(&query("09:00:00", None, Some("00:00:00"))).unwrap();
        assert_eq!(empty_offset.to.as_deref(), Some("09:00:00"));
    }

    #[tokio::test]
    async fn departures_serialize_nested_trip_and_route() {
        let query = DepartureQuery {
            stop_id: "S1".to_string(),
            route_id: Some("R2".to_string()),
            date: Some(MONDAY.to_string()),
            ..Default::default()
        };
        let departures = pipeline(feed())
            .list_departures_for_stop("A", &query)
            .await
            .unwrap();
        let json = serde_json::to_value(&departures).unwrap();
        assert_eq!(json[0]["departure_time"], "24:15:00");
        assert_eq!(json[0]["trip"]["direction_id"], 1);
        assert_eq!(json[0]["trip"]["route"]["route_id"], "R2");
        // Parent ids stay next to the nested objects.
        assert_eq!(json[0]["trip_id"], "T2");
        assert_eq!(json[0]["trip"]["route_id"], "R2");
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_lookup() {
        let pipeline = failing("*");

        let bad_date = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some("31/31/2024".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            pipeline.list_departures_for_stop("A", &bad_date).await,
            Err(ScheduleError::InvalidDate(_))
        ));

        let bad_time = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(MONDAY.to_string()),
            from_time: Some("23:00".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            pipeline.list_departures_for_stop("A", &bad_time).await,
            Err(ScheduleError::MalformedTime(_))
        ));

        assert!(matches!(
            pipeline.list_stops_for_route("A", "R1", Some("soon")).await,
            Err(ScheduleError::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn store_failures_abort_the_pipeline() {
        let query = DepartureQuery {
            stop_id: "S1".to_string(),
            date: Some(MONDAY.to_string()),
            ..Default::default()
        };
        let result = failing("routes").list_departures_for_stop("A", &query).await;
        assert!(matches!(
            result,
            Err(ScheduleError::Store(StoreError::Unavailable(message))) if message == "routes offline"
        ));

        let result = failing("stops").list_stops_for_trip("A", "T2").await;
        assert!(matches!(result, Err(ScheduleError::Store(_))));

        let result = failing("stop_times")
            .list_stops_for_route("A", "R1", None)
            .await;
        assert!(matches!(result, Err(ScheduleError::Store(_))));
    }

    #[tokio::test]
    async fn trip_stops_keep_sequence_order() {
        let trip_stops = pipeline(feed())
            .list_stops_for_trip("A", "T2")
            .await
            .unwrap();
        let visits: Vec<(i64, &str)> = trip_stops
            .iter()
            .map(|ts| (ts.stop_time.stop_sequence, ts.stop[0].stop_id.as_str()))
            .collect();
        assert_eq!(visits, [(4, "S3"), (5, "S1")]);
        assert!(trip_stops.iter().all(|ts| ts.stop.len() == 1));

        assert!(pipeline(feed())
            .list_stops_for_trip("A", "missing")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn stops_nearby_defaults_to_ten_kilometers() {
        let pipeline = pipeline(feed());
        let stops = pipeline.stops_nearby(46.0, 11.0, None, None).await.unwrap();
        let ids: Vec<&str> = stops.iter().map(|stop| stop.stop_id.as_str()).collect();
        assert_eq!(ids, ["S1", "S2"]);

        let wide = pipeline
            .stops_nearby(46.0, 11.0, Some(60.0), Some("miles"))
            .await
            .unwrap();
        assert_eq!(wide.len(), 3);

        assert!(matches!(
            pipeline.stops_nearby(46.0, 11.0, Some(1.0), Some("leagues")).await,
            Err(ScheduleError::InvalidDistanceUnit(_))
        ));
    }

    #[tokio::test]
    async fn lists_routes_and_services() {
        let pipeline = pipeline(feed());
        let routes = pipeline.list_routes("A").await.unwrap();
        assert_eq!(routes, vec![route("R1"), route("R2")]);

        let services = pipeline.active_services("A", Some(SATURDAY)).await.unwrap();
        assert_eq!(services, BTreeSet::from(["SAT".to_string()]));
    }

    #[tokio::test]
    async fn agencies_nearby_defaults_to_hundred_kilometers() {
        let pipeline = pipeline(feed());
        let agencies = pipeline.agencies_nearby(46.0, 11.0, None, None).await.unwrap();
        let keys: Vec<&str> = agencies.iter().map(|a| a.agency_key.as_str()).collect();
        assert_eq!(keys, ["A", "B"]);

        let close = pipeline
            .agencies_nearby(45.6, 11.0, Some(20.0), Some("kilometers"))
            .await
            .unwrap();
        assert_eq!(close.len(), 1);
        assert_eq!(close[0].agency_key, "B");

        assert!(matches!(
            pipeline.agencies_nearby(46.0, 11.0, Some(5.0), Some("leagues")).await,
            Err(ScheduleError::InvalidDistanceUnit(_))
        ));
        assert!(matches!(
            failing("agencies").agencies_nearby(46.0, 11.0, None, None).await,
            Err(ScheduleError::Store(_))
        ));
    }
}
