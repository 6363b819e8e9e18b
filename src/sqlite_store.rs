use std::str::FromStr;

use chrono::Weekday;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use crate::error::StoreError;
use crate::feed::*;
use crate::time_codec::normalize_width;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agencies (
    agency_key TEXT NOT NULL,
    agency_id TEXT,
    agency_name TEXT NOT NULL,
    agency_url TEXT,
    agency_timezone TEXT,
    agency_lang TEXT,
    agency_phone TEXT,
    agency_fare_url TEXT,
    agency_center_lat REAL,
    agency_center_lon REAL,
    agency_bounds_sw_lat REAL,
    agency_bounds_sw_lon REAL,
    agency_bounds_ne_lat REAL,
    agency_bounds_ne_lon REAL,
    date_last_updated INTEGER
);
CREATE INDEX IF NOT EXISTS agencies_by_key ON agencies (agency_key);
CREATE INDEX IF NOT EXISTS agencies_by_center ON agencies (agency_center_lat, agency_center_lon);

CREATE TABLE IF NOT EXISTS calendars (
    agency_key TEXT NOT NULL,
    service_id TEXT NOT NULL,
    monday TEXT NOT NULL,
    tuesday TEXT NOT NULL,
    wednesday TEXT NOT NULL,
    thursday TEXT NOT NULL,
    friday TEXT NOT NULL,
    saturday TEXT NOT NULL,
    sunday TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS calendars_by_range ON calendars (agency_key, start_date, end_date);

CREATE TABLE IF NOT EXISTS calendar_dates (
    agency_key TEXT NOT NULL,
    service_id TEXT NOT NULL,
    date TEXT NOT NULL,
    exception_type INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS calendar_dates_by_date ON calendar_dates (agency_key, date);

CREATE TABLE IF NOT EXISTS trips (
    agency_key TEXT NOT NULL,
    trip_id TEXT NOT NULL,
    route_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    trip_headsign TEXT,
    trip_short_name TEXT,
    direction_id INTEGER NOT NULL DEFAULT 0,
    block_id TEXT,
    shape_id TEXT
);
CREATE INDEX IF NOT EXISTS trips_by_id ON trips (agency_key, trip_id);
CREATE INDEX IF NOT EXISTS trips_by_route ON trips (agency_key, route_id);
CREATE INDEX IF NOT EXISTS trips_by_service ON trips (agency_key, service_id);

CREATE TABLE IF NOT EXISTS stop_times (
    agency_key TEXT NOT NULL,
    trip_id TEXT NOT NULL,
    stop_id TEXT NOT NULL,
    stop_sequence INTEGER NOT NULL,
    arrival_time TEXT NOT NULL,
    departure_time TEXT NOT NULL,
    stop_headsign TEXT,
    pickup_type TEXT,
    drop_off_type TEXT,
    shape_dist_traveled REAL
);
CREATE INDEX IF NOT EXISTS stop_times_by_trip ON stop_times (agency_key, trip_id, stop_sequence);
CREATE INDEX IF NOT EXISTS stop_times_by_stop ON stop_times (agency_key, stop_id, departure_time);

CREATE TABLE IF NOT EXISTS stops (
    agency_key TEXT NOT NULL,
    stop_id TEXT NOT NULL,
    stop_code TEXT,
    stop_name TEXT NOT NULL,
    stop_desc TEXT,
    stop_lat REAL NOT NULL,
    stop_lon REAL NOT NULL,
    zone_id TEXT,
    stop_url TEXT,
    location_type TEXT,
    parent_station TEXT,
    stop_timezone TEXT
);
CREATE INDEX IF NOT EXISTS stops_by_id ON stops (agency_key, stop_id);
CREATE INDEX IF NOT EXISTS stops_by_location ON stops (stop_lat, stop_lon);

CREATE TABLE IF NOT EXISTS routes (
    agency_key TEXT NOT NULL,
    route_id TEXT NOT NULL,
    agency_id TEXT,
    route_short_name TEXT,
    route_long_name TEXT,
    route_desc TEXT,
    route_type INTEGER NOT NULL,
    route_url TEXT,
    route_color TEXT,
    route_text_color TEXT
);
CREATE INDEX IF NOT EXISTS routes_by_id ON routes (agency_key, route_id);
";

const AGENCY_COLUMNS: &str = "agency_key, agency_id, agency_name, agency_url, agency_timezone, \
     agency_lang, agency_phone, agency_fare_url, agency_center_lat, agency_center_lon, \
     agency_bounds_sw_lat, agency_bounds_sw_lon, agency_bounds_ne_lat, agency_bounds_ne_lon, \
     date_last_updated";
const CALENDAR_COLUMNS: &str = "agency_key, service_id, monday, tuesday, wednesday, thursday, \
     friday, saturday, sunday, start_date, end_date";
const TRIP_COLUMNS: &str = "agency_key, trip_id, route_id, service_id, trip_headsign, \
     trip_short_name, direction_id, block_id, shape_id";
const STOP_TIME_COLUMNS: &str = "agency_key, trip_id, stop_id, stop_sequence, arrival_time, \
     departure_time, stop_headsign, pickup_type, drop_off_type, shape_dist_traveled";
const STOP_COLUMNS: &str = "agency_key, stop_id, stop_code, stop_name, stop_desc, stop_lat, \
     stop_lon, zone_id, stop_url, location_type, parent_station, stop_timezone";
const ROUTE_COLUMNS: &str = "agency_key, route_id, agency_id, route_short_name, \
     route_long_name, route_desc, route_type, route_url, route_color, route_text_color";

/// Calendar row as stored: weekday flags keep the GTFS `"1"`/`"0"` text.
#[derive(sqlx::FromRow)]
struct CalendarRecord {
    agency_key: String,
    service_id: String,
    monday: String,
    tuesday: String,
    wednesday: String,
    thursday: String,
    friday: String,
    saturday: String,
    sunday: String,
    start_date: String,
    end_date: String,
}

fn flag(value: &str) -> bool {
    value.trim() == "1"
}

fn flag_text(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

impl From<CalendarRecord> for CalendarRow {
    fn from(record: CalendarRecord) -> Self {
        CalendarRow {
            monday: flag(&record.monday),
            tuesday: flag(&record.tuesday),
            wednesday: flag(&record.wednesday),
            thursday: flag(&record.thursday),
            friday: flag(&record.friday),
            saturday: flag(&record.saturday),
            sunday: flag(&record.sunday),
            agency_key: record.agency_key,
            service_id: record.service_id,
            start_date: record.start_date,
            end_date: record.end_date,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CalendarDateRecord {
    agency_key: String,
    service_id: String,
    date: String,
    exception_type: i64,
}

fn weekday_column(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn select_from<'args>(columns: &str, table: &str, agency_key: &str) -> QueryBuilder<'args, Sqlite> {
    let mut builder = QueryBuilder::new(format!("SELECT {columns} FROM {table} WHERE agency_key = "));
    builder.push_bind(agency_key.to_string());
    builder
}

fn push_id_filter(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, filter: &IdFilter) {
    match filter {
        IdFilter::Any => {}
        IdFilter::Equals(value) => {
            builder
                .push(format!(" AND {column} = "))
                .push_bind(value.clone());
        }
        IdFilter::In(values) if values.is_empty() => {
            builder.push(" AND 0");
        }
        IdFilter::In(values) => {
            builder.push(format!(" AND {column} IN ("));
            let mut separated = builder.separated(", ");
            for value in values {
                separated.push_bind(value.clone());
            }
            separated.push_unseparated(")");
        }
    }
}

/// [`FeedStore`] over a SQLite database holding one table per entity.
#[derive(Debug, Clone)]
pub struct SqliteFeedStore {
    pool: SqlitePool,
}

impl SqliteFeedStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        log::info!("Connecting to {}", database_url);
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await?;
        Ok(SqliteFeedStore { pool })
    }

    pub async fn create_schema(&self) -> Result<(), StoreError> {
        log::info!("Creating feed tables.");
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn insert_agency(&self, agency: &Agency) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO agencies ({AGENCY_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&agency.agency_key)
        .bind(&agency.agency_id)
        .bind(&agency.agency_name)
        .bind(&agency.agency_url)
        .bind(&agency.agency_timezone)
        .bind(&agency.agency_lang)
        .bind(&agency.agency_phone)
        .bind(&agency.agency_fare_url)
        .bind(agency.agency_center_lat)
        .bind(agency.agency_center_lon)
        .bind(agency.agency_bounds_sw_lat)
        .bind(agency.agency_bounds_sw_lon)
        .bind(agency.agency_bounds_ne_lat)
        .bind(agency.agency_bounds_ne_lon)
        .bind(agency.date_last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_calendar(&self, row: &CalendarRow) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO calendars ({CALENDAR_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&row.agency_key)
        .bind(&row.service_id)
        .bind(flag_text(row.monday))
        .bind(flag_text(row.tuesday))
        .bind(flag_text(row.wednesday))
        .bind(flag_text(row.thursday))
        .bind(flag_text(row.friday))
        .bind(flag_text(row.saturday))
        .bind(flag_text(row.sunday))
        .bind(&row.start_date)
        .bind(&row.end_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_calendar_date(&self, row: &CalendarDate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO calendar_dates (agency_key, service_id, date, exception_type) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&row.agency_key)
        .bind(&row.service_id)
        .bind(&row.date)
        .bind(row.exception_type.code())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_trip(&self, trip: &Trip) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO trips ({TRIP_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&trip.agency_key)
        .bind(&trip.trip_id)
        .bind(&trip.route_id)
        .bind(&trip.service_id)
        .bind(&trip.trip_headsign)
        .bind(&trip.trip_short_name)
        .bind(trip.direction_id)
        .bind(&trip.block_id)
        .bind(&trip.shape_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Times are stored in canonical width so range queries compare correctly.
    pub async fn insert_stop_time(&self, stop_time: &StopTime) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO stop_times ({STOP_TIME_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&stop_time.agency_key)
        .bind(&stop_time.trip_id)
        .bind(&stop_time.stop_id)
        .bind(stop_time.stop_sequence)
        .bind(normalize_width(&stop_time.arrival_time))
        .bind(normalize_width(&stop_time.departure_time))
        .bind(&stop_time.stop_headsign)
        .bind(&stop_time.pickup_type)
        .bind(&stop_time.drop_off_type)
        .bind(stop_time.shape_dist_traveled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_stop(&self, stop: &Stop) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO stops ({STOP_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&stop.agency_key)
        .bind(&stop.stop_id)
        .bind(&stop.stop_code)
        .bind(&stop.stop_name)
        .bind(&stop.stop_desc)
        .bind(stop.stop_lat)
        .bind(stop.stop_lon)
        .bind(&stop.zone_id)
        .bind(&stop.stop_url)
        .bind(&stop.location_type)
        .bind(&stop.parent_station)
        .bind(&stop.stop_timezone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_route(&self, route: &Route) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO routes ({ROUTE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&route.agency_key)
        .bind(&route.route_id)
        .bind(&route.agency_id)
        .bind(&route.route_short_name)
        .bind(&route.route_long_name)
        .bind(&route.route_desc)
        .bind(route.route_type)
        .bind(&route.route_url)
        .bind(&route.route_color)
        .bind(&route.route_text_color)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl FeedStore for SqliteFeedStore {
    async fn find_agencies(&self) -> Result<Vec<Agency>, StoreError> {
        let agencies = sqlx::query_as::<_, Agency>(&format!(
            "SELECT {AGENCY_COLUMNS} FROM agencies ORDER BY agency_key"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(agencies)
    }

    async fn find_calendar_rows(
        &self,
        agency_key: &str,
        weekday: Weekday,
        date: &str,
    ) -> Result<Vec<CalendarRow>, StoreError> {
        let mut builder = select_from(CALENDAR_COLUMNS, "calendars", agency_key);
        builder.push(format!(" AND {} = '1'", weekday_column(weekday)));
        builder.push(" AND start_date <= ").push_bind(date.to_string());
        builder.push(" AND end_date >= ").push_bind(date.to_string());
        builder.push(" ORDER BY service_id");
        let records = builder
            .build_query_as::<CalendarRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(CalendarRow::from).collect())
    }

    async fn find_calendar_dates(
        &self,
        agency_key: &str,
        date: &str,
    ) -> Result<Vec<CalendarDate>, StoreError> {
        let mut builder = select_from(
            "agency_key, service_id, date, exception_type",
            "calendar_dates",
            agency_key,
        );
        builder.push(" AND date = ").push_bind(date.to_string());
        builder.push(" ORDER BY service_id");
        let records = builder
            .build_query_as::<CalendarDateRecord>()
            .fetch_all(&self.pool)
            .await?;

        let mut calendar_dates = vec![];
        for record in records {
            match ExceptionType::from_code(record.exception_type) {
                Some(exception_type) => calendar_dates.push(CalendarDate {
                    agency_key: record.agency_key,
                    service_id: record.service_id,
                    date: record.date,
                    exception_type,
                }),
                None => log::warn!(
                    "Skipping calendar date of service {} with exception type {}",
                    record.service_id,
                    record.exception_type
                ),
            }
        }
        Ok(calendar_dates)
    }

    async fn find_trips(
        &self,
        agency_key: &str,
        filter: &TripFilter,
    ) -> Result<Vec<Trip>, StoreError> {
        let mut builder = select_from(TRIP_COLUMNS, "trips", agency_key);
        push_id_filter(&mut builder, "trip_id", &filter.trip_id);
        push_id_filter(&mut builder, "route_id", &filter.route_id);
        push_id_filter(&mut builder, "service_id", &filter.service_id);
        builder.push(" ORDER BY trip_id");
        let trips = builder
            .build_query_as::<Trip>()
            .fetch_all(&self.pool)
            .await?;
        Ok(trips)
    }

    async fn find_stop_times(
        &self,
        agency_key: &str,
        filter: &StopTimeFilter,
        order: StopTimeOrder,
    ) -> Result<Vec<StopTime>, StoreError> {
        let mut builder = select_from(STOP_TIME_COLUMNS, "stop_times", agency_key);
        push_id_filter(&mut builder, "trip_id", &filter.trip_id);
        push_id_filter(&mut builder, "stop_id", &filter.stop_id);
        if let Some(from) = &filter.departure.from {
            builder.push(" AND departure_time >= ").push_bind(from.clone());
        }
        if let Some(to) = &filter.departure.to {
            builder.push(" AND departure_time <= ").push_bind(to.clone());
        }
        builder.push(match order {
            StopTimeOrder::StopSequence => " ORDER BY stop_sequence, trip_id",
            StopTimeOrder::DepartureTime => " ORDER BY departure_time, trip_id, stop_sequence",
        });
        let stop_times = builder
            .build_query_as::<StopTime>()
            .fetch_all(&self.pool)
            .await?;
        Ok(stop_times)
    }

    async fn find_stops(
        &self,
        agency_key: &str,
        filter: &StopFilter,
    ) -> Result<Vec<Stop>, StoreError> {
        let mut builder = select_from(STOP_COLUMNS, "stops", agency_key);
        push_id_filter(&mut builder, "stop_id", &filter.stop_id);
        builder.push(" ORDER BY stop_id");
        let stops = builder
            .build_query_as::<Stop>()
            .fetch_all(&self.pool)
            .await?;
        Ok(stops)
    }

    async fn find_routes(
        &self,
        agency_key: &str,
        filter: &RouteFilter,
    ) -> Result<Vec<Route>, StoreError> {
        let mut builder = select_from(ROUTE_COLUMNS, "routes", agency_key);
        push_id_filter(&mut builder, "route_id", &filter.route_id);
        builder.push(" ORDER BY route_id");
        let routes = builder
            .build_query_as::<Route>()
            .fetch_all(&self.pool)
            .await?;
        Ok(routes)
    }

    async fn find_stops_within(&self, bounds: &BoundingBox) -> Result<Vec<Stop>, StoreError> {
        let stops = sqlx::query_as::<_, Stop>(&format!(
            "SELECT {STOP_COLUMNS} FROM stops \
             WHERE stop_lat BETWEEN ? AND ? AND stop_lon BETWEEN ? AND ?"
        ))
        .bind(bounds.min_lat)
        .bind(bounds.max_lat)
        .bind(bounds.min_lon)
        .bind(bounds.max_lon)
        .fetch_all(&self.pool)
        .await?;
        Ok(stops)
    }

    async fn find_agencies_within(
        &self,
        bounds: &BoundingBox,
    ) -> Result<Vec<Agency>, StoreError> {
        let agencies = sqlx::query_as::<_, Agency>(&format!(
            "SELECT {AGENCY_COLUMNS} FROM agencies \
             WHERE agency_center_lat BETWEEN ? AND ? AND agency_center_lon BETWEEN ? AND ?"
        ))
        .bind(bounds.min_lat)
        .bind(bounds.max_lat)
        .bind(bounds.min_lon)
        .bind(bounds.max_lon)
        .fetch_all(&self.pool)
        .await?;
        Ok(agencies)
    }
}
