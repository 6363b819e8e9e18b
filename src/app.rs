use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::feed::FeedStore;
use crate::memory_store::MemoryFeedStore;
use crate::schedule_pipeline::{DepartureQuery, SchedulePipeline};
use crate::service_calendar::ExceptionPolicy;
use crate::sqlite_store::SqliteFeedStore;

/// Timetable queries over a stored static transit feed.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct TimetableApp {
    #[command(subcommand)]
    pub op: TimetableOperation,
    /// SQLite database holding the feed tables
    #[arg(long, env = "TIMETABLE_DATABASE", default_value_t = String::from("sqlite://timetable.db"))]
    pub database: String,
    /// read the feed from a JSON snapshot instead of the database
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
    #[arg(long, default_value_t = 4)]
    pub max_connections: u32,
    /// abort the operation if it takes longer than this
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// whether calendar_dates exceptions change the active services
    #[arg(long, value_enum, default_value_t = ExceptionPolicy::Ignore)]
    pub exceptions: ExceptionPolicy,
    #[arg(long, default_value_t = log::LevelFilter::Info)]
    pub log_level: log::LevelFilter,
}

#[derive(Debug, Clone, Subcommand)]
pub enum TimetableOperation {
    /// create the feed tables in the database
    InitSchema,
    /// list all agencies
    Agencies,
    /// list the routes of an agency
    Routes { agency: String },
    /// list the service ids running on a date
    Services {
        agency: String,
        /// defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// list the stops served by a route
    RouteStops {
        agency: String,
        route_id: String,
        /// only count trips running on this date
        #[arg(long)]
        date: Option<String>,
    },
    /// list departures from a stop
    Departures {
        agency: String,
        stop_id: String,
        #[arg(long)]
        route_id: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        from_time: Option<String>,
        #[arg(long)]
        to_time: Option<String>,
        /// window length after from_time, used when to_time is absent
        #[arg(long)]
        time_offset: Option<String>,
    },
    /// list the stops of a trip in visiting order
    TripStops { agency: String, trip_id: String },
    /// find stops near a point
    StopsNearby {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        max_distance: Option<f64>,
        /// kilometers or miles
        #[arg(long)]
        unit: Option<String>,
    },
    /// find agencies whose service area is centred near a point
    AgenciesNearby {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        /// defaults to 100 kilometers
        max_distance: Option<f64>,
        /// kilometers or miles
        #[arg(long)]
        unit: Option<String>,
    },
}

impl TimetableApp {
    pub async fn run(&self) -> Result<()> {
        let output = match &self.snapshot {
            Some(path) => {
                let store = MemoryFeedStore::load(path)
                    .await
                    .with_context(|| format!("Failed to load snapshot {:?}", path))?;
                self.execute(store).await?
            }
            None => {
                let store = SqliteFeedStore::connect(&self.database, self.max_connections)
                    .await
                    .with_context(|| format!("Failed to open {}", self.database))?;
                if let TimetableOperation::InitSchema = self.op {
                    store.create_schema().await?;
                    return Ok(());
                }
                self.execute(store).await?
            }
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    async fn execute<S: FeedStore + Clone>(&self, store: S) -> Result<serde_json::Value> {
        let pipeline = SchedulePipeline::new(store, self.exceptions);
        let operation = self.op.execute(&pipeline);
        match self.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), operation)
                .await
                .with_context(|| format!("Operation timed out after {secs}s"))?,
            None => operation.await,
        }
    }
}

impl TimetableOperation {
    /// Runs the operation and wraps the result under its JSON key
    /// (`stops`, `stopTimes`, `routes`, ...).
    pub async fn execute<S: FeedStore + Clone>(
        &self,
        pipeline: &SchedulePipeline<S>,
    ) -> Result<serde_json::Value> {
        let output = match self {
            TimetableOperation::InitSchema => {
                anyhow::bail!("init-schema needs a SQLite database, not a snapshot")
            }
            TimetableOperation::Agencies => {
                serde_json::json!({ "agencies": pipeline.list_agencies().await? })
            }
            TimetableOperation::Routes { agency } => {
                serde_json::json!({ "routes": pipeline.list_routes(agency).await? })
            }
            TimetableOperation::Services { agency, date } => {
                let services = pipeline.active_services(agency, date.as_deref()).await?;
                serde_json::json!({ "services": services })
            }
            TimetableOperation::RouteStops {
                agency,
                route_id,
                date,
            } => {
                let stops = pipeline
                    .list_stops_for_route(agency, route_id, date.as_deref())
                    .await?;
                serde_json::json!({ "stops": stops })
            }
            TimetableOperation::Departures {
                agency,
                stop_id,
                route_id,
                date,
                from_time,
                to_time,
                time_offset,
            } => {
                let query = DepartureQuery {
                    stop_id: stop_id.clone(),
                    route_id: route_id.clone(),
                    date: date.clone(),
                    from_time: from_time.clone(),
                    to_time: to_time.clone(),
                    time_offset: time_offset.clone(),
                };
                let stop_times = pipeline.list_departures_for_stop(agency, &query).await?;
                serde_json::json!({ "stopTimes": stop_times })
            }
            TimetableOperation::TripStops { agency, trip_id } => {
                let stops = pipeline.list_stops_for_trip(agency, trip_id).await?;
                serde_json::json!({ "stops": stops })
            }
            TimetableOperation::StopsNearby {
                lat,
                lon,
                max_distance,
                unit,
            } => {
                let stops = pipeline
                    .stops_nearby(*lat, *lon, *max_distance, unit.as_deref())
                    .await?;
                serde_json::json!({ "stops": stops })
            }
            TimetableOperation::AgenciesNearby {
                lat,
                lon,
                max_distance,
                unit,
            } => {
                let agencies = pipeline
                    .agencies_nearby(*lat, *lon, *max_distance, unit.as_deref())
                    .await?;
                serde_json::json!({ "agencies": agencies })
            }
        };
        Ok(output)
    }
}
