pub mod app;
pub mod error;
pub mod feed;
pub mod memory_store;
pub mod proximity;
pub mod schedule_pipeline;
pub mod service_calendar;
pub mod sqlite_store;
pub mod time_codec;

pub use error::{ScheduleError, StoreError};
pub use feed::FeedStore;
pub use memory_store::{FeedSnapshot, MemoryFeedStore};
pub use schedule_pipeline::{DepartureQuery, SchedulePipeline};
pub use service_calendar::ExceptionPolicy;
pub use sqlite_store::SqliteFeedStore;
