#[derive(thiserror::Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid date: '{0}'")]
    InvalidDate(String),
    #[error("Malformed time '{0}', expected HH:MM:SS")]
    MalformedTime(String),
    #[error("Departure window ends at {to}, before it starts at {from}")]
    InvertedWindow { from: String, to: String },
    #[error("`{0}` is not a valid unit. Choose between `miles` or `kilometers`.")]
    InvalidDistanceUnit(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures raised by a feed store. The pipeline never retries these, they
/// abort the running operation and reach the caller as `ScheduleError::Store`.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Feed store query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Failed to read feed snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Failed to open feed snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("Feed store unavailable: {0}")]
    Unavailable(String),
}
