//! Error types for the event scheduler

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors returned synchronously by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A playback session is already running
    #[error("playback already in progress")]
    Busy,

    /// Timestamps decrease at `index`
    #[error("event {index} is timestamped before its predecessor")]
    OutOfOrder { index: usize },
}
