//! Error types for the scheduler.

use thiserror::Error;

/// A result type using `SchedulerError`.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur during capability tracking and host selection.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No live, capable host survived the filter chain.
    #[error("no valid host found")]
    NoValidHost,

    /// The registry has hosts that have not yet reported capabilities.
    #[error("scheduler is not ready: waiting for capability reports")]
    NotReady,

    /// A requested filter name is not registered.
    #[error("scheduler host filter not found: {0}")]
    FilterNotFound(String),

    /// A requested weigher name is not registered.
    #[error("scheduler host weigher not found: {0}")]
    WeigherNotFound(String),

    /// A malformed capability-update payload was received.
    #[error("invalid capability report: {0}")]
    InvalidReport(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] convoy_store::StoreError),
}
