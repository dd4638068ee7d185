//! Error types for the messaging layer.

use thiserror::Error;

/// A result type using `MessagingError`.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during message dispatch.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// No handler is subscribed on the target topic.
    #[error("no subscriber on topic: {0}")]
    NoSubscriber(String),

    /// A call handler returned an error.
    #[error("handler failed on topic {topic}, method {method}: {message}")]
    Handler {
        /// Topic the call was dispatched to.
        topic: String,
        /// Method that failed.
        method: String,
        /// Handler-reported failure.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(String),
}
