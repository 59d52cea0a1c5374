//! Shipwright-Bus: Error Types

use thiserror::Error;

/// Errors raised by bus components and collaborator contracts.
#[derive(Debug, Error)]
pub enum BusError {
    /// A subscribed handler returned an error for a delivered event.
    #[error("handler '{handler}' failed on topic '{topic}': {reason}")]
    HandlerFailed {
        handler: String,
        topic: String,
        reason: String,
    },

    /// Unknown topic name encountered while parsing.
    #[error("unknown event topic: '{0}'")]
    UnknownTopic(String),

    /// The Refinery collaborator rejected or failed a request.
    #[error("refinery call failed: {0}")]
    Refinery(String),

    /// A delta transport could not deliver an event.
    #[error("delta transport '{transport}' failed: {reason}")]
    TransportFailed { transport: String, reason: String },
}
