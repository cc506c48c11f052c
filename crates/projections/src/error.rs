//! Projection error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// A log entry's payload does not match its aggregate's event enum.
    #[error("Cannot decode {event_type} event: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProjectionError {
    pub(crate) fn decode(event: &event_store::EventEnvelope, source: serde_json::Error) -> Self {
        ProjectionError::Decode {
            event_type: event.event_type.clone(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
