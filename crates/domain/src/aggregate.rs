//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded on a stream, named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored as the envelope's `event_type` and used by queries.
    fn event_type(&self) -> &'static str;
}

/// An event-sourced consistency boundary.
///
/// State is rebuilt by replaying events through [`Aggregate::apply`]. Command
/// methods live on the concrete type, take `&self` and return the events to
/// record; they never mutate state directly.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    /// Stored as the envelope's `aggregate_type`.
    fn aggregate_type() -> &'static str;

    /// Returns None until the stream's first event has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// Number of events applied so far; 0 for a new aggregate.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Applies an event. Must be deterministic and infallible.
    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Aggregates whose state may be persisted as a snapshot.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Number of events between snapshots.
    fn snapshot_interval() -> usize {
        100
    }

    fn should_snapshot(&self) -> bool {
        self.version().as_i64() > 0
            && (self.version().as_i64() as usize).is_multiple_of(Self::snapshot_interval())
    }

    /// True if moving from `previous` to the current version crossed an
    /// interval boundary. Multi-event appends can step over exact multiples.
    fn snapshot_due_since(&self, previous: Version) -> bool {
        let interval = Self::snapshot_interval() as i64;
        self.version().as_i64() / interval > previous.as_i64() / interval
    }
}
