//! Append-only event store.
//!
//! Every durable record in the engine is an event stream keyed by an
//! [`AggregateId`]. Writers append with an expected stream version and the
//! store rejects stale writers with [`EventStoreError::ConcurrencyConflict`].
//! [`EventStore::append_batch`] commits appends to several streams as one
//! unit, which is how multi-record state transitions stay atomic.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use snapshot::Snapshot;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream, StreamAppend};
