use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, StreamAppend, validate_batch},
};

#[derive(Default)]
struct Log {
    events: Vec<EventEnvelope>,
    heads: HashMap<AggregateId, Version>,
    snapshots: HashMap<AggregateId, Snapshot>,
}

impl Log {
    fn head(&self, aggregate_id: AggregateId) -> Version {
        self.heads
            .get(&aggregate_id)
            .copied()
            .unwrap_or(Version::initial())
    }

    fn stream(&self, aggregate_id: AggregateId, from: Version) -> Vec<EventEnvelope> {
        self.events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from)
            .cloned()
            .collect()
    }
}

/// In-memory event store.
///
/// Used by tests and by the server when no database is configured. A single
/// write lock covers a whole batch, so batches are atomic and version checks
/// cannot interleave.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<Version>> {
        validate_batch(&batch)?;

        let mut log = self.log.write().await;

        // Check every stream before writing any of them.
        for append in &batch {
            let Some(first) = append.events.first() else {
                continue;
            };
            let current = log.head(first.aggregate_id);

            if let Some(expected) = append.options.expected_version
                && current != expected
            {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: first.aggregate_id,
                    expected,
                    actual: current,
                });
            }

            // Same rule as the unique (aggregate_id, version) constraint.
            if first.version != current.next() {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: first.aggregate_id,
                    expected: append.options.expected_version.unwrap_or(current),
                    actual: current,
                });
            }
        }

        let mut versions = Vec::with_capacity(batch.len());
        let mut appended = 0u64;
        for append in batch {
            let Some(last) = append.events.last() else {
                continue;
            };
            let (aggregate_id, version) = (last.aggregate_id, last.version);
            appended += append.events.len() as u64;
            log.events.extend(append.events);
            log.heads.insert(aggregate_id, version);
            versions.push(version);
        }

        metrics::counter!("event_store_events_appended_total").increment(appended);
        Ok(versions)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        Ok(self.log.read().await.stream(aggregate_id, Version::first()))
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        Ok(self.log.read().await.stream(aggregate_id, from_version))
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let matching = log
            .events
            .iter()
            .filter(|e| query.matches(e.aggregate_id, &e.aggregate_type, &e.event_type))
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.log.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.log.read().await.heads.get(&aggregate_id).copied())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.log
            .write()
            .await
            .snapshots
            .insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self.log.read().await.snapshots.get(&aggregate_id).cloned())
    }
}
