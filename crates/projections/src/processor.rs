//! Projection processor for feeding events to projections.

use std::collections::HashSet;

use event_store::{EventEnvelope, EventId, EventStore};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Feeds the global event log to registered projections.
///
/// Delivery is keyed on event id, not on an offset into the log: a writer
/// that commits after a later-numbered entry still gets its events
/// delivered on the next catch-up, and nothing is delivered twice.
/// Catch-ups are serialized, so concurrent callers (one per incoming query)
/// never race each other. Register every projection before the first
/// catch-up.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    delivered: Mutex<HashSet<EventId>>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            delivered: Mutex::new(HashSet::new()),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Brings every projection up to the end of the log.
    ///
    /// Returns the number of deliveries made.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let mut delivered = self.delivered.lock().await;
        self.catch_up(&mut delivered).await
    }

    async fn catch_up(&self, seen: &mut HashSet<EventId>) -> Result<u64> {
        let mut stream = self.store.stream_all_events().await?;
        let mut scanned: u64 = 0;
        let mut deliveries: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            scanned += 1;
            if seen.contains(&event.event_id) {
                continue;
            }

            self.deliver(&event).await?;
            seen.insert(event.event_id);
            deliveries += self.projections.len() as u64;
        }

        if deliveries > 0 {
            tracing::debug!(log_length = scanned, deliveries, "catch-up complete");
        }

        Ok(deliveries)
    }

    async fn deliver(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
            metrics::counter!("projections_events_processed").increment(1);
        }
        Ok(())
    }

    /// Delivers one event to every projection and marks it delivered, so a
    /// later catch-up skips it.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        let mut delivered = self.delivered.lock().await;
        if delivered.contains(&event.event_id) {
            return Ok(());
        }
        self.deliver(event).await?;
        delivered.insert(event.event_id);
        Ok(())
    }

    /// Resets every projection and replays the log.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        let mut delivered = self.delivered.lock().await;
        for projection in &self.projections {
            tracing::info!(projection = projection.name(), "rebuilding");
            projection.reset().await?;
        }
        delivered.clear();
        self.catch_up(&mut delivered).await
    }
}
