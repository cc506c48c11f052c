//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreExt, Snapshot, StreamAppend, Version,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    /// True when the command decided there was nothing to record.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Loads aggregates from the store, runs decisions against them and appends
/// the resulting events with optimistic concurrency.
///
/// Single-stream commands go through [`CommandHandler::execute`]. Commands
/// that must change several streams at once call [`CommandHandler::stage`]
/// for each stream and hand the results to [`EventStore::append_batch`].
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate + DeserializeOwned,
    A::Event: DeserializeOwned + Serialize,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate, starting from its snapshot when one exists.
    ///
    /// A stream with no events yields `A::default()` at version 0.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let (snapshot, events) = self.store.load_aggregate(aggregate_id).await?;

        let mut aggregate = match snapshot {
            Some(snapshot) => restore_from_snapshot(snapshot)?,
            None => A::default(),
        };

        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if its stream is empty.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Loads an aggregate, failing with `AggregateNotFound` if it is absent.
    pub async fn load_required(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: aggregate_id.to_string(),
            })
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current state and returns the
    /// events to record. An empty list is a successful no-op and writes
    /// nothing. A stale read surfaces as a concurrency conflict.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        let Some(append) = self.stage(aggregate_id, &aggregate, &events)? else {
            return Ok(CommandResult {
                aggregate,
                events,
                new_version: current_version,
            });
        };

        let new_version = self.store.append(append.events, append.options).await?;

        aggregate.apply_events(events.iter().cloned());
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Turns decided events into one stream's share of a batch append.
    ///
    /// The append expects the stream to still be at the version `current`
    /// was loaded at. Returns None when there is nothing to write.
    pub fn stage(
        &self,
        aggregate_id: AggregateId,
        current: &A,
        events: &[A::Event],
    ) -> Result<Option<StreamAppend>, DomainError> {
        if events.is_empty() {
            return Ok(None);
        }

        let envelopes = build_envelopes::<A>(aggregate_id, current.version(), events)?;
        Ok(Some(StreamAppend::new(
            envelopes,
            AppendOptions::expect_at(current.version()),
        )))
    }
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
    A::Event: DeserializeOwned + Serialize,
{
    /// Executes a command and saves a snapshot when one is due.
    pub async fn execute_with_snapshot<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let result = self.execute(aggregate_id, command_fn).await?;
        if !result.is_noop() {
            let previous = Version::new(result.new_version.as_i64() - result.events.len() as i64);
            self.snapshot_if_due(aggregate_id, &result.aggregate, previous)
                .await?;
        }
        Ok(result)
    }

    /// Saves a snapshot of `aggregate` if the writes since `previous`
    /// crossed a snapshot interval.
    pub async fn snapshot_if_due(
        &self,
        aggregate_id: AggregateId,
        aggregate: &A,
        previous: Version,
    ) -> Result<(), DomainError> {
        if aggregate.snapshot_due_since(previous) {
            let snapshot = Snapshot::from_state(
                aggregate_id,
                A::aggregate_type(),
                aggregate.version(),
                aggregate,
            )?;
            self.store.save_snapshot(snapshot).await?;
            tracing::debug!(
                %aggregate_id,
                version = %aggregate.version(),
                aggregate_type = A::aggregate_type(),
                "snapshot saved"
            );
        }
        Ok(())
    }
}

fn restore_from_snapshot<A>(snapshot: Snapshot) -> Result<A, DomainError>
where
    A: Aggregate + DeserializeOwned,
{
    let version = snapshot.version;
    let mut aggregate: A = snapshot.into_state()?;
    aggregate.set_version(version);
    Ok(aggregate)
}

fn build_envelopes<A>(
    aggregate_id: AggregateId,
    current_version: Version,
    events: &[A::Event],
) -> Result<Vec<EventEnvelope>, DomainError>
where
    A: Aggregate,
{
    let mut envelopes = Vec::with_capacity(events.len());
    let mut version = current_version;

    for event in events {
        version = version.next();
        let envelope = EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type(A::aggregate_type())
            .event_type(event.event_type())
            .version(version)
            .payload(event)?
            .build()?;
        envelopes.push(envelope);
    }

    Ok(envelopes)
}
