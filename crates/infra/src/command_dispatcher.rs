//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate's stream
//!   ↓
//! 2. Rehydrate (apply historical events in sequence order)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! An empty decision is a successful no-op: nothing is appended or published.
//! A stale-version append is retried from step 1 up to `max_conflict_retries`
//! times, so two concurrent writers to one stream serialise instead of failing.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use sellerdesk_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use sellerdesk_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Deterministic business failure from the aggregate.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Optimistic concurrency failure that outlived the retry budget.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The carrier rejected the pickup or answered with an unusable payload.
    #[error("carrier error for order {order_id}: {message}")]
    CarrierError {
        order_id: AggregateId,
        status: Option<u16>,
        message: String,
    },

    /// The carrier did not answer within the configured timeout.
    #[error("carrier timed out after {timeout_ms}ms for order {order_id}")]
    CarrierTimeout { order_id: AggregateId, timeout_ms: u64 },

    /// Historical payloads could not be decoded into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (events are durable).
    #[error("publish failed: {0}")]
    Publish(String),
}

impl DispatchError {
    /// Transient failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Concurrency(_)
                | DispatchError::CarrierError { .. }
                | DispatchError::CarrierTimeout { .. }
                | DispatchError::Store(EventStoreError::Backend(_))
        )
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - `S`: event store implementation
/// - `B`: event bus receiving committed envelopes
///
/// Commands against different aggregates never contend. Commands against the
/// same aggregate are serialised by the store's version check.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_conflict_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run a command against the latest state, retrying on version conflicts.
    ///
    /// Returns the committed events; empty when the command was a no-op.
    #[instrument(skip_all, fields(aggregate_id = %aggregate_id, aggregate_type = aggregate_type))]
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: sellerdesk_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            let (aggregate, version) =
                self.rehydrate_for(aggregate_id, aggregate_type, &command, &make_aggregate)?;
            let outcome =
                self.decide_and_commit(aggregate_id, aggregate_type, &aggregate, version, &command);
            match outcome {
                Err(DispatchError::Concurrency(msg)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(attempt, reason = %msg, "version conflict, retrying command");
                }
                other => return other,
            }
        }
    }

    /// Run a command once against a caller-pinned version.
    ///
    /// Used when the command depends on a read taken earlier (e.g. before an
    /// external call). A moved stream surfaces as `Concurrency` without retry.
    #[instrument(skip_all, fields(aggregate_id = %aggregate_id, aggregate_type = aggregate_type))]
    pub fn dispatch_expecting<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        expected: ExpectedVersion,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: sellerdesk_events::Event + Serialize + DeserializeOwned,
    {
        let (aggregate, version) =
            self.rehydrate_for(aggregate_id, aggregate_type, &command, &make_aggregate)?;
        if !expected.matches(version) {
            return Err(DispatchError::Concurrency(format!(
                "expected {expected:?}, found {version}"
            )));
        }
        self.decide_and_commit(aggregate_id, aggregate_type, &aggregate, version, &command)
    }

    /// Rehydrate an aggregate from its stream (read path).
    ///
    /// An id owned by another aggregate type loads as a fresh, never-created
    /// aggregate, the same as an unknown id.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        match self.rehydrate(aggregate_id, aggregate_type, &make_aggregate)? {
            Stream::Owned { aggregate, .. } => Ok(aggregate),
            Stream::Foreign(_) => Ok(make_aggregate(aggregate_id)),
        }
    }

    fn rehydrate<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: &impl Fn(AggregateId) -> A,
    ) -> Result<Stream<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        if let Some(first) = history.first() {
            if first.aggregate_type != aggregate_type {
                return Ok(Stream::Foreign(first.aggregate_type.clone()));
            }
        }
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(Stream::Owned {
            aggregate,
            version: stream_version(&history),
        })
    }

    /// Rehydrate for a command; a stream owned by another type refuses it.
    fn rehydrate_for<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn(AggregateId) -> A,
    ) -> Result<(A, u64), DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        match self.rehydrate(aggregate_id, aggregate_type, make_aggregate)? {
            Stream::Owned { aggregate, version } => Ok((aggregate, version)),
            Stream::Foreign(other) => {
                Err(refuse_foreign(aggregate_id, &other, command, make_aggregate))
            }
        }
    }

    fn decide_and_commit<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        aggregate: &A,
        version: u64,
        command: &A::Command,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: sellerdesk_events::Event + Serialize,
    {
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            debug!(version, "command produced no events");
            return Ok(vec![]);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, ExpectedVersion::Exact(version))?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(e.to_string()))?;
        }

        info!(
            events = committed.len(),
            version = stream_version(&committed),
            "command committed"
        );
        Ok(committed)
    }
}

enum Stream<A> {
    Owned { aggregate: A, version: u64 },
    /// The id already belongs to a stream of this other aggregate type.
    Foreign(String),
}

/// Outcome of a command aimed at an id that belongs to another aggregate type.
///
/// The command runs against a never-created aggregate: its own refusal
/// (usually `NotFound`) is returned as-is, and a creating command gets
/// `Conflict` because the id is taken.
fn refuse_foreign<A>(
    aggregate_id: AggregateId,
    owner_type: &str,
    command: &A::Command,
    make_aggregate: &impl Fn(AggregateId) -> A,
) -> DispatchError
where
    A: Aggregate<Error = DomainError>,
{
    match make_aggregate(aggregate_id).handle(command) {
        Err(err) => DispatchError::Domain(err),
        Ok(_) => DispatchError::Domain(DomainError::conflict(format!(
            "id {aggregate_id} is already used by a {owner_type} stream"
        ))),
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let events = history
        .iter()
        .map(|stored| stored.decode::<A::Event>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
    aggregate.replay(&events);
    Ok(())
}
