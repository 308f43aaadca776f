use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use sellerdesk_core::{AggregateId, ExpectedVersion};
use sellerdesk_events::{Event, EventEnvelope};

/// A serialized domain event waiting for its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("{} did not serialize: {e}", event.event_type()))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }

    /// Stamp the store-assigned position.
    pub fn commit_at(self, sequence_number: u64) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            sequence_number,
            event_type: self.event_type,
            event_version: self.event_version,
            occurred_at: self.occurred_at,
            payload: self.payload,
        }
    }
}

/// Validate that a batch targets exactly one stream.
///
/// Returns `None` for an empty batch, which every backend treats as a no-op append.
pub fn single_stream(
    events: &[UncommittedEvent],
) -> Result<Option<(AggregateId, String)>, EventStoreError> {
    let Some(first) = events.first() else {
        return Ok(None);
    };
    for (idx, e) in events.iter().enumerate().skip(1) {
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch spans more than one stream (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch mixes '{}' and '{}' (index {idx})",
                first.aggregate_type, e.aggregate_type
            )));
        }
    }
    Ok(Some((first.aggregate_id, first.aggregate_type.clone())))
}

/// A committed event. `sequence_number` is 1-based and gap-free per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub sequence_number: u64,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.as_str(),
            self.sequence_number,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved past the caller's expected version.
    #[error("stream version conflict: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Append-only storage for order, stock and return streams.
///
/// `append` is all-or-nothing: it checks `expected_version` against the
/// stream's last sequence number and numbers the batch from there.
/// Loading an unknown stream yields an empty history.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// All streams interleaved in commit order; feeds projection rebuilds.
    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        S::append(self, events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        S::load_stream(self, aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        S::load_all(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "fulfillment.order.placed".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn single_stream_rejects_mixed_batches() {
        let order = AggregateId::new();
        assert!(single_stream(&[]).unwrap().is_none());

        let same = [raw(order, "fulfillment.order"), raw(order, "fulfillment.order")];
        let (id, ty) = single_stream(&same).unwrap().unwrap();
        assert_eq!((id, ty.as_str()), (order, "fulfillment.order"));

        let other = AggregateId::new();
        let two_streams = [raw(order, "fulfillment.order"), raw(other, "fulfillment.order")];
        assert!(matches!(single_stream(&two_streams), Err(EventStoreError::InvalidAppend(_))));

        let two_types = [raw(order, "fulfillment.order"), raw(order, "returns.return_request")];
        assert!(matches!(
            single_stream(&two_types),
            Err(EventStoreError::AggregateTypeMismatch(_))
        ));

    }

    #[test]
    fn commit_stamps_position_and_keeps_payload() {
        let mut ev = raw(AggregateId::new(), "inventory.product_stock");
        ev.payload = serde_json::json!({ "units": 3 });

        let stored = ev.clone().commit_at(7);
        assert_eq!(stored.sequence_number, 7);
        assert_eq!(stored.event_id, ev.event_id);
        assert_eq!(stored.decode::<serde_json::Value>().unwrap()["units"], 3);
        assert_eq!(stored.to_envelope().sequence_number(), 7);
    }
}
