//! Return → order status sync.
//!
//! A return request lives in its own stream; the order mirrors its progress
//! (`return_requested → return_approved|return_rejected → refunded`). Every
//! order command issued here is idempotent, so redelivered envelopes are harmless.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use sellerdesk_events::{EventBus, EventEnvelope};
use sellerdesk_fulfillment::{
    ORDER_AGGREGATE_TYPE, OpenReturn, Order, OrderCommand, OrderId, RecordRefund,
    RecordReturnDecision,
};
use sellerdesk_returns::{RETURN_REQUEST_AGGREGATE_TYPE, ReturnEvent};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReturnOrderSync;

impl ReturnOrderSync {
    /// The order command mirroring a return event, if any.
    pub fn react(
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<Option<OrderCommand>, DispatchError> {
        if !envelope.is_for(RETURN_REQUEST_AGGREGATE_TYPE) {
            return Ok(None);
        }
        let event = envelope
            .decode::<ReturnEvent>()
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;

        let order_id = OrderId(event.order_id());
        let at: DateTime<Utc> = envelope.occurred_at();
        let command = match event {
            ReturnEvent::Requested(e) => OrderCommand::OpenReturn(OpenReturn {
                order_id,
                return_request_id: e.return_request_id.0,
                occurred_at: at,
            }),
            ReturnEvent::Approved(_) => OrderCommand::RecordReturnDecision(RecordReturnDecision {
                order_id,
                approved: true,
                occurred_at: at,
            }),
            ReturnEvent::Rejected(_) => OrderCommand::RecordReturnDecision(RecordReturnDecision {
                order_id,
                approved: false,
                occurred_at: at,
            }),
            ReturnEvent::Completed(e) => OrderCommand::RecordRefund(RecordRefund {
                order_id,
                refund_amount: e.refund_amount,
                occurred_at: at,
            }),
        };
        Ok(Some(command))
    }

    /// React to one envelope by dispatching on the order stream.
    #[instrument(
        skip_all,
        fields(aggregate_id = %envelope.aggregate_id(), seq = envelope.sequence_number())
    )]

    pub fn handle<S, B>(
        dispatcher: &CommandDispatcher<S, B>,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DispatchError>
    where
        S: EventStore,
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        let Some(command) = Self::react(envelope)? else {
            return Ok(());
        };
        let order_id = match &command {
            OrderCommand::OpenReturn(c) => c.order_id,
            OrderCommand::RecordReturnDecision(c) => c.order_id,
            OrderCommand::RecordRefund(c) => c.order_id,
            _ => return Ok(()),
        };

        let committed = dispatcher.dispatch(order_id.0, ORDER_AGGREGATE_TYPE, command, |id| {
            Order::empty(OrderId(id))
        })?;
        debug!(order_id = %order_id, events = committed.len(), "order synced with return");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sellerdesk_core::AggregateId;
    use sellerdesk_events::Event;
    use sellerdesk_returns::{ReturnApproved, ReturnRequestId};
    use uuid::Uuid;

    #[test]
    fn approval_maps_to_positive_decision() {
        let order_id = AggregateId::new();
        let event = ReturnEvent::Approved(ReturnApproved {
            return_request_id: ReturnRequestId(AggregateId::new()),
            order_id,
            refund_amount: 250,
            message: "partial".to_string(),
            occurred_at: Utc::now(),
        });
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            RETURN_REQUEST_AGGREGATE_TYPE,
            2,
            event.occurred_at(),
            serde_json::to_value(&event).unwrap(),
        );

        match ReturnOrderSync::react(&envelope).unwrap() {
            Some(OrderCommand::RecordReturnDecision(c)) => {
                assert!(c.approved);
                assert_eq!(c.order_id, OrderId(order_id));
            }
            other => panic!("unexpected reaction: {other:?}"),
        }
    }

    #[test]
    fn other_streams_are_ignored() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            ORDER_AGGREGATE_TYPE,
            1,
            Utc::now(),
            serde_json::json!({}),
        );
        assert!(ReturnOrderSync::react(&envelope).unwrap().is_none());
    }
}
