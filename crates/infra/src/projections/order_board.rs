use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use sellerdesk_core::AggregateId;
use sellerdesk_events::EventEnvelope;
use sellerdesk_fulfillment::{
    FulfillmentStage, ORDER_AGGREGATE_TYPE, OrderEvent, OrderId, OrderStatus, StatusBucket,
};

use super::{ProjectionError, StreamCursors};
use crate::read_model::ReadModelStore;

/// One row of the seller's order board (tabbed by [`StatusBucket`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub fulfillment_stage: Option<FulfillmentStage>,
    pub bucket: StatusBucket,
    pub item_count: u64,
    pub total: u64,
    pub tracking_id: Option<String>,
    pub return_request_id: Option<AggregateId>,
    pub refunded_amount: Option<u64>,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderSummary {
    fn set_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        self.bucket = status.bucket();
        if status != OrderStatus::ToShip {
            self.fulfillment_stage = None;
        }
        self.updated_at = at;
    }
}

/// Order listing projection.
#[derive(Debug)]
pub struct OrderBoardProjection<S>
where
    S: ReadModelStore<OrderId, OrderSummary>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrderBoardProjection<S>
where
    S: ReadModelStore<OrderId, OrderSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::default(),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<OrderSummary> {
        self.store.get(order_id)
    }

    /// Newest first; optionally restricted to one bucket.
    pub fn list(&self, bucket: Option<StatusBucket>) -> Vec<OrderSummary> {
        let mut rows: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|row| bucket.is_none_or(|b| row.bucket == b))
            .collect();
        rows.sort_by(|a, b| {
            b.placed_at
                .cmp(&a.placed_at)
                .then_with(|| b.order_id.0.as_uuid().cmp(a.order_id.0.as_uuid()))
        });
        rows
    }

    /// Apply one published envelope. Envelopes of other aggregate types are ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if !envelope.is_for(ORDER_AGGREGATE_TYPE) {
            return Ok(());
        }
        let aggregate_id = envelope.aggregate_id();

        self.cursors.advance(aggregate_id, envelope.sequence_number(), || {
            let event = envelope
                .decode::<OrderEvent>()
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
            let order_id = event.order_id();
            if order_id.0 != aggregate_id {
                return Err(ProjectionError::StreamMismatch(
                    "event order_id does not match envelope aggregate_id".to_string(),
                ));
            }
            self.fold(order_id, event)
        })?;

        Ok(())
    }

    fn fold(&self, order_id: OrderId, event: OrderEvent) -> Result<(), ProjectionError> {
        if let OrderEvent::OrderPlaced(e) = &event {
            let status = OrderStatus::Pending;
            self.store.upsert(
                order_id,
                OrderSummary {
                    order_id,
                    status,
                    fulfillment_stage: None,
                    bucket: status.bucket(),
                    item_count: e.items.iter().map(|i| u64::from(i.quantity)).sum(),
                    total: e.items.iter().map(|i| i.subtotal()).fold(0u64, u64::saturating_add),
                    tracking_id: None,
                    return_request_id: None,
                    refunded_amount: None,
                    placed_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            );
            return Ok(());
        }

        let Some(mut row) = self.store.get(&order_id) else {
            return Err(ProjectionError::StreamMismatch(format!(
                "order {order_id} has no placed event"
            )));
        };

        match event {
            OrderEvent::OrderPlaced(_) => {}
            OrderEvent::PaymentConfirmed(e) => {
                row.set_status(OrderStatus::Confirmed, e.occurred_at)
            }
            OrderEvent::MovedToShip(e) => {
                row.set_status(OrderStatus::ToShip, e.occurred_at);
                row.fulfillment_stage = Some(FulfillmentStage::ToPack);
            }
            OrderEvent::SubStageMoved(e) => {
                row.fulfillment_stage = Some(e.to);
                row.updated_at = e.occurred_at;
            }
            OrderEvent::ShipmentCreated(e) => {
                row.set_status(OrderStatus::Shipping, e.occurred_at);
                row.tracking_id = Some(e.shipping.tracking_id);
            }
            OrderEvent::OrderDelivered(e) => row.set_status(OrderStatus::Shipped, e.occurred_at),
            OrderEvent::DeliveryFailed(e) => {
                row.set_status(OrderStatus::FailedDelivery, e.occurred_at)
            }
            OrderEvent::DeliveryConfirmed(e) => {
                row.set_status(OrderStatus::Completed, e.occurred_at)
            }
            OrderEvent::OrderCancelled(e) => row.set_status(OrderStatus::Cancelled, e.occurred_at),
            OrderEvent::ReturnOpened(e) => {
                row.set_status(OrderStatus::ReturnRequested, e.occurred_at);
                row.return_request_id = Some(e.return_request_id);
            }
            OrderEvent::ReturnDecided(e) => {
                let status = if e.approved {
                    OrderStatus::ReturnApproved
                } else {
                    OrderStatus::ReturnRejected
                };
                row.set_status(status, e.occurred_at);
            }
            OrderEvent::OrderRefunded(e) => {
                row.set_status(OrderStatus::Refunded, e.occurred_at);
                row.refunded_amount = Some(e.refund_amount);
            }
        }

        self.store.upsert(order_id, row);
        Ok(())
    }

    /// Rebuild from scratch by replaying envelopes (any order; sorted per stream).
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear();
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReadModelStore;
    use sellerdesk_events::Event;
    use sellerdesk_fulfillment::{
        MovedToShip, OrderItem, OrderPlaced, PaymentConfirmed, SubStageMoved,
    };

    use uuid::Uuid;

    fn envelope(seq: u64, event: &OrderEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            event.order_id().0,
            ORDER_AGGREGATE_TYPE,
            seq,
            event.occurred_at(),
            serde_json::to_value(event).unwrap(),
        )
    }

    fn history(order_id: OrderId) -> Vec<OrderEvent> {
        let at = Utc::now();
        vec![
            OrderEvent::OrderPlaced(OrderPlaced {
                order_id,
                items: vec![OrderItem {
                    product_id: AggregateId::new(),
                    variation_id: Uuid::now_v7(),
                    quantity: 3,
                    unit_price: 250,
                }],
                occurred_at: at,
            }),
            OrderEvent::PaymentConfirmed(PaymentConfirmed { order_id, occurred_at: at }),
            OrderEvent::MovedToShip(MovedToShip { order_id, occurred_at: at }),
            OrderEvent::SubStageMoved(SubStageMoved {
                order_id,
                from: FulfillmentStage::ToPack,
                to: FulfillmentStage::ToArrangement,
                occurred_at: at,
            }),
        ]
    }

    #[test]
    fn folds_order_lifecycle_into_summary() {
        let projection = OrderBoardProjection::new(InMemoryReadModelStore::new());
        let order_id = OrderId(AggregateId::new());

        for (i, ev) in history(order_id).iter().enumerate() {
            projection.apply_envelope(&envelope(i as u64 + 1, ev)).unwrap();
        }

        let row = projection.get(&order_id).unwrap();
        assert_eq!(row.status, OrderStatus::ToShip);
        assert_eq!(row.fulfillment_stage, Some(FulfillmentStage::ToArrangement));
        assert_eq!(row.bucket, StatusBucket::ToShip);
        assert_eq!(row.item_count, 3);
        assert_eq!(row.total, 750);
        assert_eq!(projection.list(Some(StatusBucket::ToShip)).len(), 1);
        assert!(projection.list(Some(StatusBucket::Unpaid)).is_empty());
    }

    #[test]
    fn redelivery_is_idempotent_and_rebuild_matches() {
        let projection = OrderBoardProjection::new(InMemoryReadModelStore::new());
        let order_id = OrderId(AggregateId::new());
        let envs: Vec<_> = history(order_id)
            .iter()
            .enumerate()
            .map(|(i, ev)| envelope(i as u64 + 1, ev))
            .collect();

        for env in envs.iter().chain(envs.iter()) {
            projection.apply_envelope(env).unwrap();
        }
        let live = projection.get(&order_id).unwrap();

        let mut shuffled = envs.clone();
        shuffled.reverse();
        projection.rebuild_from_scratch(shuffled).unwrap();
        assert_eq!(projection.get(&order_id).unwrap(), live);
    }
}
