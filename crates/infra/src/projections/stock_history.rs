use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use sellerdesk_events::EventEnvelope;
use sellerdesk_inventory::{
    InventoryEvent, PRODUCT_STOCK_AGGREGATE_TYPE, ProductId, StockAdjustmentLogEntry, VariationId,
};

use super::{ProjectionError, StreamCursors};
use crate::read_model::ReadModelStore;

/// Position of an entry: product stream, event sequence, index inside the batch.
pub type HistoryKey = (ProductId, u64, usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockHistoryRow {
    pub sequence_number: u64,
    pub position: usize,
    pub entry: StockAdjustmentLogEntry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StockHistoryFilter {
    pub product_id: Option<ProductId>,
    pub variation_id: Option<VariationId>,
}

/// Audit/reporting reader over every stock adjustment log entry.
#[derive(Debug)]
pub struct StockHistoryProjection<S>
where
    S: ReadModelStore<HistoryKey, StockHistoryRow>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockHistoryProjection<S>
where
    S: ReadModelStore<HistoryKey, StockHistoryRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::default(),
        }
    }

    /// Entries ordered by `created_at`, then stream sequence, then batch position.
    pub fn query(&self, filter: StockHistoryFilter) -> Vec<StockAdjustmentLogEntry> {
        let mut rows: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|r| filter.product_id.is_none_or(|p| r.entry.product_id == p))
            .filter(|r| filter.variation_id.is_none_or(|v| r.entry.variation_id == v))
            .collect();
        rows.sort_by(history_order);
        rows.into_iter().map(|r| r.entry).collect()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if !envelope.is_for(PRODUCT_STOCK_AGGREGATE_TYPE) {
            return Ok(());
        }
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        self.cursors.advance(aggregate_id, seq, || {
            let event = envelope
                .decode::<InventoryEvent>()
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
            let product_id = event.product_id();
            if product_id.0 != aggregate_id {
                return Err(ProjectionError::StreamMismatch(
                    "event product_id does not match envelope aggregate_id".to_string(),
                ));
            }

            for (position, entry) in event.log_entries().iter().enumerate() {
                self.store.upsert(
                    (product_id, seq, position),
                    StockHistoryRow {
                        sequence_number: seq,
                        position,
                        entry: entry.clone(),
                    },
                );
            }
            Ok(())
        })?;

        Ok(())
    }

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

fn history_order(a: &StockHistoryRow, b: &StockHistoryRow) -> Ordering {
    a.entry
        .created_at
        .cmp(&b.entry.created_at)
        .then(a.sequence_number.cmp(&b.sequence_number))
        .then(a.position.cmp(&b.position))
        .then_with(|| a.entry.product_id.0.as_uuid().cmp(b.entry.product_id.0.as_uuid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReadModelStore;
    use chrono::{Duration, Utc};
    use sellerdesk_core::{AggregateId, UserId};
    use sellerdesk_events::Event;
    use sellerdesk_inventory::{AdjustmentAction, StockBatchAdjusted};
    use uuid::Uuid;

    fn entry(
        product_id: ProductId,
        variation_id: VariationId,
        before: i64,
        after: i64,
        at_offset: i64,
    ) -> StockAdjustmentLogEntry {
        StockAdjustmentLogEntry {
            product_id,
            variation_id,
            before_stock: before,
            after_stock: after,
            adjustment: after - before,
            action: AdjustmentAction::ReceiveItems,
            reason: "restock".to_string(),
            user_id: UserId::system(),
            created_at: Utc::now() + Duration::seconds(at_offset),
        }
    }

    fn batch(
        product_id: ProductId,
        seq: u64,
        entries: Vec<StockAdjustmentLogEntry>,
    ) -> EventEnvelope<JsonValue> {

        let event = InventoryEvent::StockBatchAdjusted(StockBatchAdjusted {
            product_id,
            action: AdjustmentAction::ReceiveItems,
            reason: "restock".to_string(),
            user_id: UserId::system(),
            entries,
            occurred_at: Utc::now(),
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            product_id.0,
            PRODUCT_STOCK_AGGREGATE_TYPE,
            seq,
            event.occurred_at(),
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn entries_are_ordered_and_filterable() {
        let projection = StockHistoryProjection::new(InMemoryReadModelStore::new());
        let p1 = ProductId(AggregateId::new());
        let p2 = ProductId(AggregateId::new());
        let (v1, v2, v3) = (VariationId::new(), VariationId::new(), VariationId::new());

        projection
            .apply_envelope(&batch(p1, 1, vec![entry(p1, v1, 0, 5, 0), entry(p1, v2, 0, 7, 0)]))
            .unwrap();
        projection.apply_envelope(&batch(p2, 1, vec![entry(p2, v3, 0, 1, 1)])).unwrap();
        projection.apply_envelope(&batch(p1, 2, vec![entry(p1, v1, 5, 2, 2)])).unwrap();

        let all = projection.query(StockHistoryFilter::default());
        let order: Vec<_> = all.iter().map(|e| (e.variation_id, e.after_stock)).collect();
        assert_eq!(order, vec![(v1, 5), (v2, 7), (v3, 1), (v1, 2)]);

        let v1_only = projection.query(StockHistoryFilter {
            product_id: Some(p1),
            variation_id: Some(v1),
        });
        assert_eq!(v1_only.len(), 2);
        assert!(v1_only.iter().all(|e| e.is_consistent()));
    }

    #[test]
    fn redelivered_batches_are_not_duplicated() {
        let projection = StockHistoryProjection::new(InMemoryReadModelStore::new());
        let p = ProductId(AggregateId::new());
        let env = batch(p, 1, vec![entry(p, VariationId::new(), 10, 4, 0)]);

        projection.apply_envelope(&env).unwrap();
        projection.apply_envelope(&env).unwrap();
        assert_eq!(projection.query(StockHistoryFilter::default()).len(), 1);
    }
}
