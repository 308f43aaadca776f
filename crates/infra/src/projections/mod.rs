//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimised read
//! models. They are rebuildable from the store and idempotent under
//! at-least-once delivery: each keeps a per-stream sequence cursor and skips
//! anything at or below it.

pub mod order_board;
pub mod stock_history;

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use sellerdesk_core::AggregateId;

pub use order_board::{OrderBoardProjection, OrderSummary};
pub use stock_history::{StockHistoryFilter, StockHistoryProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Last applied sequence number per aggregate stream.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    /// Run `apply` if `seq` is the next event of the stream, then advance.
    ///
    /// Returns `Ok(false)` for duplicates. The cursor lock is held while
    /// applying, so envelopes of one projection are applied one at a time.
    pub(crate) fn advance(
        &self,
        aggregate_id: AggregateId,
        seq: u64,
        apply: impl FnOnce() -> Result<(), ProjectionError>,
    ) -> Result<bool, ProjectionError> {
        let mut cursors = self
            .inner
            .write()
            .map_err(|_| ProjectionError::StreamMismatch("cursor lock poisoned".to_string()))?;
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        // The first event seen may be any positive sequence; after that, no gaps.
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(aggregate_id, seq);
        Ok(true)
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::default();
        let id = AggregateId::new();

        assert!(cursors.advance(id, 1, || Ok(())).unwrap());
        assert!(!cursors.advance(id, 1, || Ok(())).unwrap());
        assert!(matches!(
            cursors.advance(id, 3, || Ok(())),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 3 })
        ));
        assert!(cursors.advance(id, 2, || Ok(())).unwrap());
    }

    #[test]
    fn failed_apply_does_not_move_the_cursor() {
        let cursors = StreamCursors::default();
        let id = AggregateId::new();

        let err = cursors.advance(id, 1, || Err(ProjectionError::Deserialize("bad".into())));
        assert!(err.is_err());
        assert!(cursors.advance(id, 1, || Ok(())).unwrap());
    }
}
