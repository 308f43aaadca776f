//! `RequestCarrierPickup`: the one workflow step that talks to the outside world.
//!
//! ```text
//! rehydrate order ─► precondition (to-hand-over) ─► schedule check
//!        ─► carrier.create_pickup under timeout ─► RecordShipment @ Exact(version)
//! ```
//!
//! Nothing is written unless the carrier confirmed with a tracking id. A
//! failure, a timeout or a dropped future leaves the order in `to-hand-over`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use sellerdesk_core::{AggregateId, AggregateRoot, ExpectedVersion};
use sellerdesk_events::{EventBus, EventEnvelope};
use sellerdesk_fulfillment::{
    ORDER_AGGREGATE_TYPE, Order, OrderCommand, OrderId, PickupWindow, RecordShipment,
};

use crate::carrier::{CarrierAdapter, PickupRequest};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

pub const DEFAULT_CARRIER_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates the carrier call with the order state machine.
pub struct CarrierHandoff<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    carrier: Arc<dyn CarrierAdapter>,
    window: PickupWindow,
    default_timeout: Duration,
}

impl<S, B> CarrierHandoff<S, B> {
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, carrier: Arc<dyn CarrierAdapter>) -> Self {
        Self {
            dispatcher,
            carrier,
            window: PickupWindow::default(),
            default_timeout: DEFAULT_CARRIER_TIMEOUT,
        }
    }

    pub fn with_window(mut self, window: PickupWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn window(&self) -> PickupWindow {
        self.window
    }
}

impl<S, B> CarrierHandoff<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Book a carrier pickup and move the order to `shipping`.
    ///
    /// `timeout` overrides the default carrier timeout for this call. Returns
    /// the order as stored after the step (unchanged on an idempotent replay).
    #[instrument(skip(self, remarks), fields(order_id = %order_id, pickup_at = %pickup_at))]
    pub async fn request_pickup(
        &self,
        order_id: AggregateId,
        pickup_at: DateTime<Utc>,
        remarks: Option<String>,
        timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Order, DispatchError> {
        let make = |id| Order::empty(OrderId(id));

        let order = self.dispatcher.load(order_id, ORDER_AGGREGATE_TYPE, make)?;
        if order.check_pickup_ready()? {
            debug!("order already handed over, carrier not contacted");
            return Ok(order);
        }
        self.window.validate(pickup_at, now)?;

        let version = order.version();
        let timeout = timeout.unwrap_or(self.default_timeout);
        let request = PickupRequest {
            order_id,
            pickup_at,
            remarks: remarks.clone(),
        };

        let pickup = self.carrier.create_pickup(request);
        let response = match tokio::time::timeout(timeout, pickup).await {
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "carrier pickup timed out");
                return Err(DispatchError::CarrierTimeout {
                    order_id,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(Err(failure)) => {
                warn!(
                    status = ?failure.status,
                    message = %failure.message,
                    "carrier pickup failed"
                );
                return Err(DispatchError::CarrierError {
                    order_id,
                    status: failure.status,
                    message: failure.message,
                });
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_confirmed() {
            let message = if response.success {
                "carrier confirmed pickup without a tracking id"
            } else {
                "carrier reported an unsuccessful pickup"
            };
            warn!(message, "carrier pickup not confirmed");
            return Err(DispatchError::CarrierError {
                order_id,
                status: None,
                message: message.to_string(),
            });
        }

        let command = OrderCommand::RecordShipment(RecordShipment {
            order_id: OrderId(order_id),
            tracking_id: response.tracking_id,
            shipping_reference_no: response.shipping_reference_no,
            pickup_at,
            remarks,
            carrier_payload: response.carrier_payload,
            occurred_at: Utc::now(),
        });
        self.dispatcher.dispatch_expecting(
            order_id,
            ORDER_AGGREGATE_TYPE,
            command,
            ExpectedVersion::Exact(version),
            make,
        )?;

        let order = self.dispatcher.load(order_id, ORDER_AGGREGATE_TYPE, make)?;
        let tracking_id = order.shipping().map(|s| s.tracking_id.as_str()).unwrap_or("");
        info!(tracking_id, "order handed over to carrier");

        Ok(order)
    }
}
