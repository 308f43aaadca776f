use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use sellerdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use sellerdesk_events::Event;

use crate::status::{FulfillmentStage, OrderStatus};

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order item: product/variation reference, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: AggregateId,
    pub variation_id: Uuid,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

impl OrderItem {
    pub fn subtotal(&self) -> u64 {
        self.unit_price.saturating_mul(u64::from(self.quantity))
    }
}

/// Carrier metadata captured when the shipment is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub tracking_id: String,
    pub shipping_reference_no: String,
    pub pickup_at: DateTime<Utc>,
    pub remarks: Option<String>,
    pub carrier_payload: JsonValue,
}

/// Stage-entry times (SLA measurement).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTimestamps {
    pub placed_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub to_pack_at: Option<DateTime<Utc>>,
    /// Entered `to-arrangement` (packing done).
    pub packed_at: Option<DateTime<Utc>>,
    pub to_hand_over_at: Option<DateTime<Utc>>,
    /// Carrier accepted the pickup (entered `shipping`).
    pub handed_over_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    stage: Option<FulfillmentStage>,
    items: Vec<OrderItem>,
    shipping: Option<ShippingInfo>,
    return_request_id: Option<AggregateId>,
    cancel_reason: Option<String>,
    failure_reason: Option<String>,
    refunded_amount: Option<u64>,
    timestamps: OrderTimestamps,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            status: OrderStatus::Pending,
            stage: None,
            items: Vec::new(),
            shipping: None,
            return_request_id: None,
            cancel_reason: None,
            failure_reason: None,
            refunded_amount: None,
            timestamps: OrderTimestamps::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Present iff `status == ToShip`.
    pub fn fulfillment_stage(&self) -> Option<FulfillmentStage> {
        self.stage
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total(&self) -> u64 {
        self.items.iter().map(OrderItem::subtotal).sum()
    }

    pub fn shipping(&self) -> Option<&ShippingInfo> {
        self.shipping.as_ref()
    }

    pub fn return_request_id(&self) -> Option<AggregateId> {
        self.return_request_id
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn refunded_amount(&self) -> Option<u64> {
        self.refunded_amount
    }

    pub fn timestamps(&self) -> &OrderTimestamps {
        &self.timestamps
    }

    /// Shipment already recorded with a tracking id.
    pub fn is_handed_over(&self) -> bool {
        self.status == OrderStatus::Shipping
            && self
                .shipping
                .as_ref()
                .is_some_and(|s| !s.tracking_id.is_empty())
    }

    /// Precondition for a carrier pickup request.
    ///
    /// `Ok(true)` means the handoff already happened (idempotent replay),
    /// `Ok(false)` means the carrier may be called.
    pub fn check_pickup_ready(&self) -> Result<bool, DomainError> {
        self.ensure_created()?;
        if self.is_handed_over() {
            return Ok(true);
        }
        if self.status == OrderStatus::ToShip && self.stage == Some(FulfillmentStage::ToHandOver) {
            return Ok(false);
        }
        Err(DomainError::invalid_transition(
            self.id,
            self.stage_label(),
            OrderStatus::Shipping,
        ))
    }

    /// Whether a return request may be opened against this order.
    pub fn can_open_return(&self) -> bool {
        self.created && matches!(self.status, OrderStatus::Shipped | OrderStatus::Completed)
    }

    /// `status` or `status/stage` for error details.
    pub fn stage_label(&self) -> String {
        match self.stage {
            Some(stage) => format!("{}/{}", self.status, stage),
            None => self.status.to_string(),
        }
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder (issued by the external checkout flow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceToShip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceToShip {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MoveSubStage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveSubStage {
    pub order_id: OrderId,
    pub from: FulfillmentStage,
    pub to: FulfillmentStage,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordShipment (only after the carrier confirmed the pickup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShipment {
    pub order_id: OrderId,
    pub tracking_id: String,
    pub shipping_reference_no: String,
    pub pickup_at: DateTime<Utc>,
    pub remarks: Option<String>,
    pub carrier_payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDeliveryFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDeliveryFailed {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmDelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDelivery {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder. `at_stage` is the status the caller believes current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub at_stage: OrderStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: OpenReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReturn {
    pub order_id: OrderId,
    pub return_request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReturnDecision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReturnDecision {
    pub order_id: OrderId,
    pub approved: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordRefund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRefund {
    pub order_id: OrderId,
    pub refund_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ConfirmPayment(ConfirmPayment),
    AdvanceToShip(AdvanceToShip),
    MoveSubStage(MoveSubStage),
    RecordShipment(RecordShipment),
    MarkDelivered(MarkDelivered),
    MarkDeliveryFailed(MarkDeliveryFailed),
    ConfirmDelivery(ConfirmDelivery),
    CancelOrder(CancelOrder),
    OpenReturn(OpenReturn),
    RecordReturnDecision(RecordReturnDecision),
    RecordRefund(RecordRefund),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovedToShip (enters `to_ship` / `to-pack`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedToShip {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubStageMoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStageMoved {
    pub order_id: OrderId,
    pub from: FulfillmentStage,
    pub to: FulfillmentStage,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCreated {
    pub order_id: OrderId,
    pub shipping: ShippingInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered (awaiting customer confirmation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailed {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryConfirmed. Stock decrements for the order become final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOpened {
    pub order_id: OrderId,
    pub return_request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnDecided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDecided {
    pub order_id: OrderId,
    pub approved: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRefunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRefunded {
    pub order_id: OrderId,
    pub refund_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    PaymentConfirmed(PaymentConfirmed),
    MovedToShip(MovedToShip),
    SubStageMoved(SubStageMoved),
    ShipmentCreated(ShipmentCreated),
    OrderDelivered(OrderDelivered),
    DeliveryFailed(DeliveryFailed),
    DeliveryConfirmed(DeliveryConfirmed),
    OrderCancelled(OrderCancelled),
    ReturnOpened(ReturnOpened),
    ReturnDecided(ReturnDecided),
    OrderRefunded(OrderRefunded),
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderPlaced(e) => e.order_id,
            OrderEvent::PaymentConfirmed(e) => e.order_id,
            OrderEvent::MovedToShip(e) => e.order_id,
            OrderEvent::SubStageMoved(e) => e.order_id,
            OrderEvent::ShipmentCreated(e) => e.order_id,
            OrderEvent::OrderDelivered(e) => e.order_id,
            OrderEvent::DeliveryFailed(e) => e.order_id,
            OrderEvent::DeliveryConfirmed(e) => e.order_id,
            OrderEvent::OrderCancelled(e) => e.order_id,
            OrderEvent::ReturnOpened(e) => e.order_id,
            OrderEvent::ReturnDecided(e) => e.order_id,
            OrderEvent::OrderRefunded(e) => e.order_id,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "fulfillment.order.placed",
            OrderEvent::PaymentConfirmed(_) => "fulfillment.order.payment_confirmed",
            OrderEvent::MovedToShip(_) => "fulfillment.order.moved_to_ship",
            OrderEvent::SubStageMoved(_) => "fulfillment.order.sub_stage_moved",
            OrderEvent::ShipmentCreated(_) => "fulfillment.order.shipment_created",
            OrderEvent::OrderDelivered(_) => "fulfillment.order.delivered",
            OrderEvent::DeliveryFailed(_) => "fulfillment.order.delivery_failed",
            OrderEvent::DeliveryConfirmed(_) => "fulfillment.order.delivery_confirmed",
            OrderEvent::OrderCancelled(_) => "fulfillment.order.cancelled",
            OrderEvent::ReturnOpened(_) => "fulfillment.order.return_opened",
            OrderEvent::ReturnDecided(_) => "fulfillment.order.return_decided",
            OrderEvent::OrderRefunded(_) => "fulfillment.order.refunded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::PaymentConfirmed(e) => e.occurred_at,
            OrderEvent::MovedToShip(e) => e.occurred_at,
            OrderEvent::SubStageMoved(e) => e.occurred_at,
            OrderEvent::ShipmentCreated(e) => e.occurred_at,
            OrderEvent::OrderDelivered(e) => e.occurred_at,
            OrderEvent::DeliveryFailed(e) => e.occurred_at,
            OrderEvent::DeliveryConfirmed(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::ReturnOpened(e) => e.occurred_at,
            OrderEvent::ReturnDecided(e) => e.occurred_at,
            OrderEvent::OrderRefunded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.status = OrderStatus::Pending;
                self.stage = None;
                self.items = e.items.clone();
                self.timestamps.placed_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::PaymentConfirmed(e) => {
                self.status = OrderStatus::Confirmed;
                self.timestamps.confirmed_at = Some(e.occurred_at);
            }
            OrderEvent::MovedToShip(e) => {
                self.status = OrderStatus::ToShip;
                self.stage = Some(FulfillmentStage::ToPack);
                self.timestamps.to_pack_at = Some(e.occurred_at);
            }
            OrderEvent::SubStageMoved(e) => {
                self.stage = Some(e.to);
                let entered = Some(e.occurred_at);
                match e.to {
                    FulfillmentStage::ToPack => self.timestamps.to_pack_at = entered,
                    FulfillmentStage::ToArrangement => self.timestamps.packed_at = entered,
                    FulfillmentStage::ToHandOver => self.timestamps.to_hand_over_at = entered,
                }
            }
            OrderEvent::ShipmentCreated(e) => {
                self.status = OrderStatus::Shipping;
                self.stage = None;
                self.shipping = Some(e.shipping.clone());
                self.timestamps.handed_over_at = Some(e.occurred_at);
            }
            OrderEvent::OrderDelivered(e) => {
                self.status = OrderStatus::Shipped;
                self.timestamps.delivered_at = Some(e.occurred_at);
            }
            OrderEvent::DeliveryFailed(e) => {
                self.status = OrderStatus::FailedDelivery;
                self.failure_reason = Some(e.reason.clone());
            }
            OrderEvent::DeliveryConfirmed(e) => {
                self.status = OrderStatus::Completed;
                self.timestamps.completed_at = Some(e.occurred_at);
            }
            OrderEvent::OrderCancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.stage = None;
                self.cancel_reason = e.reason.clone();
                self.timestamps.cancelled_at = Some(e.occurred_at);
            }
            OrderEvent::ReturnOpened(e) => {
                self.status = OrderStatus::ReturnRequested;
                self.return_request_id = Some(e.return_request_id);
            }
            OrderEvent::ReturnDecided(e) => {
                self.status = if e.approved {
                    OrderStatus::ReturnApproved
                } else {
                    OrderStatus::ReturnRejected
                };
            }
            OrderEvent::OrderRefunded(e) => {
                self.status = OrderStatus::Refunded;
                self.refunded_amount = Some(e.refund_amount);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ConfirmPayment(cmd) => self.handle_confirm_payment(cmd),
            OrderCommand::AdvanceToShip(cmd) => self.handle_advance_to_ship(cmd),
            OrderCommand::MoveSubStage(cmd) => self.handle_move_sub_stage(cmd),
            OrderCommand::RecordShipment(cmd) => self.handle_record_shipment(cmd),
            OrderCommand::MarkDelivered(cmd) => self.handle_mark_delivered(cmd),
            OrderCommand::MarkDeliveryFailed(cmd) => self.handle_mark_delivery_failed(cmd),
            OrderCommand::ConfirmDelivery(cmd) => self.handle_confirm_delivery(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::OpenReturn(cmd) => self.handle_open_return(cmd),
            OrderCommand::RecordReturnDecision(cmd) => self.handle_return_decision(cmd),
            OrderCommand::RecordRefund(cmd) => self.handle_refund(cmd),
        }
    }
}

impl Order {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {}", self.id)));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_target(&self, order_id: OrderId) -> Result<(), DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(order_id)
    }

    fn refuse(&self, to: impl ToString) -> DomainError {
        DomainError::invalid_transition(self.id, self.stage_label(), to)
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        if cmd.items.iter().any(|i| i.quantity == 0) {
            return Err(DomainError::validation("item quantity must be positive"));
        }
        if cmd.items.iter().any(|i| i.unit_price == 0) {
            return Err(DomainError::validation("item unit_price must be positive"));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_payment(
        &self,
        cmd: &ConfirmPayment,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        match self.status {
            OrderStatus::Confirmed => Ok(vec![]),
            OrderStatus::Pending => Ok(vec![OrderEvent::PaymentConfirmed(PaymentConfirmed {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            })]),
            _ => Err(self.refuse(OrderStatus::Confirmed)),
        }
    }

    fn handle_advance_to_ship(
        &self,
        cmd: &AdvanceToShip,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        match self.status {
            OrderStatus::ToShip => Ok(vec![]),
            OrderStatus::Confirmed => Ok(vec![OrderEvent::MovedToShip(MovedToShip {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            })]),
            _ => Err(self.refuse(format!(
                "{}/{}",
                OrderStatus::ToShip,
                FulfillmentStage::ToPack
            ))),
        }
    }

    fn handle_move_sub_stage(
        &self,
        cmd: &MoveSubStage,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        let target = format!("{}/{}", OrderStatus::ToShip, cmd.to);

        // Non-adjacent pairs are never legal, whatever the current stage.
        if !FulfillmentStage::is_adjacent(cmd.from, cmd.to) {
            return Err(DomainError::invalid_transition(
                self.id,
                format!("{}/{}", OrderStatus::ToShip, cmd.from),
                target,
            ));
        }

        let Some(current) = self.stage.filter(|_| self.status == OrderStatus::ToShip) else {
            return Err(self.refuse(target));
        };

        if current == cmd.to {
            return Ok(vec![]);
        }
        if current != cmd.from {
            return Err(self.refuse(target));
        }

        Ok(vec![OrderEvent::SubStageMoved(SubStageMoved {
            order_id: cmd.order_id,
            from: cmd.from,
            to: cmd.to,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_shipment(
        &self,
        cmd: &RecordShipment,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        if self.is_handed_over() {
            return Ok(vec![]);
        }
        if cmd.tracking_id.trim().is_empty() {
            return Err(DomainError::validation(
                "shipment requires a non-empty tracking id",
            ));
        }
        if self.status != OrderStatus::ToShip || self.stage != Some(FulfillmentStage::ToHandOver) {
            return Err(self.refuse(OrderStatus::Shipping));
        }

        Ok(vec![OrderEvent::ShipmentCreated(ShipmentCreated {
            order_id: cmd.order_id,
            shipping: ShippingInfo {
                tracking_id: cmd.tracking_id.clone(),
                shipping_reference_no: cmd.shipping_reference_no.clone(),
                pickup_at: cmd.pickup_at,
                remarks: cmd.remarks.clone(),
                carrier_payload: cmd.carrier_payload.clone(),
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_delivered(
        &self,
        cmd: &MarkDelivered,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        match self.status {
            OrderStatus::Shipped => Ok(vec![]),
            OrderStatus::Shipping => Ok(vec![OrderEvent::OrderDelivered(OrderDelivered {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            })]),
            _ => Err(self.refuse(OrderStatus::Shipped)),
        }
    }

    fn handle_mark_delivery_failed(
        &self,
        cmd: &MarkDeliveryFailed,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        match self.status {
            OrderStatus::FailedDelivery => Ok(vec![]),
            OrderStatus::Shipping | OrderStatus::Shipped => {
                if cmd.reason.trim().is_empty() {
                    return Err(DomainError::validation("delivery failure requires a reason"));
                }
                Ok(vec![OrderEvent::DeliveryFailed(DeliveryFailed {
                    order_id: cmd.order_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            _ => Err(self.refuse(OrderStatus::FailedDelivery)),
        }
    }

    fn handle_confirm_delivery(
        &self,
        cmd: &ConfirmDelivery,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        match self.status {
            OrderStatus::Completed => Ok(vec![]),
            OrderStatus::Shipping | OrderStatus::Shipped => {
                Ok(vec![OrderEvent::DeliveryConfirmed(DeliveryConfirmed {
                    order_id: cmd.order_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            _ => Err(self.refuse(OrderStatus::Completed)),
        }
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        if self.status == OrderStatus::Cancelled {
            return Ok(vec![]);
        }
        // A stale view of the order must not cancel it.
        if cmd.at_stage != self.status || !self.status.is_cancellable() {
            return Err(self.refuse(OrderStatus::Cancelled));
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            from: self.status,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_open_return(&self, cmd: &OpenReturn) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        // Same request already opened; later return stages also count as done.
        if self.return_request_id == Some(cmd.return_request_id)
            && matches!(
                self.status,
                OrderStatus::ReturnRequested
                    | OrderStatus::ReturnApproved
                    | OrderStatus::ReturnRejected
                    | OrderStatus::Refunded
            )
        {
            return Ok(vec![]);
        }
        if !self.can_open_return() {
            return Err(self.refuse(OrderStatus::ReturnRequested));
        }

        Ok(vec![OrderEvent::ReturnOpened(ReturnOpened {
            order_id: cmd.order_id,
            return_request_id: cmd.return_request_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return_decision(
        &self,
        cmd: &RecordReturnDecision,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        let target = if cmd.approved {
            OrderStatus::ReturnApproved
        } else {
            OrderStatus::ReturnRejected
        };

        if self.status == target || (cmd.approved && self.status == OrderStatus::Refunded) {
            return Ok(vec![]);
        }
        if self.status != OrderStatus::ReturnRequested {
            return Err(self.refuse(target));
        }

        Ok(vec![OrderEvent::ReturnDecided(ReturnDecided {
            order_id: cmd.order_id,
            approved: cmd.approved,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RecordRefund) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.order_id)?;

        match self.status {
            OrderStatus::Refunded => Ok(vec![]),
            OrderStatus::ReturnApproved => Ok(vec![OrderEvent::OrderRefunded(OrderRefunded {
                order_id: cmd.order_id,
                refund_amount: cmd.refund_amount,
                occurred_at: cmd.occurred_at,
            })]),
            _ => Err(self.refuse(OrderStatus::Refunded)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sellerdesk_core::AggregateId;

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_items() -> Vec<OrderItem> {
        vec![
            OrderItem {
                product_id: AggregateId::new(),
                variation_id: Uuid::now_v7(),
                quantity: 2,
                unit_price: 250,
            },
            OrderItem {
                product_id: AggregateId::new(),
                variation_id: Uuid::now_v7(),
                quantity: 1,
                unit_price: 500,
            },
        ]
    }

    fn execute(order: &mut Order, cmd: OrderCommand) -> Vec<OrderEvent> {
        order.execute(&cmd).unwrap()
    }

    fn placed(order_id: OrderId) -> Order {
        let mut order = Order::empty(order_id);
        execute(
            &mut order,
            OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                items: test_items(),
                occurred_at: test_time(),
            }),
        );
        order
    }

    fn confirmed(order_id: OrderId) -> Order {
        let mut order = placed(order_id);
        execute(
            &mut order,
            OrderCommand::ConfirmPayment(ConfirmPayment {
                order_id,
                occurred_at: test_time(),
            }),
        );
        order
    }

    fn at_stage(order_id: OrderId, stage: FulfillmentStage) -> Order {
        let mut order = confirmed(order_id);
        execute(
            &mut order,
            OrderCommand::AdvanceToShip(AdvanceToShip {
                order_id,
                occurred_at: test_time(),
            }),
        );
        let mut current = FulfillmentStage::ToPack;
        while current != stage {
            let next = current.next().unwrap();
            execute(&mut order, move_cmd(order_id, current, next));
            current = next;
        }
        order
    }

    fn move_cmd(order_id: OrderId, from: FulfillmentStage, to: FulfillmentStage) -> OrderCommand {
        OrderCommand::MoveSubStage(MoveSubStage {
            order_id,
            from,
            to,
            occurred_at: test_time(),
        })
    }

    fn shipment_cmd(order_id: OrderId, tracking_id: &str) -> OrderCommand {
        OrderCommand::RecordShipment(RecordShipment {
            order_id,
            tracking_id: tracking_id.to_string(),
            shipping_reference_no: "REF-1".to_string(),
            pickup_at: test_time(),
            remarks: None,
            carrier_payload: serde_json::json!({"carrier": "stub"}),
            occurred_at: test_time(),
        })
    }

    fn shipping(order_id: OrderId) -> Order {
        let mut order = at_stage(order_id, FulfillmentStage::ToHandOver);
        execute(&mut order, shipment_cmd(order_id, "TRK-1"));
        order
    }

    fn assert_invalid_transition(result: Result<Vec<OrderEvent>, DomainError>) {
        match result {
            Err(DomainError::InvalidTransition { .. }) => {}
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn place_order_starts_pending_with_items() {
        let order_id = test_order_id();
        let order = placed(order_id);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.total(), 1000);
        assert_eq!(order.fulfillment_stage(), None);
        assert!(order.timestamps().placed_at.is_some());
    }

    #[test]
    fn place_order_rejects_empty_items() {
        let order_id = test_order_id();
        let err = Order::empty(order_id)
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                items: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn commands_on_unknown_order_are_not_found() {
        let order_id = test_order_id();
        let err = Order::empty(order_id)
            .handle(&OrderCommand::AdvanceToShip(AdvanceToShip {
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::NotFound(what) => assert!(what.contains(&order_id.to_string())),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn advance_to_ship_enters_to_pack() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToPack);
        assert_eq!(order.status(), OrderStatus::ToShip);
        assert_eq!(order.fulfillment_stage(), Some(FulfillmentStage::ToPack));
        assert!(order.timestamps().to_pack_at.is_some());
    }

    #[test]
    fn advance_to_ship_requires_confirmed() {
        let order_id = test_order_id();
        let order = placed(order_id);
        let err = order
            .handle(&OrderCommand::AdvanceToShip(AdvanceToShip {
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidTransition { id, from, to } => {
                assert_eq!(id, order_id.to_string());
                assert_eq!(from, "pending");
                assert_eq!(to, "to_ship/to-pack");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn advance_to_ship_twice_is_a_no_op() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToArrangement);
        let events = order
            .handle(&OrderCommand::AdvanceToShip(AdvanceToShip {
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn sub_stage_cannot_skip() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToPack);
        assert_invalid_transition(order.handle(&move_cmd(
            order_id,
            FulfillmentStage::ToPack,
            FulfillmentStage::ToHandOver,
        )));
    }

    #[test]
    fn sub_stage_moves_back_one_step() {
        let order_id = test_order_id();
        let mut order = at_stage(order_id, FulfillmentStage::ToHandOver);
        execute(
            &mut order,
            move_cmd(order_id, FulfillmentStage::ToHandOver, FulfillmentStage::ToArrangement),
        );
        assert_eq!(order.fulfillment_stage(), Some(FulfillmentStage::ToArrangement));
        assert_eq!(order.status(), OrderStatus::ToShip);
    }

    #[test]
    fn sub_stage_from_must_match_current() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToPack);
        assert_invalid_transition(order.handle(&move_cmd(
            order_id,
            FulfillmentStage::ToHandOver,
            FulfillmentStage::ToArrangement,
        )));
    }

    #[test]
    fn sub_stage_outside_to_ship_is_refused() {
        let order_id = test_order_id();
        let order = confirmed(order_id);
        assert_invalid_transition(order.handle(&move_cmd(
            order_id,
            FulfillmentStage::ToPack,
            FulfillmentStage::ToArrangement,
        )));
    }

    #[test]
    fn sub_stage_records_pack_and_hand_over_times() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToHandOver);
        assert!(order.timestamps().packed_at.is_some());
        assert!(order.timestamps().to_hand_over_at.is_some());
    }

    #[test]
    fn shipment_moves_to_shipping_and_clears_stage() {
        let order_id = test_order_id();
        let order = shipping(order_id);
        assert_eq!(order.status(), OrderStatus::Shipping);
        assert_eq!(order.fulfillment_stage(), None);
        assert_eq!(order.shipping().unwrap().tracking_id, "TRK-1");
        assert!(order.timestamps().handed_over_at.is_some());
        assert!(order.is_handed_over());
    }

    #[test]
    fn shipment_requires_tracking_id() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToHandOver);
        let err = order.handle(&shipment_cmd(order_id, "  ")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn shipment_requires_to_hand_over() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToArrangement);
        assert_invalid_transition(order.handle(&shipment_cmd(order_id, "TRK-1")));
        assert_invalid_transition(order.check_pickup_ready().map(|_| vec![]));
    }

    #[test]
    fn pickup_readiness_reports_replay() {
        let order_id = test_order_id();
        assert!(!at_stage(order_id, FulfillmentStage::ToHandOver).check_pickup_ready().unwrap());
        let order_id = test_order_id();
        assert!(shipping(order_id).check_pickup_ready().unwrap());
    }

    #[test]
    fn delivery_and_confirmation_complete_the_order() {
        let order_id = test_order_id();
        let mut order = shipping(order_id);
        execute(
            &mut order,
            OrderCommand::MarkDelivered(MarkDelivered {
                order_id,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::Shipped);

        execute(
            &mut order,
            OrderCommand::ConfirmDelivery(ConfirmDelivery {
                order_id,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(order.status().is_terminal());

        let again = order
            .handle(&OrderCommand::ConfirmDelivery(ConfirmDelivery {
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn confirm_delivery_directly_from_shipping() {
        let order_id = test_order_id();
        let mut order = shipping(order_id);
        execute(
            &mut order,
            OrderCommand::ConfirmDelivery(ConfirmDelivery {
                order_id,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::Completed);
    }

    #[test]
    fn completed_order_refuses_cancel() {
        let order_id = test_order_id();
        let mut order = shipping(order_id);
        execute(
            &mut order,
            OrderCommand::ConfirmDelivery(ConfirmDelivery {
                order_id,
                occurred_at: test_time(),
            }),
        );
        assert_invalid_transition(order.handle(&OrderCommand::CancelOrder(CancelOrder {
            order_id,
            at_stage: OrderStatus::Completed,
            reason: None,
            occurred_at: test_time(),
        })));
    }

    #[test]
    fn cancel_from_to_ship_clears_stage() {
        let order_id = test_order_id();
        let mut order = at_stage(order_id, FulfillmentStage::ToArrangement);
        execute(
            &mut order,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                at_stage: OrderStatus::ToShip,
                reason: Some("out of stock".to_string()),
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.fulfillment_stage(), None);
        assert_eq!(order.cancel_reason(), Some("out of stock"));

        let again = order
            .handle(&OrderCommand::CancelOrder(CancelOrder {
                order_id,
                at_stage: OrderStatus::ToShip,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn cancel_with_stale_stage_is_refused() {
        let order_id = test_order_id();
        let order = confirmed(order_id);
        assert_invalid_transition(order.handle(&OrderCommand::CancelOrder(CancelOrder {
            order_id,
            at_stage: OrderStatus::Pending,
            reason: None,
            occurred_at: test_time(),
        })));
    }

    #[test]
    fn cancelled_order_refuses_further_moves() {
        let order_id = test_order_id();
        let mut order = confirmed(order_id);
        execute(
            &mut order,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                at_stage: OrderStatus::Confirmed,
                reason: None,
                occurred_at: test_time(),
            }),
        );
        assert_invalid_transition(order.handle(&OrderCommand::AdvanceToShip(AdvanceToShip {
            order_id,
            occurred_at: test_time(),
        })));
    }

    #[test]
    fn delivery_failure_lands_in_unfulfilled() {
        let order_id = test_order_id();
        let mut order = shipping(order_id);
        execute(
            &mut order,
            OrderCommand::MarkDeliveryFailed(MarkDeliveryFailed {
                order_id,
                reason: "address not found".to_string(),
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::FailedDelivery);
        assert_eq!(order.status().bucket(), crate::StatusBucket::Unfulfilled);
        assert_eq!(order.failure_reason(), Some("address not found"));
    }

    #[test]
    fn return_flow_after_completion() {
        let order_id = test_order_id();
        let mut order = shipping(order_id);
        execute(
            &mut order,
            OrderCommand::ConfirmDelivery(ConfirmDelivery {
                order_id,
                occurred_at: test_time(),
            }),
        );
        let return_id = AggregateId::new();
        execute(
            &mut order,
            OrderCommand::OpenReturn(OpenReturn {
                order_id,
                return_request_id: return_id,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::ReturnRequested);
        assert_eq!(order.return_request_id(), Some(return_id));

        execute(
            &mut order,
            OrderCommand::RecordReturnDecision(RecordReturnDecision {
                order_id,
                approved: true,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::ReturnApproved);

        execute(
            &mut order,
            OrderCommand::RecordRefund(RecordRefund {
                order_id,
                refund_amount: 250,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.status(), OrderStatus::Refunded);
        assert_eq!(order.refunded_amount(), Some(250));
        assert!(order.status().is_terminal());

        // Late redelivery of earlier return steps is harmless.
        let replayed_open = order
            .handle(&OrderCommand::OpenReturn(OpenReturn {
                order_id,
                return_request_id: return_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        let replayed_decision = order
            .handle(&OrderCommand::RecordReturnDecision(RecordReturnDecision {
                order_id,
                approved: true,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(replayed_open.is_empty());
        assert!(replayed_decision.is_empty());
    }

    #[test]
    fn return_cannot_open_before_delivery() {
        let order_id = test_order_id();
        let order = shipping(order_id);
        assert!(!order.can_open_return());
        assert_invalid_transition(order.handle(&OrderCommand::OpenReturn(OpenReturn {
            order_id,
            return_request_id: AggregateId::new(),
            occurred_at: test_time(),
        })));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToPack);
        let before = order.clone();

        let cmd = move_cmd(order_id, FulfillmentStage::ToPack, FulfillmentStage::ToArrangement);
        let events1 = order.handle(&cmd).unwrap();
        let events2 = order.handle(&cmd).unwrap();

        assert_eq!(order, before);
        assert_eq!(events1, events2);
    }

    #[test]
    fn version_increments_on_apply() {
        let order_id = test_order_id();
        let order = at_stage(order_id, FulfillmentStage::ToHandOver);
        // placed, confirmed, to_ship, two sub-stage moves
        assert_eq!(order.version(), 5);
    }

    fn any_stage() -> impl Strategy<Value = FulfillmentStage> {
        prop_oneof![
            Just(FulfillmentStage::ToPack),
            Just(FulfillmentStage::ToArrangement),
            Just(FulfillmentStage::ToHandOver),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: adjacent moves succeed and are undone by the inverse move
        /// exactly once; non-adjacent pairs always fail.
        #[test]
        fn sub_stage_moves_follow_adjacency(from in any_stage(), to in any_stage()) {
            let order_id = test_order_id();
            let mut order = at_stage(order_id, from);

            let result = order.handle(&move_cmd(order_id, from, to));
            if FulfillmentStage::is_adjacent(from, to) {
                let events = result.unwrap();
                prop_assert_eq!(events.len(), 1);
                for e in &events {
                    order.apply(e);
                }
                prop_assert_eq!(order.fulfillment_stage(), Some(to));

                let back = order.handle(&move_cmd(order_id, to, from)).unwrap();
                prop_assert_eq!(back.len(), 1);
                for e in &back {
                    order.apply(e);
                }
                prop_assert_eq!(order.fulfillment_stage(), Some(from));

                let replay = order.handle(&move_cmd(order_id, to, from)).unwrap();
                prop_assert!(replay.is_empty());
            } else {
                let is_invalid_transition =
                    matches!(result, Err(DomainError::InvalidTransition { .. }));
                prop_assert!(is_invalid_transition);
            }
        }

        /// Property: the stage is present iff the status is `to_ship`.
        #[test]
        fn stage_present_iff_to_ship(steps in prop::collection::vec(0u8..6, 0..12)) {
            let order_id = test_order_id();
            let mut order = confirmed(order_id);

            for step in steps {
                use FulfillmentStage::{ToArrangement, ToHandOver, ToPack};
                let cmd = match step {
                    0 => OrderCommand::AdvanceToShip(AdvanceToShip {
                        order_id,
                        occurred_at: test_time(),
                    }),
                    1 => move_cmd(order_id, ToPack, ToArrangement),
                    2 => move_cmd(order_id, ToArrangement, ToHandOver),
                    3 => move_cmd(order_id, ToHandOver, ToArrangement),

                    4 => shipment_cmd(order_id, "TRK-P"),
                    _ => OrderCommand::CancelOrder(CancelOrder {
                        order_id,
                        at_stage: order.status(),
                        reason: None,
                        occurred_at: test_time(),
                    }),
                };
                if let Ok(events) = order.handle(&cmd) {
                    for e in &events {
                        order.apply(e);
                    }
                }
                prop_assert_eq!(
                    order.fulfillment_stage().is_some(),
                    order.status() == OrderStatus::ToShip
                );
            }
        }
    }
}
