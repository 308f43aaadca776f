//! Order fulfillment domain module (event-sourced).
//!
//! The `Order` aggregate is both the order record and the state machine that
//! governs its stages, including the `to_ship` sub-workflow and the carrier
//! handoff. Pure deterministic logic: no IO, no HTTP, no storage.

pub mod order;
pub mod pickup;
pub mod status;

pub use order::{
    AdvanceToShip, CancelOrder, ConfirmDelivery, ConfirmPayment, DeliveryConfirmed,
    DeliveryFailed, MarkDelivered, MarkDeliveryFailed, MoveSubStage, MovedToShip, OpenReturn,
    Order, OrderCancelled, OrderCommand, OrderDelivered, OrderEvent, OrderId, OrderItem,
    OrderPlaced, OrderRefunded, OrderTimestamps, PaymentConfirmed, PlaceOrder, RecordRefund,
    RecordReturnDecision, RecordShipment, ReturnDecided, ReturnOpened, ShipmentCreated,
    ShippingInfo, SubStageMoved,
};
pub use pickup::PickupWindow;
pub use status::{FulfillmentStage, OrderStatus, StatusBucket};

/// Aggregate type name used for order streams.
pub const ORDER_AGGREGATE_TYPE: &str = "fulfillment.order";
