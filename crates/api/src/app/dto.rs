use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Number, json};
use uuid::Uuid;

use sellerdesk_core::{AggregateId, AggregateRoot, DomainError};
use sellerdesk_fulfillment::{FulfillmentStage, Order, OrderStatus};
use sellerdesk_inventory::{AdjustmentAction, ProductStock, VariationId};
use sellerdesk_returns::{RefundPreset, ReturnRequest};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: AggregateId,
    pub variation_id: Uuid,
    pub quantity: u32,
    pub unit_price: u64,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    /// Assigned by the checkout flow; generated when absent.
    pub order_id: Option<AggregateId>,
    pub items: Vec<OrderItemRequest>,
    pub placed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveSubStageRequest {
    pub from: FulfillmentStage,
    pub to: FulfillmentStage,
}

#[derive(Debug, Deserialize)]
pub struct PickupRequestBody {
    pub pickup_at: DateTime<Utc>,
    pub remarks: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryFailedRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub at_stage: OrderStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewVariationRequest {
    pub variation_id: Option<VariationId>,
    pub name: String,
    pub initial_stock: Number,
}

#[derive(Debug, Deserialize)]
pub struct RegisterProductRequest {
    pub product_id: Option<AggregateId>,
    pub name: String,
    pub variations: Vec<NewVariationRequest>,
}

#[derive(Debug, Deserialize)]
pub struct StockTargetRequest {
    pub variation_id: VariationId,
    /// Any JSON number; converted with [`stock_from_number`].
    pub new_stock: Number,
}

#[derive(Debug, Deserialize)]
pub struct BatchAdjustRequest {
    pub action: AdjustmentAction,
    #[serde(default)]
    pub reason: String,
    pub adjustments: Vec<StockTargetRequest>,
}

#[derive(Debug, Deserialize)]
pub struct StockHistoryQuery {
    pub product_id: Option<String>,
    pub variation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenReturnBody {
    pub order_id: AggregateId,
    pub reason: String,
}

/// Exactly one of `refund_amount` / `preset`.
#[derive(Debug, Deserialize)]
pub struct ApproveReturnBody {
    pub refund_amount: Option<u64>,
    pub preset: Option<RefundPreset>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectReturnBody {
    #[serde(default)]
    pub message: String,
}

// -------------------------
// Conversions
// -------------------------

/// Integer stock from an arbitrary JSON number.
///
/// Whole floats (`12.0`) are accepted; fractions and values outside `i64` fail
/// with `InvalidStock`. Sign is left to the ledger.
pub fn stock_from_number(value: &Number) -> Result<i64, DomainError> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    if value.is_u64() {
        return Err(DomainError::invalid_stock(format!("stock {value} is out of range")));
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(f as i64),
        _ => Err(DomainError::invalid_stock(format!("stock must be a whole number, got {value}"))),
    }
}

/// Refund amount for an approval request against `order_total`.
pub fn refund_amount(body: &ApproveReturnBody, order_total: u64) -> Result<u64, DomainError> {
    match (body.refund_amount, body.preset) {
        (Some(amount), None) => Ok(amount),
        (None, Some(preset)) => Ok(preset.amount(order_total)),
        (Some(_), Some(_)) => Err(DomainError::validation(
            "give either refund_amount or preset, not both",
        )),
        (None, None) => Err(DomainError::validation("refund_amount or preset is required")),
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn order_to_json(order: &Order) -> serde_json::Value {
    json!({
        "id": order.id_typed().0.to_string(),
        "status": order.status(),
        "fulfillment_stage": order.fulfillment_stage(),
        "bucket": order.status().bucket(),
        "items": order.items(),
        "total": order.total(),
        "shipping": order.shipping(),
        "return_request_id": order.return_request_id().map(|id| id.to_string()),
        "refunded_amount": order.refunded_amount(),
        "cancel_reason": order.cancel_reason(),
        "failure_reason": order.failure_reason(),
        "timestamps": order.timestamps(),
        "version": order.version(),
    })
}

pub fn product_to_json(product: &ProductStock) -> serde_json::Value {
    json!({
        "id": product.id_typed().0.to_string(),
        "name": product.name(),
        "variations": product.variations(),
        "log_entries": product.log().len(),
        "version": product.version(),
    })
}

pub fn return_to_json(request: &ReturnRequest, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "id": request.id_typed().0.to_string(),
        "order_id": request.order_id().to_string(),
        "status": request.status(),
        "reason": request.reason(),
        "order_total": request.order_total(),
        "requested_at": request.requested_at(),
        "respond_by": request.respond_by(),
        "days_remaining": request.days_remaining(now),
        "responded_at": request.responded_at(),
        "response_message": request.response_message(),
        "refund_amount": request.refund_amount(),
        "completed_at": request.completed_at(),
        "version": request.version(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(raw: &str) -> Number {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn stock_accepts_whole_numbers_only() {
        assert_eq!(stock_from_number(&number("7")).unwrap(), 7);
        assert_eq!(stock_from_number(&number("-3")).unwrap(), -3);
        assert_eq!(stock_from_number(&number("12.0")).unwrap(), 12);
        assert!(matches!(stock_from_number(&number("2.5")), Err(DomainError::InvalidStock(_))));
        assert!(matches!(
            stock_from_number(&number("18446744073709551615")),
            Err(DomainError::InvalidStock(_))
        ));
    }

    #[test]
    fn refund_amount_needs_exactly_one_source() {
        let body = |refund_amount, preset| ApproveReturnBody {
            refund_amount,
            preset,
            message: String::new(),
        };
        assert_eq!(refund_amount(&body(Some(250), None), 1000).unwrap(), 250);
        let three_quarters = body(None, Some(RefundPreset::ThreeQuarters));
        assert_eq!(refund_amount(&three_quarters, 999).unwrap(), 749);

        assert!(refund_amount(&body(Some(1), Some(RefundPreset::Full)), 10).is_err());
        assert!(refund_amount(&body(None, None), 10).is_err());
    }
}
