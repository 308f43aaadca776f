use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use sellerdesk_core::{AggregateId, DomainError};
use sellerdesk_fulfillment::{
    AdvanceToShip, CancelOrder, ConfirmDelivery, ConfirmPayment, MarkDelivered, MarkDeliveryFailed,
    MoveSubStage, Order, OrderCommand, OrderId, OrderItem, PlaceOrder, StatusBucket,
};
use sellerdesk_infra::command_dispatcher::DispatchError;

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(place_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/confirm-payment", post(confirm_payment))
        .route("/:id/to-ship", post(advance_to_ship))
        .route("/:id/sub-stage", post(move_sub_stage))
        .route("/:id/pickup", post(request_pickup))
        .route("/:id/delivered", post(mark_delivered))
        .route("/:id/delivery-failed", post(mark_delivery_failed))
        .route("/:id/confirm-delivery", post(confirm_delivery))
        .route("/:id/cancel", post(cancel_order))
}

fn order_response(
    status: StatusCode,
    result: Result<Order, DispatchError>,
) -> axum::response::Response {
    match result {
        Ok(order) => (status, Json(dto::order_to_json(&order))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn place_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PlaceOrderRequest>,
) -> axum::response::Response {
    let agg = body.order_id.unwrap_or_else(AggregateId::new);
    let items = body
        .items
        .into_iter()
        .map(|item| OrderItem {
            product_id: item.product_id,
            variation_id: item.variation_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
        .collect();

    let cmd = OrderCommand::PlaceOrder(PlaceOrder {
        order_id: OrderId::new(agg),
        items,
        occurred_at: body.placed_at.unwrap_or_else(Utc::now),
    });

    order_response(StatusCode::CREATED, services.dispatch_order(agg, cmd))
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListOrdersQuery>,
) -> axum::response::Response {
    let bucket = match query.bucket.as_deref().map(str::parse::<StatusBucket>).transpose() {
        Ok(b) => b,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let rows = services.list_orders(bucket);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "bucket": bucket,
            "count": rows.len(),
            "orders": rows,
        })),
    )
        .into_response()
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_response(StatusCode::OK, services.load_order(agg))
}

pub async fn confirm_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = OrderCommand::ConfirmPayment(ConfirmPayment {
        order_id: OrderId::new(agg),
        occurred_at: Utc::now(),
    });
    order_response(StatusCode::OK, services.dispatch_order(agg, cmd))
}

pub async fn advance_to_ship(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = OrderCommand::AdvanceToShip(AdvanceToShip {
        order_id: OrderId::new(agg),
        occurred_at: Utc::now(),
    });
    order_response(StatusCode::OK, services.dispatch_order(agg, cmd))
}

pub async fn move_sub_stage(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::MoveSubStageRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = OrderCommand::MoveSubStage(MoveSubStage {
        order_id: OrderId::new(agg),
        from: body.from,
        to: body.to,
        occurred_at: Utc::now(),
    });
    order_response(StatusCode::OK, services.dispatch_order(agg, cmd))
}

/// Carrier handoff: books the pickup, then records the shipment.
pub async fn request_pickup(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::PickupRequestBody>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if body.timeout_ms == Some(0) {
        let err = DomainError::validation("timeout_ms must be greater than zero");
        return errors::domain_error_to_response(err);

    }

    let timeout = body.timeout_ms.map(Duration::from_millis);
    let result = services
        .request_pickup(agg, body.pickup_at, body.remarks, timeout)
        .await;
    order_response(StatusCode::OK, result)
}

pub async fn mark_delivered(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = OrderCommand::MarkDelivered(MarkDelivered {
        order_id: OrderId::new(agg),
        occurred_at: Utc::now(),
    });
    order_response(StatusCode::OK, services.dispatch_order(agg, cmd))
}

pub async fn mark_delivery_failed(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::DeliveryFailedRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = OrderCommand::MarkDeliveryFailed(MarkDeliveryFailed {
        order_id: OrderId::new(agg),
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    order_response(StatusCode::OK, services.dispatch_order(agg, cmd))
}

pub async fn confirm_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = OrderCommand::ConfirmDelivery(ConfirmDelivery {
        order_id: OrderId::new(agg),
        occurred_at: Utc::now(),
    });
    order_response(StatusCode::OK, services.dispatch_order(agg, cmd))
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelOrderRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = OrderCommand::CancelOrder(CancelOrder {
        order_id: OrderId::new(agg),
        at_stage: body.at_stage,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    order_response(StatusCode::OK, services.dispatch_order(agg, cmd))
}
