use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use sellerdesk_core::{AggregateId, DomainError};
use sellerdesk_infra::{command_dispatcher::DispatchError, projections::StockHistoryFilter};
use sellerdesk_inventory::{
    AddVariation, BatchAdjust, InventoryCommand, NewVariation, ProductId, ProductStock,
    RegisterProduct, StockAdjustmentLogEntry, StockTarget, VariationId,
};

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn products_router() -> Router {
    Router::new()
        .route("/", post(register_product))
        .route("/:id", get(get_product))
        .route("/:id/variations", post(add_variation))
        .route("/:id/adjustments", post(batch_adjust))
        .route("/:id/stock-history", get(product_stock_history))
}

fn product_response(
    status: StatusCode,
    result: Result<ProductStock, DispatchError>,
) -> axum::response::Response {
    match result {
        Ok(product) => (status, Json(dto::product_to_json(&product))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

fn history_response(entries: Vec<StockAdjustmentLogEntry>) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "count": entries.len(),
            "entries": entries,
        })),
    )
        .into_response()
}

fn new_variation(v: dto::NewVariationRequest) -> Result<NewVariation, DomainError> {
    Ok(NewVariation {
        variation_id: v.variation_id.unwrap_or_else(VariationId::new),
        name: v.name,
        initial_stock: dto::stock_from_number(&v.initial_stock)?,
    })
}

pub async fn register_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::RegisterProductRequest>,
) -> axum::response::Response {
    let agg = body.product_id.unwrap_or_else(AggregateId::new);
    let variations: Result<Vec<_>, _> = body.variations.into_iter().map(new_variation).collect();
    let variations = match variations {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let cmd = InventoryCommand::RegisterProduct(RegisterProduct {
        product_id: ProductId::new(agg),
        name: body.name,
        variations,
        user_id: actor.user_id(),
        occurred_at: Utc::now(),
    });

    product_response(StatusCode::CREATED, services.dispatch_inventory(agg, cmd))
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    product_response(StatusCode::OK, services.load_product(agg))
}

pub async fn add_variation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::NewVariationRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let variation = match new_variation(body) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let cmd = InventoryCommand::AddVariation(AddVariation {
        product_id: ProductId::new(agg),
        variation,
        user_id: actor.user_id(),
        occurred_at: Utc::now(),
    });
    product_response(StatusCode::OK, services.dispatch_inventory(agg, cmd))
}

/// Apply absolute stock targets to several variations at once (all-or-nothing).
pub async fn batch_adjust(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::BatchAdjustRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut adjustments = Vec::with_capacity(body.adjustments.len());
    for target in body.adjustments {
        match dto::stock_from_number(&target.new_stock) {
            Ok(new_stock) => adjustments.push(StockTarget {
                variation_id: target.variation_id,
                new_stock,
            }),
            Err(e) => return errors::domain_error_to_response(e),
        }
    }

    let cmd = InventoryCommand::BatchAdjust(BatchAdjust {
        product_id: ProductId::new(agg),
        action: body.action,
        reason: body.reason,
        user_id: actor.user_id(),
        adjustments,
        occurred_at: Utc::now(),
    });
    product_response(StatusCode::OK, services.dispatch_inventory(agg, cmd))
}

pub async fn product_stock_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::StockHistoryQuery>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let variation_id = match parse_variation(query.variation_id.as_deref()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    history_response(services.stock_history(StockHistoryFilter {
        product_id: Some(ProductId::new(agg)),
        variation_id,
    }))
}

/// Audit listing across all products.
pub async fn list_adjustments(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::StockHistoryQuery>,
) -> axum::response::Response {
    let product_id = query.product_id.as_deref().map(|raw| parse_id(raw, "product"));
    let product_id = match product_id.transpose() {

        Ok(v) => v.map(ProductId::new),
        Err(resp) => return resp,
    };
    let variation_id = match parse_variation(query.variation_id.as_deref()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    history_response(services.stock_history(StockHistoryFilter {
        product_id,
        variation_id,
    }))
}

fn parse_variation(raw: Option<&str>) -> Result<Option<VariationId>, axum::response::Response> {
    raw.map(|s| s.parse::<VariationId>())
        .transpose()
        .map_err(errors::domain_error_to_response)
}
