use axum::{Router, routing::get};

pub mod common;
pub mod inventory;
pub mod orders;
pub mod returns;
pub mod system;

/// Router for all command/query endpoints (expects `AppServices` + `ActorContext` extensions).
pub fn router() -> Router {
    Router::new()
        .nest("/orders", orders::router())
        .nest("/products", inventory::products_router())
        .route("/inventory/adjustments", get(inventory::list_adjustments))
        .nest("/returns", returns::router())
}
