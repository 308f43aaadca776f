//! Router assembly. Handlers live under `routes/`, one file per area.

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::{AppServices, ServicesError};

pub async fn build_app(config: &ApiConfig) -> Result<Router, ServicesError> {
    let services = Arc::new(AppServices::build(config).await?);
    Ok(router_with(services))
}

/// Router over already-wired services, so tests can inject their own store and carrier.
///
/// `/health` skips the actor middleware.
pub fn router_with(services: Arc<AppServices>) -> Router {
    let api = routes::router().layer(axum::middleware::from_fn(middleware::actor_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(api)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
