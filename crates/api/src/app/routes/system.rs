use std::sync::Arc;

use axum::{Extension, Json};
use serde_json::{Value as JsonValue, json};

use crate::app::services::AppServices;

/// Liveness plus per-worker counters; `failed` > 0 means a read model skipped envelopes.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> Json<JsonValue> {
    let workers: Vec<JsonValue> = services
        .worker_stats()
        .into_iter()
        .map(|(name, stats)| {
            json!({
                "name": name,
                "processed": stats.processed,
                "failed": stats.failed,
                "skipped": stats.skipped,
            })
        })
        .collect();
    Json(json!({ "status": "ok", "workers": workers }))
}
