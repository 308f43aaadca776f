use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use sellerdesk_core::UserId;

use crate::app::errors;
use crate::context::{ActorContext, USER_ID_HEADER};

/// Resolve the acting user from `X-User-Id` and attach an [`ActorContext`].
///
/// A malformed id is rejected with 400; a missing header means the system user.
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {

    let actor = match extract_actor(req.headers()) {
        Ok(actor) => actor,
        Err(message) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
    };

    req.extensions_mut().insert(actor);
    next.run(req).await
}

fn extract_actor(headers: &HeaderMap) -> Result<ActorContext, String> {
    let Some(header) = headers.get(USER_ID_HEADER) else {
        return Ok(ActorContext::system());
    };

    let raw = header
        .to_str()
        .map_err(|_| "X-User-Id is not valid ASCII".to_string())?
        .trim();
    if raw.is_empty() {
        return Ok(ActorContext::system());
    }

    raw.parse::<UserId>()
        .map(ActorContext::new)
        .map_err(|e| e.to_string())
}
