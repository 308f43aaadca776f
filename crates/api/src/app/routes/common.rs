use axum::http::StatusCode;

use sellerdesk_core::AggregateId;

use crate::app::errors;

/// Parse a path id, answering 400 on malformed input.
pub fn parse_id(raw: &str, what: &'static str) -> Result<AggregateId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
    })

}
