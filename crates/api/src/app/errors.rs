use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value as JsonValue, json};
use tracing::error;

use sellerdesk_core::DomainError;
use sellerdesk_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    let retryable = err.is_retryable();
    match err {
        DispatchError::Domain(e) => domain_error_to_response(e),
        DispatchError::Concurrency(msg) => error_body(
            StatusCode::CONFLICT,
            "conflict",
            msg,
            JsonValue::Null,
            retryable,
        ),
        DispatchError::CarrierError {
            order_id,
            status,
            message,
        } => error_body(
            StatusCode::BAD_GATEWAY,
            "carrier_error",
            message,
            json!({ "order_id": order_id.to_string(), "carrier_status": status }),
            retryable,
        ),
        DispatchError::CarrierTimeout { order_id, timeout_ms } => error_body(
            StatusCode::GATEWAY_TIMEOUT,
            "carrier_timeout",
            format!("carrier did not respond within {timeout_ms}ms"),
            json!({ "order_id": order_id.to_string(), "timeout_ms": timeout_ms }),
            retryable,
        ),
        other @ (DispatchError::Deserialize(_)
        | DispatchError::Store(_)
        | DispatchError::Publish(_)) => {
            error!(error = %other, "command failed in infrastructure");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                other.to_string(),
                JsonValue::Null,
                retryable,
            )
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    let (status, code, details) = match err {
        DomainError::Validation(_) => {
            (StatusCode::BAD_REQUEST, "validation_error", JsonValue::Null)
        }
        DomainError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id", JsonValue::Null),
        DomainError::InvariantViolation(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", JsonValue::Null)
        }
        DomainError::NotFound(what) => {
            (StatusCode::NOT_FOUND, "not_found", json!({ "resource": what }))
        }
        DomainError::Conflict(_) => (StatusCode::CONFLICT, "conflict", JsonValue::Null),
        DomainError::InvalidTransition { id, from, to } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_transition",
            json!({ "id": id, "from": from, "to": to }),
        ),
        DomainError::InvalidSchedule(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_schedule", JsonValue::Null)
        }
        DomainError::InvalidStock(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_stock", JsonValue::Null)
        }

        DomainError::InvalidRefundAmount(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_refund_amount", JsonValue::Null)
        }
    };
    error_body(status, code, message, details, false)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    error_body(status, code, message, JsonValue::Null, false)
}

fn error_body(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: JsonValue,
    retryable: bool,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "details": details,
            "retryable": retryable,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use sellerdesk_core::AggregateId;

    use super::*;

    #[test]
    fn maps_domain_errors_to_statuses() {
        let cases = [
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("order"), StatusCode::NOT_FOUND),
            (DomainError::Conflict("x".into()), StatusCode::CONFLICT),
            (DomainError::invalid_stock("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::invalid_schedule("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::InvalidRefundAmount("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn carrier_failures_are_gateway_errors() {
        let order_id = AggregateId::new();
        let failed = dispatch_error_to_response(DispatchError::CarrierError {
            order_id,
            status: Some(503),
            message: "down".into(),
        });
        assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);

        let timed_out = dispatch_error_to_response(DispatchError::CarrierTimeout {
            order_id,
            timeout_ms: 50,
        });
        assert_eq!(timed_out.status(), StatusCode::GATEWAY_TIMEOUT);

        let publish = dispatch_error_to_response(DispatchError::Publish("bus closed".into()));
        assert_eq!(publish.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
