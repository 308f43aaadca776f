use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use sellerdesk_infra::command_dispatcher::DispatchError;
use sellerdesk_returns::{
    ApproveReturn, CompleteReturn, RejectReturn, ReturnCommand, ReturnRequest, ReturnRequestId,
};

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_return))
        .route("/:id", get(get_return))
        .route("/:id/approve", post(approve_return))
        .route("/:id/reject", post(reject_return))
        .route("/:id/complete", post(complete_return))
}

fn return_response(
    status: StatusCode,
    result: Result<ReturnRequest, DispatchError>,
) -> axum::response::Response {

    match result {
        Ok(request) => (status, Json(dto::return_to_json(&request, Utc::now()))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Open a return against a delivered order. The order total is read from the order itself.
pub async fn open_return(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::OpenReturnBody>,
) -> axum::response::Response {
    return_response(StatusCode::CREATED, services.open_return(body.order_id, body.reason))
}

pub async fn get_return(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "return request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    return_response(StatusCode::OK, services.load_return(agg))
}

pub async fn approve_return(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ApproveReturnBody>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "return request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let request = match services.load_return(agg) {
        Ok(r) => r,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    let refund_amount = match dto::refund_amount(&body, request.order_total()) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let cmd = ReturnCommand::Approve(ApproveReturn {
        return_request_id: ReturnRequestId::new(agg),
        refund_amount,
        message: body.message,
        occurred_at: Utc::now(),
    });
    return_response(StatusCode::OK, services.dispatch_return(agg, cmd))
}

pub async fn reject_return(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectReturnBody>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "return request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = ReturnCommand::Reject(RejectReturn {
        return_request_id: ReturnRequestId::new(agg),
        message: body.message,
        occurred_at: Utc::now(),
    });
    return_response(StatusCode::OK, services.dispatch_return(agg, cmd))
}

pub async fn complete_return(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "return request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = ReturnCommand::Complete(CompleteReturn {
        return_request_id: ReturnRequestId::new(agg),
        occurred_at: Utc::now(),
    });
    return_response(StatusCode::OK, services.dispatch_return(agg, cmd))
}
