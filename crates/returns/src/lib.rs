//! Return/refund domain module (event-sourced).
//!
//! A `ReturnRequest` is a post-completion dispute against exactly one order.
//! Refund amounts are validated and recorded here; settlement happens elsewhere.

pub mod request;

pub use request::{
    ApproveReturn, CompleteReturn, OpenReturnRequest, RESPONSE_WINDOW_DAYS, RefundPreset,
    RejectReturn, ReturnApproved, ReturnCompleted, ReturnCommand, ReturnEvent, ReturnRejected,
    ReturnRequest, ReturnRequestId, ReturnRequested, ReturnStatus,
};

/// Aggregate type name used for return request streams.
pub const RETURN_REQUEST_AGGREGATE_TYPE: &str = "returns.request";
