//! Carrier handoff boundary.
//!
//! The core only knows the request/response shape of a pickup booking. Any
//! non-success outcome is a retryable `CarrierFailure`.

pub mod http;
pub mod scripted;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sellerdesk_core::AggregateId;

pub use http::HttpCarrierClient;
pub use scripted::{ScriptedCarrier, ScriptedOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupRequest {
    pub order_id: AggregateId,
    pub pickup_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupResponse {
    pub success: bool,
    #[serde(default)]
    pub shipping_reference_no: String,
    #[serde(default)]
    pub tracking_id: String,
    #[serde(default)]
    pub carrier_payload: JsonValue,
}

impl PickupResponse {
    /// Only a successful answer with a tracking id may move an order to shipping.
    pub fn is_confirmed(&self) -> bool {
        self.success && !self.tracking_id.trim().is_empty()
    }
}

/// Carrier rejected or could not be reached. `status` is the HTTP status when
/// one was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("carrier failure (status {status:?}): {message}")]
pub struct CarrierFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl CarrierFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// External shipping provider.
#[async_trait::async_trait]
pub trait CarrierAdapter: Send + Sync {
    async fn create_pickup(&self, request: PickupRequest) -> Result<PickupResponse, CarrierFailure>;
}
