use reqwest::{Client, StatusCode};
use tracing::{instrument, warn};

use super::{CarrierAdapter, CarrierFailure, PickupRequest, PickupResponse};

/// JSON-over-HTTP carrier client: `POST {base_url}/pickups`.
#[derive(Debug, Clone)]
pub struct HttpCarrierClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCarrierClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl CarrierAdapter for HttpCarrierClient {
    #[instrument(skip_all, fields(order_id = %request.order_id))]
    async fn create_pickup(
        &self,
        request: PickupRequest,
    ) -> Result<PickupResponse, CarrierFailure> {

        let mut call = self
            .client
            .post(format!("{}/pickups", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| CarrierFailure::new(None, format!("network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "carrier rejected pickup");
            return Err(CarrierFailure::new(Some(status.as_u16()), failure_message(status, &body)));
        }

        response
            .json::<PickupResponse>()
            .await
            .map_err(|e| CarrierFailure::new(Some(status.as_u16()), format!("parse error: {e}")))
    }
}

fn failure_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        status.canonical_reason().unwrap_or("carrier error").to_string()
    } else {
        body.chars().take(512).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalised() {
        let client = HttpCarrierClient::new("http://carrier.local:9000/", None);
        assert_eq!(client.base_url(), "http://carrier.local:9000");
    }

    #[test]
    fn empty_error_body_falls_back_to_reason_phrase() {
        assert_eq!(failure_message(StatusCode::BAD_GATEWAY, "  "), "Bad Gateway");
        assert_eq!(failure_message(StatusCode::BAD_REQUEST, "slot full"), "slot full");
    }
}
