use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use super::{CarrierAdapter, CarrierFailure, PickupRequest, PickupResponse};

/// One queued answer for [`ScriptedCarrier`].
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed,
    Fail { status: Option<u16>, message: String },
    /// Answer `success = true` without a tracking id.
    EmptyTracking,
    /// Sleep before producing the inner outcome.
    Delay(Duration, Box<ScriptedOutcome>),
}

/// In-process carrier for development and tests.
///
/// Replays queued outcomes in order, then succeeds. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedCarrier {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    requests: Mutex<Vec<PickupRequest>>,
}

impl ScriptedCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        if let Ok(mut q) = self.outcomes.lock() {
            q.push_back(outcome);
        }
    }

    pub fn requests(&self) -> Vec<PickupRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(ScriptedOutcome::Succeed)
    }
}

fn confirmed(request: &PickupRequest) -> PickupResponse {
    let suffix = request.order_id.to_string().replace('-', "");
    let short = &suffix[..12.min(suffix.len())];
    PickupResponse {
        success: true,
        shipping_reference_no: format!("REF-{short}"),
        tracking_id: format!("TRK-{short}"),
        carrier_payload: json!({
            "carrier": "scripted",
            "pickup_at": request.pickup_at,
        }),
    }
}

#[async_trait::async_trait]
impl CarrierAdapter for ScriptedCarrier {
    async fn create_pickup(
        &self,
        request: PickupRequest,
    ) -> Result<PickupResponse, CarrierFailure> {

        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }

        let mut outcome = self.next_outcome();
        loop {
            match outcome {
                ScriptedOutcome::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    outcome = *inner;
                }
                ScriptedOutcome::Succeed => return Ok(confirmed(&request)),
                ScriptedOutcome::EmptyTracking => {
                    return Ok(PickupResponse {
                        tracking_id: String::new(),
                        ..confirmed(&request)
                    });
                }
                ScriptedOutcome::Fail { status, message } => {
                    return Err(CarrierFailure::new(status, message));
                }
            }
        }
    }
}
