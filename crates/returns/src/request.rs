use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use sellerdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult};
use sellerdesk_events::Event;

/// Days a seller has to respond to a pending request.
pub const RESPONSE_WINDOW_DAYS: i64 = 7;

/// Return request identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnRequestId(pub AggregateId);

impl ReturnRequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReturnRequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl ReturnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReturnStatus::Pending => "pending",
            ReturnStatus::Approved => "approved",
            ReturnStatus::Rejected => "rejected",
            ReturnStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReturnStatus::Rejected | ReturnStatus::Completed)
    }
}

impl core::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage presets offered for partial refunds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundPreset {
    Full,
    ThreeQuarters,
    Half,
    Quarter,
}

impl RefundPreset {
    pub fn percent(self) -> u64 {
        match self {
            RefundPreset::Full => 100,
            RefundPreset::ThreeQuarters => 75,
            RefundPreset::Half => 50,
            RefundPreset::Quarter => 25,
        }
    }

    /// Preset share of `order_total`, rounded down.
    pub fn amount(self, order_total: u64) -> u64 {
        let share = u128::from(order_total) * u128::from(self.percent()) / 100;
        // share <= order_total, so it always fits.
        u64::try_from(share).unwrap_or(order_total)
    }
}

/// Aggregate root: ReturnRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    id: ReturnRequestId,
    order_id: AggregateId,
    status: ReturnStatus,
    reason: String,
    order_total: u64,
    requested_at: Option<DateTime<Utc>>,
    responded_at: Option<DateTime<Utc>>,
    response_message: Option<String>,
    refund_amount: Option<u64>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl ReturnRequest {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ReturnRequestId) -> Self {
        Self {
            id,
            order_id: AggregateId::nil(),
            status: ReturnStatus::Pending,
            reason: String::new(),
            order_total: 0,
            requested_at: None,
            responded_at: None,
            response_message: None,
            refund_amount: None,
            completed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReturnRequestId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn order_id(&self) -> AggregateId {
        self.order_id
    }

    pub fn status(&self) -> ReturnStatus {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn order_total(&self) -> u64 {
        self.order_total
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn responded_at(&self) -> Option<DateTime<Utc>> {
        self.responded_at
    }

    pub fn response_message(&self) -> Option<&str> {
        self.response_message.as_deref()
    }

    pub fn refund_amount(&self) -> Option<u64> {
        self.refund_amount
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// End of the response window.
    pub fn respond_by(&self) -> Option<DateTime<Utc>> {
        self.requested_at
            .map(|at| at + Duration::days(RESPONSE_WINDOW_DAYS))
    }

    /// Whole days left to respond; `None` once the request left `pending`.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.created || self.status != ReturnStatus::Pending {
            return None;
        }
        let requested_at = self.requested_at?;
        let elapsed = (now - requested_at).num_days().max(0);
        Some((RESPONSE_WINDOW_DAYS - elapsed).max(0))
    }
}

impl AggregateRoot for ReturnRequest {
    type Id = ReturnRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenReturnRequest. `order_total` is taken from the order by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReturnRequest {
    pub return_request_id: ReturnRequestId,
    pub order_id: AggregateId,
    pub reason: String,
    pub order_total: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveReturn {
    pub return_request_id: ReturnRequestId,
    pub refund_amount: u64,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectReturn {
    pub return_request_id: ReturnRequestId,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteReturn (financial settlement done).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteReturn {
    pub return_request_id: ReturnRequestId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCommand {
    Open(OpenReturnRequest),
    Approve(ApproveReturn),
    Reject(RejectReturn),
    Complete(CompleteReturn),
}

/// Event: ReturnRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequested {
    pub return_request_id: ReturnRequestId,
    pub order_id: AggregateId,
    pub reason: String,
    pub order_total: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnApproved {
    pub return_request_id: ReturnRequestId,
    pub order_id: AggregateId,
    pub refund_amount: u64,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRejected {
    pub return_request_id: ReturnRequestId,
    pub order_id: AggregateId,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCompleted {
    pub return_request_id: ReturnRequestId,
    pub order_id: AggregateId,
    pub refund_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnEvent {
    Requested(ReturnRequested),
    Approved(ReturnApproved),
    Rejected(ReturnRejected),
    Completed(ReturnCompleted),
}

impl ReturnEvent {
    pub fn order_id(&self) -> AggregateId {
        match self {
            ReturnEvent::Requested(e) => e.order_id,
            ReturnEvent::Approved(e) => e.order_id,
            ReturnEvent::Rejected(e) => e.order_id,
            ReturnEvent::Completed(e) => e.order_id,
        }
    }
}

impl Event for ReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReturnEvent::Requested(_) => "returns.request.opened",
            ReturnEvent::Approved(_) => "returns.request.approved",
            ReturnEvent::Rejected(_) => "returns.request.rejected",
            ReturnEvent::Completed(_) => "returns.request.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReturnEvent::Requested(e) => e.occurred_at,
            ReturnEvent::Approved(e) => e.occurred_at,
            ReturnEvent::Rejected(e) => e.occurred_at,
            ReturnEvent::Completed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ReturnRequest {
    type Command = ReturnCommand;
    type Event = ReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReturnEvent::Requested(e) => {
                self.id = e.return_request_id;
                self.order_id = e.order_id;
                self.status = ReturnStatus::Pending;
                self.reason = e.reason.clone();
                self.order_total = e.order_total;
                self.requested_at = Some(e.occurred_at);
                self.created = true;
            }
            ReturnEvent::Approved(e) => {
                self.status = ReturnStatus::Approved;
                self.refund_amount = Some(e.refund_amount);
                self.response_message = Some(e.message.clone());
                self.responded_at = Some(e.occurred_at);
            }
            ReturnEvent::Rejected(e) => {
                self.status = ReturnStatus::Rejected;
                self.response_message = Some(e.message.clone());
                self.responded_at = Some(e.occurred_at);
            }
            ReturnEvent::Completed(e) => {
                self.status = ReturnStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReturnCommand::Open(cmd) => self.handle_open(cmd),
            ReturnCommand::Approve(cmd) => self.handle_approve(cmd),
            ReturnCommand::Reject(cmd) => self.handle_reject(cmd),
            ReturnCommand::Complete(cmd) => self.handle_complete(cmd),
        }
    }
}

impl ReturnRequest {
    fn ensure_target(&self, id: ReturnRequestId) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("return request {}", self.id)));
        }
        if self.id != id {
            return Err(DomainError::invariant("return_request_id mismatch"));
        }
        Ok(())
    }

    fn refuse(&self, to: ReturnStatus) -> DomainError {
        DomainError::invalid_transition(self.id, self.status, to)
    }

    fn handle_open(&self, cmd: &OpenReturnRequest) -> DomainResult<Vec<ReturnEvent>> {
        if self.created {
            return Err(DomainError::conflict("return request already exists"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("return reason cannot be empty"));
        }
        if cmd.order_total == 0 {
            return Err(DomainError::validation("order total must be positive"));
        }

        Ok(vec![ReturnEvent::Requested(ReturnRequested {
            return_request_id: cmd.return_request_id,
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            order_total: cmd.order_total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveReturn) -> DomainResult<Vec<ReturnEvent>> {
        self.ensure_target(cmd.return_request_id)?;

        if self.status == ReturnStatus::Approved && self.refund_amount == Some(cmd.refund_amount) {
            return Ok(vec![]);
        }
        if self.status != ReturnStatus::Pending {
            return Err(self.refuse(ReturnStatus::Approved));
        }
        if cmd.refund_amount == 0 || cmd.refund_amount > self.order_total {
            return Err(DomainError::invalid_refund_amount(format!(
                "refund {} must be within 1..={} for return request {}",
                cmd.refund_amount, self.order_total, self.id
            )));
        }

        Ok(vec![ReturnEvent::Approved(ReturnApproved {
            return_request_id: cmd.return_request_id,
            order_id: self.order_id,
            refund_amount: cmd.refund_amount,
            message: cmd.message.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectReturn) -> DomainResult<Vec<ReturnEvent>> {
        self.ensure_target(cmd.return_request_id)?;

        if self.status == ReturnStatus::Rejected {
            return Ok(vec![]);
        }
        if self.status != ReturnStatus::Pending {
            return Err(self.refuse(ReturnStatus::Rejected));
        }
        if cmd.message.trim().is_empty() {
            return Err(DomainError::validation("rejection requires a message"));
        }

        Ok(vec![ReturnEvent::Rejected(ReturnRejected {
            return_request_id: cmd.return_request_id,
            order_id: self.order_id,
            message: cmd.message.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteReturn) -> DomainResult<Vec<ReturnEvent>> {
        self.ensure_target(cmd.return_request_id)?;

        match (self.status, self.refund_amount) {
            (ReturnStatus::Completed, _) => Ok(vec![]),
            (ReturnStatus::Approved, Some(refund_amount)) => {
                Ok(vec![ReturnEvent::Completed(ReturnCompleted {
                    return_request_id: cmd.return_request_id,
                    order_id: self.order_id,
                    refund_amount,
                    occurred_at: cmd.occurred_at,
                })])
            }
            _ => Err(self.refuse(ReturnStatus::Completed)),
        }
    }
}
