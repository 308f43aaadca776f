//! Closed enumerations for order status, `to_ship` sub-stage and listing buckets.

use serde::{Deserialize, Serialize};

use sellerdesk_core::DomainError;

/// Coarse order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed, not yet paid.
    Pending,
    Confirmed,
    /// Being prepared; always paired with a [`FulfillmentStage`].
    ToShip,
    /// Handed to the carrier with a tracking id.
    Shipping,
    /// Delivered, awaiting customer confirmation.
    Shipped,
    Completed,
    Cancelled,
    FailedDelivery,
    ReturnRequested,
    ReturnApproved,
    ReturnRejected,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::ToShip,
        OrderStatus::Shipping,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::FailedDelivery,
        OrderStatus::ReturnRequested,
        OrderStatus::ReturnApproved,
        OrderStatus::ReturnRejected,
        OrderStatus::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::ToShip => "to_ship",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::FailedDelivery => "failed_delivery",
            OrderStatus::ReturnRequested => "return_requested",
            OrderStatus::ReturnApproved => "return_approved",
            OrderStatus::ReturnRejected => "return_rejected",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// No fulfillment transition leaves a terminal status.
    ///
    /// `Completed` still admits opening a return; that is the return workflow,
    /// not a fulfillment move.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Cancelled
                | OrderStatus::ReturnRejected
                | OrderStatus::Refunded
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::ToShip
                | OrderStatus::Shipping
                | OrderStatus::Shipped
                | OrderStatus::FailedDelivery
        )
    }

    pub fn bucket(self) -> StatusBucket {
        match self {
            OrderStatus::Pending => StatusBucket::Unpaid,
            OrderStatus::Confirmed | OrderStatus::ToShip => StatusBucket::ToShip,
            OrderStatus::Shipping => StatusBucket::Shipping,
            OrderStatus::Shipped | OrderStatus::Completed => StatusBucket::Completed,
            OrderStatus::Cancelled | OrderStatus::FailedDelivery => StatusBucket::Unfulfilled,
            OrderStatus::ReturnRequested
            | OrderStatus::ReturnApproved
            | OrderStatus::ReturnRejected
            | OrderStatus::Refunded => StatusBucket::ReturnRefund,
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

/// Sub-state of `to_ship`. Moves are one adjacent step forward or back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FulfillmentStage {
    ToPack,
    ToArrangement,
    ToHandOver,
}

impl FulfillmentStage {
    pub const ALL: [FulfillmentStage; 3] = [
        FulfillmentStage::ToPack,
        FulfillmentStage::ToArrangement,
        FulfillmentStage::ToHandOver,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FulfillmentStage::ToPack => "to-pack",
            FulfillmentStage::ToArrangement => "to-arrangement",
            FulfillmentStage::ToHandOver => "to-hand-over",
        }
    }

    fn position(self) -> u8 {
        match self {
            FulfillmentStage::ToPack => 0,
            FulfillmentStage::ToArrangement => 1,
            FulfillmentStage::ToHandOver => 2,
        }
    }

    pub fn next(self) -> Option<FulfillmentStage> {
        match self {
            FulfillmentStage::ToPack => Some(FulfillmentStage::ToArrangement),
            FulfillmentStage::ToArrangement => Some(FulfillmentStage::ToHandOver),
            FulfillmentStage::ToHandOver => None,
        }
    }

    pub fn previous(self) -> Option<FulfillmentStage> {
        match self {
            FulfillmentStage::ToPack => None,
            FulfillmentStage::ToArrangement => Some(FulfillmentStage::ToPack),
            FulfillmentStage::ToHandOver => Some(FulfillmentStage::ToArrangement),
        }
    }

    /// True for the four one-step moves (two forward, two back).
    pub fn is_adjacent(from: FulfillmentStage, to: FulfillmentStage) -> bool {
        from.position().abs_diff(to.position()) == 1
    }
}

impl core::fmt::Display for FulfillmentStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for FulfillmentStage {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FulfillmentStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown fulfillment stage '{s}'")))
    }
}

/// Listing bucket (seller-facing tabs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Unpaid,
    ToShip,
    Shipping,
    Completed,
    Unfulfilled,
    ReturnRefund,
}

impl StatusBucket {
    pub const ALL: [StatusBucket; 6] = [
        StatusBucket::Unpaid,
        StatusBucket::ToShip,
        StatusBucket::Shipping,
        StatusBucket::Completed,
        StatusBucket::Unfulfilled,
        StatusBucket::ReturnRefund,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusBucket::Unpaid => "unpaid",
            StatusBucket::ToShip => "to_ship",
            StatusBucket::Shipping => "shipping",
            StatusBucket::Completed => "completed",
            StatusBucket::Unfulfilled => "unfulfilled",
            StatusBucket::ReturnRefund => "return_refund",
        }
    }
}

impl core::str::FromStr for StatusBucket {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusBucket::ALL
            .into_iter()
            .find(|bucket| bucket.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown status bucket '{s}'")))
    }
}
