//! Carrier pickup schedule validation.

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};

use sellerdesk_core::{DomainError, DomainResult};

/// Operational pickup window, expressed in carrier local time.
///
/// Both bounds are inclusive: with the default window a pickup at exactly
/// 14:00:00 is accepted and 14:00:01 is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickupWindow {
    opens: NaiveTime,
    closes: NaiveTime,
    utc_offset: FixedOffset,
}

impl Default for PickupWindow {
    fn default() -> Self {
        Self {
            opens: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            closes: NaiveTime::from_hms_opt(14, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl PickupWindow {
    pub fn new(opens: NaiveTime, closes: NaiveTime, utc_offset: FixedOffset) -> DomainResult<Self> {
        if opens >= closes {
            return Err(DomainError::validation(format!(
                "pickup window must open before it closes ({opens} >= {closes})"
            )));
        }
        Ok(Self {
            opens,
            closes,
            utc_offset,
        })
    }

    pub fn opens(&self) -> NaiveTime {
        self.opens
    }

    pub fn closes(&self) -> NaiveTime {
        self.closes
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// `pickup_at` converted to carrier local time.
    pub fn local(&self, pickup_at: DateTime<Utc>) -> DateTime<FixedOffset> {
        pickup_at.with_timezone(&self.utc_offset)
    }

    /// Reject pickups that are not strictly after `now` or fall outside the window.
    pub fn validate(&self, pickup_at: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<()> {
        if pickup_at <= now {
            return Err(DomainError::invalid_schedule(format!(
                "pickup time {} is not in the future (now {})",
                pickup_at.to_rfc3339(),
                now.to_rfc3339()
            )));
        }

        let local = self.local(pickup_at);
        let time = local.time();
        if time < self.opens || time > self.closes {
            return Err(DomainError::invalid_schedule(format!(
                "pickup at {} carrier local time is outside {}-{}",
                local.format("%H:%M:%S"),
                self.opens.format("%H:%M"),
                self.closes.format("%H:%M"),
            )));
        }

        Ok(())
    }
}
