use chrono::{DateTime, Utc};

/// Implemented by each aggregate's event enum.
///
/// `event_type` names are `<context>.<aggregate>.<fact>` and never change once
/// persisted; payload changes bump `version` instead.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Business time supplied by the command, not the append time.
    fn occurred_at(&self) -> DateTime<Utc>;
}
