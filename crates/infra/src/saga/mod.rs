//! Cross-aggregate policies driven by published events.

pub mod return_sync;

pub use return_sync::ReturnOrderSync;
