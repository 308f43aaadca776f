//! Tracing/logging setup shared by binaries and tests.

pub mod tracing;

pub use tracing::{LogFormat, UnknownLogFormat};

/// Initialize process-wide tracing.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}
