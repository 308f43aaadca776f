//! Append-only event store boundary.
//!
//! Streams are keyed by aggregate id. The trait is synchronous; the Postgres
//! backend bridges into its async driver.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, single_stream};
