//! Infrastructure layer: event store, command dispatch, carrier integration,
//! projections and background workers.

pub mod carrier;
pub mod command_dispatcher;
pub mod event_store;
pub mod handoff;
pub mod projections;
pub mod read_model;
pub mod saga;
pub mod workers;
