//! Observability setup for processes hosting a courier bus.
//!
//! The bus itself only emits `tracing` events and spans (one `courier.bus`
//! span per bus); this crate installs the subscriber that records them.

pub mod tracing_setup;
