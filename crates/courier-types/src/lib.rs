//! Shared domain types for the courier message bus.
//!
//! This crate contains the types that flow between the bus core, its
//! pluggable collaborators and user code: the `Envelope` correlation unit,
//! runtime `TypeDescriptor`s used for cast checks, the `BusConfig` defaults,
//! the event payloads and every error kind.
//!
//! No async runtime dependencies: only serde, serde_json, uuid, chrono and
//! thiserror.

pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod payload;

pub use config::{BusConfig, WorkerConfig};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{
    BusError, CancelReason, CastError, CollaboratorError, ConnectionError, ForwardedError,
    PipelineFault, ReceiverError, SendError,
};
pub use event::{ConnectionBroken, MessageEvent, ProcessingException, ResponseEvent};
pub use payload::{TypeDescriptor, decode};

/// Dynamic value carried as payload or response.
pub type Value = serde_json::Value;
