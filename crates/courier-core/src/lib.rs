//! In-process message bus.
//!
//! A [`LocalBus`] owns a dedicated worker that drives pluggable
//! collaborators (pipeline, dispatcher, router, connections) resolved from a
//! [`Resolver`]. Callers build sends with [`LocalBus::send`] and receivers
//! with [`LocalBus::receive`]; the [`local`] module provides collaborators
//! for plain in-process delivery.

pub mod bus;
pub mod config;
pub mod exception;
pub mod local;
pub mod pipeline;
pub mod receive;
pub mod send;

pub use courier_types as types;

pub use bus::{BusControl, BusDefaults, HandlerId, LocalBus, PendingSendView};
pub use exception::{
    ExceptionVerdict, FailureOutcome, ReceiveExceptionHandler, ReceiveFailure,
    SendExceptionHandler, SendFailure,
};
pub use pipeline::{
    BoxDispatcher, BoxPipeline, Connection, ConnectionManager, DispatchJob, Dispatcher,
    InitContext, Pipeline, Resolver, Router, WorkUnit,
};
pub use receive::{ActiveRegistration, Inbound, ReceiverRegistration, Subscription};
pub use send::{Accepted, PendingBroadcast, PendingSingle, SendMode, SendOperation, SendRequest};
