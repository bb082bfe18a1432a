//! The fluent builder for one outgoing message.
//!
//! A `SendOperation` is consumed by exactly one terminal call
//! ([`as_single`](SendOperation::as_single),
//! [`as_broadcast`](SendOperation::as_broadcast),
//! [`as_fire_and_forget`](SendOperation::as_fire_and_forget)), so it cannot be
//! configured or sent again afterwards:
//!
//! ```compile_fail
//! # fn demo(bus: &courier_core::LocalBus) -> Result<(), courier_types::BusError> {
//! let op = bus.send().to_address("ping")?;
//! let _first = op.as_fire_and_forget()?;
//! let _second = op.as_fire_and_forget()?; // `op` was moved by the first call
//! # Ok(())
//! # }
//! ```
//!
//! ```compile_fail
//! # fn demo(bus: &courier_core::LocalBus) -> Result<(), courier_types::BusError> {
//! let op = bus.send();
//! let _pending = op.as_single()?;
//! let _op = op.with_timeout(std::time::Duration::from_secs(1)); // already processed
//! # Ok(())
//! # }
//! ```

mod awaitable;
mod request;

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use courier_types::{BusError, TypeDescriptor, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusControl, ResponseSink};
use crate::exception::{ExceptionVerdict, SendFailure};

pub use awaitable::{Accepted, PendingBroadcast, PendingSingle};
pub use request::{SendMode, SendRequest};

/// Builder for one send. `R` is the type responses are cast to.
#[must_use = "a send operation does nothing until a terminal method is called"]
pub struct SendOperation<R = Value> {
    bus: BusControl,
    request: SendRequest,
    _response: PhantomData<fn() -> R>,
}

impl SendOperation<Value> {
    pub(crate) fn new(bus: BusControl) -> Self {
        Self {
            bus,
            request: SendRequest::default(),
            _response: PhantomData,
        }
    }
}

impl<R> SendOperation<R>
where
    R: DeserializeOwned + Send + 'static,
{
    /// Target address. Must not be empty.
    pub fn to_address(mut self, address: impl Into<String>) -> Result<Self, BusError> {
        let address = address.into();
        if address.is_empty() {
            return Err(BusError::InvalidArgument(
                "address must not be empty".to_string(),
            ));
        }
        self.request.address = Some(address);
        Ok(self)
    }

    /// Route to remote connections as well as local receivers.
    pub fn to_global(mut self) -> Self {
        self.request.global = Some(true);
        self
    }

    /// Keep the send in this process.
    pub fn to_local(mut self) -> Self {
        self.request.global = Some(false);
        self
    }

    /// Serialize `payload` and record its type name for routing.
    ///
    /// Borrowed forms are recorded under their owned type, so `"text"`
    /// routes like a `String`.
    pub fn with_payload<T>(mut self, payload: &T) -> Result<Self, BusError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(payload).map_err(|e| {
            BusError::InvalidArgument(format!(
                "payload of type {} does not serialize: {e}",
                type_name::<T>()
            ))
        })?;
        self.request.payload = Some(value);
        self.request.payload_type = Some(owned_type_name::<T>());
        Ok(self)
    }

    /// Attach an already-built value; no payload type is recorded.
    pub fn with_raw_payload(mut self, payload: Value) -> Self {
        self.request.payload = Some(payload);
        self.request.payload_type = None;
        self
    }

    /// Cast responses to `T` instead.
    pub fn with_response<T>(self) -> SendOperation<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut request = self.request;
        request.response_type = Some(TypeDescriptor::of::<T>());
        SendOperation {
            bus: self.bus,
            request,
            _response: PhantomData,
        }
    }

    /// Override the bus default response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.request.cancellation = Some(token);
        self
    }

    pub fn with_exception_forwarding(mut self, forward: bool) -> Self {
        self.request.forward_exceptions = Some(forward);
        self
    }

    pub fn with_exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SendFailure<'_>) -> ExceptionVerdict + Send + Sync + 'static,
    {
        self.request.exception_handler = Some(std::sync::Arc::new(handler));
        self
    }

    /// Let the send time out rather than fault when a connection it was
    /// bridged over breaks.
    pub fn with_ignored_broken_connections(mut self, ignore: bool) -> Self {
        self.request.ignore_broken_connections = Some(ignore);
        self
    }

    /// Configuration so far.
    pub fn request(&self) -> &SendRequest {
        &self.request
    }

    // -- terminal calls ----------------------------------------------------

    /// Send and await exactly one response.
    pub fn as_single(mut self) -> Result<PendingSingle<R>, BusError> {
        self.request.mode = SendMode::Single;
        self.request.expected_results = Some(1);
        let (tx, rx) = oneshot::channel();
        let enqueued = self
            .bus
            .enqueue(self.request, ResponseSink::Single(Some(tx)))?;
        Ok(PendingSingle::new(
            self.bus,
            enqueued.id,
            rx,
            enqueued.timeout.unwrap_or_default(),
            enqueued.deadline.unwrap_or_else(Instant::now),
            enqueued.cancellation,
        ))
    }

    /// Send and collect zero or more responses.
    ///
    /// With `expected_results` the collection ends as soon as that many
    /// responses arrived; `Some(0)` completes immediately with nothing.
    pub fn as_broadcast(
        mut self,
        expected_results: Option<usize>,
    ) -> Result<PendingBroadcast<R>, BusError> {
        self.request.mode = SendMode::Broadcast;
        self.request.expected_results = expected_results;
        let (tx, rx) = mpsc::unbounded_channel();
        let enqueued = self
            .bus
            .enqueue(self.request, ResponseSink::Broadcast(tx))?;
        Ok(PendingBroadcast::new(
            self.bus,
            enqueued.id,
            rx,
            enqueued.timeout.unwrap_or_default(),
            enqueued.deadline.unwrap_or_else(Instant::now),
            enqueued.cancellation,
            expected_results,
        ))
    }

    /// Send without waiting for anything.
    ///
    /// Cancellation, timeout, exception forwarding and the response type are
    /// cleared; the returned awaitable is ready immediately.
    pub fn as_fire_and_forget(mut self) -> Result<Accepted, BusError> {
        self.request.mode = SendMode::FireAndForget;
        self.request.cancellation = None;
        self.request.timeout = None;
        self.request.forward_exceptions = Some(false);
        self.request.response_type = None;
        self.request.expected_results = None;
        let enqueued = self.bus.enqueue(self.request, ResponseSink::Detached)?;
        Ok(Accepted::new(enqueued.id))
    }
}

/// Type name a payload of type `T` is routed under: leading references
/// are stripped and `str` becomes `String`.
fn owned_type_name<T: ?Sized>() -> &'static str {
    let mut name = type_name::<T>();
    loop {
        if let Some(rest) = name.strip_prefix("&mut ") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix('&') {
            name = rest;
        } else {
            break;
        }
    }
    if name == type_name::<str>() {
        type_name::<String>()
    } else {
        name
    }
}

impl<R> fmt::Debug for SendOperation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOperation")
            .field("request", &self.request)
            .field("response", &type_name::<R>())
            .finish()
    }
}
