//! The immutable record a processed `SendOperation` leaves behind.

use std::fmt;
use std::time::Duration;

use courier_types::{TypeDescriptor, Value};
use tokio_util::sync::CancellationToken;

use crate::exception::SendExceptionHandler;

/// Terminal mode chosen for a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    #[default]
    Undefined,
    Single,
    Broadcast,
    FireAndForget,
}

/// Configuration of one send. `None` fields defer to the bus defaults.
#[derive(Clone, Default)]
pub struct SendRequest {
    pub(crate) address: Option<String>,
    pub(crate) global: Option<bool>,
    /// Moved into the request envelope at enqueue time.
    pub(crate) payload: Option<Value>,
    pub(crate) payload_type: Option<&'static str>,
    pub(crate) response_type: Option<TypeDescriptor>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) forward_exceptions: Option<bool>,
    pub(crate) exception_handler: Option<SendExceptionHandler>,
    pub(crate) ignore_broken_connections: Option<bool>,
    pub(crate) expected_results: Option<usize>,
    pub(crate) mode: SendMode,
}

impl SendRequest {
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Routing hint: `Some(true)` global, `Some(false)` local.
    pub fn global(&self) -> Option<bool> {
        self.global
    }

    pub fn payload_type(&self) -> Option<&'static str> {
        self.payload_type
    }

    pub fn response_type(&self) -> Option<TypeDescriptor> {
        self.response_type
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn forward_exceptions(&self) -> Option<bool> {
        self.forward_exceptions
    }

    pub fn exception_handler(&self) -> Option<&SendExceptionHandler> {
        self.exception_handler.as_ref()
    }

    pub fn ignore_broken_connections(&self) -> Option<bool> {
        self.ignore_broken_connections
    }

    /// Number of responses that ends a broadcast early.
    pub fn expected_results(&self) -> Option<usize> {
        self.expected_results
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }
}

impl fmt::Debug for SendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendRequest")
            .field("address", &self.address)
            .field("global", &self.global)
            .field("payload_type", &self.payload_type)
            .field("response_type", &self.response_type)
            .field("timeout", &self.timeout)
            .field("cancellable", &self.cancellation.is_some())
            .field("forward_exceptions", &self.forward_exceptions)
            .field("exception_handler", &self.exception_handler.is_some())
            .field("ignore_broken_connections", &self.ignore_broken_connections)
            .field("expected_results", &self.expected_results)
            .field("mode", &self.mode)
            .finish()
    }
}
