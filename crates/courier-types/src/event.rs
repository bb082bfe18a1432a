//! Payloads of the events raised by the bus.
//!
//! Events are raised synchronously on the worker. All of them are read-only
//! except `ProcessingException`, whose response, error and forward flag may
//! be rewritten by each handler in turn.

use std::sync::Arc;

use crate::Value;
use crate::envelope::Envelope;
use crate::error::ReceiverError;

/// A remote connection reported itself broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBroken {
    pub connection: String,
    pub reason: String,
}

/// A request is being sent or received.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub envelope: Arc<Envelope>,
}

/// A response is being sent or received.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub request: Arc<Envelope>,
    pub response: Arc<Envelope>,
}

/// Last-chance context for a receiver failure.
///
/// Handlers run in subscription order and each sees the previous handler's
/// edits. After the chain:
/// - `error == None` means the failure was recovered and `response` is
///   delivered to the sender as a normal response;
/// - otherwise the error is forwarded to the sender when `forward` is set,
///   and swallowed on the receiver side when it is not.
#[derive(Debug)]
pub struct ProcessingException {
    request: Arc<Envelope>,
    address: Option<String>,
    pub error: Option<ReceiverError>,
    pub response: Option<Value>,
    pub forward: bool,
}

impl ProcessingException {
    pub fn new(
        request: Arc<Envelope>,
        address: Option<String>,
        error: ReceiverError,
        forward: bool,
    ) -> Self {
        Self {
            request,
            address,
            error: Some(error),
            response: None,
            forward,
        }
    }

    /// The request whose processing failed.
    pub fn request(&self) -> &Envelope {
        &self.request
    }

    /// Address of the failing registration.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Clear the error and answer the sender with `response` instead.
    pub fn recover(&mut self, response: Option<Value>) {
        self.error = None;
        self.response = response;
    }

    pub fn is_recovered(&self) -> bool {
        self.error.is_none()
    }
}
