//! Exception handlers and the failure-resolution policy.
//!
//! A failure while processing a send goes through three layers before it
//! reaches the sender:
//!
//! 1. The static forward flag: registration's, else the send's, else the
//!    bus default.
//! 2. The exception handlers. The receive-side handler (registration's,
//!    else the bus default) is asked first; if it answers
//!    [`ExceptionVerdict::Default`] the send-side handler (send's, else the
//!    bus default) is asked. A non-default verdict overrides the flag.
//! 3. The processing-exception event chain, which sees the result of 1-2
//!    and may rewrite it; the last handler wins.
//!
//! Fire-and-forget sends never forward: there is nobody to forward to.

use std::sync::Arc;

use courier_types::{Envelope, ForwardedError, ProcessingException, ReceiverError, Value};
use tracing::warn;

use crate::bus::{BusControl, PendingSendView};
use crate::receive::ActiveRegistration;
use crate::send::SendMode;

/// What an exception handler wants done with a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ExceptionVerdict {
    /// Recover: answer the sender with this response instead.
    Respond(Option<Value>),
    /// Forward the failure to the sender regardless of the configured flag.
    Forward,
    /// Keep the failure on the receiving side regardless of the flag.
    Suppress,
    /// No opinion; fall through to the next handler or the configured flag.
    Default,
}

/// A failure as seen by a send-side handler.
#[derive(Debug, Clone, Copy)]
pub struct SendFailure<'a> {
    pub request: &'a Envelope,
    pub error: &'a ReceiverError,
}

/// A failure as seen by a receive-side handler.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveFailure<'a> {
    /// Address of the registration that failed.
    pub address: Option<&'a str>,
    pub request: &'a Envelope,
    pub error: &'a ReceiverError,
}

pub type SendExceptionHandler = Arc<dyn Fn(&SendFailure<'_>) -> ExceptionVerdict + Send + Sync>;

pub type ReceiveExceptionHandler =
    Arc<dyn Fn(&ReceiveFailure<'_>) -> ExceptionVerdict + Send + Sync>;

/// Wrap a closure as a [`SendExceptionHandler`].
pub fn send_handler<F>(handler: F) -> SendExceptionHandler
where
    F: Fn(&SendFailure<'_>) -> ExceptionVerdict + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Wrap a closure as a [`ReceiveExceptionHandler`].
pub fn receive_handler<F>(handler: F) -> ReceiveExceptionHandler
where
    F: Fn(&ReceiveFailure<'_>) -> ExceptionVerdict + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Final decision on a failure.
#[derive(Debug, Clone)]
pub enum FailureOutcome {
    /// Answer the sender with this response.
    Recovered(Option<Value>),
    /// Fault the send with the forwarded error.
    Forward(ForwardedError),
    /// Keep the failure on the receiving side; the sender sees no response.
    Swallowed(ReceiverError),
}

/// Decide what happens to a receiver callback's failure.
pub fn resolve_receiver_failure(
    bus: &BusControl,
    send: &PendingSendView,
    registration: &ActiveRegistration,
    error: ReceiverError,
) -> FailureOutcome {
    let defaults = bus.defaults();
    let request = send.envelope();
    let forward = registration
        .forward_exceptions()
        .or(send.request().forward_exceptions())
        .unwrap_or(defaults.forward_receive_exceptions);

    let receive_handler = registration
        .exception_handler()
        .cloned()
        .or(defaults.receive_exception_handler);
    let mut verdict = receive_handler.map_or(ExceptionVerdict::Default, |handler| {
        handler(&ReceiveFailure {
            address: registration.address(),
            request,
            error: &error,
        })
    });

    if verdict == ExceptionVerdict::Default {
        let send_handler = send
            .request()
            .exception_handler()
            .cloned()
            .or(defaults.send_exception_handler);
        verdict = send_handler.map_or(ExceptionVerdict::Default, |handler| {
            handler(&SendFailure {
                request,
                error: &error,
            })
        });
    }

    let context = ProcessingException::new(
        Arc::clone(request),
        registration.address().map(str::to_string),
        error,
        forward,
    );
    finish(bus, send, context, verdict)
}

/// Decide what happens to a failure on the sending side, such as a
/// connection refusing to forward the request.
pub fn resolve_send_failure(
    bus: &BusControl,
    send: &PendingSendView,
    error: ReceiverError,
) -> FailureOutcome {
    let defaults = bus.defaults();
    let request = send.envelope();
    let forward = send
        .request()
        .forward_exceptions()
        .unwrap_or(defaults.forward_send_exceptions);

    let handler = send
        .request()
        .exception_handler()
        .cloned()
        .or(defaults.send_exception_handler);
    let verdict = handler.map_or(ExceptionVerdict::Default, |handler| {
        handler(&SendFailure {
            request,
            error: &error,
        })
    });

    let context = ProcessingException::new(
        Arc::clone(request),
        request.address().map(str::to_string),
        error,
        forward,
    );
    finish(bus, send, context, verdict)
}

fn finish(
    bus: &BusControl,
    send: &PendingSendView,
    mut context: ProcessingException,
    verdict: ExceptionVerdict,
) -> FailureOutcome {
    match verdict {
        ExceptionVerdict::Respond(response) => context.recover(response),
        ExceptionVerdict::Forward => context.forward = true,
        ExceptionVerdict::Suppress => context.forward = false,
        ExceptionVerdict::Default => {}
    }

    bus.raise_processing_exception(&mut context);

    let address = context.address().map(str::to_string);
    match context.error.take() {
        None => FailureOutcome::Recovered(context.response.take()),
        Some(error) if context.forward && send.mode() != SendMode::FireAndForget => {
            FailureOutcome::Forward(ForwardedError::from_receiver(address.as_deref(), &error))
        }
        Some(error) => {
            warn!(
                parent: bus.span(),
                send_id = %send.id(),
                address = ?address,
                error = %error,
                "failure kept on the receiving side"
            );
            FailureOutcome::Swallowed(error)
        }
    }
}
