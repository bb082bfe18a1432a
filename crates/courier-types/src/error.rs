//! Error kinds of the bus.
//!
//! Configuration and lifecycle misuse is reported synchronously through
//! `BusError`. Everything that happens after a send was accepted reaches
//! its caller through the send's awaitable as a `SendError`.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Synchronous configuration and lifecycle errors.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bus is already started")]
    AlreadyStarted,

    #[error("bus is not started")]
    NotStarted,

    #[error("no {0} was resolved")]
    MissingCollaborator(&'static str),

    #[error("{count} instances of {kind} were resolved, expected at most one")]
    AmbiguousCollaborator { kind: &'static str, count: usize },

    #[error("worker startup failed: {0}")]
    Startup(String),

    /// The worker died; the recorded fault is re-raised until the bus is restarted.
    #[error("bus worker faulted: {0}")]
    Faulted(PipelineFault),
}

/// Why a pending send was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Caller,
    /// The bus was stopped while the send was pending.
    BusStopped,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Caller => f.write_str("cancelled by caller"),
            CancelReason::BusStopped => f.write_str("bus stopped"),
        }
    }
}

/// Outcomes delivered through a send's awaitable.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("send cancelled: {0}")]
    Cancelled(CancelReason),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error(transparent)]
    Forwarded(#[from] ForwardedError),

    #[error("connection '{connection}' broken: {reason}")]
    ConnectionBroken { connection: String, reason: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineFault),
}

/// A value did not decode into the expected type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot cast to {expected}: {message}")]
pub struct CastError {
    expected: String,
    message: String,
}

impl CastError {
    pub fn new(expected: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            message: message.into(),
        }
    }

    /// Type name the value was expected to decode into.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A receiver-side failure delivered to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("receiver failed ({error_type}): {message}")]
pub struct ForwardedError {
    address: Option<String>,
    error_type: String,
    message: String,
}

impl ForwardedError {
    pub fn from_receiver(address: Option<&str>, error: &ReceiverError) -> Self {
        Self {
            address: address.map(str::to_string),
            error_type: error.kind().to_string(),
            message: error.message().to_string(),
        }
    }

    /// Address of the registration that failed, if it had one.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Fatal failure of a worker loop iteration.
#[derive(Debug, Clone, Error)]
#[error("pipeline fault: {message}")]
pub struct PipelineFault {
    message: Arc<str>,
}

impl PipelineFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure raised while running a receiver callback.
///
/// Cheap to clone; the originating error, if any, is kept as `source()`.
#[derive(Debug, Clone)]
pub struct ReceiverError {
    kind: String,
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ReceiverError {
    /// A plain failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "receiver".to_string(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error, recording its type name.
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// The callback panicked.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::with_kind("panic", message)
    }

    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for ReceiverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<CastError> for ReceiverError {
    fn from(e: CastError) -> Self {
        ReceiverError::from_error(e)
    }
}

/// Failure of a remote connection while forwarding a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The link is gone; sends depending on it fault unless they ignore
    /// broken connections.
    #[error("connection broken: {0}")]
    Broken(String),

    /// This one request could not be forwarded; the link itself is fine.
    #[error("forward failed: {0}")]
    Failed(String),
}

/// Failure reported by a collaborator (`initialize`, `do_work`, `unload`).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CollaboratorError(String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for CollaboratorError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for CollaboratorError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}
