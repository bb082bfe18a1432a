//! Pending-send records.
//!
//! A record pairs the immutable view of one enqueued send with the sending
//! half of its completion channel. Records are only created, completed and
//! removed by the bus under its lock; pipelines see them as
//! [`PendingSendView`] snapshots.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_types::{Envelope, SendError, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::bus::BusDefaults;
use crate::send::{SendMode, SendRequest};

/// What a send's awaitable eventually receives: one response or a fault.
pub(crate) type Outcome = Result<Option<Value>, SendError>;

/// Completion side of a pending send.
pub(crate) enum ResponseSink {
    Single(Option<oneshot::Sender<Outcome>>),
    Broadcast(mpsc::UnboundedSender<Outcome>),
    /// Fire-and-forget: nobody is listening.
    Detached,
}

/// Result of pushing one response into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Nobody received it (detached, already answered, or caller gone).
    Dropped,
    /// Delivered; the record stays open for more responses.
    Delivered,
    /// Delivered and the record is complete.
    Completed,
}

pub(crate) struct PendingSend {
    view: PendingSendView,
    sink: ResponseSink,
    claimed: bool,
    connections: Vec<String>,
}

impl PendingSend {
    pub(crate) fn new(view: PendingSendView, sink: ResponseSink) -> Self {
        Self {
            view,
            sink,
            claimed: false,
            connections: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.view.id
    }

    pub(crate) fn view(&self) -> &PendingSendView {
        &self.view
    }

    /// Mark the record as handed to the pipeline. Returns `false` if it
    /// already was.
    pub(crate) fn claim(&mut self) -> bool {
        !std::mem::replace(&mut self.claimed, true)
    }

    pub(crate) fn attach(&mut self, connection: &str) {
        if !self.connections.iter().any(|c| c == connection) {
            self.connections.push(connection.to_string());
        }
    }

    pub(crate) fn depends_on(&self, connection: &str) -> bool {
        self.connections.iter().any(|c| c == connection)
    }

    pub(crate) fn deliver(&mut self, response: Option<Value>) -> Delivery {
        match &mut self.sink {
            ResponseSink::Single(tx) => match tx.take() {
                Some(tx) => {
                    if tx.send(Ok(response)).is_ok() {
                        Delivery::Completed
                    } else {
                        Delivery::Dropped
                    }
                }
                None => Delivery::Dropped,
            },
            ResponseSink::Broadcast(tx) => {
                if tx.send(Ok(response)).is_ok() {
                    Delivery::Delivered
                } else {
                    Delivery::Dropped
                }
            }
            ResponseSink::Detached => Delivery::Dropped,
        }
    }

    /// Complete the record with a fault. The record is consumed.
    pub(crate) fn fail(self, error: SendError) {
        match self.sink {
            ResponseSink::Single(Some(tx)) => {
                let _ = tx.send(Err(error));
            }
            ResponseSink::Broadcast(tx) => {
                let _ = tx.send(Err(error));
            }
            ResponseSink::Single(None) | ResponseSink::Detached => {}
        }
    }
}

/// Snapshot of one pending send, as seen by pipelines and routers.
#[derive(Clone)]
pub struct PendingSendView {
    id: Uuid,
    envelope: Arc<Envelope>,
    request: Arc<SendRequest>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl PendingSendView {
    /// The deadline runs from enqueue time, not from when the caller awaits.
    pub(crate) fn new(
        envelope: Arc<Envelope>,
        request: SendRequest,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: envelope.id(),
            envelope,
            request: Arc::new(request),
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Id of the send; equal to the request envelope's id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    /// Configuration the send was enqueued with.
    pub fn request(&self) -> &SendRequest {
        &self.request
    }

    pub fn mode(&self) -> SendMode {
        self.request.mode()
    }

    /// Effective response deadline; `None` for fire-and-forget.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Instant after which responses are no longer accepted.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Per-send routing hint, else the bus default.
    pub fn is_global(&self, defaults: &BusDefaults) -> bool {
        self.request.global().unwrap_or(defaults.send_to_global)
    }

    pub fn ignores_broken_connections(&self, defaults: &BusDefaults) -> bool {
        self.request
            .ignore_broken_connections()
            .unwrap_or(defaults.ignore_broken_connections)
    }
}

impl fmt::Debug for PendingSendView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSendView")
            .field("id", &self.id)
            .field("address", &self.envelope.address())
            .field("mode", &self.request.mode())
            .field("timeout", &self.timeout)
            .finish()
    }
}
