//! Ordered handler chains for bus events.
//!
//! Handler lists live inside the bus state and are only touched under the
//! bus lock. Raising an event snapshots the list under the lock and runs the
//! handlers after releasing it, so a handler may call back into the bus
//! (including `stop`) without deadlocking.

use std::sync::Arc;

use courier_types::{ConnectionBroken, MessageEvent, ProcessingException, ResponseEvent};

/// Identifies one subscribed handler; used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Subscription-ordered list of handlers of one event.
pub(crate) struct HandlerList<H: ?Sized> {
    entries: Vec<(HandlerId, Arc<H>)>,
}

impl<H: ?Sized> Default for HandlerList<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: ?Sized> HandlerList<H> {
    pub(crate) fn push(&mut self, id: HandlerId, handler: Arc<H>) {
        self.entries.push((id, handler));
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Clone the handlers out so they can run without the bus lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<H>> {
        self.entries.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) type ConnectionBrokenHandler = dyn Fn(&ConnectionBroken) + Send + Sync;
pub(crate) type MessageHandler = dyn Fn(&MessageEvent) + Send + Sync;
pub(crate) type ResponseHandler = dyn Fn(&ResponseEvent) + Send + Sync;
pub(crate) type ProcessingExceptionHandler = dyn Fn(&mut ProcessingException) + Send + Sync;

/// All subscriber sets of one bus.
#[derive(Default)]
pub(crate) struct EventHandlers {
    next_id: u64,
    pub(crate) connection_broken: HandlerList<ConnectionBrokenHandler>,
    pub(crate) sending_request: HandlerList<MessageHandler>,
    pub(crate) receiving_request: HandlerList<MessageHandler>,
    pub(crate) sending_response: HandlerList<ResponseHandler>,
    pub(crate) receiving_response: HandlerList<ResponseHandler>,
    pub(crate) processing_exception: HandlerList<ProcessingExceptionHandler>,
}

impl EventHandlers {
    pub(crate) fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    /// Remove a handler from whichever list holds it.
    pub(crate) fn remove(&mut self, id: HandlerId) -> bool {
        self.connection_broken.remove(id)
            || self.sending_request.remove(id)
            || self.receiving_request.remove(id)
            || self.sending_response.remove(id)
            || self.receiving_response.remove(id)
            || self.processing_exception.remove(id)
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("connection_broken", &self.connection_broken.len())
            .field("sending_request", &self.sending_request.len())
            .field("receiving_request", &self.receiving_request.len())
            .field("sending_response", &self.sending_response.len())
            .field("receiving_response", &self.receiving_response.len())
            .field("processing_exception", &self.processing_exception.len())
            .finish()
    }
}
