//! Collaborator-facing control plane of a bus.
//!
//! `BusControl` is the only way pipelines, dispatchers and connections touch
//! bus state: enumerate and claim pending sends, enumerate registrations,
//! complete a send's awaitable, and raise the bus events. Every method takes
//! the bus lock for one read-modify-write and releases it before returning.

use std::fmt;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use courier_types::{
    BusError, CancelReason, ConnectionBroken, Envelope, MessageEvent, PipelineFault,
    ProcessingException, ResponseEvent, SendError, Value,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::pending::{Delivery, PendingSend, PendingSendView, ResponseSink};
use super::{BusDefaults, BusInner, BusState, Lifecycle};
use crate::receive::ActiveRegistration;
use crate::send::{SendMode, SendRequest};

/// What the awaitable of a freshly enqueued send needs.
pub(crate) struct Enqueued {
    pub(crate) id: Uuid,
    pub(crate) timeout: Option<Duration>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) cancellation: Option<CancellationToken>,
}

/// Cheap, cloneable handle on a bus's shared state.
#[derive(Clone)]
pub struct BusControl {
    inner: Arc<BusInner>,
}

impl BusControl {
    pub(crate) fn new(inner: BusInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The bus span; collaborators log under it.
    pub fn span(&self) -> &tracing::Span {
        &self.inner.span
    }

    /// Snapshot of the current default policies.
    pub fn defaults(&self) -> BusDefaults {
        self.lock().defaults.clone()
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.lock().defaults.poll_interval
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lock().lifecycle, Lifecycle::Running(_))
    }

    /// Wake the worker now. Only valid while the bus is running.
    pub fn signal_work_available(&self) -> Result<(), BusError> {
        match &self.lock().lifecycle {
            Lifecycle::Running(worker) => {
                worker.wake();
                Ok(())
            }
            _ => Err(BusError::NotStarted),
        }
    }

    // -- pending sends -----------------------------------------------------

    /// All pending sends in enqueue order.
    pub fn pending_sends(&self) -> Vec<PendingSendView> {
        self.lock()
            .pending
            .iter()
            .map(|p| p.view().clone())
            .collect()
    }

    /// Pending sends not handed out by a previous claim, in enqueue order.
    ///
    /// Records past their deadline are dropped first; their callers have
    /// already timed out or will on their next poll.
    pub fn claim_pending_sends(&self) -> Vec<PendingSendView> {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.pending.len();
        state.pending.retain(|p| !p.view().is_expired(now));
        let expired = before - state.pending.len();
        if expired > 0 {
            debug!(parent: self.span(), expired, "expired sends dropped");
        }
        state
            .pending
            .iter_mut()
            .filter_map(|p| p.claim().then(|| p.view().clone()))
            .collect()
    }

    /// Deliver one response to a pending send.
    ///
    /// A single send is completed and removed by its first response; a
    /// broadcast stays pending and keeps collecting. Returns whether the
    /// response reached a waiting caller. A response arriving after the
    /// send's deadline is dropped together with the record.
    pub fn respond(&self, send_id: Uuid, response: Option<Value>) -> bool {
        let mut state = self.lock();
        let Some(index) = state.pending.iter().position(|p| p.id() == send_id) else {
            debug!(parent: self.span(), %send_id, "response for unknown send dropped");
            return false;
        };
        if state.pending[index].view().is_expired(Instant::now()) {
            state.pending.remove(index);
            debug!(parent: self.span(), %send_id, "response after deadline dropped");
            return false;
        }
        match state.pending[index].deliver(response) {
            Delivery::Completed => {
                state.pending.remove(index);
                true
            }
            Delivery::Delivered => true,
            Delivery::Dropped => false,
        }
    }

    /// Complete a pending send with a fault and remove it.
    pub fn fault(&self, send_id: Uuid, error: SendError) -> bool {
        let Some(pending) = self.take_pending(send_id) else {
            return false;
        };
        debug!(parent: self.span(), %send_id, error = %error, "send faulted");
        pending.fail(error);
        true
    }

    /// Remove a pending send without a further response.
    ///
    /// A broadcast's collection ends with what it gathered so far; a single
    /// send keeps waiting until its own deadline or cancellation.
    pub fn complete(&self, send_id: Uuid) -> bool {
        self.take_pending(send_id).is_some()
    }

    /// Record that a send was bridged over `connection`.
    pub fn attach_connection(&self, send_id: Uuid, connection: &str) -> bool {
        let mut state = self.lock();
        match state.pending.iter_mut().find(|p| p.id() == send_id) {
            Some(pending) => {
                pending.attach(connection);
                true
            }
            None => false,
        }
    }

    /// Raise the connection-broken event, then fault every send bridged over
    /// that connection unless it ignores broken connections.
    ///
    /// Returns the number of sends faulted.
    pub fn report_connection_broken(&self, connection: &str, reason: &str) -> usize {
        warn!(parent: self.span(), connection, reason, "connection broken");
        self.raise_connection_broken(&ConnectionBroken {
            connection: connection.to_string(),
            reason: reason.to_string(),
        });

        let faulted: Vec<PendingSend> = {
            let mut state = self.lock();
            let ignore_by_default = state.defaults.ignore_broken_connections;
            let (faulted, kept) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|p: &PendingSend| {
                    p.depends_on(connection)
                        && !p
                            .view()
                            .request()
                            .ignore_broken_connections()
                            .unwrap_or(ignore_by_default)
                });
            state.pending = kept;
            faulted
        };

        let count = faulted.len();
        for pending in faulted {
            pending.fail(SendError::ConnectionBroken {
                connection: connection.to_string(),
                reason: reason.to_string(),
            });
        }
        count
    }

    // -- registrations -----------------------------------------------------

    /// Active registrations in registration order.
    pub fn active_registrations(&self) -> Vec<Arc<ActiveRegistration>> {
        self.lock().registrations.clone()
    }

    // -- events ------------------------------------------------------------

    pub fn raise_connection_broken(&self, event: &ConnectionBroken) {
        let handlers = self.lock().events.connection_broken.snapshot();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn raise_sending_request(&self, request: &Arc<Envelope>) {
        let handlers = self.lock().events.sending_request.snapshot();
        if handlers.is_empty() {
            return;
        }
        let event = MessageEvent {
            envelope: Arc::clone(request),
        };
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn raise_receiving_request(&self, request: &Arc<Envelope>) {
        let handlers = self.lock().events.receiving_request.snapshot();
        if handlers.is_empty() {
            return;
        }
        let event = MessageEvent {
            envelope: Arc::clone(request),
        };
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn raise_sending_response(&self, request: &Arc<Envelope>, response: &Arc<Envelope>) {
        let handlers = self.lock().events.sending_response.snapshot();
        if handlers.is_empty() {
            return;
        }
        let event = ResponseEvent {
            request: Arc::clone(request),
            response: Arc::clone(response),
        };
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn raise_receiving_response(&self, request: &Arc<Envelope>, response: &Arc<Envelope>) {
        let handlers = self.lock().events.receiving_response.snapshot();
        if handlers.is_empty() {
            return;
        }
        let event = ResponseEvent {
            request: Arc::clone(request),
            response: Arc::clone(response),
        };
        for handler in handlers {
            handler(&event);
        }
    }

    /// Run the processing-exception chain over `context`, in subscription
    /// order. Handlers may recover, replace the error or flip `forward`.
    pub fn raise_processing_exception(&self, context: &mut ProcessingException) {
        let handlers = self.lock().events.processing_exception.snapshot();
        for handler in handlers {
            handler(context);
        }
    }

    // -- crate-internal ----------------------------------------------------

    pub(crate) fn enqueue(
        &self,
        mut request: SendRequest,
        sink: ResponseSink,
    ) -> Result<Enqueued, BusError> {
        let envelope = Arc::new(Envelope::request(
            request.address.clone(),
            request.payload.take(),
            request.payload_type.map(str::to_string),
        ));
        let cancellation = request.cancellation.clone();
        let mode = request.mode;

        let mut state = self.lock();
        let wake = match &state.lifecycle {
            Lifecycle::Running(worker) => worker.waker(),
            Lifecycle::Faulted(_, fault) => return Err(BusError::Faulted(fault.clone())),
            Lifecycle::Stopped | Lifecycle::Starting => return Err(BusError::NotStarted),
        };

        let timeout = match mode {
            SendMode::Single => Some(
                request
                    .timeout
                    .unwrap_or(state.defaults.single_response_timeout),
            ),
            SendMode::Broadcast => Some(
                request
                    .timeout
                    .unwrap_or(state.defaults.broadcast_response_timeout),
            ),
            SendMode::FireAndForget | SendMode::Undefined => None,
        };

        let view = PendingSendView::new(envelope, request, timeout);
        let id = view.id();
        let deadline = view.deadline();
        debug!(
            parent: self.span(),
            send_id = %id,
            address = ?view.envelope().address(),
            ?mode,
            "send enqueued"
        );
        state.pending.push(PendingSend::new(view, sink));
        drop(state);

        wake.notify_one();
        Ok(Enqueued {
            id,
            timeout,
            deadline,
            cancellation,
        })
    }

    /// Drop a pending record whose awaitable went away.
    pub(crate) fn remove_pending(&self, send_id: Uuid) {
        self.take_pending(send_id);
    }

    fn take_pending(&self, send_id: Uuid) -> Option<PendingSend> {
        let mut state = self.lock();
        let index = state.pending.iter().position(|p| p.id() == send_id)?;
        Some(state.pending.remove(index))
    }

    /// Add a registration. Allowed before start; refused while the bus sits
    /// faulted, like sends.
    pub(crate) fn register(&self, registration: Arc<ActiveRegistration>) -> Result<(), BusError> {
        let mut state = self.lock();
        if let Lifecycle::Faulted(_, fault) = &state.lifecycle {
            return Err(BusError::Faulted(fault.clone()));
        }
        debug!(
            parent: self.span(),
            registration_id = %registration.id(),
            address = ?registration.address(),
            "receiver registered"
        );
        state.registrations.push(registration);
        if let Lifecycle::Running(worker) = &state.lifecycle {
            worker.wake();
        }
        Ok(())
    }

    /// Remove a registration by identity. No-op if it is not active.
    pub(crate) fn unregister(&self, registration_id: Uuid) -> bool {
        let mut state = self.lock();
        let before = state.registrations.len();
        state.registrations.retain(|r| r.id() != registration_id);
        let removed = state.registrations.len() != before;
        if removed {
            debug!(parent: self.span(), %registration_id, "receiver unregistered");
            if let Lifecycle::Running(worker) = &state.lifecycle {
                worker.wake();
            }
        }
        removed
    }

    /// Cancel every pending send and drop every registration.
    pub(crate) fn clear(&self) {
        let (pending, registrations) = {
            let mut state = self.lock();
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.registrations),
            )
        };
        debug!(
            parent: self.span(),
            cancelled = pending.len(),
            registrations = registrations.len(),
            "bus state cleared"
        );
        for pending in pending {
            pending.fail(SendError::Cancelled(CancelReason::BusStopped));
        }
    }

    /// Record a worker death and fault every pending send with it.
    ///
    /// Ignored when `generation` is not the running worker, which happens
    /// when a worker that was told to stop from its own thread faults after
    /// the bus was already restarted.
    pub(crate) fn fail_worker(&self, generation: u64, fault: PipelineFault) {
        let pending = {
            let mut state = self.lock();
            match std::mem::replace(&mut state.lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(worker) if worker.generation() == generation => {
                    state.lifecycle = Lifecycle::Faulted(worker, fault.clone());
                }
                other => {
                    state.lifecycle = other;
                    return;
                }
            }
            std::mem::take(&mut state.pending)
        };

        error!(
            parent: self.span(),
            error = %fault,
            pending = pending.len(),
            "worker faulted"
        );
        for pending in pending {
            pending.fail(SendError::Pipeline(fault.clone()));
        }
    }
}

impl fmt::Debug for BusControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BusControl")
            .field("running", &matches!(state.lifecycle, Lifecycle::Running(_)))
            .field("pending", &state.pending.len())
            .field("registrations", &state.registrations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{LocalBus, Resolver};
    use courier_types::{BusConfig, SendError};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::pipeline::{Pipeline, WorkUnit};
    use courier_types::CollaboratorError;

    /// Leaves every send untouched so tests drive the control plane by hand.
    #[derive(Default)]
    struct ManualPipeline;

    impl Pipeline for ManualPipeline {
        async fn do_work(&mut self, _unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    fn manual_bus() -> LocalBus {
        let bus = LocalBus::with_config(BusConfig {
            poll_interval_ms: 10,
            ..BusConfig::default()
        });
        let resolver = Resolver::new()
            .with_pipeline(ManualPipeline::default)
            .with_dispatcher(crate::local::InlineDispatcher::default)
            .with_router(crate::local::AddressRouter::default);
        bus.start(&resolver).unwrap();
        bus
    }

    #[tokio::test]
    async fn claim_hands_out_each_send_once() {
        let bus = manual_bus();
        let _a = bus.send().to_address("a").unwrap().as_single().unwrap();
        let _b = bus.send().to_address("b").unwrap().as_single().unwrap();

        let control = bus.control();
        let first = control.claim_pending_sends();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].envelope().address(), Some("a"));
        assert!(control.claim_pending_sends().is_empty());
        assert_eq!(control.pending_sends().len(), 2);
    }

    #[tokio::test]
    async fn respond_completes_single_send() {
        let bus = manual_bus();
        let pending = bus
            .send()
            .to_address("a")
            .unwrap()
            .with_response::<String>()
            .as_single()
            .unwrap();
        let id = pending.id();

        assert!(bus.control().respond(id, Some(json!("done"))));
        assert_eq!(pending.await.unwrap(), "done");
        assert!(!bus.control().respond(id, Some(json!("late"))));
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn complete_ends_broadcast_with_collected_responses() {
        let bus = manual_bus();
        let pending = bus
            .send()
            .to_address("a")
            .unwrap()
            .with_response::<u32>()
            .with_timeout(Duration::from_secs(5))
            .as_broadcast(None)
            .unwrap();
        let id = pending.id();

        assert!(bus.control().respond(id, Some(json!(1))));
        assert!(bus.control().respond(id, Some(json!(2))));
        assert!(bus.control().complete(id));
        assert_eq!(pending.await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn broken_connection_faults_attached_sends_only() {
        let bus = manual_bus();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on_connection_broken(move |event| {
            assert_eq!(event.connection, "tcp-1");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let attached = bus.send().to_address("a").unwrap().as_single().unwrap();
        let tolerant = bus
            .send()
            .to_address("a")
            .unwrap()
            .with_ignored_broken_connections(true)
            .with_timeout(Duration::from_millis(50))
            .as_single()
            .unwrap();
        let local = bus
            .send()
            .to_address("a")
            .unwrap()
            .with_timeout(Duration::from_millis(50))
            .as_single()
            .unwrap();

        let control = bus.control();
        assert!(control.attach_connection(attached.id(), "tcp-1"));
        assert!(control.attach_connection(tolerant.id(), "tcp-1"));

        assert_eq!(control.report_connection_broken("tcp-1", "reset by peer"), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        match attached.await.unwrap_err() {
            SendError::ConnectionBroken { connection, reason } => {
                assert_eq!(connection, "tcp-1");
                assert_eq!(reason, "reset by peer");
            }
            other => panic!("expected connection broken, got {other:?}"),
        }
        assert!(matches!(tolerant.await, Err(SendError::Timeout(_))));
        assert!(matches!(local.await, Err(SendError::Timeout(_))));
    }

    #[tokio::test]
    async fn response_after_deadline_is_dropped() {
        let bus = manual_bus();
        let pending = bus
            .send()
            .to_address("a")
            .unwrap()
            .with_timeout(Duration::from_millis(30))
            .as_single()
            .unwrap();
        let id = pending.id();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!bus.control().respond(id, Some(json!("late"))));
        assert_eq!(bus.pending_count(), 0);
        assert!(matches!(pending.await, Err(SendError::Timeout(_))));
    }

    #[tokio::test]
    async fn claim_drops_expired_records() {
        let bus = manual_bus();
        let _expiring = bus
            .send()
            .to_address("a")
            .unwrap()
            .with_timeout(Duration::from_millis(20))
            .as_single()
            .unwrap();
        let _alive = bus
            .send()
            .to_address("b")
            .unwrap()
            .with_timeout(Duration::from_secs(30))
            .as_single()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let claimed = bus.control().claim_pending_sends();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].envelope().address(), Some("b"));
        assert_eq!(bus.pending_count(), 1);
    }

    #[tokio::test]
    async fn dropped_awaitable_removes_record() {
        let bus = manual_bus();
        let pending = bus.send().to_address("a").unwrap().as_single().unwrap();
        assert_eq!(bus.pending_count(), 1);
        drop(pending);
        assert_eq!(bus.pending_count(), 0);
    }
}
