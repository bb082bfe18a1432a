//! The bus core: state owner, lifecycle and user-facing configuration.
//!
//! `LocalBus` owns one mutex-guarded `BusState` holding the pending-send
//! list, the active-registration list, the default policies, the event
//! handler chains and the worker lifecycle. Nothing holds the lock across
//! an await or a blocking wait; the worker and pipelines reach the state
//! only through [`BusControl`].

mod control;
mod events;
mod pending;
mod worker;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_types::{
    BusConfig, BusError, ConnectionBroken, MessageEvent, PipelineFault, ProcessingException,
    ResponseEvent, WorkerConfig,
};
use tracing::{error, info};

use crate::exception::{ReceiveExceptionHandler, SendExceptionHandler};
use crate::pipeline::Resolver;
use crate::receive::{ActiveRegistration, ReceiverRegistration};
use crate::send::SendOperation;

pub use control::BusControl;
pub use events::HandlerId;
pub use pending::PendingSendView;

pub(crate) use pending::ResponseSink;
pub(crate) use worker::panic_message;

use events::EventHandlers;
use pending::PendingSend;
use worker::WorkerHandle;

// ---------------------------------------------------------------------------
// Default policies
// ---------------------------------------------------------------------------

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Snapshot of the bus-wide default policies.
///
/// Per-send and per-registration settings override these; a `None` on the
/// operation defers to the value here at the time the send is processed.
#[derive(Clone)]
pub struct BusDefaults {
    pub single_response_timeout: Duration,
    pub broadcast_response_timeout: Duration,
    pub send_to_global: bool,
    pub ignore_broken_connections: bool,
    pub forward_send_exceptions: bool,
    pub forward_receive_exceptions: bool,
    pub send_exception_handler: Option<SendExceptionHandler>,
    pub receive_exception_handler: Option<ReceiveExceptionHandler>,
    pub poll_interval: Duration,
}

impl BusDefaults {
    pub fn from_config(config: &BusConfig) -> Self {
        Self {
            single_response_timeout: config.single_response_timeout(),
            broadcast_response_timeout: config.broadcast_response_timeout(),
            send_to_global: config.send_to_global,
            ignore_broken_connections: config.ignore_broken_connections,
            forward_send_exceptions: config.forward_send_exceptions,
            forward_receive_exceptions: config.forward_receive_exceptions,
            send_exception_handler: None,
            receive_exception_handler: None,
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
        }
    }
}

impl Default for BusDefaults {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}

impl fmt::Debug for BusDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusDefaults")
            .field("single_response_timeout", &self.single_response_timeout)
            .field("broadcast_response_timeout", &self.broadcast_response_timeout)
            .field("send_to_global", &self.send_to_global)
            .field("ignore_broken_connections", &self.ignore_broken_connections)
            .field("forward_send_exceptions", &self.forward_send_exceptions)
            .field("forward_receive_exceptions", &self.forward_receive_exceptions)
            .field(
                "send_exception_handler",
                &self.send_exception_handler.as_ref().map(|_| "<handler>"),
            )
            .field(
                "receive_exception_handler",
                &self.receive_exception_handler.as_ref().map(|_| "<handler>"),
            )
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Worker lifecycle as seen from the bus.
pub(crate) enum Lifecycle {
    Stopped,
    /// A `start` call is resolving and initializing collaborators.
    Starting,
    Running(WorkerHandle),
    /// The worker died; the fault is re-raised on enqueue until restart.
    Faulted(WorkerHandle, PipelineFault),
}

pub(crate) struct BusState {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) defaults: BusDefaults,
    pub(crate) worker: WorkerConfig,
    pub(crate) pending: Vec<PendingSend>,
    pub(crate) registrations: Vec<Arc<ActiveRegistration>>,
    pub(crate) events: EventHandlers,
    next_generation: u64,
    /// A `stop` arrived while a `start` was still initializing.
    stop_requested: bool,
}

pub(crate) struct BusInner {
    pub(crate) state: Mutex<BusState>,
    pub(crate) span: tracing::Span,
}

// ---------------------------------------------------------------------------
// LocalBus
// ---------------------------------------------------------------------------

/// An in-process message bus with one dedicated worker.
///
/// Dropping the bus stops it.
///
/// ```no_run
/// use courier_core::{LocalBus, Resolver};
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = LocalBus::new();
/// bus.start(&Resolver::local())?;
///
/// let _ping = bus
///     .receive()
///     .at_address("ping")?
///     .by(|_| async { Ok(Some(json!("pong"))) })?;
///
/// let reply: String = bus
///     .send()
///     .to_address("ping")?
///     .with_response::<String>()
///     .as_single()?
///     .await?;
/// assert_eq!(reply, "pong");
/// # Ok(())
/// # }
/// ```
pub struct LocalBus {
    control: BusControl,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let span = tracing::info_span!("courier.bus", name = %config.worker.name);
        let state = BusState {
            lifecycle: Lifecycle::Stopped,
            defaults: BusDefaults::from_config(&config),
            worker: config.worker,
            pending: Vec::new(),
            registrations: Vec::new(),
            events: EventHandlers::default(),
            next_generation: 0,
            stop_requested: false,
        };
        Self {
            control: BusControl::new(BusInner {
                state: Mutex::new(state),
                span,
            }),
        }
    }

    /// Start the worker.
    ///
    /// Blocks until the worker has resolved and initialized its
    /// collaborators. Exactly one of several concurrent calls succeeds;
    /// the others fail with [`BusError::AlreadyStarted`]. A faulted bus
    /// may be started again.
    pub fn start(&self, resolver: &Resolver) -> Result<(), BusError> {
        let (generation, previous, worker_config) = {
            let mut state = self.control.lock();
            let previous = match std::mem::replace(&mut state.lifecycle, Lifecycle::Starting) {
                Lifecycle::Stopped => None,
                Lifecycle::Faulted(worker, _) => Some(worker),
                running @ (Lifecycle::Starting | Lifecycle::Running(_)) => {
                    state.lifecycle = running;
                    return Err(BusError::AlreadyStarted);
                }
            };
            state.next_generation += 1;
            state.stop_requested = false;
            (state.next_generation, previous, state.worker.clone())
        };

        // Reap the worker of a previous faulted run
        if let Some(worker) = previous {
            worker.shutdown();
        }

        match worker::spawn(self.control.clone(), resolver.clone(), &worker_config, generation) {
            Ok(worker) => {
                let stopped_early = {
                    let mut state = self.control.lock();
                    if std::mem::take(&mut state.stop_requested) {
                        state.lifecycle = Lifecycle::Stopped;
                        Some(worker)
                    } else {
                        state.lifecycle = Lifecycle::Running(worker);
                        None
                    }
                };
                if let Some(worker) = stopped_early {
                    info!(parent: self.control.span(), generation, "stopped while starting");
                    worker.shutdown();
                    self.control.clear();
                } else {
                    info!(parent: self.control.span(), generation, "bus started");
                }
                Ok(())
            }
            Err(e) => {
                error!(parent: self.control.span(), error = %e, "bus startup failed");
                self.control.lock().lifecycle = Lifecycle::Stopped;
                self.control.clear();
                Err(e)
            }
        }
    }

    /// Stop the worker, cancel every pending send and drop all registrations.
    ///
    /// Idempotent. Called from a bus event handler or a receiver (that is,
    /// on the worker itself) it signals the worker without waiting for it.
    /// Called while a `start` is initializing, it is carried out by that
    /// `start` once the worker is up.
    pub fn stop(&self) {
        let worker = {
            let mut state = self.control.lock();
            match std::mem::replace(&mut state.lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(worker) | Lifecycle::Faulted(worker, _) => worker,
                Lifecycle::Starting => {
                    state.lifecycle = Lifecycle::Starting;
                    state.stop_requested = true;
                    return;
                }
                other => {
                    state.lifecycle = other;
                    return;
                }
            }
        };

        info!(parent: self.control.span(), "stopping bus");
        worker.shutdown();
        self.control.clear();
    }

    /// Whether a worker is running. A faulted bus is not started.
    pub fn is_started(&self) -> bool {
        matches!(self.control.lock().lifecycle, Lifecycle::Running(_))
    }

    /// The fault that killed the worker, if the bus is faulted.
    pub fn fault(&self) -> Option<PipelineFault> {
        match &self.control.lock().lifecycle {
            Lifecycle::Faulted(_, fault) => Some(fault.clone()),
            _ => None,
        }
    }

    /// Begin configuring an outgoing message.
    pub fn send(&self) -> SendOperation {
        SendOperation::new(self.control.clone())
    }

    /// Begin configuring a subscription.
    pub fn receive(&self) -> ReceiverRegistration {
        ReceiverRegistration::new(self.control.clone())
    }

    /// Wake the worker now instead of at the next poll tick.
    pub fn signal_work_available(&self) -> Result<(), BusError> {
        self.control.signal_work_available()
    }

    /// The collaborator-facing surface of this bus.
    pub fn control(&self) -> &BusControl {
        &self.control
    }

    pub fn pending_count(&self) -> usize {
        self.control.lock().pending.len()
    }

    pub fn registration_count(&self) -> usize {
        self.control.lock().registrations.len()
    }

    // -- default policies --------------------------------------------------

    pub fn defaults(&self) -> BusDefaults {
        self.control.defaults()
    }

    pub fn single_response_timeout(&self) -> Duration {
        self.control.lock().defaults.single_response_timeout
    }

    pub fn set_single_response_timeout(&self, timeout: Duration) {
        self.control.lock().defaults.single_response_timeout = timeout;
    }

    pub fn broadcast_response_timeout(&self) -> Duration {
        self.control.lock().defaults.broadcast_response_timeout
    }

    pub fn set_broadcast_response_timeout(&self, timeout: Duration) {
        self.control.lock().defaults.broadcast_response_timeout = timeout;
    }

    pub fn send_to_global(&self) -> bool {
        self.control.lock().defaults.send_to_global
    }

    pub fn set_send_to_global(&self, global: bool) {
        self.control.lock().defaults.send_to_global = global;
    }

    pub fn ignore_broken_connections(&self) -> bool {
        self.control.lock().defaults.ignore_broken_connections
    }

    pub fn set_ignore_broken_connections(&self, ignore: bool) {
        self.control.lock().defaults.ignore_broken_connections = ignore;
    }

    pub fn forward_send_exceptions(&self) -> bool {
        self.control.lock().defaults.forward_send_exceptions
    }

    pub fn set_forward_send_exceptions(&self, forward: bool) {
        self.control.lock().defaults.forward_send_exceptions = forward;
    }

    pub fn forward_receive_exceptions(&self) -> bool {
        self.control.lock().defaults.forward_receive_exceptions
    }

    pub fn set_forward_receive_exceptions(&self, forward: bool) {
        self.control.lock().defaults.forward_receive_exceptions = forward;
    }

    pub fn send_exception_handler(&self) -> Option<SendExceptionHandler> {
        self.control.lock().defaults.send_exception_handler.clone()
    }

    pub fn set_send_exception_handler(&self, handler: Option<SendExceptionHandler>) {
        self.control.lock().defaults.send_exception_handler = handler;
    }

    pub fn receive_exception_handler(&self) -> Option<ReceiveExceptionHandler> {
        self.control.lock().defaults.receive_exception_handler.clone()
    }

    pub fn set_receive_exception_handler(&self, handler: Option<ReceiveExceptionHandler>) {
        self.control.lock().defaults.receive_exception_handler = handler;
    }

    /// Upper bound between two worker wakes; re-read on every iteration.
    pub fn poll_interval(&self) -> Duration {
        self.control.lock().defaults.poll_interval
    }

    /// Clamped to at least one millisecond so the worker never spins.
    pub fn set_poll_interval(&self, interval: Duration) {
        self.control.lock().defaults.poll_interval = interval.max(MIN_POLL_INTERVAL);
    }

    // -- events ------------------------------------------------------------

    pub fn on_connection_broken<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ConnectionBroken) + Send + Sync + 'static,
    {
        let mut state = self.control.lock();
        let id = state.events.next_id();
        state.events.connection_broken.push(id, Arc::new(handler));
        id
    }

    pub fn on_sending_request<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        let mut state = self.control.lock();
        let id = state.events.next_id();
        state.events.sending_request.push(id, Arc::new(handler));
        id
    }

    pub fn on_receiving_request<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        let mut state = self.control.lock();
        let id = state.events.next_id();
        state.events.receiving_request.push(id, Arc::new(handler));
        id
    }

    pub fn on_sending_response<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ResponseEvent) + Send + Sync + 'static,
    {
        let mut state = self.control.lock();
        let id = state.events.next_id();
        state.events.sending_response.push(id, Arc::new(handler));
        id
    }

    pub fn on_receiving_response<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ResponseEvent) + Send + Sync + 'static,
    {
        let mut state = self.control.lock();
        let id = state.events.next_id();
        state.events.receiving_response.push(id, Arc::new(handler));
        id
    }

    /// Subscribe to receiver failures.
    ///
    /// Handlers run in subscription order, each seeing the previous one's
    /// edits to the context; whatever the last handler leaves decides the
    /// outcome.
    pub fn on_processing_exception<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut ProcessingException) + Send + Sync + 'static,
    {
        let mut state = self.control.lock();
        let id = state.events.next_id();
        state.events.processing_exception.push(id, Arc::new(handler));
        id
    }

    /// Detach a handler. Returns `false` if it was not subscribed.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.control.lock().events.remove(id)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalBus {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.control.lock();
        let lifecycle = match &state.lifecycle {
            Lifecycle::Stopped => "stopped",
            Lifecycle::Starting => "starting",
            Lifecycle::Running(_) => "running",
            Lifecycle::Faulted(..) => "faulted",
        };
        f.debug_struct("LocalBus")
            .field("lifecycle", &lifecycle)
            .field("pending", &state.pending.len())
            .field("registrations", &state.registrations.len())
            .field("defaults", &state.defaults)
            .field("events", &state.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, WorkUnit};
    use courier_types::{CancelReason, CollaboratorError, SendError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_bus() -> LocalBus {
        let bus = LocalBus::with_config(BusConfig {
            poll_interval_ms: 10,
            ..BusConfig::default()
        });
        bus.start(&Resolver::local()).unwrap();
        bus
    }

    /// Pipeline that never answers anything.
    #[derive(Default)]
    struct IdlePipeline;

    impl Pipeline for IdlePipeline {
        async fn do_work(&mut self, _unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    /// Pipeline that fails its first iteration that sees pending work.
    #[derive(Default)]
    struct FaultingPipeline;

    impl Pipeline for FaultingPipeline {
        async fn do_work(&mut self, unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
            if unit.bus.pending_sends().len() >= 3 {
                return Err(CollaboratorError::new("router exploded"));
            }
            Ok(())
        }
    }

    fn resolver_with<P: Pipeline + Default>() -> Resolver {
        Resolver::new()
            .with_pipeline(P::default)
            .with_dispatcher(crate::local::InlineDispatcher::default)
            .with_router(crate::local::AddressRouter::default)
    }

    #[test]
    fn double_start_fails() {
        let bus = fast_bus();
        let err = bus.start(&Resolver::local()).unwrap_err();
        assert!(matches!(err, BusError::AlreadyStarted));
        assert!(bus.is_started());
    }

    #[test]
    fn stop_on_never_started_bus_is_noop() {
        let bus = LocalBus::new();
        bus.stop();
        bus.stop();
        assert!(!bus.is_started());
    }

    #[test]
    fn start_stop_start_round_trip() {
        let bus = fast_bus();
        bus.stop();
        assert!(!bus.is_started());
        bus.start(&Resolver::local()).unwrap();
        assert!(bus.is_started());
        bus.stop();
    }

    #[test]
    fn concurrent_start_has_one_winner() {
        let bus = Arc::new(LocalBus::new());
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bus = Arc::clone(&bus);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if bus.start(&Resolver::local()).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        bus.stop();
    }

    #[test]
    fn missing_pipeline_fails_startup() {
        let bus = LocalBus::new();
        let resolver = Resolver::new()
            .with_dispatcher(crate::local::InlineDispatcher::default)
            .with_router(crate::local::AddressRouter::default);
        let err = bus.start(&resolver).unwrap_err();
        assert!(matches!(err, BusError::MissingCollaborator("pipeline")));
        assert!(!bus.is_started());
    }

    #[test]
    fn ambiguous_router_fails_startup() {
        let bus = LocalBus::new();
        let resolver = Resolver::local().with_router(crate::local::AddressRouter::default);
        let err = bus.start(&resolver).unwrap_err();
        assert!(matches!(
            err,
            BusError::AmbiguousCollaborator {
                kind: "router",
                count: 2
            }
        ));
    }

    #[test]
    fn signal_requires_started_bus() {
        let bus = LocalBus::new();
        assert!(matches!(
            bus.signal_work_available(),
            Err(BusError::NotStarted)
        ));
        bus.start(&Resolver::local()).unwrap();
        assert!(bus.signal_work_available().is_ok());
    }

    #[test]
    fn default_policies_round_trip() {
        let bus = LocalBus::new();
        bus.set_single_response_timeout(Duration::from_millis(1200));
        bus.set_send_to_global(true);
        bus.set_forward_receive_exceptions(false);
        bus.set_poll_interval(Duration::from_millis(5));

        assert_eq!(bus.single_response_timeout(), Duration::from_millis(1200));
        assert!(bus.send_to_global());
        assert!(!bus.forward_receive_exceptions());
        assert!(bus.forward_send_exceptions());
        assert_eq!(bus.defaults().poll_interval, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn stop_cancels_every_pending_send() {
        let bus = LocalBus::new();
        bus.start(&resolver_with::<IdlePipeline>()).unwrap();

        let pending: Vec<_> = (0..3)
            .map(|_| {
                bus.send()
                    .to_address("nowhere")
                    .unwrap()
                    .as_single()
                    .unwrap()
            })
            .collect();
        assert_eq!(bus.pending_count(), 3);

        bus.stop();
        assert_eq!(bus.pending_count(), 0);
        for send in pending {
            let err = send.await.unwrap_err();
            assert!(matches!(err, SendError::Cancelled(CancelReason::BusStopped)));
        }
    }

    #[tokio::test]
    async fn pipeline_fault_faults_every_pending_send() {
        let bus = LocalBus::with_config(BusConfig {
            poll_interval_ms: 10,
            ..BusConfig::default()
        });
        bus.start(&resolver_with::<FaultingPipeline>()).unwrap();

        let pending: Vec<_> = (0..3)
            .map(|_| {
                bus.send()
                    .to_address("nowhere")
                    .unwrap()
                    .as_single()
                    .unwrap()
            })
            .collect();

        for send in pending {
            let err = send.await.unwrap_err();
            match err {
                SendError::Pipeline(fault) => assert!(fault.message().contains("router exploded")),
                other => panic!("expected pipeline fault, got {other:?}"),
            }
        }

        assert!(!bus.is_started());
        assert!(bus.fault().is_some());

        // Enqueue on a faulted bus re-raises the fault
        let err = bus.send().as_fire_and_forget().unwrap_err();
        assert!(matches!(err, BusError::Faulted(_)));

        // A faulted bus can be restarted
        bus.start(&Resolver::local()).unwrap();
        assert!(bus.is_started());
        assert!(bus.fault().is_none());
    }

    #[tokio::test]
    async fn stop_from_event_handler_does_not_deadlock() {
        let bus = Arc::new(fast_bus());
        let weak = Arc::downgrade(&bus);
        bus.on_sending_request(move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.stop();
            }
        });

        let send = bus
            .send()
            .to_address("anywhere")
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .as_single()
            .unwrap();
        let err = send.await.unwrap_err();
        assert!(matches!(err, SendError::Cancelled(CancelReason::BusStopped)));
        assert!(!bus.is_started());
    }

    #[test]
    fn registrations_survive_until_stop() {
        let bus = fast_bus();
        let _sub = bus
            .receive()
            .at_address("a")
            .unwrap()
            .by(|_| async { Ok(None) })
            .unwrap();
        assert_eq!(bus.registration_count(), 1);
        bus.stop();
        assert_eq!(bus.registration_count(), 0);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let bus = LocalBus::with_config(BusConfig {
            poll_interval_ms: 0,
            ..BusConfig::default()
        });
        assert_eq!(bus.poll_interval(), MIN_POLL_INTERVAL);

        bus.set_poll_interval(Duration::ZERO);
        assert_eq!(bus.poll_interval(), MIN_POLL_INTERVAL);
        bus.set_poll_interval(Duration::from_millis(7));
        assert_eq!(bus.poll_interval(), Duration::from_millis(7));
    }

    /// Pipeline that stops its bus while the bus is still starting.
    struct StopDuringInit(std::sync::Weak<LocalBus>);

    impl Pipeline for StopDuringInit {
        fn initialize(
            &mut self,
            _ctx: &crate::pipeline::InitContext<'_>,
        ) -> Result<(), CollaboratorError> {
            if let Some(bus) = self.0.upgrade() {
                bus.stop();
            }
            Ok(())
        }

        async fn do_work(&mut self, _unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    #[test]
    fn stop_during_start_leaves_bus_stopped() {
        let bus = Arc::new(LocalBus::new());
        let _sub = bus
            .receive()
            .at_address("a")
            .unwrap()
            .by(|_| async { Ok(None) })
            .unwrap();

        let weak = Arc::downgrade(&bus);
        let resolver = Resolver::new()
            .with_pipeline(move || StopDuringInit(weak.clone()))
            .with_dispatcher(crate::local::InlineDispatcher::default)
            .with_router(crate::local::AddressRouter::default);

        bus.start(&resolver).unwrap();
        assert!(!bus.is_started());
        assert_eq!(bus.registration_count(), 0);

        // The stop request does not leak into the next start
        bus.start(&Resolver::local()).unwrap();
        assert!(bus.is_started());
    }

    #[test]
    fn remove_handler_detaches() {
        let bus = LocalBus::new();
        let id = bus.on_connection_broken(|_| {});
        assert!(bus.remove_handler(id));
        assert!(!bus.remove_handler(id));
    }
}
