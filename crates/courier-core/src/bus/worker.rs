//! The dedicated worker thread of a started bus.
//!
//! Each started bus owns one OS thread running a current-thread tokio
//! runtime. The thread resolves and initializes the collaborators, reports
//! the outcome back to `start`, then loops: wait for a wake (signal, poll
//! tick or stop), run one pipeline iteration, repeat. A failing or panicking
//! iteration faults the bus. Teardown unloads every collaborator
//! independently of the others' failures.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use courier_types::{BusError, CollaboratorError, PipelineFault, WorkerConfig};
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::BusControl;
use crate::pipeline::{
    BoxDispatcher, BoxPipeline, Connection, ConnectionManager, InitContext, Resolver, Router,
    WorkUnit,
};

/// The bus's handle on a running worker thread.
pub(crate) struct WorkerHandle {
    generation: u64,
    stop: CancellationToken,
    wake: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    exited: mpsc::Receiver<()>,
    stop_timeout: Duration,
}

impl WorkerHandle {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Ask the worker to stop and wait for it, bounded by the stop timeout.
    ///
    /// On the worker thread itself this only signals: the loop exits once
    /// the current iteration returns.
    pub(crate) fn shutdown(mut self) {
        self.stop.cancel();

        if thread::current().id() == self.thread_id {
            debug!("stop requested from the worker thread, not waiting");
            return;
        }

        match self.exited.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!("worker thread panicked during teardown");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout = ?self.stop_timeout,
                    "worker did not stop in time, detaching it"
                );
            }
        }
    }
}

/// Spawn the worker thread and wait for it to finish initialization.
pub(crate) fn spawn(
    bus: BusControl,
    resolver: Resolver,
    config: &WorkerConfig,
    generation: u64,
) -> Result<WorkerHandle, BusError> {
    let stop = CancellationToken::new();
    let wake = Arc::new(Notify::new());
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), BusError>>(1);
    let (exited_tx, exited_rx) = mpsc::channel::<()>();

    let worker = Worker {
        bus,
        resolver,
        stop: stop.clone(),
        wake: Arc::clone(&wake),
        generation,
    };

    let mut builder = thread::Builder::new().name(config.name.clone());
    if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
    }
    let thread = builder
        .spawn(move || {
            let _exit = ExitNotice(exited_tx);
            worker.run(ready_tx);
        })
        .map_err(|e| BusError::Startup(format!("cannot spawn worker thread: {e}")))?;
    let thread_id = thread.thread().id();

    let ready = ready_rx.recv().unwrap_or_else(|_| {
        Err(BusError::Startup(
            "worker exited before reporting readiness".to_string(),
        ))
    });
    if let Err(e) = ready {
        if thread.join().is_err() {
            warn!("worker thread panicked during startup");
        }
        return Err(e);
    }

    Ok(WorkerHandle {
        generation,
        stop,
        wake,
        thread: Some(thread),
        thread_id,
        exited: exited_rx,
        stop_timeout: config.stop_timeout(),
    })
}

/// Sends the exit notice however the thread ends, panics included.
struct ExitNotice(mpsc::Sender<()>);

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    bus: BusControl,
    resolver: Resolver,
    stop: CancellationToken,
    wake: Arc<Notify>,
    generation: u64,
}

impl Worker {
    fn run(self, ready: SyncSender<Result<(), BusError>>) {
        let span = self.bus.span().clone();
        let _entered = span.enter();

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = ready.send(Err(BusError::Startup(format!(
                    "cannot build worker runtime: {e}"
                ))));
                return;
            }
        };
        let _runtime_guard = runtime.enter();

        let mut collaborators = match Collaborators::resolve(&self.resolver) {
            Ok(collaborators) => collaborators,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let ctx = InitContext::new(&self.resolver, &self.bus, &span);
        if let Err(e) = collaborators.initialize(&ctx) {
            collaborators.unload();
            let _ = ready.send(Err(e));
            return;
        }

        let _ = ready.send(Ok(()));
        info!(generation = self.generation, "worker running");

        runtime.block_on(self.run_loop(&mut collaborators));

        collaborators.unload();
        info!(generation = self.generation, "worker stopped");
    }

    async fn run_loop(&self, collaborators: &mut Collaborators) {
        loop {
            let poll_interval = self.bus.poll_interval();
            let was_signaled = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = self.wake.notified() => true,
                _ = tokio::time::sleep(poll_interval) => false,
            };

            if !was_signaled {
                // Consume a signal that raced with the poll tick
                let _ = self.wake.notified().now_or_never();
            }
            if self.stop.is_cancelled() {
                break;
            }

            let unit = WorkUnit {
                bus: &self.bus,
                router: collaborators.router.as_ref(),
                dispatcher: &mut collaborators.dispatcher,
                connections: &mut collaborators.connections,
                was_signaled,
            };
            let outcome = AssertUnwindSafe(collaborators.pipeline.do_work(unit))
                .catch_unwind()
                .await;

            let fault = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => PipelineFault::new(e.to_string()),
                Err(panic) => PipelineFault::new(panic_message(panic.as_ref())),
            };
            error!(error = %fault, "pipeline iteration failed");
            self.bus.fail_worker(self.generation, fault);
            break;
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// How far initialization got, so a partial start unloads only what it
/// initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    None,
    ConnectionManager,
    Router,
    Dispatcher,
    Pipeline,
}

struct Collaborators {
    pipeline: BoxPipeline,
    dispatcher: BoxDispatcher,
    router: Box<dyn Router>,
    connection_manager: Option<Box<dyn ConnectionManager>>,
    connections: Vec<Box<dyn Connection>>,
    stage: Stage,
}

impl Collaborators {
    fn resolve(resolver: &Resolver) -> Result<Self, BusError> {
        Ok(Self {
            pipeline: exactly_one(resolver.resolve_pipelines(), "pipeline")?,
            dispatcher: exactly_one(resolver.resolve_dispatchers(), "dispatcher")?,
            router: exactly_one(resolver.resolve_routers(), "router")?,
            connection_manager: at_most_one(
                resolver.resolve_connection_managers(),
                "connection manager",
            )?,
            connections: resolver.resolve_connections(),
            stage: Stage::None,
        })
    }

    /// Initialize in order: connection manager, router, dispatcher, pipeline.
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), BusError> {
        let startup = |kind: &str, e: CollaboratorError| {
            BusError::Startup(format!("{kind} failed to initialize: {e}"))
        };

        if let Some(manager) = self.connection_manager.as_mut() {
            manager
                .initialize(ctx)
                .map_err(|e| startup("connection manager", e))?;
        }
        self.stage = Stage::ConnectionManager;

        self.router
            .initialize(ctx)
            .map_err(|e| startup("router", e))?;
        self.stage = Stage::Router;

        self.dispatcher
            .initialize(ctx)
            .map_err(|e| startup("dispatcher", e))?;
        self.stage = Stage::Dispatcher;

        self.pipeline
            .initialize(ctx)
            .map_err(|e| startup("pipeline", e))?;
        self.stage = Stage::Pipeline;

        debug!(connections = self.connections.len(), "collaborators initialized");
        Ok(())
    }

    /// Unload in reverse order, then every connection. Each step runs even
    /// if an earlier one failed.
    fn unload(&mut self) {
        if self.stage >= Stage::Pipeline {
            log_unload("pipeline", self.pipeline.unload());
        }
        if self.stage >= Stage::Dispatcher {
            log_unload("dispatcher", self.dispatcher.unload());
        }
        if self.stage >= Stage::Router {
            log_unload("router", self.router.unload());
        }
        if self.stage >= Stage::ConnectionManager {
            if let Some(manager) = self.connection_manager.as_mut() {
                log_unload("connection manager", manager.unload());
            }
        }
        for connection in &mut self.connections {
            let name = connection.name().to_string();
            if let Err(e) = connection.unload() {
                warn!(connection = %name, error = %e, "connection failed to unload");
            }
        }
        self.stage = Stage::None;
    }
}

fn log_unload(kind: &str, result: Result<(), CollaboratorError>) {
    if let Err(e) = result {
        warn!(collaborator = kind, error = %e, "collaborator failed to unload");
    }
}

fn exactly_one<T>(mut found: Vec<T>, kind: &'static str) -> Result<T, BusError> {
    match found.len() {
        0 => Err(BusError::MissingCollaborator(kind)),
        1 => Ok(found.remove(0)),
        count => Err(BusError::AmbiguousCollaborator { kind, count }),
    }
}

fn at_most_one<T>(mut found: Vec<T>, kind: &'static str) -> Result<Option<T>, BusError> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(Some(found.remove(0))),
        count => Err(BusError::AmbiguousCollaborator { kind, count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalBus;
    use crate::local::{AddressRouter, InlineDispatcher, LocalPipeline};
    use crate::pipeline::Pipeline;
    use courier_types::BusConfig;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Router that records its lifecycle calls.
    struct RecordingRouter {
        log: Log,
        fail_init: bool,
    }

    impl Router for RecordingRouter {
        fn initialize(&mut self, _ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
            self.log.lock().unwrap().push("router.init".into());
            if self.fail_init {
                return Err(CollaboratorError::new("no routes"));
            }
            Ok(())
        }

        fn route(
            &self,
            send: &crate::bus::PendingSendView,
            registrations: &[Arc<crate::receive::ActiveRegistration>],
        ) -> Vec<Arc<crate::receive::ActiveRegistration>> {
            AddressRouter.route(send, registrations)
        }

        fn unload(&mut self) -> Result<(), CollaboratorError> {
            self.log.lock().unwrap().push("router.unload".into());
            Err(CollaboratorError::new("unload failure is tolerated"))
        }
    }

    struct RecordingManager(Log);

    impl ConnectionManager for RecordingManager {
        fn initialize(&mut self, _ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
            self.0.lock().unwrap().push("manager.init".into());
            Ok(())
        }

        fn unload(&mut self) -> Result<(), CollaboratorError> {
            self.0.lock().unwrap().push("manager.unload".into());
            Ok(())
        }
    }

    struct RecordingConnection(Log);

    impl Connection for RecordingConnection {
        fn name(&self) -> &str {
            "recording"
        }

        fn forward(
            &mut self,
            _request: &courier_types::Envelope,
        ) -> Result<(), courier_types::ConnectionError> {
            Ok(())
        }

        fn unload(&mut self) -> Result<(), CollaboratorError> {
            self.0.lock().unwrap().push("connection.unload".into());
            Ok(())
        }
    }

    struct RecordingPipeline {
        log: Log,
        signaled: Arc<AtomicBool>,
        polled: Arc<AtomicUsize>,
    }

    impl Pipeline for RecordingPipeline {
        fn initialize(&mut self, _ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
            self.log.lock().unwrap().push("pipeline.init".into());
            Ok(())
        }

        async fn do_work(&mut self, unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
            if unit.was_signaled {
                self.signaled.store(true, Ordering::SeqCst);
            } else {
                self.polled.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn unload(&mut self) -> Result<(), CollaboratorError> {
            self.log.lock().unwrap().push("pipeline.unload".into());
            Ok(())
        }
    }

    fn recording_resolver(log: &Log, fail_router: bool) -> Resolver {
        let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
        Resolver::new()
            .with_pipeline(move || RecordingPipeline {
                log: a.clone(),
                signaled: Arc::new(AtomicBool::new(false)),
                polled: Arc::new(AtomicUsize::new(0)),
            })
            .with_dispatcher(InlineDispatcher::default)
            .with_router(move || RecordingRouter {
                log: b.clone(),
                fail_init: fail_router,
            })
            .with_connection_manager(move || RecordingManager(c.clone()))
            .with_connection(move || RecordingConnection(d.clone()))
    }

    #[test]
    fn lifecycle_order_and_best_effort_unload() {
        let log: Log = Arc::default();
        let bus = LocalBus::new();
        bus.start(&recording_resolver(&log, false)).unwrap();
        bus.stop();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "manager.init",
                "router.init",
                "pipeline.init",
                "pipeline.unload",
                "router.unload",
                "manager.unload",
                "connection.unload",
            ]
        );
    }

    #[test]
    fn failed_initialization_unloads_what_was_initialized() {
        let log: Log = Arc::default();
        let bus = LocalBus::new();
        let err = bus.start(&recording_resolver(&log, true)).unwrap_err();
        assert!(matches!(err, BusError::Startup(ref m) if m.contains("router")));
        assert!(!bus.is_started());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "manager.init",
                "router.init",
                "manager.unload",
                "connection.unload",
            ]
        );
    }

    #[test]
    fn pipeline_sees_signaled_and_polled_wakes() {
        let signaled = Arc::new(AtomicBool::new(false));
        let polled = Arc::new(AtomicUsize::new(0));
        let (s, p) = (signaled.clone(), polled.clone());
        let resolver = Resolver::new()
            .with_pipeline(move || RecordingPipeline {
                log: Arc::default(),
                signaled: s.clone(),
                polled: p.clone(),
            })
            .with_dispatcher(InlineDispatcher::default)
            .with_router(AddressRouter::default);

        let bus = LocalBus::with_config(BusConfig {
            poll_interval_ms: 5,
            ..BusConfig::default()
        });
        bus.start(&resolver).unwrap();
        bus.signal_work_available().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        bus.stop();

        assert!(signaled.load(Ordering::SeqCst));
        assert!(polled.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn panicking_pipeline_faults_the_bus() {
        #[derive(Default)]
        struct Panicking;

        impl Pipeline for Panicking {
            async fn do_work(&mut self, _unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
                panic!("pipeline blew up");
            }
        }

        let bus = LocalBus::with_config(BusConfig {
            poll_interval_ms: 5,
            ..BusConfig::default()
        });
        let resolver = Resolver::new()
            .with_pipeline(Panicking::default)
            .with_dispatcher(InlineDispatcher::default)
            .with_router(AddressRouter::default);
        bus.start(&resolver).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let fault = bus.fault().expect("bus should be faulted");
        assert!(fault.message().contains("pipeline blew up"));
        assert!(!bus.is_started());
    }

    #[test]
    fn worker_thread_carries_configured_name() {
        let bus = LocalBus::with_config(BusConfig {
            worker: courier_types::WorkerConfig {
                name: "orders-bus".to_string(),
                ..Default::default()
            },
            ..BusConfig::default()
        });
        let seen: Arc<Mutex<Option<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let resolver = Resolver::new()
            .with_pipeline(LocalPipeline::new)
            .with_dispatcher(InlineDispatcher::default)
            .with_router(AddressRouter::default);
        bus.on_sending_request(move |_| {
            *sink.lock().unwrap() = std::thread::current().name().map(str::to_string);
        });
        bus.start(&resolver).unwrap();
        bus.send().to_address("x").unwrap().as_fire_and_forget().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(seen.lock().unwrap().as_deref(), Some("orders-bus"));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert!(panic_message(boxed.as_ref()).contains("non-string"));
    }
}
