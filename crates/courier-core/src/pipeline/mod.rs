//! Collaborator contracts consumed by the worker.
//!
//! The bus core does not route, dispatch or transport anything itself. A
//! started bus resolves one [`Pipeline`], one [`Dispatcher`], one
//! [`Router`], at most one [`ConnectionManager`] and any number of
//! [`Connection`]s from a [`Resolver`], initializes them on the worker, and
//! calls [`Pipeline::do_work`] once per wake. Every collaborator is owned
//! by the worker for its whole lifetime.
//!
//! `Pipeline` and `Dispatcher` use native async fn in traits (RPITIT); the
//! worker holds them as [`BoxPipeline`] / [`BoxDispatcher`].

mod boxed;
mod resolver;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use courier_types::{CollaboratorError, ConnectionError, Envelope};

use crate::bus::{BusControl, PendingSendView};
use crate::receive::ActiveRegistration;

pub use boxed::{BoxDispatcher, BoxPipeline, DispatcherDyn, PipelineDyn};
pub use resolver::Resolver;

/// One receiver invocation, ready to be run by a dispatcher.
pub type DispatchJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What collaborators get during initialization.
pub struct InitContext<'a> {
    resolver: &'a Resolver,
    bus: &'a BusControl,
    span: &'a tracing::Span,
}

impl<'a> InitContext<'a> {
    pub(crate) fn new(
        resolver: &'a Resolver,
        bus: &'a BusControl,
        span: &'a tracing::Span,
    ) -> Self {
        Self {
            resolver,
            bus,
            span,
        }
    }

    /// The resolver the bus was started with.
    pub fn resolver(&self) -> &Resolver {
        self.resolver
    }

    pub fn bus(&self) -> &BusControl {
        self.bus
    }

    /// The bus span. Log under it to stay correlated with the bus.
    pub fn span(&self) -> &tracing::Span {
        self.span
    }
}

/// Everything one pipeline iteration may use.
pub struct WorkUnit<'a> {
    pub bus: &'a BusControl,
    pub router: &'a dyn Router,
    pub dispatcher: &'a mut BoxDispatcher,
    pub connections: &'a mut [Box<dyn Connection>],
    /// `true` when woken by a work signal, `false` on a poll tick.
    pub was_signaled: bool,
}

/// Performs one unit of routing and dispatch work per worker wake.
///
/// An `Err` (or a panic) from `do_work` is fatal: the bus faults every
/// pending send and stops its worker.
pub trait Pipeline: Send + 'static {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        let _ = ctx;
        Ok(())
    }

    fn do_work(
        &mut self,
        unit: WorkUnit<'_>,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Execution strategy for receiver jobs.
pub trait Dispatcher: Send + 'static {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        let _ = ctx;
        Ok(())
    }

    /// Run `job` now or schedule it; resolves once the job is accepted.
    fn dispatch(&mut self, job: DispatchJob) -> impl Future<Output = ()> + Send;

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Decides which registrations a pending send reaches.
pub trait Router: Send + Sync + 'static {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        let _ = ctx;
        Ok(())
    }

    fn route(
        &self,
        send: &PendingSendView,
        registrations: &[Arc<ActiveRegistration>],
    ) -> Vec<Arc<ActiveRegistration>>;

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Owns the remote side of the bus (listeners, reconnects).
pub trait ConnectionManager: Send + 'static {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        let _ = ctx;
        Ok(())
    }

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// A link to a remote bus instance.
pub trait Connection: Send + 'static {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool {
        true
    }

    /// Hand a request to the remote side.
    fn forward(&mut self, request: &Envelope) -> Result<(), ConnectionError>;

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
