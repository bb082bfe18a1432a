//! Object-safe wrappers for the async collaborator traits.
//!
//! Same blanket-impl shape for both traits:
//! 1. an object-safe `XxxDyn` trait returning boxed futures
//! 2. a blanket impl of `XxxDyn` for every `T: Xxx`
//! 3. `BoxXxx` wrapping `Box<dyn XxxDyn>` and delegating

use std::future::Future;
use std::pin::Pin;

use courier_types::CollaboratorError;

use super::{DispatchJob, Dispatcher, InitContext, Pipeline, WorkUnit};

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Object-safe version of [`Pipeline`].
pub trait PipelineDyn: Send {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError>;

    fn do_work_boxed<'a>(
        &'a mut self,
        unit: WorkUnit<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CollaboratorError>> + Send + 'a>>;

    fn unload(&mut self) -> Result<(), CollaboratorError>;
}

impl<T: Pipeline> PipelineDyn for T {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        Pipeline::initialize(self, ctx)
    }

    fn do_work_boxed<'a>(
        &'a mut self,
        unit: WorkUnit<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CollaboratorError>> + Send + 'a>> {
        Box::pin(self.do_work(unit))
    }

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        Pipeline::unload(self)
    }
}

/// Type-erased pipeline, as resolved and owned by the worker.
pub struct BoxPipeline {
    inner: Box<dyn PipelineDyn>,
}

impl BoxPipeline {
    pub fn new<T: Pipeline>(pipeline: T) -> Self {
        Self {
            inner: Box::new(pipeline),
        }
    }

    pub fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        self.inner.initialize(ctx)
    }

    pub async fn do_work(&mut self, unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
        self.inner.do_work_boxed(unit).await
    }

    pub fn unload(&mut self) -> Result<(), CollaboratorError> {
        self.inner.unload()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Object-safe version of [`Dispatcher`].
pub trait DispatcherDyn: Send {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError>;

    fn dispatch_boxed<'a>(
        &'a mut self,
        job: DispatchJob,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    fn unload(&mut self) -> Result<(), CollaboratorError>;
}

impl<T: Dispatcher> DispatcherDyn for T {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        Dispatcher::initialize(self, ctx)
    }

    fn dispatch_boxed<'a>(
        &'a mut self,
        job: DispatchJob,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.dispatch(job))
    }

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        Dispatcher::unload(self)
    }
}

/// Type-erased dispatcher.
pub struct BoxDispatcher {
    inner: Box<dyn DispatcherDyn>,
}

impl BoxDispatcher {
    pub fn new<T: Dispatcher>(dispatcher: T) -> Self {
        Self {
            inner: Box::new(dispatcher),
        }
    }

    pub fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<(), CollaboratorError> {
        self.inner.initialize(ctx)
    }

    pub async fn dispatch(&mut self, job: DispatchJob) {
        self.inner.dispatch_boxed(job).await
    }

    pub fn unload(&mut self) -> Result<(), CollaboratorError> {
        self.inner.unload()
    }
}
