//! Explicit collaborator registry handed to `LocalBus::start`.
//!
//! A `Resolver` holds factories rather than instances: every start of a bus
//! builds fresh collaborators on the worker thread, so a bus can be stopped
//! and started again with the same resolver.

use std::fmt;
use std::sync::Arc;

use super::{
    BoxDispatcher, BoxPipeline, Connection, ConnectionManager, Dispatcher, Pipeline, Router,
};
use crate::local::{AddressRouter, InlineDispatcher, LocalPipeline};

type Factory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Registry of collaborator factories.
#[derive(Clone, Default)]
pub struct Resolver {
    pipelines: Vec<Factory<BoxPipeline>>,
    dispatchers: Vec<Factory<BoxDispatcher>>,
    routers: Vec<Factory<Box<dyn Router>>>,
    connection_managers: Vec<Factory<Box<dyn ConnectionManager>>>,
    connections: Vec<Factory<Box<dyn Connection>>>,
}

impl Resolver {
    /// An empty resolver; a bus started with it fails for lack of a pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// In-process delivery: [`LocalPipeline`], [`InlineDispatcher`] and
    /// [`AddressRouter`].
    pub fn local() -> Self {
        Self::new()
            .with_pipeline(LocalPipeline::new)
            .with_dispatcher(InlineDispatcher::default)
            .with_router(AddressRouter::default)
    }

    pub fn with_pipeline<P, F>(mut self, factory: F) -> Self
    where
        P: Pipeline,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.pipelines
            .push(Arc::new(move || BoxPipeline::new(factory())));
        self
    }

    pub fn with_dispatcher<D, F>(mut self, factory: F) -> Self
    where
        D: Dispatcher,
        F: Fn() -> D + Send + Sync + 'static,
    {
        self.dispatchers
            .push(Arc::new(move || BoxDispatcher::new(factory())));
        self
    }

    pub fn with_router<R, F>(mut self, factory: F) -> Self
    where
        R: Router,
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.routers
            .push(Arc::new(move || Box::new(factory()) as Box<dyn Router>));
        self
    }

    pub fn with_connection_manager<M, F>(mut self, factory: F) -> Self
    where
        M: ConnectionManager,
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.connection_managers
            .push(Arc::new(move || Box::new(factory()) as Box<dyn ConnectionManager>));
        self
    }

    pub fn with_connection<C, F>(mut self, factory: F) -> Self
    where
        C: Connection,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.connections
            .push(Arc::new(move || Box::new(factory()) as Box<dyn Connection>));
        self
    }

    // -- resolution --------------------------------------------------------

    pub fn resolve_pipelines(&self) -> Vec<BoxPipeline> {
        self.pipelines.iter().map(|f| f()).collect()
    }

    pub fn resolve_dispatchers(&self) -> Vec<BoxDispatcher> {
        self.dispatchers.iter().map(|f| f()).collect()
    }

    pub fn resolve_routers(&self) -> Vec<Box<dyn Router>> {
        self.routers.iter().map(|f| f()).collect()
    }

    pub fn resolve_connection_managers(&self) -> Vec<Box<dyn ConnectionManager>> {
        self.connection_managers.iter().map(|f| f()).collect()
    }

    pub fn resolve_connections(&self) -> Vec<Box<dyn Connection>> {
        self.connections.iter().map(|f| f()).collect()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("pipelines", &self.pipelines.len())
            .field("dispatchers", &self.dispatchers.len())
            .field("routers", &self.routers.len())
            .field("connection_managers", &self.connection_managers.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_resolver_has_one_of_each_mandatory() {
        let resolver = Resolver::local();
        assert_eq!(resolver.resolve_pipelines().len(), 1);
        assert_eq!(resolver.resolve_dispatchers().len(), 1);
        assert_eq!(resolver.resolve_routers().len(), 1);
        assert!(resolver.resolve_connection_managers().is_empty());
        assert!(resolver.resolve_connections().is_empty());
    }

    #[test]
    fn every_resolution_builds_fresh_instances() {
        let resolver = Resolver::local().with_dispatcher(crate::local::SpawnDispatcher::default);
        assert_eq!(resolver.resolve_dispatchers().len(), 2);
        assert_eq!(resolver.resolve_dispatchers().len(), 2);
        assert!(format!("{resolver:?}").contains("dispatchers: 2"));
    }
}
