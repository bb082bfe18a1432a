//! Dispatch strategies for receiver jobs.

use courier_types::CollaboratorError;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::pipeline::{DispatchJob, Dispatcher};

/// Runs every job to completion on the worker before the next one starts.
#[derive(Debug, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    async fn dispatch(&mut self, job: DispatchJob) {
        job.await;
    }
}

/// Spawns jobs onto the worker's runtime so slow receivers do not hold up
/// the pipeline. Outstanding jobs are aborted on unload.
#[derive(Debug, Default)]
pub struct SpawnDispatcher {
    jobs: JoinSet<()>,
}

impl SpawnDispatcher {
    /// Jobs spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    fn reap(&mut self) {
        while let Some(result) = self.jobs.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!(error = %e, "receiver job panicked");
                }
            }
        }
    }
}

impl Dispatcher for SpawnDispatcher {
    async fn dispatch(&mut self, job: DispatchJob) {
        self.reap();
        self.jobs.spawn(job);
    }

    fn unload(&mut self) -> Result<(), CollaboratorError> {
        if !self.jobs.is_empty() {
            debug!(outstanding = self.jobs.len(), "aborting receiver jobs");
        }
        self.jobs.abort_all();
        Ok(())
    }
}
