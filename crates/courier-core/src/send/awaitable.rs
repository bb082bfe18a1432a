//! Awaitables returned by the terminal send calls.
//!
//! Each awaitable owns the receiving half of its send's completion channel
//! and a guard that removes the pending record from the bus when the
//! awaitable goes away, whether it finished, timed out, was cancelled or was
//! simply dropped.

use std::fmt;
use std::future::{IntoFuture, Ready};
use std::marker::PhantomData;
use std::time::Duration;

use courier_types::{CancelReason, SendError, Value, decode};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::bus::BusControl;

type Outcome = Result<Option<Value>, SendError>;

/// Removes the pending record on drop.
struct PendingGuard {
    bus: BusControl,
    id: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.bus.remove_pending(self.id);
    }
}

// ---------------------------------------------------------------------------
// Single
// ---------------------------------------------------------------------------

/// Awaitable of a single send: resolves to the first response, cast to `R`.
#[must_use = "a pending send does nothing unless awaited"]
pub struct PendingSingle<R> {
    guard: PendingGuard,
    receiver: oneshot::Receiver<Outcome>,
    timeout: Duration,
    deadline: Instant,
    cancellation: Option<CancellationToken>,
    _response: PhantomData<fn() -> R>,
}

impl<R> PendingSingle<R> {
    pub(crate) fn new(
        bus: BusControl,
        id: Uuid,
        receiver: oneshot::Receiver<Outcome>,
        timeout: Duration,
        deadline: Instant,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            guard: PendingGuard { bus, id },
            receiver,
            timeout,
            deadline,
            cancellation,
            _response: PhantomData,
        }
    }

    /// Id of the send (and of its request envelope).
    pub fn id(&self) -> Uuid {
        self.guard.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fixed when the send was enqueued.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl<R> PendingSingle<R>
where
    R: DeserializeOwned + Send + 'static,
{
    async fn wait(self) -> Result<R, SendError> {
        let PendingSingle {
            guard,
            mut receiver,
            timeout,
            deadline,
            cancellation,
            ..
        } = self;
        let cancellation = cancellation.unwrap_or_else(CancellationToken::new);
        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        let received = tokio::select! {
            biased;
            received = &mut receiver => received.ok(),
            _ = cancellation.cancelled() => return Err(SendError::Cancelled(CancelReason::Caller)),
            _ = &mut deadline => return Err(SendError::Timeout(timeout)),
        };

        let response = match received {
            Some(outcome) => outcome?,
            // Completed without a response; nothing more will arrive
            None => {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Err(SendError::Cancelled(CancelReason::Caller)),
                    _ = &mut deadline => return Err(SendError::Timeout(timeout)),
                }
            }
        };
        drop(guard);

        Ok(decode::<R>(response)?)
    }
}

impl<R> IntoFuture for PendingSingle<R>
where
    R: DeserializeOwned + Send + 'static,
{
    type Output = Result<R, SendError>;
    type IntoFuture = BoxFuture<'static, Result<R, SendError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<R> fmt::Debug for PendingSingle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSingle")
            .field("id", &self.guard.id)
            .field("timeout", &self.timeout)
            .field("response", &std::any::type_name::<R>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// Awaitable of a broadcast: collects responses, each cast to `R`.
///
/// Collection ends when the expected count is reached, the window elapses,
/// the caller cancels, or the bus completes the send. Receivers that never
/// answer are simply absent from the result. Only a fault (pipeline,
/// connection, forwarded receiver error) or a response that does not cast
/// fails the whole broadcast.
#[must_use = "a pending send does nothing unless awaited"]
pub struct PendingBroadcast<R> {
    guard: PendingGuard,
    receiver: mpsc::UnboundedReceiver<Outcome>,
    timeout: Duration,
    deadline: Instant,
    cancellation: Option<CancellationToken>,
    expected: Option<usize>,
    _response: PhantomData<fn() -> R>,
}

impl<R> PendingBroadcast<R> {
    pub(crate) fn new(
        bus: BusControl,
        id: Uuid,
        receiver: mpsc::UnboundedReceiver<Outcome>,
        timeout: Duration,
        deadline: Instant,
        cancellation: Option<CancellationToken>,
        expected: Option<usize>,
    ) -> Self {
        Self {
            guard: PendingGuard { bus, id },
            receiver,
            timeout,
            deadline,
            cancellation,
            expected,
            _response: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.guard.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn expected_results(&self) -> Option<usize> {
        self.expected
    }
}

impl<R> PendingBroadcast<R>
where
    R: DeserializeOwned + Send + 'static,
{
    async fn collect(self) -> Result<Vec<R>, SendError> {
        let PendingBroadcast {
            guard,
            mut receiver,
            deadline,
            cancellation,
            expected,
            ..
        } = self;

        let mut responses = Vec::new();
        if expected == Some(0) {
            return Ok(responses);
        }

        let cancellation = cancellation.unwrap_or_else(CancellationToken::new);
        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                item = receiver.recv() => match item {
                    Some(Ok(response)) => {
                        responses.push(decode::<R>(response)?);
                        if expected.is_some_and(|n| responses.len() >= n) {
                            break;
                        }
                    }
                    Some(Err(fault)) => return Err(fault),
                    None => break,
                },
                _ = cancellation.cancelled() => break,
                _ = &mut deadline => break,
            }
        }

        debug!(
            send_id = %guard.id,
            collected = responses.len(),
            "broadcast collection ended"
        );
        Ok(responses)
    }
}

impl<R> IntoFuture for PendingBroadcast<R>
where
    R: DeserializeOwned + Send + 'static,
{
    type Output = Result<Vec<R>, SendError>;
    type IntoFuture = BoxFuture<'static, Result<Vec<R>, SendError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.collect())
    }
}

impl<R> fmt::Debug for PendingBroadcast<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingBroadcast")
            .field("id", &self.guard.id)
            .field("timeout", &self.timeout)
            .field("expected", &self.expected)
            .field("response", &std::any::type_name::<R>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Fire-and-forget
// ---------------------------------------------------------------------------

/// Awaitable of a fire-and-forget send; ready as soon as the bus accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    id: Uuid,
}

impl Accepted {
    pub(crate) fn new(id: Uuid) -> Self {
        Self { id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl IntoFuture for Accepted {
    type Output = Uuid;
    type IntoFuture = Ready<Uuid>;

    fn into_future(self) -> Self::IntoFuture {
        std::future::ready(self.id)
    }
}
