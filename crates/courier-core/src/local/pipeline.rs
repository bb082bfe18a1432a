//! In-process delivery pipeline.
//!
//! Per wake: claim the sends enqueued since the last wake, bridge global
//! sends to the live connections, route each send and dispatch one job per
//! matching receiver. A job runs the callback, checks its response against
//! the registration's declared type, resolves failures through the
//! exception policy and answers the send.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use courier_types::{CollaboratorError, ConnectionError, Envelope, ReceiverError, SendError, Value};
use futures_util::FutureExt;
use tracing::{debug, trace, warn};

use crate::bus::{BusControl, PendingSendView, panic_message};
use crate::exception::{FailureOutcome, resolve_receiver_failure, resolve_send_failure};
use crate::pipeline::{Connection, DispatchJob, Pipeline, WorkUnit};
use crate::receive::{ActiveRegistration, Inbound};
use crate::send::SendMode;

/// The default pipeline of [`Resolver::local`](crate::Resolver::local).
#[derive(Debug, Default)]
pub struct LocalPipeline {
    /// Connections already reported broken; reported again only after they
    /// come back.
    broken: HashSet<String>,
}

impl LocalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn bridge(
        &mut self,
        bus: &BusControl,
        send: &PendingSendView,
        connections: &mut [Box<dyn Connection>],
    ) {
        for connection in connections.iter_mut() {
            let name = connection.name().to_string();
            if !connection.is_connected() {
                if self.broken.insert(name.clone()) {
                    bus.report_connection_broken(&name, "disconnected");
                }
                continue;
            }
            self.broken.remove(&name);

            bus.attach_connection(send.id(), &name);
            match connection.forward(send.envelope()) {
                Ok(()) => {
                    trace!(
                        parent: bus.span(),
                        send_id = %send.id(),
                        connection = %name,
                        "forwarded"
                    );
                }
                Err(ConnectionError::Broken(reason)) => {
                    self.broken.insert(name.clone());
                    bus.report_connection_broken(&name, &reason);
                }
                Err(ConnectionError::Failed(reason)) => {
                    let error = ReceiverError::with_kind("connection", reason);
                    match resolve_send_failure(bus, send, error) {
                        FailureOutcome::Recovered(response) => answer(bus, send, response),
                        FailureOutcome::Forward(forwarded) => {
                            bus.fault(send.id(), SendError::Forwarded(forwarded));
                        }
                        FailureOutcome::Swallowed(_) => {}
                    }
                }
            }
        }
    }
}

impl Pipeline for LocalPipeline {
    async fn do_work(&mut self, unit: WorkUnit<'_>) -> Result<(), CollaboratorError> {
        let WorkUnit {
            bus,
            router,
            dispatcher,
            connections,
            was_signaled,
        } = unit;

        let sends = bus.claim_pending_sends();
        if sends.is_empty() {
            return Ok(());
        }
        trace!(parent: bus.span(), count = sends.len(), was_signaled, "claimed sends");

        let defaults = bus.defaults();
        let registrations = bus.active_registrations();
        for send in sends {
            bus.raise_sending_request(send.envelope());

            if send.is_global(&defaults) {
                self.bridge(bus, &send, connections);
            }

            let targets = router.route(&send, &registrations);
            debug!(
                parent: bus.span(),
                send_id = %send.id(),
                address = ?send.envelope().address(),
                receivers = targets.len(),
                "routing send"
            );
            for registration in targets {
                let job = receiver_job(bus.clone(), send.clone(), registration);
                dispatcher.dispatch(job).await;
            }

            if send.mode() == SendMode::FireAndForget {
                bus.complete(send.id());
            }
        }
        Ok(())
    }
}

fn receiver_job(
    bus: BusControl,
    send: PendingSendView,
    registration: Arc<ActiveRegistration>,
) -> DispatchJob {
    Box::pin(async move {
        let request = Arc::clone(send.envelope());
        bus.raise_receiving_request(&request);

        let invoked = AssertUnwindSafe(registration.invoke(Inbound::new(Arc::clone(&request))))
            .catch_unwind()
            .await;
        let result = match invoked {
            Ok(result) => result,
            Err(payload) => Err(ReceiverError::panicked(panic_message(payload.as_ref()))),
        };
        let result = result.and_then(|response| {
            if let Some(expected) = registration.response_type() {
                expected.check(response.as_ref())?;
            }
            Ok(response)
        });

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    parent: bus.span(),
                    send_id = %send.id(),
                    registration_id = %registration.id(),
                    error = %error,
                    "receiver failed"
                );
                match resolve_receiver_failure(&bus, &send, &registration, error) {
                    FailureOutcome::Recovered(response) => response,
                    FailureOutcome::Forward(forwarded) => {
                        bus.fault(send.id(), SendError::Forwarded(forwarded));
                        return;
                    }
                    FailureOutcome::Swallowed(_) => return,
                }
            }
        };
        answer(&bus, &send, response);
    })
}

/// Deliver a response to the sender, raising the response events around
/// it. Fire-and-forget sends take no responses.
fn answer(bus: &BusControl, send: &PendingSendView, response: Option<Value>) {
    if send.mode() == SendMode::FireAndForget {
        return;
    }
    let request = send.envelope();
    let envelope = Arc::new(Envelope::response_to(request, response.clone()));
    bus.raise_sending_response(request, &envelope);
    if bus.respond(send.id(), response) {
        bus.raise_receiving_response(request, &envelope);
    }
}
