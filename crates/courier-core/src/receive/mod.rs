//! The fluent builder for one receiver.
//!
//! `by` consumes the builder into a [`Subscription`]; stopping the
//! subscription hands the builder back, keeping its identity, so it can be
//! reconfigured and activated again:
//!
//! ```no_run
//! # use courier_core::LocalBus;
//! # use serde_json::json;
//! # fn demo(bus: &LocalBus) -> Result<(), courier_types::BusError> {
//! let sub = bus
//!     .receive()
//!     .at_address("ping")?
//!     .by(|_| async { Ok(Some(json!("pong"))) })?;
//!
//! let registration = sub.stop().at_address("ping.v2")?;
//! let _sub = registration.by(|_| async { Ok(Some(json!("pong"))) })?;
//! # Ok(())
//! # }
//! ```

mod registration;
mod typed;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use courier_types::{BusError, TypeDescriptor};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::bus::BusControl;
use crate::exception::{ExceptionVerdict, ReceiveFailure};

pub use registration::{ActiveRegistration, Inbound, ReceiverConfig, ReceiverResult};

use registration::ReceiverCallback;

/// Builder for one receiver.
#[must_use = "a registration does nothing until `by` is called"]
pub struct ReceiverRegistration {
    bus: BusControl,
    id: Uuid,
    config: ReceiverConfig,
}

impl ReceiverRegistration {
    pub(crate) fn new(bus: BusControl) -> Self {
        Self {
            bus,
            id: Uuid::now_v7(),
            config: ReceiverConfig::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Only receive messages sent to `address`. Without an address the
    /// receiver sees every send.
    pub fn at_address(mut self, address: impl Into<String>) -> Result<Self, BusError> {
        let address = address.into();
        if address.is_empty() {
            return Err(BusError::InvalidArgument(
                "address must not be empty".to_string(),
            ));
        }
        self.config.address = Some(address);
        Ok(self)
    }

    /// Only receive payloads of type `T`.
    pub fn with_payload<T: DeserializeOwned + 'static>(mut self) -> Self {
        self.config.payload_type = Some(TypeDescriptor::of::<T>());
        self
    }

    /// Also accept payloads of other types that decode into the payload
    /// type.
    pub fn with_compatible_payload_types(mut self, enabled: bool) -> Self {
        self.config.compatible_payload_types = enabled;
        self
    }

    /// Declare the response type; responses that do not decode into `T`
    /// are treated as receiver failures.
    pub fn with_response<T: DeserializeOwned + 'static>(mut self) -> Self {
        self.config.response_type = Some(TypeDescriptor::of::<T>());
        self
    }

    pub fn with_exception_forwarding(mut self, forward: bool) -> Self {
        self.config.forward_exceptions = Some(forward);
        self
    }

    pub fn with_exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReceiveFailure<'_>) -> ExceptionVerdict + Send + Sync + 'static,
    {
        self.config.exception_handler = Some(Arc::new(handler));
        self
    }

    /// Activate the receiver with `callback`.
    ///
    /// Allowed before the bus is started. Fails with
    /// [`BusError::Faulted`] while the bus sits faulted.
    pub fn by<F, Fut>(self, callback: F) -> Result<Subscription, BusError>
    where
        F: Fn(Inbound) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReceiverResult> + Send + 'static,
    {
        let callback: ReceiverCallback = Arc::new(move |inbound| callback(inbound).boxed());
        self.activate(callback)
    }

    fn activate(self, callback: ReceiverCallback) -> Result<Subscription, BusError> {
        let ReceiverRegistration { bus, id, config } = self;
        let registration = Arc::new(ActiveRegistration::new(id, config.clone(), callback));
        bus.register(Arc::clone(&registration))?;
        Ok(Subscription {
            bus,
            registration,
            config,
        })
    }
}

impl fmt::Debug for ReceiverRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverRegistration")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

/// An active receiver.
///
/// Dropping the handle does not deactivate the receiver; it stays active
/// until [`stop`](Self::stop) or until the bus stops.
pub struct Subscription {
    bus: BusControl,
    registration: Arc<ActiveRegistration>,
    config: ReceiverConfig,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.registration.id()
    }

    pub fn registration(&self) -> &Arc<ActiveRegistration> {
        &self.registration
    }

    /// Whether the bus still lists this receiver.
    pub fn is_active(&self) -> bool {
        let id = self.id();
        self.bus.active_registrations().iter().any(|r| r.id() == id)
    }

    /// Deactivate the receiver and get the builder back for
    /// reconfiguration. A no-op on the bus if it was already removed.
    pub fn stop(self) -> ReceiverRegistration {
        let Subscription {
            bus,
            registration,
            config,
        } = self;
        let id = registration.id();
        if !bus.unregister(id) {
            debug!(parent: bus.span(), registration_id = %id, "receiver was not active");
        }
        ReceiverRegistration { bus, id, config }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.registration.id())
            .field("address", &self.registration.address())
            .finish()
    }
}
