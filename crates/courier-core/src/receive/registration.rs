//! Active registration records and the inbound view handed to callbacks.

use std::fmt;
use std::sync::Arc;

use courier_types::{CastError, Envelope, ReceiverError, TypeDescriptor, Value, decode};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::exception::ReceiveExceptionHandler;

/// Result a receiver callback produces: an optional response.
pub type ReceiverResult = Result<Option<Value>, ReceiverError>;

pub(crate) type ReceiverCallback =
    Arc<dyn Fn(Inbound) -> BoxFuture<'static, ReceiverResult> + Send + Sync>;

/// Configuration of a registration. `None` fields defer to the bus defaults
/// or, for the type fields, mean "anything".
#[derive(Clone, Default)]
pub struct ReceiverConfig {
    pub(crate) address: Option<String>,
    pub(crate) payload_type: Option<TypeDescriptor>,
    pub(crate) compatible_payload_types: bool,
    pub(crate) response_type: Option<TypeDescriptor>,
    pub(crate) forward_exceptions: Option<bool>,
    pub(crate) exception_handler: Option<ReceiveExceptionHandler>,
}

impl fmt::Debug for ReceiverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverConfig")
            .field("address", &self.address)
            .field("payload_type", &self.payload_type)
            .field("compatible_payload_types", &self.compatible_payload_types)
            .field("response_type", &self.response_type)
            .field("forward_exceptions", &self.forward_exceptions)
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

/// A registration as the bus and its router see it.
pub struct ActiveRegistration {
    id: Uuid,
    config: ReceiverConfig,
    callback: ReceiverCallback,
}

impl ActiveRegistration {
    pub(crate) fn new(id: Uuid, config: ReceiverConfig, callback: ReceiverCallback) -> Self {
        Self {
            id,
            config,
            callback,
        }
    }

    /// Identity of the registration; stable across stop and reactivation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> Option<&str> {
        self.config.address.as_deref()
    }

    pub fn payload_type(&self) -> Option<TypeDescriptor> {
        self.config.payload_type
    }

    /// Whether payloads that merely decode into the payload type are
    /// accepted, rather than only an exact type match.
    pub fn accepts_compatible_payloads(&self) -> bool {
        self.config.compatible_payload_types
    }

    pub fn response_type(&self) -> Option<TypeDescriptor> {
        self.config.response_type
    }

    pub fn forward_exceptions(&self) -> Option<bool> {
        self.config.forward_exceptions
    }

    pub fn exception_handler(&self) -> Option<&ReceiveExceptionHandler> {
        self.config.exception_handler.as_ref()
    }

    /// Run the callback. The call itself happens on first poll, so a panic
    /// anywhere in the callback surfaces from the returned future.
    pub fn invoke(&self, inbound: Inbound) -> BoxFuture<'static, ReceiverResult> {
        let callback = Arc::clone(&self.callback);
        async move { callback(inbound).await }.boxed()
    }
}

impl fmt::Debug for ActiveRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRegistration")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The request as delivered to a receiver callback.
#[derive(Debug, Clone)]
pub struct Inbound {
    envelope: Arc<Envelope>,
}

impl Inbound {
    pub fn new(envelope: Arc<Envelope>) -> Self {
        Self { envelope }
    }

    pub fn address(&self) -> Option<&str> {
        self.envelope.address()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.envelope.payload()
    }

    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    /// Decode the payload into `T`. An absent payload decodes only into a
    /// nullable type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, CastError> {
        decode(self.envelope.payload().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registration() -> ActiveRegistration {
        let callback: ReceiverCallback = Arc::new(|inbound: Inbound| {
            async move { Ok::<_, ReceiverError>(inbound.payload().cloned()) }.boxed()
        });
        let config = ReceiverConfig {
            address: Some("echo".into()),
            ..ReceiverConfig::default()
        };
        ActiveRegistration::new(Uuid::now_v7(), config, callback)
    }

    #[tokio::test]
    async fn invoke_runs_callback() {
        let reg = registration();
        let envelope = Arc::new(Envelope::request(
            Some("echo".into()),
            Some(json!({"n": 1})),
            None,
        ));
        let out = reg.invoke(Inbound::new(envelope)).await.unwrap();
        assert_eq!(out, Some(json!({"n": 1})));
        assert_eq!(reg.address(), Some("echo"));
        assert!(reg.payload_type().is_none());
    }

    #[test]
    fn payload_as_rejects_absent_for_non_nullable() {
        let inbound = Inbound::new(Arc::new(Envelope::request(None, None, None)));
        assert!(inbound.payload_as::<String>().is_err());
        assert_eq!(inbound.payload_as::<Option<String>>().unwrap(), None);
    }
}
