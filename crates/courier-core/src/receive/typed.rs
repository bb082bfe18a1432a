//! Typed adapters over [`ReceiverRegistration::by`].
//!
//! They only decode the payload before the callback and encode the response
//! after it; the registration itself stays untyped.

use std::future::Future;

use courier_types::{BusError, ReceiverError, TypeDescriptor, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Inbound, ReceiverRegistration, ReceiverResult, Subscription};

fn encode<R: Serialize>(response: R) -> ReceiverResult {
    match serde_json::to_value(response).map_err(ReceiverError::from_error)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

impl ReceiverRegistration {
    /// Receive payloads of type `P`, decoded before `callback` runs.
    ///
    /// Records `P` as the payload type unless one was set explicitly.
    pub fn by_payload<P, F, Fut>(mut self, callback: F) -> Result<Subscription, BusError>
    where
        P: DeserializeOwned + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReceiverResult> + Send + 'static,
    {
        self.config
            .payload_type
            .get_or_insert_with(TypeDescriptor::of::<P>);
        self.by(move |inbound: Inbound| {
            let decoded = inbound.payload_as::<P>().map(&callback);
            async move {
                match decoded {
                    Ok(fut) => fut.await,
                    Err(e) => Err(e.into()),
                }
            }
        })
    }

    /// Answer with an `R`, encoded after `callback` returns.
    pub fn by_response<R, F, Fut>(self, callback: F) -> Result<Subscription, BusError>
    where
        R: Serialize + 'static,
        F: Fn(Inbound) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ReceiverError>> + Send + 'static,
    {
        self.by(move |inbound| {
            let fut = callback(inbound);
            async move { encode(fut.await?) }
        })
    }

    /// Both: decode a `P`, answer with an `R`.
    pub fn by_typed<P, R, F, Fut>(self, callback: F) -> Result<Subscription, BusError>
    where
        P: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ReceiverError>> + Send + 'static,
    {
        self.by_payload(move |payload: P| {
            let fut = callback(payload);
            async move { encode(fut.await?) }
        })
    }
}
