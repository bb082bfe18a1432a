//! Address and payload-type matching.

use std::sync::Arc;

use crate::bus::PendingSendView;
use crate::pipeline::Router;
use crate::receive::ActiveRegistration;

/// Routes a send to every registration whose address and payload type
/// accept it, in registration order.
///
/// - A registration without an address accepts every send. A send without
///   an address only reaches address-less registrations.
/// - A registration without a payload type accepts any payload. Otherwise
///   the send's payload type name must match exactly, or, with compatible
///   payload types enabled, the payload must decode into the registration's
///   type. Raw payloads (no type name) are always checked structurally.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressRouter;

impl AddressRouter {
    pub fn matches(&self, send: &PendingSendView, registration: &ActiveRegistration) -> bool {
        address_matches(send, registration) && payload_matches(send, registration)
    }
}

fn address_matches(send: &PendingSendView, registration: &ActiveRegistration) -> bool {
    match (registration.address(), send.envelope().address()) {
        (None, _) => true,
        (Some(wanted), Some(actual)) => wanted == actual,
        (Some(_), None) => false,
    }
}

fn payload_matches(send: &PendingSendView, registration: &ActiveRegistration) -> bool {
    let Some(expected) = registration.payload_type() else {
        return true;
    };
    let envelope = send.envelope();
    match envelope.payload_type() {
        Some(name) if name == expected.name() => true,
        Some(_) if !registration.accepts_compatible_payloads() => false,
        _ => expected.accepts(envelope.payload()),
    }
}

impl Router for AddressRouter {
    fn route(
        &self,
        send: &PendingSendView,
        registrations: &[Arc<ActiveRegistration>],
    ) -> Vec<Arc<ActiveRegistration>> {
        registrations
            .iter()
            .filter(|registration| self.matches(send, registration))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receive::{Inbound, ReceiverConfig};
    use crate::send::SendRequest;
    use courier_types::{Envelope, ReceiverError, TypeDescriptor, Value};
    use futures_util::FutureExt;
    use serde::Deserialize;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct Celsius {
        degrees: f64,
    }

    fn registration(config: ReceiverConfig) -> Arc<ActiveRegistration> {
        Arc::new(ActiveRegistration::new(
            Uuid::now_v7(),
            config,
            Arc::new(|_: Inbound| async { Ok::<Option<Value>, ReceiverError>(None) }.boxed()),
        ))
    }

    fn at(address: Option<&str>) -> Arc<ActiveRegistration> {
        registration(ReceiverConfig {
            address: address.map(str::to_string),
            ..ReceiverConfig::default()
        })
    }

    fn typed(compatible: bool) -> Arc<ActiveRegistration> {
        registration(ReceiverConfig {
            payload_type: Some(TypeDescriptor::of::<Celsius>()),
            compatible_payload_types: compatible,
            ..ReceiverConfig::default()
        })
    }

    fn send(
        address: Option<&str>,
        payload: Option<Value>,
        type_name: Option<&str>,
    ) -> PendingSendView {
        let envelope = Envelope::request(
            address.map(str::to_string),
            payload,
            type_name.map(str::to_string),
        );
        PendingSendView::new(Arc::new(envelope), SendRequest::default(), None)
    }

    #[test]
    fn address_rules() {
        let regs = vec![at(Some("a")), at(Some("b")), at(None)];

        let routed = AddressRouter.route(&send(Some("a"), None, None), &regs);
        assert_eq!(routed.len(), 2);
        assert!(Arc::ptr_eq(&routed[0], &regs[0]));
        assert!(Arc::ptr_eq(&routed[1], &regs[2]));

        let routed = AddressRouter.route(&send(None, None, None), &regs);
        assert_eq!(routed.len(), 1);
        assert!(Arc::ptr_eq(&routed[0], &regs[2]));
    }

    #[test]
    fn exact_payload_type_by_name() {
        let reg = typed(false);
        let name = TypeDescriptor::of::<Celsius>().name();
        let payload = json!({"degrees": 21.5});

        let exact = send(None, Some(payload.clone()), Some(name));
        let other = send(None, Some(payload), Some("app::Fahrenheit"));
        assert!(AddressRouter.matches(&exact, &reg));
        assert!(!AddressRouter.matches(&other, &reg));
    }

    #[test]
    fn compatible_payload_types_match_structurally() {
        let reg = typed(true);
        let payload = json!({"degrees": 70.0});
        let shaped = send(None, Some(payload), Some("app::Fahrenheit"));
        let text = send(None, Some(json!("hot")), Some("app::Text"));
        assert!(AddressRouter.matches(&shaped, &reg));
        assert!(!AddressRouter.matches(&text, &reg));
    }

    #[test]
    fn raw_payloads_are_checked_structurally() {
        let reg = typed(false);
        let raw = send(None, Some(json!({"degrees": 1.0})), None);
        assert!(AddressRouter.matches(&raw, &reg));
        assert!(!AddressRouter.matches(&send(None, None, None), &reg));
    }
}
