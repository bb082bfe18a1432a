//! Runtime type descriptors and checked casts for payloads and responses.
//!
//! Values cross the bus as `serde_json::Value`. A `TypeDescriptor` captures
//! a Rust type's name together with a structural check ("does this value
//! decode into `T`?"), which is what the bus uses wherever a payload or
//! response type has to be verified at runtime.

use std::any::type_name;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::Value;
use crate::error::CastError;

/// Name plus structural check for a payload or response type.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    name: &'static str,
    accepts: fn(&Value) -> bool,
}

impl TypeDescriptor {
    /// Describe `T`.
    pub fn of<T: DeserializeOwned + 'static>() -> Self {
        Self {
            name: type_name::<T>(),
            accepts: accepts_value::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether an absent/`null` value is a valid instance of the type.
    ///
    /// True for `Option<_>`, `()` and `Value`; false for strings, numbers
    /// and structs.
    pub fn is_nullable(&self) -> bool {
        (self.accepts)(&Value::Null)
    }

    /// Whether `value` decodes into the described type.
    pub fn accepts(&self, value: Option<&Value>) -> bool {
        match value {
            Some(v) => (self.accepts)(v),
            None => self.is_nullable(),
        }
    }

    /// Like [`accepts`](Self::accepts) but reports a `CastError`.
    pub fn check(&self, value: Option<&Value>) -> Result<(), CastError> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(CastError::new(
                self.name,
                describe(value.unwrap_or(&Value::Null)),
            ))
        }
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeDescriptor").field(&self.name).finish()
    }
}

fn accepts_value<T: DeserializeOwned>(value: &Value) -> bool {
    T::deserialize(value).is_ok()
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null is not a valid value".to_string(),
        Value::Bool(_) => "got a boolean".to_string(),
        Value::Number(_) => "got a number".to_string(),
        Value::String(_) => "got a string".to_string(),
        Value::Array(_) => "got an array".to_string(),
        Value::Object(_) => "got an object".to_string(),
    }
}

/// Decode an optional value into `T`, treating absence as `null`.
///
/// Never coerces: a value that does not decode is a `CastError`.
pub fn decode<T: DeserializeOwned>(value: Option<Value>) -> Result<T, CastError> {
    serde_json::from_value(value.unwrap_or(Value::Null))
        .map_err(|e| CastError::new(type_name::<T>(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        sku: String,
        quantity: u32,
    }

    #[test]
    fn string_is_not_nullable() {
        let desc = TypeDescriptor::of::<String>();
        assert!(!desc.is_nullable());
        assert!(desc.accepts(Some(&json!("pong"))));
        assert!(!desc.accepts(None));
        assert!(!desc.accepts(Some(&json!(42))));
    }

    #[test]
    fn option_and_unit_are_nullable() {
        assert!(TypeDescriptor::of::<Option<String>>().is_nullable());
        assert!(TypeDescriptor::of::<()>().is_nullable());
        assert!(TypeDescriptor::of::<Value>().is_nullable());
    }

    #[test]
    fn struct_check_is_structural() {
        let desc = TypeDescriptor::of::<Order>();
        assert!(desc.accepts(Some(&json!({"sku": "A-1", "quantity": 2}))));
        assert!(!desc.accepts(Some(&json!({"sku": "A-1"}))));
        let err = desc.check(Some(&json!("A-1"))).unwrap_err();
        assert!(err.expected().ends_with("Order"));
    }

    #[test]
    fn decode_rejects_mismatch_instead_of_coercing() {
        let ok: String = decode(Some(json!("pong"))).unwrap();
        assert_eq!(ok, "pong");

        let err = decode::<u32>(Some(json!("pong"))).unwrap_err();
        assert_eq!(err.expected(), "u32");
    }

    #[test]
    fn decode_absent_value_only_into_nullable() {
        let none: Option<String> = decode(None).unwrap();
        assert!(none.is_none());
        assert!(decode::<String>(None).is_err());
    }

    #[test]
    fn descriptors_compare_by_name() {
        assert_eq!(TypeDescriptor::of::<String>(), TypeDescriptor::of::<String>());
        assert_ne!(TypeDescriptor::of::<String>(), TypeDescriptor::of::<u64>());
        assert!(format!("{:?}", TypeDescriptor::of::<u64>()).contains("u64"));
    }
}
