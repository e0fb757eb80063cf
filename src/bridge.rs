//! Conversion between host values and interpreter values.
//!
//! [`to_interpreter`] is total. [`to_host`] is partial: interpreter kinds with
//! no [`HostValue`] counterpart (characters, blobs, function pointers, custom
//! types) fail with [`Error::UnsupportedKind`]. Kinds are checked exactly, never
//! inferred from shape, so `1`, `1.0` and `true` stay three different values on
//! both sides of the boundary.

use rhai::{Array, Dynamic, Map};

use crate::error::{Error, Result};
use crate::value::HostValue;

/// The interpreter's native value type.
pub type InterpreterValue = Dynamic;

/// Convert a host value into an interpreter value.
pub fn to_interpreter(value: &HostValue) -> InterpreterValue {
    match value {
        HostValue::Unit => Dynamic::UNIT,
        HostValue::Boolean(b) => Dynamic::from_bool(*b),
        HostValue::Integer(i) => Dynamic::from_int(*i),
        HostValue::Float(f) => Dynamic::from_float(*f),
        HostValue::Text(s) => Dynamic::from(s.clone()),
        HostValue::List(items) => {
            let array: Array = items.iter().map(to_interpreter).collect();
            Dynamic::from_array(array)
        }
        HostValue::Map(entries) => {
            let mut map = Map::new();
            for (key, item) in entries {
                map.insert(key.as_str().into(), to_interpreter(item));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Convert an owned host value into an interpreter value.
pub fn into_interpreter(value: HostValue) -> InterpreterValue {
    match value {
        HostValue::Text(s) => Dynamic::from(s),
        HostValue::List(items) => {
            Dynamic::from_array(items.into_iter().map(into_interpreter).collect())
        }
        HostValue::Map(entries) => {
            let mut map = Map::new();
            for (key, item) in entries {
                map.insert(key.into(), into_interpreter(item));
            }
            Dynamic::from_map(map)
        }
        other => to_interpreter(&other),
    }
}

/// Convert an interpreter value into a host value.
pub fn to_host(value: &InterpreterValue) -> Result<HostValue> {
    // closure-captured values are shared cells
    let value = value.flatten_clone();

    if value.is_unit() {
        return Ok(HostValue::Unit);
    }
    if value.is_bool() {
        return value
            .as_bool()
            .map(HostValue::Boolean)
            .map_err(Error::unsupported_kind);
    }
    if value.is_int() {
        return value
            .as_int()
            .map(HostValue::Integer)
            .map_err(Error::unsupported_kind);
    }
    if value.is_float() {
        return value
            .as_float()
            .map(HostValue::Float)
            .map_err(Error::unsupported_kind);
    }
    if value.is_string() {
        return value
            .into_string()
            .map(HostValue::Text)
            .map_err(Error::unsupported_kind);
    }
    if value.is_array() {
        let array = value.into_array().map_err(Error::unsupported_kind)?;
        return array
            .iter()
            .map(to_host)
            .collect::<Result<Vec<_>>>()
            .map(HostValue::List);
    }
    if value.is_map() {
        let type_name = value.type_name();
        let map = value
            .try_cast::<Map>()
            .ok_or_else(|| Error::unsupported_kind(type_name))?;
        let mut entries = std::collections::BTreeMap::new();
        for (key, item) in map.iter() {
            entries.insert(key.to_string(), to_host(item)?);
        }
        return Ok(HostValue::Map(entries));
    }

    Err(Error::unsupported_kind(value.type_name()))
}

/// Convert a slice of host values into call arguments.
pub fn to_arguments(args: &[HostValue]) -> Vec<InterpreterValue> {
    args.iter().map(to_interpreter).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn round_trip(value: HostValue) {
        let back = to_host(&to_interpreter(&value)).unwrap();
        assert_eq!(back, value, "value changed crossing the boundary");
        assert_eq!(back.kind(), value.kind());
    }

    #[test]
    fn test_primitive_round_trip() {
        round_trip(HostValue::Unit);
        round_trip(HostValue::Integer(i64::MIN));
        round_trip(HostValue::Integer(0));
        round_trip(HostValue::Float(1.0));
        round_trip(HostValue::Float(-0.5));
        round_trip(HostValue::Boolean(false));
        round_trip(HostValue::Text("grüße, 世界 🦀".into()));
        round_trip(HostValue::Text(String::new()));
    }

    #[test]
    fn test_composite_round_trip() {
        round_trip(HostValue::List(vec![]));
        round_trip(HostValue::Map(BTreeMap::new()));

        let nested: HostValue = [
            ("list", HostValue::from(vec![HostValue::from(1), HostValue::from(1.0)])),
            ("flag", HostValue::from(true)),
            ("inner", [("x", "y")].into_iter().collect()),
        ]
        .into_iter()
        .collect();
        round_trip(nested);
    }

    #[test]
    fn test_interpreter_kinds_are_exact() {
        assert!(to_interpreter(&HostValue::Integer(1)).is_int());
        assert!(!to_interpreter(&HostValue::Integer(1)).is_float());
        assert!(to_interpreter(&HostValue::Float(1.0)).is_float());
        assert!(to_interpreter(&HostValue::Boolean(true)).is_bool());
        assert!(!to_interpreter(&HostValue::Boolean(true)).is_int());
        assert_eq!(to_interpreter(&HostValue::Float(2.0)).type_name(), "f64");
    }

    #[test]
    fn test_owned_conversion_matches_borrowed() {
        let value = HostValue::from(vec![HostValue::from("a"), HostValue::from(2)]);
        let owned = to_host(&into_interpreter(value.clone())).unwrap();
        assert_eq!(owned, value);
    }

    #[test]
    fn test_unsupported_kinds() {
        let err = to_host(&Dynamic::from('x')).unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind(ref name) if name == "char"));

        let nested = Dynamic::from_array(vec![Dynamic::from_int(1), Dynamic::from('y')]);
        assert!(matches!(to_host(&nested), Err(Error::UnsupportedKind(_))));

        #[derive(Clone)]
        struct Opaque;
        assert!(matches!(
            to_host(&Dynamic::from(Opaque)),
            Err(Error::UnsupportedKind(_))
        ));
    }
}
