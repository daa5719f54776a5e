//! Owned logical values: what the writer consumes and the decoder
//! produces when no generated bindings are in play.

use std::collections::BTreeMap;

/// One node of a logical tree.
///
/// A message holds only its *present* fields, keyed by field name; absent
/// and present-with-default are different states, and an empty submessage
/// field is indistinguishable from an absent one after a round trip.
/// Map equality is by key set, independent of insertion order.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Enum(i32),
    String(String),
    Bytes(Vec<u8>),
    Message(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
}

impl Value {
    pub fn message<K, I>(fields: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Message(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    pub fn map<K, I>(entries: I) -> Value
    where
        K: Into<MapKey>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    pub fn array<T, I>(items: I) -> Value
    where
        T: Into<Value>,
        I: IntoIterator<Item = T>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// The field with the given name, for message values.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Message(fields) => fields.get(name),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Value {
                Value::$variant(v.into())
            }
        }
    };
}

value_from!(bool, Bool);
value_from!(i32, Int32);
value_from!(u32, UInt32);
value_from!(i64, Int64);
value_from!(u64, UInt64);
value_from!(f32, Float);
value_from!(f64, Double);
value_from!(String, String);
value_from!(&str, String);
value_from!(Vec<u8>, Bytes);

/// A map key: the hashable subset of [`Value`], with a total order so key
/// sets compare deterministically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    String(String),
}

macro_rules! key_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for MapKey {
            fn from(v: $t) -> MapKey {
                MapKey::$variant(v.into())
            }
        }
    };
}

key_from!(bool, Bool);
key_from!(i32, Int32);
key_from!(i64, Int64);
key_from!(u32, UInt32);
key_from!(u64, UInt64);
key_from!(String, String);
key_from!(&str, String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_equality_ignores_order() {
        let a = Value::map([("k1", Value::Int32(1)), ("k2", Value::Int32(2))]);
        let b = Value::map([("k2", Value::Int32(2)), ("k1", Value::Int32(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn message_fields() {
        let m = Value::message([("x", Value::Int32(1))]);
        assert_eq!(m.field("x"), Some(&Value::Int32(1)));
        assert_eq!(m.field("y"), None);
    }
}
