//! Descriptor-driven serialization: a logical [`Value`] tree in, a
//! self-contained word buffer out.
//!
//! Emission is bottom-up so references always point forward: leaves
//! first, then each parent splices its children inline or by reference.
//! Maps build their perfect-hash index here and permute the key/value
//! pairs into the index's slot order before emission.

use log::trace;

use crate::perfect_hash::PerfectHashObject;
use crate::reflection::{Descriptor, DescriptorPool, FieldDescriptor, Type};
use crate::serialize::{
    serialize_array, serialize_bytes, serialize_map, serialize_message, serialize_scalar32,
    serialize_scalar64,
};
use crate::value::{MapKey, Value};
use crate::{CacheError, CacheResult, Data, MAX_OBJECT_WORDS};

pub(crate) fn mismatch(field: &str, expected: &'static str) -> CacheError {
    CacheError::SchemaMismatch {
        field: field.to_string(),
        expected,
    }
}

/// Serialize `value` as an instance of `descriptor`.
///
/// For an alias type the envelope is dropped: the output *is* the inner
/// array or map, with a one-word marker for the empty case so the root
/// stays decodable.
pub fn serialize(value: &Value, descriptor: &Descriptor, pool: &DescriptorPool) -> CacheResult<Data> {
    if let Some(alias) = descriptor.alias_field() {
        let mut data = serialize_repeated(value, alias, pool)?;
        if data.is_empty() {
            data.push(if alias.is_map() { 5 << 28 } else { 1 });
        }
        return Ok(data);
    }

    let Value::Message(fields) = value else {
        return Err(mismatch(descriptor.name(), "a message value"));
    };
    let mut parts = vec![Data::new(); descriptor.max_id() as usize + 1];
    for field in descriptor.fields() {
        if field.deprecated {
            continue;
        }
        if let Some(value) = fields.get(&field.name) {
            parts[field.id as usize] = serialize_field(value, field, pool)?;
        }
    }
    serialize_message(parts)
}

/// Serialize one field into its part. Empty repeated fields and empty
/// submessages come out as the empty part, i.e. absent.
pub(crate) fn serialize_field(
    value: &Value,
    field: &FieldDescriptor,
    pool: &DescriptorPool,
) -> CacheResult<Data> {
    if field.repeated {
        return serialize_repeated(value, field, pool);
    }
    let mut unit = serialize_single(value, &field.value, pool, &field.name)?;
    if unit.len() == 1 && matches!(field.value, Type::Message(_)) {
        // absent and default-empty submessages are indistinguishable
        unit.clear();
    }
    Ok(unit)
}

fn serialize_repeated(
    value: &Value,
    field: &FieldDescriptor,
    pool: &DescriptorPool,
) -> CacheResult<Data> {
    if field.is_map() {
        serialize_map_field(value, field, pool)
    } else {
        serialize_array_field(value, field, pool)
    }
}

pub(crate) fn serialize_single(
    value: &Value,
    ty: &Type,
    pool: &DescriptorPool,
    field_name: &str,
) -> CacheResult<Data> {
    match (ty, value) {
        (Type::Message(name), _) => {
            let descriptor = pool
                .find(name)
                .ok_or_else(|| CacheError::UnknownType(name.clone()))?;
            serialize(value, descriptor, pool)
        }
        (Type::String, Value::String(s)) => serialize_bytes(s.as_bytes()),
        (Type::Bytes, Value::Bytes(b)) => serialize_bytes(b),
        (Type::Bool, Value::Bool(v)) => Ok(serialize_scalar32(*v as u32)),
        (Type::Int32, Value::Int32(v)) => Ok(serialize_scalar32(*v as u32)),
        (Type::UInt32, Value::UInt32(v)) => Ok(serialize_scalar32(*v)),
        (Type::Enum, Value::Enum(v)) => Ok(serialize_scalar32(*v as u32)),
        (Type::Float, Value::Float(v)) => Ok(serialize_scalar32(v.to_bits())),
        (Type::Int64, Value::Int64(v)) => Ok(serialize_scalar64(*v as u64)),
        (Type::UInt64, Value::UInt64(v)) => Ok(serialize_scalar64(*v)),
        (Type::Double, Value::Double(v)) => Ok(serialize_scalar64(v.to_bits())),
        (Type::String, _) => Err(mismatch(field_name, "a string value")),
        (Type::Bytes, _) => Err(mismatch(field_name, "a bytes value")),
        (Type::Bool, _) => Err(mismatch(field_name, "a bool value")),
        (Type::Int32, _) => Err(mismatch(field_name, "an int32 value")),
        (Type::UInt32, _) => Err(mismatch(field_name, "a uint32 value")),
        (Type::Enum, _) => Err(mismatch(field_name, "an enum value")),
        (Type::Float, _) => Err(mismatch(field_name, "a float value")),
        (Type::Int64, _) => Err(mismatch(field_name, "an int64 value")),
        (Type::UInt64, _) => Err(mismatch(field_name, "a uint64 value")),
        (Type::Double, _) => Err(mismatch(field_name, "a double value")),
    }
}

fn packed32<F>(
    items: &[Value],
    field_name: &str,
    expected: &'static str,
    get: F,
) -> CacheResult<Data>
where
    F: Fn(&Value) -> Option<u32>,
{
    if 1 + items.len() >= MAX_OBJECT_WORDS {
        return Err(CacheError::TooLong(1 + items.len()));
    }
    let mut out = Data::with_capacity(1 + items.len());
    out.push(((items.len() as u32) << 2) | 1);
    for item in items {
        out.push(get(item).ok_or_else(|| mismatch(field_name, expected))?);
    }
    Ok(out)
}

fn packed64<F>(
    items: &[Value],
    field_name: &str,
    expected: &'static str,
    get: F,
) -> CacheResult<Data>
where
    F: Fn(&Value) -> Option<u64>,
{
    if 1 + items.len() * 2 >= MAX_OBJECT_WORDS {
        return Err(CacheError::TooLong(1 + items.len() * 2));
    }
    let mut out = Data::with_capacity(1 + items.len() * 2);
    out.push(((items.len() as u32) << 2) | 2);
    for item in items {
        let v = get(item).ok_or_else(|| mismatch(field_name, expected))?;
        out.push(v as u32);
        out.push((v >> 32) as u32);
    }
    Ok(out)
}

fn serialize_array_field(
    value: &Value,
    field: &FieldDescriptor,
    pool: &DescriptorPool,
) -> CacheResult<Data> {
    let Value::Array(items) = value else {
        return Err(mismatch(&field.name, "a repeated value"));
    };
    if items.is_empty() {
        return Ok(Data::new());
    }
    match &field.value {
        Type::Message(name) => {
            let descriptor = pool
                .find(name)
                .ok_or_else(|| CacheError::UnknownType(name.clone()))?;
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(serialize(item, descriptor, pool)?);
            }
            serialize_array(&elements)
        }
        Type::String | Type::Bytes => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(serialize_single(item, &field.value, pool, &field.name)?);
            }
            serialize_array(&elements)
        }
        Type::Bool => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let Value::Bool(b) = item else {
                    return Err(mismatch(&field.name, "a bool element"));
                };
                bytes.push(*b as u8);
            }
            serialize_bytes(&bytes)
        }
        Type::Int32 => packed32(items, &field.name, "an int32 element", |v| match v {
            Value::Int32(v) => Some(*v as u32),
            _ => None,
        }),
        Type::UInt32 => packed32(items, &field.name, "a uint32 element", |v| match v {
            Value::UInt32(v) => Some(*v),
            _ => None,
        }),
        Type::Enum => packed32(items, &field.name, "an enum element", |v| match v {
            Value::Enum(v) => Some(*v as u32),
            _ => None,
        }),
        Type::Float => packed32(items, &field.name, "a float element", |v| match v {
            Value::Float(v) => Some(v.to_bits()),
            _ => None,
        }),
        Type::Int64 => packed64(items, &field.name, "an int64 element", |v| match v {
            Value::Int64(v) => Some(*v as u64),
            _ => None,
        }),
        Type::UInt64 => packed64(items, &field.name, "a uint64 element", |v| match v {
            Value::UInt64(v) => Some(*v),
            _ => None,
        }),
        Type::Double => packed64(items, &field.name, "a double element", |v| match v {
            Value::Double(v) => Some(v.to_bits()),
            _ => None,
        }),
    }
}

pub(crate) fn serialize_map_key(key: &MapKey, ty: &Type, field_name: &str) -> CacheResult<Data> {
    match (ty, key) {
        (Type::String, MapKey::String(s)) => serialize_bytes(s.as_bytes()),
        (Type::Bool, MapKey::Bool(v)) => Ok(serialize_scalar32(*v as u32)),
        (Type::Int32, MapKey::Int32(v)) => Ok(serialize_scalar32(*v as u32)),
        (Type::UInt32, MapKey::UInt32(v)) => Ok(serialize_scalar32(*v)),
        (Type::Int64, MapKey::Int64(v)) => Ok(serialize_scalar64(*v as u64)),
        (Type::UInt64, MapKey::UInt64(v)) => Ok(serialize_scalar64(*v)),
        _ => Err(mismatch(field_name, "a key matching the map's key type")),
    }
}

/// The bytes the perfect hash sees for a key: the raw content for string
/// keys, the serialized little-endian words for scalar keys (four bytes
/// at width 1, bools included, eight at width 2).
pub(crate) fn key_hash_bytes(key: &MapKey) -> Vec<u8> {
    match key {
        MapKey::String(s) => s.as_bytes().to_vec(),
        MapKey::Bool(v) => (*v as u32).to_le_bytes().to_vec(),
        MapKey::Int32(v) => (*v as u32).to_le_bytes().to_vec(),
        MapKey::UInt32(v) => v.to_le_bytes().to_vec(),
        MapKey::Int64(v) => (*v as u64).to_le_bytes().to_vec(),
        MapKey::UInt64(v) => v.to_le_bytes().to_vec(),
    }
}

/// Build the index over `(hash_bytes, key, value)` triples, permute the
/// pairs into slot order, and emit the map object.
pub(crate) fn build_map(triples: Vec<(Vec<u8>, Data, Data)>) -> CacheResult<Data> {
    let hash_keys: Vec<&[u8]> = triples.iter().map(|t| t.0.as_slice()).collect();
    // distinct logical keys serialize to distinct bytes, skip the probe
    let index = PerfectHashObject::build(&hash_keys, false)?;
    trace!(
        "map index over {} keys, {} bytes",
        triples.len(),
        index.data().len()
    );

    let n = triples.len();
    let mut keys = vec![Data::new(); n];
    let mut values = vec![Data::new(); n];
    for (bytes, key, value) in triples {
        let pos = index.locate(&bytes) as usize;
        keys[pos] = key;
        values[pos] = value;
    }
    serialize_map(index.data(), &keys, &values)
}

fn serialize_map_field(
    value: &Value,
    field: &FieldDescriptor,
    pool: &DescriptorPool,
) -> CacheResult<Data> {
    let Value::Map(entries) = value else {
        return Err(mismatch(&field.name, "a map value"));
    };
    if entries.is_empty() {
        return Ok(Data::new());
    }
    let key_ty = field.key.as_ref().expect("map fields have a key type");

    let mut triples = Vec::with_capacity(entries.len());
    for (key, val) in entries {
        let k = serialize_map_key(key, key_ty, &field.name)?;
        let v = serialize_single(val, &field.value, pool, &field.name)?;
        triples.push((key_hash_bytes(key), k, v));
    }
    build_map(triples)
}
