//! Descriptor-driven decoding back into logical values, and the
//! schema-aware extent computation the splicing writer relies on.
//!
//! Decoding mirrors the reader's recovery rules: a missing or wrong-width
//! scalar reads as its default, a malformed container surfaces as
//! [`CacheError::BadBuffer`] from the first walk that touches it.

use std::collections::BTreeMap;

use crate::access::{Array, Field, Map, Message, Str};
use crate::reflection::{Descriptor, DescriptorPool, FieldDescriptor, Type};
use crate::value::{MapKey, Value};
use crate::{CacheError, CacheResult};

/// Decode a buffer serialized as an instance of `descriptor`.
///
/// The result holds only present fields; reading a field the writer never
/// emitted leaves no entry in the message map.
pub fn deserialize(data: &[u32], descriptor: &Descriptor, pool: &DescriptorPool) -> CacheResult<Value> {
    if let Some(alias) = descriptor.alias_field() {
        return if alias.is_map() {
            read_map(data, alias, pool)
        } else {
            read_array(data, alias, pool)
        };
    }

    let msg = Message::new(data).ok_or(CacheError::BadBuffer)?;
    let mut fields = BTreeMap::new();
    for field in descriptor.fields() {
        if field.deprecated {
            continue;
        }
        let Some(slot) = msg.field(field.id) else {
            continue;
        };
        let value = if !field.repeated {
            read_single(slot, &field.value, pool)?
        } else {
            let object = slot.object().ok_or(CacheError::BadBuffer)?;
            if field.is_map() {
                read_map(object, field, pool)?
            } else {
                read_array(object, field, pool)?
            }
        };
        fields.insert(field.name.clone(), value);
    }
    Ok(Value::Message(fields))
}

pub(crate) fn read_single(field: Field, ty: &Type, pool: &DescriptorPool) -> CacheResult<Value> {
    Ok(match ty {
        Type::Bool => Value::Bool(field.get::<bool>().unwrap_or_default()),
        Type::Int32 => Value::Int32(field.get::<i32>().unwrap_or_default()),
        Type::UInt32 => Value::UInt32(field.get::<u32>().unwrap_or_default()),
        Type::Int64 => Value::Int64(field.get::<i64>().unwrap_or_default()),
        Type::UInt64 => Value::UInt64(field.get::<u64>().unwrap_or_default()),
        Type::Float => Value::Float(field.get::<f32>().unwrap_or_default()),
        Type::Double => Value::Double(field.get::<f64>().unwrap_or_default()),
        Type::Enum => Value::Enum(field.get::<i32>().unwrap_or_default()),
        Type::String => Value::String(field.get::<&str>().unwrap_or_default().to_string()),
        Type::Bytes => Value::Bytes(field.get::<&[u8]>().unwrap_or_default().to_vec()),
        Type::Message(name) => {
            let descriptor = pool
                .find(name)
                .ok_or_else(|| CacheError::UnknownType(name.clone()))?;
            deserialize(field.object().ok_or(CacheError::BadBuffer)?, descriptor, pool)?
        }
    })
}

pub(crate) fn read_array(
    data: &[u32],
    field: &FieldDescriptor,
    pool: &DescriptorPool,
) -> CacheResult<Value> {
    let mut items = Vec::new();
    match &field.value {
        Type::Bool => {
            if let Some(s) = Str::new(data) {
                items.extend(s.bools().map(Value::Bool));
            }
        }
        Type::Message(name) => {
            let descriptor = pool
                .find(name)
                .ok_or_else(|| CacheError::UnknownType(name.clone()))?;
            if let Some(array) = Array::new(data) {
                items.reserve(array.len());
                for element in array.iter() {
                    let object = element.object().ok_or(CacheError::BadBuffer)?;
                    items.push(deserialize(object, descriptor, pool)?);
                }
            }
        }
        Type::String | Type::Bytes => {
            if let Some(array) = Array::new(data) {
                items.reserve(array.len());
                for element in array.iter() {
                    items.push(match &field.value {
                        Type::String => Value::String(
                            element.get::<&str>().unwrap_or_default().to_string(),
                        ),
                        _ => Value::Bytes(element.get::<&[u8]>().unwrap_or_default().to_vec()),
                    });
                }
            }
        }
        _ => {
            // packed scalars; a width mismatch reads as the empty array
            if let Some(array) = Array::new(data) {
                items.reserve(array.len());
                let expected = match &field.value {
                    Type::Int64 | Type::UInt64 | Type::Double => 2,
                    _ => 1,
                };
                if array.width() == expected {
                    for element in array.iter() {
                        items.push(read_single(element, &field.value, pool)?);
                    }
                }
            }
        }
    }
    Ok(Value::Array(items))
}

/// Decode a map key slot. Key types are validated at registration, and a
/// damaged slot reads as the default like any other scalar miss.
pub(crate) fn read_key(field: Field, ty: &Type) -> MapKey {
    match ty {
        Type::String => MapKey::String(field.get::<&str>().unwrap_or_default().to_string()),
        Type::Bool => MapKey::Bool(field.get::<bool>().unwrap_or_default()),
        Type::Int32 => MapKey::Int32(field.get::<i32>().unwrap_or_default()),
        Type::UInt32 => MapKey::UInt32(field.get::<u32>().unwrap_or_default()),
        Type::Int64 => MapKey::Int64(field.get::<i64>().unwrap_or_default()),
        _ => MapKey::UInt64(field.get::<u64>().unwrap_or_default()),
    }
}

pub(crate) fn read_map(
    data: &[u32],
    field: &FieldDescriptor,
    pool: &DescriptorPool,
) -> CacheResult<Value> {
    let map = Map::new(data).ok_or(CacheError::BadBuffer)?;
    let key_ty = field.key.as_ref().expect("map fields have a key type");
    let mut entries = BTreeMap::new();
    for pair in map.iter() {
        let key = read_key(pair.key(), key_ty);
        let value = read_single(pair.value(), &field.value, pool)?;
        entries.insert(key, value);
    }
    Ok(Value::Map(entries))
}

/// Whether a field's slot holds its whole value, with no referenced
/// payload to chase.
pub(crate) fn is_inline_scalar(field: &FieldDescriptor) -> bool {
    !field.repeated && !matches!(field.value, Type::Message(_) | Type::String | Type::Bytes)
}

/// The minimal word extent proving the whole subtree at `data` is
/// well-formed: the object's own span extended over every referenced
/// payload the schema says is reachable.
///
/// This is what lets the editing layer splice an untouched subtree
/// verbatim into fresh output.
pub fn detect(data: &[u32], descriptor: &Descriptor, pool: &DescriptorPool) -> Option<usize> {
    if let Some(alias) = descriptor.alias_field() {
        return detect_repeated(data, alias, pool);
    }
    let mut extent = Message::detect(data)?;
    let msg = Message::new(data)?;
    for field in descriptor.fields() {
        if field.deprecated || is_inline_scalar(field) {
            continue;
        }
        let Some(slot) = msg.field(field.id) else {
            continue;
        };
        let object = slot.object()?;
        let offset = data.len() - object.len();
        extent = extent.max(offset + detect_object(object, field, pool)?);
    }
    Some(extent)
}

/// Extent of the object a (non-scalar) field's slot addresses.
pub(crate) fn detect_object(
    data: &[u32],
    field: &FieldDescriptor,
    pool: &DescriptorPool,
) -> Option<usize> {
    if field.repeated {
        return detect_repeated(data, field, pool);
    }
    match &field.value {
        Type::String | Type::Bytes => Str::detect(data),
        Type::Message(name) => detect(data, pool.find(name)?, pool),
        _ => None,
    }
}

fn detect_repeated(data: &[u32], field: &FieldDescriptor, pool: &DescriptorPool) -> Option<usize> {
    if field.is_map() {
        return detect_map(data, field, pool);
    }
    match &field.value {
        Type::Bool => Str::detect(data),
        Type::String | Type::Bytes => detect_elementwise(data, |object| Str::detect(object)),
        Type::Message(name) => {
            let descriptor = pool.find(name)?;
            detect_elementwise(data, |object| detect(object, descriptor, pool))
        }
        _ => Array::detect(data),
    }
}

fn detect_elementwise<F>(data: &[u32], per_element: F) -> Option<usize>
where
    F: Fn(&[u32]) -> Option<usize>,
{
    let array = Array::new(data)?;
    let mut extent = Array::detect(data)?;
    for element in array.iter() {
        let object = element.object()?;
        let offset = data.len() - object.len();
        extent = extent.max(offset + per_element(object)?);
    }
    Some(extent)
}

fn detect_map(data: &[u32], field: &FieldDescriptor, pool: &DescriptorPool) -> Option<usize> {
    let map = Map::new(data)?;
    let mut extent = Map::detect(data)?;
    let deep_keys = matches!(field.key, Some(Type::String));
    let deep_values = matches!(field.value, Type::Message(_) | Type::String | Type::Bytes);
    if !deep_keys && !deep_values {
        return Some(extent);
    }
    for pair in map.iter() {
        if deep_keys {
            let object = pair.key().object()?;
            let offset = data.len() - object.len();
            extent = extent.max(offset + Str::detect(object)?);
        }
        if deep_values {
            let object = pair.value().object()?;
            let offset = data.len() - object.len();
            let sub = match &field.value {
                Type::Message(name) => detect(object, pool.find(name)?, pool)?,
                _ => Str::detect(object)?,
            };
            extent = extent.max(offset + sub);
        }
    }
    Some(extent)
}
