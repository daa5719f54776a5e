//! The schema model the code generator hands to the core.
//!
//! The crate never parses `.proto` text; an external generator (or the
//! host application) builds [`Descriptor`]s and registers them in a
//! [`DescriptorPool`]. Field ids here are zero-based: proto field number
//! `n` occupies slot `n - 1`.

use std::collections::{HashMap, HashSet};

use crate::{CacheError, CacheResult, MAX_FIELD_ID};

/// A field's wire type. Sub-message and map-value message types refer to
/// their target by fully-qualified name, resolved through the pool at
/// (de)serialization time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Enum,
    String,
    Bytes,
    Message(String),
}

impl Type {
    /// Map keys must have a deterministic byte serialization to hash;
    /// floats and messages do not qualify.
    pub fn can_be_key(&self) -> bool {
        matches!(
            self,
            Type::Bool | Type::Int32 | Type::UInt32 | Type::Int64 | Type::UInt64 | Type::String
        )
    }
}

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub id: u32,
    pub name: String,
    pub repeated: bool,
    /// `Some` makes this a map field with the given key type.
    pub key: Option<Type>,
    pub value: Type,
    pub deprecated: bool,
}

impl FieldDescriptor {
    pub fn new(id: u32, name: impl Into<String>, value: Type) -> Self {
        Self {
            id,
            name: name.into(),
            repeated: false,
            key: None,
            value,
            deprecated: false,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    /// Turn this into a map field. Maps are repeated by definition.
    pub fn map(mut self, key: Type) -> Self {
        self.key = Some(key);
        self.repeated = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn is_map(&self) -> bool {
        self.key.is_some()
    }
}

/// One message type: a name and its fields.
///
/// A message whose only field is repeated and named `_` is an *alias*: its
/// encoding is the bare array or map that field would reference, with no
/// message envelope around it.
#[derive(Clone, Debug)]
pub struct Descriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn is_alias(&self) -> bool {
        self.alias_field().is_some()
    }

    pub fn alias_field(&self) -> Option<&FieldDescriptor> {
        match &self.fields[..] {
            [only] if only.name == "_" && only.repeated => Some(only),
            _ => None,
        }
    }

    pub fn max_id(&self) -> u32 {
        self.fields.iter().map(|f| f.id).max().unwrap_or(0)
    }
}

/// Registered message types, looked up by fully-qualified name.
#[derive(Debug, Default)]
pub struct DescriptorPool {
    pool: HashMap<String, Descriptor>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add one message type.
    ///
    /// Field ids must be unique, in range, and reasonably dense: a schema
    /// with `max_number - field_count > 6` and `max_number > 2 * field_count`
    /// is rejected here rather than failing late in the writer, since it
    /// would burn a header section word on every couple of present fields.
    pub fn register(&mut self, descriptor: Descriptor) -> CacheResult<()> {
        if self.pool.contains_key(&descriptor.name) {
            return Err(CacheError::DuplicateType(descriptor.name));
        }
        if descriptor.fields.is_empty() {
            return Err(CacheError::BadAlias(descriptor.name));
        }

        if let Some(alias) = descriptor.alias_field() {
            if alias.id != 0 {
                return Err(CacheError::BadFieldId(alias.id));
            }
            Self::check_map(alias, &descriptor.name)?;
        } else {
            let mut seen = HashSet::with_capacity(descriptor.fields.len());
            for field in &descriptor.fields {
                if field.name == "_" {
                    return Err(CacheError::BadAlias(descriptor.name));
                }
                if field.id > MAX_FIELD_ID || !seen.insert(field.id) {
                    return Err(CacheError::BadFieldId(field.id));
                }
                Self::check_map(field, &descriptor.name)?;
            }
            let count = descriptor.fields.len();
            let max_number = descriptor.max_id() + 1;
            if max_number as usize - count > 6 && max_number as usize > count * 2 {
                return Err(CacheError::SparseFieldIds {
                    max_id: max_number,
                    count,
                });
            }
        }

        self.pool.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    fn check_map(field: &FieldDescriptor, owner: &str) -> CacheResult<()> {
        if let Some(key) = &field.key {
            if !key.can_be_key() {
                return Err(CacheError::SchemaMismatch {
                    field: format!("{owner}.{}", field.name),
                    expected: "a hashable map key type",
                });
            }
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Descriptor> {
        self.pool.get(name)
    }
}
