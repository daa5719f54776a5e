//! Editing over a serialized buffer.
//!
//! [`MessageEx`] borrows a clean buffer and keeps a sparse set of field
//! overrides. Reads go through to the buffer until a field is touched;
//! serialization re-emits touched fields from their logical values and
//! splices every untouched subtree verbatim out of the source. A tree
//! with zero touches re-serializes to the exact original bytes, and a
//! single leaf edit only rewrites that leaf's subtree plus the offsets
//! and prefix sums above it.
//!
//! [`ArrayEx`] and [`MapEx`] do the same per element and per entry; a map
//! whose key set is untouched reuses its perfect-hash index and pair
//! order outright, so value edits never re-run the index build.

use std::collections::BTreeMap;

use crate::access::{Field, Map, Message, Str};
use crate::read;
use crate::reflection::{Descriptor, DescriptorPool, FieldDescriptor, Type};
use crate::serialize::{serialize_array, serialize_map, serialize_message};
use crate::value::{MapKey, Value};
use crate::write;
use crate::{CacheError, CacheResult, Data};

enum Node<'a, 'p> {
    /// Explicitly cleared: serializes as absent.
    Absent,
    /// Replaced wholesale by a logical value.
    Value(Value),
    Message(MessageEx<'a, 'p>),
    Array(ArrayEx<'a, 'p>),
    Map(MapEx<'a, 'p>),
}

impl Node<'_, '_> {
    fn to_value(&self) -> CacheResult<Option<Value>> {
        match self {
            Node::Absent => Ok(None),
            Node::Value(v) => Ok(Some(v.clone())),
            Node::Message(m) => m.to_value().map(Some),
            Node::Array(a) => a.to_value().map(Some),
            Node::Map(m) => m.to_value().map(Some),
        }
    }

    /// Serialize with field-level semantics (empty repeated fields and
    /// empty submessages become absent).
    fn field_data(&self, field: &FieldDescriptor, pool: &DescriptorPool) -> CacheResult<Data> {
        match self {
            Node::Absent => Ok(Data::new()),
            Node::Value(v) => write::serialize_field(v, field, pool),
            Node::Message(m) => {
                let mut data = m.serialize()?;
                if data.len() == 1 {
                    data.clear();
                }
                Ok(data)
            }
            Node::Array(a) => a.serialize(),
            Node::Map(m) => m.serialize(),
        }
    }
}

/// Serialize an override that sits in element or map-value position,
/// where empty messages are kept rather than trimmed.
fn single_node_data(
    node: &Node<'_, '_>,
    value_ty: &Type,
    pool: &DescriptorPool,
    field_name: &str,
) -> CacheResult<Data> {
    match node {
        Node::Value(v) => write::serialize_single(v, value_ty, pool, field_name),
        Node::Message(m) => m.serialize(),
        _ => Err(write::mismatch(field_name, "a single value override")),
    }
}

/// Copy one untouched slot out of the source: inline words for scalars,
/// the detected subtree for everything else.
fn splice_single(slot: Field<'_>, ty: &Type, pool: &DescriptorPool) -> CacheResult<Data> {
    match ty {
        Type::String | Type::Bytes => {
            let object = slot.object().ok_or(CacheError::BadBuffer)?;
            let extent = Str::detect(object).ok_or(CacheError::BadBuffer)?;
            Ok(object[..extent].to_vec())
        }
        Type::Message(name) => {
            let object = slot.object().ok_or(CacheError::BadBuffer)?;
            let extent = read::detect(object, resolve(pool, name)?, pool).ok_or(CacheError::BadBuffer)?;
            Ok(object[..extent].to_vec())
        }
        _ => Ok(slot.value().ok_or(CacheError::BadBuffer)?.to_vec()),
    }
}

fn resolve<'p>(pool: &'p DescriptorPool, name: &str) -> CacheResult<&'p Descriptor> {
    pool.find(name)
        .ok_or_else(|| CacheError::UnknownType(name.to_string()))
}

/// A message with read-through views and sparse overrides.
pub struct MessageEx<'a, 'p> {
    pool: &'p DescriptorPool,
    descriptor: &'p Descriptor,
    source: Option<&'a [u32]>,
    overrides: BTreeMap<u32, Node<'a, 'p>>,
}

impl<'a, 'p> MessageEx<'a, 'p> {
    /// An empty message with no backing buffer.
    pub fn new(pool: &'p DescriptorPool, descriptor: &'p Descriptor) -> CacheResult<Self> {
        if descriptor.is_alias() {
            return Err(CacheError::BadAlias(descriptor.name().to_string()));
        }
        Ok(Self {
            pool,
            descriptor,
            source: None,
            overrides: BTreeMap::new(),
        })
    }

    /// Wrap a serialized buffer. Reads are lazy; nothing is decoded here.
    pub fn parse(
        data: &'a [u32],
        pool: &'p DescriptorPool,
        descriptor: &'p Descriptor,
    ) -> CacheResult<Self> {
        if descriptor.is_alias() {
            return Err(CacheError::BadAlias(descriptor.name().to_string()));
        }
        Message::new(data).ok_or(CacheError::BadBuffer)?;
        Ok(Self {
            pool,
            descriptor,
            source: Some(data),
            overrides: BTreeMap::new(),
        })
    }

    pub fn descriptor(&self) -> &'p Descriptor {
        self.descriptor
    }

    pub fn is_touched(&self) -> bool {
        !self.overrides.is_empty()
    }

    fn field_desc(&self, name: &str) -> CacheResult<&'p FieldDescriptor> {
        self.descriptor
            .fields()
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| write::mismatch(name, "a declared field"))
    }

    fn source_slot(&self, id: u32) -> Option<Field<'a>> {
        let msg = Message::new(self.source?)?;
        msg.field(id)
    }

    /// The current value of a field, override or buffer. Absent fields
    /// are `Ok(None)`.
    pub fn get(&self, name: &str) -> CacheResult<Option<Value>> {
        let field = self.field_desc(name)?;
        if let Some(node) = self.overrides.get(&field.id) {
            return node.to_value();
        }
        let Some(slot) = self.source_slot(field.id) else {
            return Ok(None);
        };
        let value = if !field.repeated {
            read::read_single(slot, &field.value, self.pool)?
        } else {
            let object = slot.object().ok_or(CacheError::BadBuffer)?;
            if field.is_map() {
                read::read_map(object, field, self.pool)?
            } else {
                read::read_array(object, field, self.pool)?
            }
        };
        Ok(Some(value))
    }

    /// Replace a field with a logical value.
    pub fn set(&mut self, name: &str, value: Value) -> CacheResult<()> {
        let field = self.field_desc(name)?;
        self.overrides.insert(field.id, Node::Value(value));
        Ok(())
    }

    /// Make a field absent.
    pub fn clear(&mut self, name: &str) -> CacheResult<()> {
        let field = self.field_desc(name)?;
        self.overrides.insert(field.id, Node::Absent);
        Ok(())
    }

    /// An editable view of a singular message field, materialized over
    /// the source bytes on first touch.
    pub fn message_mut(&mut self, name: &str) -> CacheResult<&mut MessageEx<'a, 'p>> {
        let field = self.field_desc(name)?;
        if field.repeated {
            return Err(write::mismatch(name, "a singular message field"));
        }
        let Type::Message(type_name) = &field.value else {
            return Err(write::mismatch(name, "a message field"));
        };
        let pool = self.pool;
        let descriptor = resolve(pool, type_name)?;
        if !self.overrides.contains_key(&field.id) {
            let nested = match self.source_slot(field.id) {
                Some(slot) => {
                    let object = slot.object().ok_or(CacheError::BadBuffer)?;
                    MessageEx::parse(object, pool, descriptor)?
                }
                None => MessageEx::new(pool, descriptor)?,
            };
            self.overrides.insert(field.id, Node::Message(nested));
        }
        match self.overrides.get_mut(&field.id) {
            Some(Node::Message(m)) => Ok(m),
            _ => Err(write::mismatch(name, "a message override")),
        }
    }

    /// An editable view of a repeated (non-map) field.
    pub fn array_mut(&mut self, name: &str) -> CacheResult<&mut ArrayEx<'a, 'p>> {
        let field = self.field_desc(name)?;
        if !field.repeated || field.is_map() {
            return Err(write::mismatch(name, "a repeated field"));
        }
        if !self.overrides.contains_key(&field.id) {
            let nested = match self.source_slot(field.id) {
                Some(slot) => {
                    let object = slot.object().ok_or(CacheError::BadBuffer)?;
                    ArrayEx::parse(object, self.pool, field)
                }
                None => ArrayEx::new(self.pool, field),
            };
            self.overrides.insert(field.id, Node::Array(nested));
        }
        match self.overrides.get_mut(&field.id) {
            Some(Node::Array(a)) => Ok(a),
            _ => Err(write::mismatch(name, "an array override")),
        }
    }

    /// An editable view of a map field.
    pub fn map_mut(&mut self, name: &str) -> CacheResult<&mut MapEx<'a, 'p>> {
        let field = self.field_desc(name)?;
        if !field.is_map() {
            return Err(write::mismatch(name, "a map field"));
        }
        if !self.overrides.contains_key(&field.id) {
            let nested = match self.source_slot(field.id) {
                Some(slot) => {
                    let object = slot.object().ok_or(CacheError::BadBuffer)?;
                    MapEx::parse(object, self.pool, field)
                }
                None => MapEx::new(self.pool, field),
            };
            self.overrides.insert(field.id, Node::Map(nested));
        }
        match self.overrides.get_mut(&field.id) {
            Some(Node::Map(m)) => Ok(m),
            _ => Err(write::mismatch(name, "a map override")),
        }
    }

    /// Re-serialize. An untouched tree is a verbatim copy of the source.
    pub fn serialize(&self) -> CacheResult<Data> {
        if self.overrides.is_empty() {
            if let Some(source) = self.source {
                let extent = read::detect(source, self.descriptor, self.pool)
                    .ok_or(CacheError::BadBuffer)?;
                return Ok(source[..extent].to_vec());
            }
        }
        let mut parts = vec![Data::new(); self.descriptor.max_id() as usize + 1];
        for field in self.descriptor.fields() {
            if field.deprecated {
                continue;
            }
            let part = &mut parts[field.id as usize];
            if let Some(node) = self.overrides.get(&field.id) {
                *part = node.field_data(field, self.pool)?;
            } else if let Some(slot) = self.source_slot(field.id) {
                *part = if read::is_inline_scalar(field) {
                    slot.value().ok_or(CacheError::BadBuffer)?.to_vec()
                } else {
                    let object = slot.object().ok_or(CacheError::BadBuffer)?;
                    let extent = read::detect_object(object, field, self.pool)
                        .ok_or(CacheError::BadBuffer)?;
                    object[..extent].to_vec()
                };
            }
        }
        serialize_message(parts)
    }

    /// Materialize the whole message, overrides applied.
    pub fn to_value(&self) -> CacheResult<Value> {
        let mut fields = BTreeMap::new();
        for field in self.descriptor.fields() {
            if field.deprecated {
                continue;
            }
            if let Some(value) = self.get(&field.name)? {
                fields.insert(field.name.clone(), value);
            }
        }
        Ok(Value::Message(fields))
    }
}

enum Item<'a, 'p> {
    /// An untouched element, borrowed from the source buffer.
    Clean(&'a [u32]),
    Node(Node<'a, 'p>),
}

fn object_elements(field: &FieldDescriptor) -> bool {
    matches!(field.value, Type::Message(_) | Type::String | Type::Bytes)
}

/// A repeated field with per-element edits.
///
/// Scalar and bool arrays are packed on the wire, so any edit rebuilds the
/// body from logical values; element-level splicing applies to string,
/// bytes, and message elements.
pub struct ArrayEx<'a, 'p> {
    pool: &'p DescriptorPool,
    field: &'p FieldDescriptor,
    source: Option<&'a [u32]>,
    items: Option<Vec<Item<'a, 'p>>>,
}

impl<'a, 'p> ArrayEx<'a, 'p> {
    pub(crate) fn new(pool: &'p DescriptorPool, field: &'p FieldDescriptor) -> Self {
        Self {
            pool,
            field,
            source: None,
            items: Some(Vec::new()),
        }
    }

    pub(crate) fn parse(data: &'a [u32], pool: &'p DescriptorPool, field: &'p FieldDescriptor) -> Self {
        Self {
            pool,
            field,
            source: Some(data),
            items: None,
        }
    }

    pub fn len(&self) -> usize {
        if let Some(items) = &self.items {
            return items.len();
        }
        let data = self.source.expect("clean arrays have a source");
        if matches!(self.field.value, Type::Bool) {
            Str::new(data).map(|s| s.len()).unwrap_or(0)
        } else {
            crate::access::Array::new(data).map(|a| a.len()).unwrap_or(0)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn materialize(&mut self) -> CacheResult<()> {
        if self.items.is_some() {
            return Ok(());
        }
        let data = self.source.expect("clean arrays have a source");
        let mut items = Vec::new();
        if object_elements(self.field) {
            let array = crate::access::Array::new(data).ok_or(CacheError::BadBuffer)?;
            for element in array.iter() {
                items.push(Item::Clean(element.object().ok_or(CacheError::BadBuffer)?));
            }
        } else {
            let Value::Array(values) = read::read_array(data, self.field, self.pool)? else {
                return Err(CacheError::BadBuffer);
            };
            items.extend(values.into_iter().map(|v| Item::Node(Node::Value(v))));
        }
        self.items = Some(items);
        Ok(())
    }

    fn element_value(&self, object: &[u32]) -> CacheResult<Value> {
        match &self.field.value {
            Type::Message(name) => {
                read::deserialize(object, resolve(self.pool, name)?, self.pool)
            }
            Type::String => Ok(Value::String(
                Str::new(object)
                    .and_then(|s| s.text())
                    .unwrap_or_default()
                    .to_string(),
            )),
            Type::Bytes => Ok(Value::Bytes(
                Str::new(object).map(|s| s.bytes().to_vec()).unwrap_or_default(),
            )),
            _ => Err(CacheError::BadBuffer),
        }
    }

    pub fn get(&self, pos: usize) -> CacheResult<Option<Value>> {
        match &self.items {
            Some(items) => match items.get(pos) {
                None => Ok(None),
                Some(Item::Clean(object)) => self.element_value(object).map(Some),
                Some(Item::Node(node)) => node.to_value(),
            },
            None => {
                let data = self.source.expect("clean arrays have a source");
                let Value::Array(values) = read::read_array(data, self.field, self.pool)? else {
                    return Err(CacheError::BadBuffer);
                };
                Ok(values.into_iter().nth(pos))
            }
        }
    }

    pub fn set(&mut self, pos: usize, value: Value) -> CacheResult<()> {
        self.materialize()?;
        let items = self.items.as_mut().unwrap();
        if pos >= items.len() {
            return Err(write::mismatch(&self.field.name, "an element in range"));
        }
        items[pos] = Item::Node(Node::Value(value));
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> CacheResult<()> {
        self.materialize()?;
        self.items.as_mut().unwrap().push(Item::Node(Node::Value(value)));
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) -> CacheResult<()> {
        self.materialize()?;
        self.items.as_mut().unwrap().truncate(len);
        Ok(())
    }

    /// Editable view of one message element.
    pub fn message_mut(&mut self, pos: usize) -> CacheResult<&mut MessageEx<'a, 'p>> {
        let Type::Message(type_name) = &self.field.value else {
            return Err(write::mismatch(&self.field.name, "a message element"));
        };
        let pool = self.pool;
        let descriptor = resolve(pool, type_name)?;
        self.materialize()?;
        let items = self.items.as_mut().unwrap();
        let Some(item) = items.get_mut(pos) else {
            return Err(write::mismatch(&self.field.name, "an element in range"));
        };
        let clean = match item {
            Item::Clean(object) => Some(*object),
            _ => None,
        };
        if let Some(object) = clean {
            *item = Item::Node(Node::Message(MessageEx::parse(object, pool, descriptor)?));
        }
        match item {
            Item::Node(Node::Message(m)) => Ok(m),
            _ => Err(write::mismatch(&self.field.name, "a message override")),
        }
    }

    pub fn to_value(&self) -> CacheResult<Value> {
        match &self.items {
            None => {
                let data = self.source.expect("clean arrays have a source");
                read::read_array(data, self.field, self.pool)
            }
            Some(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(match item {
                        Item::Clean(object) => self.element_value(object)?,
                        Item::Node(node) => node
                            .to_value()?
                            .ok_or_else(|| write::mismatch(&self.field.name, "a present element"))?,
                    });
                }
                Ok(Value::Array(values))
            }
        }
    }

    /// Emit the array. Untouched arrays splice verbatim; otherwise clean
    /// elements copy their detected extents and edited ones re-serialize.
    pub fn serialize(&self) -> CacheResult<Data> {
        let Some(items) = &self.items else {
            let data = self.source.expect("clean arrays have a source");
            let extent =
                read::detect_object(data, self.field, self.pool).ok_or(CacheError::BadBuffer)?;
            return Ok(data[..extent].to_vec());
        };
        if items.is_empty() {
            return Ok(Data::new());
        }
        if !object_elements(self.field) {
            return write::serialize_field(&self.to_value()?, self.field, self.pool);
        }
        let mut elements = Vec::with_capacity(items.len());
        for item in items {
            elements.push(match item {
                Item::Clean(object) => {
                    let extent = self.element_extent(object).ok_or(CacheError::BadBuffer)?;
                    object[..extent].to_vec()
                }
                Item::Node(node) => {
                    single_node_data(node, &self.field.value, self.pool, &self.field.name)?
                }
            });
        }
        serialize_array(&elements)
    }

    fn element_extent(&self, object: &[u32]) -> Option<usize> {
        match &self.field.value {
            Type::String | Type::Bytes => Str::detect(object),
            Type::Message(name) => read::detect(object, self.pool.find(name)?, self.pool),
            _ => None,
        }
    }
}

struct Slot<'a, 'p> {
    /// Pair position in the source body, if the key came from there.
    pos: Option<usize>,
    /// Override, if the value (or the whole entry) was touched.
    node: Option<Node<'a, 'p>>,
}

/// A map field with per-entry edits.
///
/// As long as the key set is untouched, the source's perfect-hash index
/// and pair order are reused verbatim; inserting or removing a key
/// rebuilds the index.
pub struct MapEx<'a, 'p> {
    pool: &'p DescriptorPool,
    field: &'p FieldDescriptor,
    source: Option<&'a [u32]>,
    entries: BTreeMap<MapKey, Slot<'a, 'p>>,
    materialized: bool,
    keys_touched: bool,
}

impl<'a, 'p> MapEx<'a, 'p> {
    pub(crate) fn new(pool: &'p DescriptorPool, field: &'p FieldDescriptor) -> Self {
        Self {
            pool,
            field,
            source: None,
            entries: BTreeMap::new(),
            materialized: true,
            keys_touched: false,
        }
    }

    pub(crate) fn parse(data: &'a [u32], pool: &'p DescriptorPool, field: &'p FieldDescriptor) -> Self {
        Self {
            pool,
            field,
            source: Some(data),
            entries: BTreeMap::new(),
            materialized: false,
            keys_touched: false,
        }
    }

    fn key_ty(&self) -> &'p Type {
        self.field.key.as_ref().expect("map fields have a key type")
    }

    fn source_map(&self) -> CacheResult<Map<'a>> {
        let data = self.source.ok_or(CacheError::BadBuffer)?;
        Map::new(data).ok_or(CacheError::BadBuffer)
    }

    fn materialize(&mut self) -> CacheResult<()> {
        if self.materialized {
            return Ok(());
        }
        let map = self.source_map()?;
        let key_ty = self.key_ty();
        for (pos, pair) in map.iter().enumerate() {
            let key = read::read_key(pair.key(), key_ty);
            self.entries.insert(
                key,
                Slot {
                    pos: Some(pos),
                    node: None,
                },
            );
        }
        self.materialized = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.materialized {
            self.entries.len()
        } else {
            self.source_map().map(|m| m.len()).unwrap_or(0)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn source_value(&self, pos: usize) -> CacheResult<Value> {
        let map = self.source_map()?;
        let pair = map.at(pos).ok_or(CacheError::BadBuffer)?;
        read::read_single(pair.value(), &self.field.value, self.pool)
    }

    pub fn get(&self, key: &MapKey) -> CacheResult<Option<Value>> {
        if !self.materialized {
            let map = self.source_map()?;
            let Some(pair) = find_pair(&map, key) else {
                return Ok(None);
            };
            return read::read_single(pair.value(), &self.field.value, self.pool).map(Some);
        }
        match self.entries.get(key) {
            None => Ok(None),
            Some(Slot {
                node: Some(node), ..
            }) => node.to_value(),
            Some(Slot { pos: Some(pos), .. }) => self.source_value(*pos).map(Some),
            Some(Slot {
                pos: None,
                node: None,
            }) => Err(CacheError::BadBuffer),
        }
    }

    pub fn insert(&mut self, key: MapKey, value: Value) -> CacheResult<()> {
        self.materialize()?;
        match self.entries.get_mut(&key) {
            Some(slot) => {
                slot.node = Some(Node::Value(value));
            }
            None => {
                self.keys_touched = true;
                self.entries.insert(
                    key,
                    Slot {
                        pos: None,
                        node: Some(Node::Value(value)),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &MapKey) -> CacheResult<bool> {
        self.materialize()?;
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.keys_touched = true;
        }
        Ok(removed)
    }

    /// Editable view of one message value.
    pub fn value_mut(&mut self, key: &MapKey) -> CacheResult<&mut MessageEx<'a, 'p>> {
        let Type::Message(type_name) = &self.field.value else {
            return Err(write::mismatch(&self.field.name, "a message value"));
        };
        let pool = self.pool;
        let descriptor = resolve(pool, type_name)?;
        self.materialize()?;

        let needs_parse = match self.entries.get(key) {
            None => return Err(write::mismatch(&self.field.name, "a present key")),
            Some(slot) => slot.node.is_none(),
        };
        if needs_parse {
            let pos = self.entries[key].pos.ok_or(CacheError::BadBuffer)?;
            let map = Map::new(self.source.ok_or(CacheError::BadBuffer)?)
                .ok_or(CacheError::BadBuffer)?;
            let pair = map.at(pos).ok_or(CacheError::BadBuffer)?;
            let object = pair.value().object().ok_or(CacheError::BadBuffer)?;
            let nested = MessageEx::parse(object, pool, descriptor)?;
            self.entries.get_mut(key).unwrap().node = Some(Node::Message(nested));
        }
        match self.entries.get_mut(key).unwrap().node.as_mut() {
            Some(Node::Message(m)) => Ok(m),
            _ => Err(write::mismatch(&self.field.name, "a message override")),
        }
    }

    pub fn to_value(&self) -> CacheResult<Value> {
        if !self.materialized {
            let data = self.source.ok_or(CacheError::BadBuffer)?;
            return read::read_map(data, self.field, self.pool);
        }
        let mut entries = BTreeMap::new();
        for (key, slot) in &self.entries {
            let value = match &slot.node {
                Some(node) => node
                    .to_value()?
                    .ok_or_else(|| write::mismatch(&self.field.name, "a present value"))?,
                None => self.source_value(slot.pos.ok_or(CacheError::BadBuffer)?)?,
            };
            entries.insert(key.clone(), value);
        }
        Ok(Value::Map(entries))
    }

    /// Emit the map.
    ///
    /// Untouched: verbatim splice. Values-only edits: the index bytes and
    /// pair order are copied from the source and only edited values are
    /// re-serialized. Key edits: full rebuild with a fresh index.
    pub fn serialize(&self) -> CacheResult<Data> {
        if !self.materialized {
            let data = self.source.ok_or(CacheError::BadBuffer)?;
            let extent =
                read::detect_object(data, self.field, self.pool).ok_or(CacheError::BadBuffer)?;
            return Ok(data[..extent].to_vec());
        }
        if self.entries.is_empty() {
            return Ok(Data::new());
        }
        let key_ty = self.key_ty();

        if !self.keys_touched {
            if let Some(data) = self.source {
                let map = Map::new(data).ok_or(CacheError::BadBuffer)?;
                let n = map.len();
                let mut overrides: BTreeMap<usize, &Node<'a, 'p>> = BTreeMap::new();
                for slot in self.entries.values() {
                    if let (Some(pos), Some(node)) = (slot.pos, slot.node.as_ref()) {
                        overrides.insert(pos, node);
                    }
                }
                let mut keys = vec![Data::new(); n];
                let mut values = vec![Data::new(); n];
                for (pos, pair) in map.iter().enumerate() {
                    keys[pos] = splice_single(pair.key(), key_ty, self.pool)?;
                    values[pos] = match overrides.get(&pos) {
                        Some(node) => {
                            single_node_data(node, &self.field.value, self.pool, &self.field.name)?
                        }
                        None => splice_single(pair.value(), &self.field.value, self.pool)?,
                    };
                }
                return serialize_map(map.index_bytes(), &keys, &values);
            }
        }

        let mut triples = Vec::with_capacity(self.entries.len());
        for (key, slot) in &self.entries {
            let k = write::serialize_map_key(key, key_ty, &self.field.name)?;
            let v = match &slot.node {
                Some(node) => {
                    single_node_data(node, &self.field.value, self.pool, &self.field.name)?
                }
                None => {
                    let map = self.source_map()?;
                    let pair = map
                        .at(slot.pos.ok_or(CacheError::BadBuffer)?)
                        .ok_or(CacheError::BadBuffer)?;
                    splice_single(pair.value(), &self.field.value, self.pool)?
                }
            };
            triples.push((write::key_hash_bytes(key), k, v));
        }
        write::build_map(triples)
    }
}

fn find_pair<'a>(map: &Map<'a>, key: &MapKey) -> Option<crate::access::Pair<'a>> {
    match key {
        MapKey::String(s) => map.find(s.as_str()),
        MapKey::Bool(v) => map.find(v),
        MapKey::Int32(v) => map.find(v),
        MapKey::UInt32(v) => map.find(v),
        MapKey::Int64(v) => map.find(v),
        MapKey::UInt64(v) => map.find(v),
    }
}
