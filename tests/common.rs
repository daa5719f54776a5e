//! Shared schema and fixtures for the integration tests.
#![allow(dead_code)]

use protocache::{Descriptor, DescriptorPool, FieldDescriptor, Type, Value};

/// The test schema: a small leaf message, three alias types, and a wide
/// message exercising every field kind, with ids 19..=24 declared but
/// never populated by the fixtures.
pub fn test_pool() -> DescriptorPool {
    let mut pool = DescriptorPool::new();
    pool.register(Descriptor::new(
        "test.Small",
        vec![
            FieldDescriptor::new(0, "i32", Type::Int32),
            FieldDescriptor::new(1, "flag", Type::Bool),
            FieldDescriptor::new(2, "str", Type::String),
        ],
    ))
    .unwrap();
    pool.register(Descriptor::new(
        "test.Vec1D",
        vec![FieldDescriptor::new(0, "_", Type::Float).repeated()],
    ))
    .unwrap();
    pool.register(Descriptor::new(
        "test.Vec2D",
        vec![FieldDescriptor::new(0, "_", Type::Message("test.Vec1D".into())).repeated()],
    ))
    .unwrap();
    pool.register(Descriptor::new(
        "test.ArrMap",
        vec![FieldDescriptor::new(0, "_", Type::Message("test.Vec1D".into())).map(Type::String)],
    ))
    .unwrap();
    pool.register(Descriptor::new(
        "test.Main",
        vec![
            FieldDescriptor::new(0, "i32", Type::Int32),
            FieldDescriptor::new(1, "u32", Type::UInt32),
            FieldDescriptor::new(2, "i64", Type::Int64),
            FieldDescriptor::new(3, "u64", Type::UInt64),
            FieldDescriptor::new(4, "flag", Type::Bool),
            FieldDescriptor::new(5, "mode", Type::Enum),
            FieldDescriptor::new(6, "str", Type::String),
            FieldDescriptor::new(7, "data", Type::Bytes),
            FieldDescriptor::new(8, "f32", Type::Float),
            FieldDescriptor::new(9, "f64", Type::Double),
            FieldDescriptor::new(10, "object", Type::Message("test.Small".into())),
            FieldDescriptor::new(11, "i32v", Type::Int32).repeated(),
            FieldDescriptor::new(12, "u64v", Type::UInt64).repeated(),
            FieldDescriptor::new(13, "strv", Type::String).repeated(),
            FieldDescriptor::new(14, "datav", Type::Bytes).repeated(),
            FieldDescriptor::new(15, "f32v", Type::Float).repeated(),
            FieldDescriptor::new(16, "f64v", Type::Double).repeated(),
            FieldDescriptor::new(17, "flags", Type::Bool).repeated(),
            FieldDescriptor::new(18, "objectv", Type::Message("test.Small".into())).repeated(),
            FieldDescriptor::new(19, "t_u32", Type::UInt32),
            FieldDescriptor::new(20, "t_i32", Type::Int32),
            FieldDescriptor::new(21, "t_s32", Type::Int32),
            FieldDescriptor::new(22, "t_u64", Type::UInt64),
            FieldDescriptor::new(23, "t_i64", Type::Int64),
            FieldDescriptor::new(24, "t_s64", Type::Int64),
            FieldDescriptor::new(25, "index", Type::Int32).map(Type::String),
            FieldDescriptor::new(26, "objects", Type::Message("test.Small".into()))
                .map(Type::Int32),
            FieldDescriptor::new(27, "matrix", Type::Message("test.Vec1D".into())).repeated(),
            FieldDescriptor::new(28, "vector", Type::Message("test.ArrMap".into())).repeated(),
            FieldDescriptor::new(29, "arrays", Type::Message("test.Vec1D".into()))
                .map(Type::String),
        ],
    ))
    .unwrap();
    pool
}

pub fn small(i32v: i32, flag: bool, s: &str) -> Value {
    Value::message([
        ("i32", Value::Int32(i32v)),
        ("flag", Value::Bool(flag)),
        ("str", Value::String(s.into())),
    ])
}

pub fn vec1d(floats: &[f32]) -> Value {
    Value::Array(floats.iter().map(|&f| Value::Float(f)).collect())
}

/// A fully-populated Main, except for the six `t_*` fields.
pub fn sample_main() -> Value {
    Value::message([
        ("i32", Value::Int32(-999)),
        ("u32", Value::UInt32(1234)),
        ("i64", Value::Int64(-9876543210)),
        ("u64", Value::UInt64(98765432123456789)),
        ("flag", Value::Bool(true)),
        ("mode", Value::Enum(2)),
        ("str", Value::String("Hello World!".into())),
        ("data", Value::Bytes(b"abc123!?$*&()'-=@~".to_vec())),
        ("f32", Value::Float(-2.1)),
        ("f64", Value::Double(1.0)),
        ("object", small(88, false, "tmp")),
        ("i32v", Value::array([1i32, 2])),
        ("u64v", Value::array([12345678987654321u64])),
        (
            "strv",
            Value::Array(
                [
                    "abc",
                    "apple",
                    "banana",
                    "orange",
                    "pear",
                    "grape",
                    "strawberry",
                    "cherry",
                    "mango",
                    "watermelon",
                ]
                .iter()
                .map(|s| Value::String(s.to_string()))
                .collect(),
            ),
        ),
        (
            "datav",
            Value::Array(vec![
                Value::Bytes(b"x".to_vec()),
                Value::Bytes(b"longer-chunk-of-bytes".to_vec()),
            ]),
        ),
        ("f32v", Value::array([1.1f32, 2.2])),
        ("f64v", Value::array([9.9f64, 8.8, 7.7, 6.6, 5.5])),
        (
            "flags",
            Value::array([true, true, false, true, false, false, false]),
        ),
        (
            "objectv",
            Value::Array(vec![
                small(1, false, ""),
                small(0, true, ""),
                small(0, false, "good luck!"),
            ]),
        ),
        (
            "index",
            Value::map([
                ("abc-1", Value::Int32(1)),
                ("abc-2", Value::Int32(2)),
                ("x-1", Value::Int32(1)),
                ("x-2", Value::Int32(2)),
                ("x-3", Value::Int32(3)),
                ("x-4", Value::Int32(4)),
            ]),
        ),
        (
            "objects",
            Value::map([
                (1, small(1, true, "aaaaaaaaaaa")),
                (2, small(2, false, "b")),
                (3, small(3, true, "ccccccccccccccc")),
                (4, small(4, false, "ddddd")),
            ]),
        ),
        (
            "matrix",
            Value::Array(vec![
                vec1d(&[1.0, 2.0, 3.0]),
                vec1d(&[0.5, 1.5, 2.5, 3.5]),
            ]),
        ),
        (
            "vector",
            Value::Array(vec![
                Value::map([("row", vec1d(&[7.0]))]),
                Value::map([("col", vec1d(&[8.0, 9.0]))]),
            ]),
        ),
        (
            "arrays",
            Value::map([
                ("first", vec1d(&[1.0, 2.0])),
                ("second", vec1d(&[3.0])),
            ]),
        ),
    ])
}
