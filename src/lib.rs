#![doc = include_str!("../README.md")]

#[cfg(target_endian = "big")]
compile_error!("protocache buffers are little-endian; big-endian hosts are not supported");

pub mod access;
pub mod edit;
pub mod hash;
pub mod perfect_hash;
pub mod read;
pub mod reflection;
pub mod serialize;
pub mod value;
pub mod write;

use thiserror::Error;

pub use access::{Access, Array, ArrayOf, Field, Map, MapKeyRef, MapOf, Message, Pair, Str};
pub use perfect_hash::{PerfectHash, PerfectHashObject};
pub use read::{deserialize, detect};
pub use reflection::{Descriptor, DescriptorPool, FieldDescriptor, Type};
pub use value::{MapKey, Value};
pub use write::serialize;

/// The serialized words of one object tree, root first, references forward.
pub type Data = Vec<u32>;

/// Largest zero-based field id a message header can address
/// (twelve ids in the header word, 25 per section, 255 sections).
pub const MAX_FIELD_ID: u32 = 12 + 25 * 255 - 1;

/// Objects must stay referencable by a 30-bit forward word offset.
pub(crate) const MAX_OBJECT_WORDS: usize = 1 << 30;

/// Errors reported by the writer and the schema layer.
///
/// The reader side never produces one of these: malformed or absent data
/// surfaces as a `None` view and composes as further `None`s.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// An object grew past the 30-bit word range a reference can span.
    #[error("object of {0} words is too large to reference")]
    TooLong(usize),

    #[error("field id {0} is out of range")]
    BadFieldId(u32),

    /// Rejected by the dense-id heuristic: a schema this sparse would waste
    /// most of its header sections.
    #[error("field ids too sparse: max id {max_id} over {count} fields")]
    SparseFieldIds { max_id: u32, count: usize },

    #[error("message needs {0} header sections, the limit is 255")]
    TooManySections(usize),

    #[error("body offset overflows the 14-bit section prefix sum")]
    BodyTooLarge,

    #[error("duplicate keys in map")]
    DuplicateKeys,

    #[error("perfect hash build failed after all seed attempts")]
    IndexBuildFailed,

    #[error("message type {0} is not registered")]
    UnknownType(String),

    #[error("message type {0} registered twice")]
    DuplicateType(String),

    #[error("message {0} is not a legal alias")]
    BadAlias(String),

    #[error("field {field}: expected {expected}")]
    SchemaMismatch {
        field: String,
        expected: &'static str,
    },

    #[error("malformed buffer")]
    BadBuffer,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Number of 32-bit words needed to hold `bytes` bytes.
pub const fn word_size(bytes: usize) -> usize {
    (bytes + 3) / 4
}

/// The little-endian byte image of a word buffer.
pub fn as_bytes(words: &[u32]) -> &[u8] {
    bytemuck::cast_slice(words)
}

/// Reassemble a word buffer from its little-endian byte image.
///
/// Returns `None` unless the byte length is a whole number of words.
pub fn words_from_bytes(bytes: &[u8]) -> Option<Data> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
