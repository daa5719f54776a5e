//! Low-level word emitters.
//!
//! Each function produces the self-contained [`Data`] of one object;
//! parents splice child `Data`s either inline (small enough for the slot)
//! or behind a forward reference appended after the slot table. Emission
//! is bottom-up, so references only ever point forward.

use crate::{CacheError, CacheResult, Data, MAX_OBJECT_WORDS};

fn write_varint(buf: &mut [u8; 5], mut n: u32) -> usize {
    let mut w = 0;
    while n & !0x7f != 0 {
        buf[w] = 0x80 | (n & 0x7f) as u8;
        n >>= 7;
        w += 1;
    }
    buf[w] = n as u8;
    w + 1
}

fn reference(off: usize) -> u32 {
    ((off as u32) << 2) | 3
}

/// A 32-bit scalar: one word.
pub fn serialize_scalar32(v: u32) -> Data {
    vec![v]
}

/// A 64-bit scalar: two words, little-endian.
pub fn serialize_scalar64(v: u64) -> Data {
    vec![v as u32, (v >> 32) as u32]
}

/// A String object: varint mark, raw bytes, zero padding to a word.
pub fn serialize_bytes(src: &[u8]) -> CacheResult<Data> {
    if src.len() >= (1 << 30) {
        return Err(CacheError::TooLong(crate::word_size(src.len())));
    }
    let mark = (src.len() as u32) << 2;
    let mut head = [0u8; 5];
    let head_len = write_varint(&mut head, mark);

    let words = crate::word_size(head_len + src.len());
    let mut bytes = Vec::with_capacity(words * 4);
    bytes.extend_from_slice(&head[..head_len]);
    bytes.extend_from_slice(src);
    bytes.resize(words * 4, 0);
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Pick the element width `m` that minimizes the array body: elements no
/// larger than `m` inline, the rest cost a reference slot plus their size.
/// Returns `(m, body_words)`.
fn best_width(parts: &[Data]) -> (usize, usize) {
    let mut sizes = [0usize; 3];
    for one in parts {
        sizes[0] += 1;
        sizes[1] += 2;
        sizes[2] += 3;
        if one.len() <= 1 {
            continue;
        }
        sizes[0] += one.len();
        if one.len() <= 2 {
            continue;
        }
        sizes[1] += one.len();
        if one.len() <= 3 {
            continue;
        }
        sizes[2] += one.len();
    }
    let mut mode = 0;
    for i in 1..3 {
        if sizes[i] < sizes[mode] {
            mode = i;
        }
    }
    (mode + 1, sizes[mode])
}

/// An Array object from already-serialized elements.
pub fn serialize_array(elements: &[Data]) -> CacheResult<Data> {
    let (m, body) = best_width(elements);
    let size = 1 + body;
    if size >= MAX_OBJECT_WORDS {
        return Err(CacheError::TooLong(size));
    }
    let mut out = Data::with_capacity(size);
    out.push(((elements.len() as u32) << 2) | m as u32);

    for one in elements {
        let next = out.len() + m;
        if one.len() <= m {
            out.extend_from_slice(one);
        }
        out.resize(next, 0);
    }
    let mut off = 1;
    for one in elements {
        if one.len() > m {
            out[off] = reference(out.len() - off);
            out.extend_from_slice(one);
        }
        off += m;
    }
    debug_assert_eq!(out.len(), size);
    Ok(out)
}

/// A Map object: the perfect-hash index bytes (widths stamped into the top
/// bit-pairs of its first word) followed by the key/value table. `keys`
/// and `values` must already be permuted into index order.
pub fn serialize_map(index: &[u8], keys: &[Data], values: &[Data]) -> CacheResult<Data> {
    debug_assert_eq!(keys.len(), values.len());
    let index_words = crate::word_size(index.len());
    let (m1, key_body) = best_width(keys);
    let (m2, value_body) = best_width(values);
    let size = index_words + key_body + value_body;
    if size >= MAX_OBJECT_WORDS {
        return Err(CacheError::TooLong(size));
    }

    let mut out = vec![0u32; index_words];
    for (i, chunk) in index.chunks(4).enumerate() {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        out[i] = u32::from_le_bytes(word);
    }
    out[0] = (out[0] & 0x0fff_ffff) | ((m1 as u32) << 30) | ((m2 as u32) << 28);
    out.reserve(size - index_words);

    for i in 0..keys.len() {
        let next = out.len() + m1;
        if keys[i].len() <= m1 {
            out.extend_from_slice(&keys[i]);
        }
        out.resize(next, 0);
        let next = out.len() + m2;
        if values[i].len() <= m2 {
            out.extend_from_slice(&values[i]);
        }
        out.resize(next, 0);
    }
    let mut off = index_words;
    for i in 0..keys.len() {
        if keys[i].len() > m1 {
            out[off] = reference(out.len() - off);
            out.extend_from_slice(&keys[i]);
        }
        off += m1;
        if values[i].len() > m2 {
            out[off] = reference(out.len() - off);
            out.extend_from_slice(&values[i]);
        }
        off += m2;
    }
    debug_assert_eq!(out.len(), size);
    Ok(out)
}

/// A Message object. `parts[i]` is the serialized field with id `i`, empty
/// for absent fields. Parts of 1–3 words inline into the body with their
/// size as the width lane; larger parts take a reference slot.
pub fn serialize_message(mut parts: Vec<Data>) -> CacheResult<Data> {
    while parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    if parts.is_empty() {
        return Ok(vec![0]);
    }
    let section = (parts.len() + 12) / 25;
    if section > 0xff {
        return Err(CacheError::TooManySections(section));
    }

    let mut size = 1 + section * 2;
    let mut cnt: u32 = 0;
    let mut head = section as u32;
    for (i, one) in parts.iter().take(12).enumerate() {
        if one.len() < 4 {
            head |= (one.len() as u32) << (8 + i * 2);
            size += one.len();
            cnt += one.len() as u32;
        } else {
            head |= 1 << (8 + i * 2);
            size += 1 + one.len();
            cnt += 1;
        }
    }
    for one in parts.iter().skip(12) {
        if one.len() < 4 {
            size += one.len();
        } else {
            size += 1 + one.len();
        }
    }
    if size >= MAX_OBJECT_WORDS {
        return Err(CacheError::TooLong(size));
    }

    let mut out = Data::with_capacity(size);
    out.push(head);
    out.resize(1 + section * 2, 0);

    let mut idx = 12;
    let mut sec_no = 0;
    while idx < parts.len() {
        let next = (idx + 25).min(parts.len());
        if cnt >= 1 << 14 {
            return Err(CacheError::BodyTooLarge);
        }
        let mut mark = (cnt as u64) << 50;
        let mut lane = 0;
        while idx < next {
            let one = &parts[idx];
            if one.len() < 4 {
                mark |= (one.len() as u64) << lane;
                cnt += one.len() as u32;
            } else {
                mark |= 1 << lane;
                cnt += 1;
            }
            idx += 1;
            lane += 2;
        }
        out[1 + sec_no * 2] = mark as u32;
        out[2 + sec_no * 2] = (mark >> 32) as u32;
        sec_no += 1;
    }

    let mut off = out.len();
    for one in &parts {
        if one.is_empty() {
            continue;
        }
        if one.len() < 4 {
            out.extend_from_slice(one);
        } else {
            out.push(0);
        }
    }
    for one in &parts {
        if one.len() < 4 {
            off += one.len();
        } else {
            out[off] = reference(out.len() - off);
            out.extend_from_slice(one);
            off += 1;
        }
    }
    debug_assert_eq!(out.len(), size);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Array, Map, Message, Str};

    #[test]
    fn varints() {
        let mut buf = [0u8; 5];
        assert_eq!(write_varint(&mut buf, 0), 1);
        assert_eq!(buf[0], 0);
        assert_eq!(write_varint(&mut buf, 8), 1);
        assert_eq!(buf[0], 8);
        assert_eq!(write_varint(&mut buf, 0x4b0), 2);
        assert_eq!(&buf[..2], &[0xb0, 0x09]);
    }

    #[test]
    fn bytes_layout() {
        let data = serialize_bytes(b"ab").unwrap();
        assert_eq!(data, vec![u32::from_le_bytes([8, b'a', b'b', 0])]);

        // S2: payload occupies ceil((1 + len) / 4) words for short strings
        for len in 0..64usize {
            let src = vec![b'x'; len];
            let data = serialize_bytes(&src).unwrap();
            assert_eq!(data.len(), (1 + len + 3) / 4);
            assert_eq!(Str::new(&data).unwrap().bytes(), &src[..]);
        }
    }

    #[test]
    fn empty_message_is_one_zero_word() {
        assert_eq!(serialize_message(vec![]).unwrap(), vec![0]);
        assert_eq!(
            serialize_message(vec![Data::new(), Data::new()]).unwrap(),
            vec![0]
        );
    }

    #[test]
    fn message_inlines_small_parts() {
        // id 0: one word; id 2: four words (referenced)
        let parts = vec![vec![5], Data::new(), vec![1, 2, 3, 4]];
        let out = serialize_message(parts).unwrap();
        let msg = Message::new(&out).unwrap();
        assert_eq!(msg.get::<u32>(0), Some(5));
        assert!(!msg.has(1));
        let field = msg.field(2).unwrap();
        assert_eq!(field.width(), 1);
        assert_eq!(field.object().unwrap()[..4], [1, 2, 3, 4]);
        // header + inline word + ref slot + payload
        assert_eq!(out.len(), 1 + 1 + 1 + 4);
    }

    #[test]
    fn message_with_sections() {
        // 30 fields, each one word; ids 12.. land in section one
        let parts: Vec<Data> = (0..30).map(|i| vec![i as u32]).collect();
        let out = serialize_message(parts).unwrap();
        let msg = Message::new(&out).unwrap();
        for id in 0..30 {
            assert_eq!(msg.get::<u32>(id), Some(id), "field {id}");
        }
        assert!(!msg.has(30));
        assert_eq!(out.len(), 1 + 2 + 30);
        assert_eq!(Message::detect(&out), Some(out.len()));
    }

    #[test]
    fn array_width_selection() {
        // uniform one-word elements pack at width 1
        let out = serialize_array(&[vec![1], vec![2]]).unwrap();
        assert_eq!(out, vec![(2 << 2) | 1, 1, 2]);

        // uniform two-word elements pack at width 2
        let out = serialize_array(&[vec![1, 0], vec![2, 0]]).unwrap();
        assert_eq!(out, vec![(2 << 2) | 2, 1, 0, 2, 0]);

        // a large element forces a reference at width 1:
        // cost(m=1) = 2 + 5, cost(m=2) = 4 + 5, cost(m=3) = 6 + 5
        let big = vec![9, 9, 9, 9, 9];
        let out = serialize_array(&[vec![1], big.clone()]).unwrap();
        let array = Array::new(&out).unwrap();
        assert_eq!(array.width(), 1);
        assert_eq!(array.at(0).unwrap().get::<u32>(), Some(1));
        assert_eq!(array.at(1).unwrap().object().unwrap()[..5], big[..]);
    }

    #[test]
    fn array_padding_inlines_short_elements() {
        // mixed one- and two-word elements: m = 2, short ones zero-padded
        let out = serialize_array(&[vec![7], vec![8, 9]]).unwrap();
        assert_eq!(out, vec![(2 << 2) | 2, 7, 0, 8, 9]);
    }

    #[test]
    fn map_emission() {
        let index = crate::PerfectHashObject::build(&[b"a".as_ref(), b"b".as_ref()], true)
            .unwrap();
        let pos_a = index.locate(b"a") as usize;
        let mut keys = vec![Data::new(); 2];
        let mut values = vec![Data::new(); 2];
        keys[pos_a] = serialize_bytes(b"a").unwrap();
        values[pos_a] = vec![1];
        keys[1 - pos_a] = serialize_bytes(b"b").unwrap();
        values[1 - pos_a] = vec![2];

        let out = serialize_map(index.data(), &keys, &values).unwrap();
        let map = Map::new(&out).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.key_width(), 1);
        assert_eq!(map.value_width(), 1);
        let pair = map.find("a").unwrap();
        assert_eq!(pair.value().get::<i32>(), Some(1));
        let pair = map.find("b").unwrap();
        assert_eq!(pair.value().get::<i32>(), Some(2));
        assert!(map.find("c").is_none());
        assert_eq!(Map::detect(&out), Some(out.len()));
    }

    #[test]
    fn map_with_scalar_keys() {
        let key_words: Vec<Data> = vec![serialize_scalar32(10), serialize_scalar32(20)];
        let key_bytes: Vec<Vec<u8>> = key_words
            .iter()
            .map(|w| crate::as_bytes(w).to_vec())
            .collect();
        let index = crate::PerfectHashObject::build(&key_bytes, true).unwrap();
        let pos0 = index.locate(&key_bytes[0]) as usize;

        let mut keys = vec![Data::new(); 2];
        let mut values = vec![Data::new(); 2];
        keys[pos0] = key_words[0].clone();
        values[pos0] = serialize_scalar64(100);
        keys[1 - pos0] = key_words[1].clone();
        values[1 - pos0] = serialize_scalar64(200);

        let out = serialize_map(index.data(), &keys, &values).unwrap();
        let map = Map::new(&out).unwrap();
        assert_eq!(map.value_width(), 2);
        assert_eq!(map.find(&10i32).unwrap().value().get::<u64>(), Some(100));
        assert_eq!(map.find(&20i32).unwrap().value().get::<u64>(), Some(200));
        assert!(map.find(&30i32).is_none());
    }
}
