//! Minimal perfect hashing over a set of byte-string keys.
//!
//! The index maps each of `n` distinct keys to a distinct position in
//! `[0, n)`. Construction hashes every key into three disjoint slot
//! sections of a hypergraph and peels degree-1 slots until every key is
//! ordered; a 2-bit tag per slot then encodes, for each key, which of its
//! three candidate slots it owns. Lookup is two cache lines: three tag
//! reads pick the slot, a rank table plus one popcount turn the slot into
//! a position.
//!
//! The serialized index is `{size, seed}` (two little-endian u32 words),
//! the tag bitmap, and, for all but tiny key sets, a rank table with one
//! entry per 32-slot block.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::hash::{hash128, XorShift};
use crate::{CacheError, CacheResult};

const MAX_KEYS: u32 = 1 << 28;
const NIL: u32 = u32::MAX;

/// Slots per section; three sections give ~1.23 slots per key, enough for
/// three-way peeling to succeed within a few seed attempts.
fn section(size: u32) -> u32 {
    10.max(((size as u64 * 105 + 255) / 256) as u32)
}

/// Bitmap bytes for `3 * section` 2-bit tags, padded to 8-byte blocks.
fn bitmap_size(section: u32) -> u32 {
    ((section * 3 + 31) & !31) / 4
}

/// The size word shares its top bits with map key/value widths.
fn real_size(size: u32) -> u32 {
    size & 0x0fff_ffff
}

fn bit2(vec: &[u8], pos: u32) -> u32 {
    ((vec[(pos >> 2) as usize] >> ((pos & 3) << 1)) & 3) as u32
}

/// Flip a tag that is currently `11` down to `val`.
fn set_bit2_on11(vec: &mut [u8], pos: u32, val: u8) {
    vec[(pos >> 2) as usize] ^= (!val & 3) << ((pos & 3) << 1);
}

/// Used slots (tag != `11`) in one 64-bit bitmap block.
fn count_used_slots(mut block: u64) -> u32 {
    block &= block >> 1;
    (!block & 0x5555_5555_5555_5555).count_ones()
}

fn set_bit(bitmap: &mut [u8], pos: u32) {
    bitmap[(pos >> 3) as usize] |= 1 << (pos & 7);
}

fn test_and_set_bit(bitmap: &mut [u8], pos: u32) -> bool {
    let byte = &mut bitmap[(pos >> 3) as usize];
    let mask = 1 << (pos & 7);
    if *byte & mask != 0 {
        return false;
    }
    *byte |= mask;
    true
}

fn three_slots(key: &[u8], seed: u32, m: u32) -> [u32; 3] {
    let lanes = hash128(key, seed as u64).lanes();
    [lanes[0] % m, lanes[1] % m + m, lanes[2] % m + m * 2]
}

/// A borrowed view of a serialized index.
#[derive(Clone, Copy, Debug)]
pub struct PerfectHash<'a> {
    data: &'a [u8],
    section: u32,
}

impl<'a> PerfectHash<'a> {
    /// Validate the header against the available bytes and trim to the
    /// index's exact extent.
    pub fn new(data: &'a [u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let size = real_size(LittleEndian::read_u32(data));
        if size <= 1 {
            return Some(Self {
                data: &data[..4],
                section: 0,
            });
        }
        if data.len() < 8 {
            return None;
        }
        let section = section(size);
        let mut bytes = bitmap_size(section);
        if size > u16::MAX as u32 {
            bytes += bytes / 2;
        } else if size > u8::MAX as u32 {
            bytes += bytes / 4;
        } else if size > 24 {
            bytes += bytes / 8;
        }
        let total = bytes as usize + 8;
        if data.len() < total {
            return None;
        }
        Some(Self {
            data: &data[..total],
            section,
        })
    }

    /// The exact serialized bytes of this index.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of keys the index was built over.
    pub fn size(&self) -> u32 {
        real_size(LittleEndian::read_u32(self.data))
    }

    /// Map a key to its position.
    ///
    /// Any byte string maps to *some* position below [`size`](Self::size);
    /// only keys that went into the build land on their own. Callers that
    /// need containment must compare against the stored key.
    pub fn locate(&self, key: &[u8]) -> u32 {
        let size = self.size();
        if size < 2 {
            return if size == 0 { u32::MAX } else { 0 };
        }
        let seed = LittleEndian::read_u32(&self.data[4..]);
        let m = self.section;
        let slots = three_slots(key, seed, m);
        let bitmap = &self.data[8..];
        let table = &bitmap[bitmap_size(m) as usize..];

        let pick = (bit2(bitmap, slots[0]) + bit2(bitmap, slots[1]) + bit2(bitmap, slots[2])) % 3;
        let slot = slots[pick as usize];
        let block_no = (slot >> 5) as usize;
        let within = slot & 31;

        let off = if size > u16::MAX as u32 {
            LittleEndian::read_u32(&table[block_no * 4..])
        } else if size > u8::MAX as u32 {
            LittleEndian::read_u16(&table[block_no * 2..]) as u32
        } else if size > 24 {
            table[block_no] as u32
        } else {
            0
        };

        let mut block = LittleEndian::read_u64(&bitmap[block_no * 8..]);
        block |= u64::MAX << (within << 1);
        off + count_used_slots(block)
    }
}

#[derive(Clone, Copy, Default)]
struct HalfEdge {
    slot: u32,
    next: u32,
}

struct Graph {
    edges: Vec<[HalfEdge; 3]>,
    nodes: Vec<u32>,
    sizes: Vec<u8>,
}

/// An index that owns its serialized bytes.
pub struct PerfectHashObject {
    data: Vec<u8>,
}

impl PerfectHashObject {
    pub fn view(&self) -> PerfectHash<'_> {
        PerfectHash::new(&self.data).expect("own data always parses")
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u32 {
        self.view().size()
    }

    pub fn locate(&self, key: &[u8]) -> u32 {
        self.view().locate(key)
    }

    /// Build an index over `keys`.
    ///
    /// With `check` set, a duplicate-key probe runs once the first round of
    /// seed attempts fails; callers that guarantee distinct keys can skip
    /// it. Fails for 2^28 or more keys, on detected duplicates, or once
    /// every attempt is exhausted.
    pub fn build<K: AsRef<[u8]>>(keys: &[K], check: bool) -> CacheResult<Self> {
        let total = keys.len();
        if total >= MAX_KEYS as usize {
            return Err(CacheError::TooLong(total));
        }
        if total <= 1 {
            let mut data = vec![0u8; 4];
            LittleEndian::write_u32(&mut data, total as u32);
            return Ok(Self { data });
        }

        let total = total as u32;
        let m = section(total);
        let bmsz = bitmap_size(m) as usize;
        let entry_width = if total > u16::MAX as u32 {
            4
        } else if total > u8::MAX as u32 {
            2
        } else {
            1
        };
        let blocks = if bmsz > 8 { bmsz / 8 } else { 0 };
        let mut out = vec![0u8; 8 + bmsz + blocks * entry_width];
        LittleEndian::write_u32(&mut out, total);

        let slot_cnt = (m * 3) as usize;
        let mut graph = Graph {
            edges: vec![[HalfEdge::default(); 3]; total as usize],
            nodes: vec![NIL; slot_cnt],
            sizes: vec![0; slot_cnt],
        };
        let mut queue: Vec<u32> = Vec::with_capacity(total as usize);
        let mut book = vec![0u8; (slot_cnt + 7) / 8];

        let (first_tries, second_tries) = if total <= u8::MAX as u32 {
            (8, 32)
        } else {
            (4, 12)
        };

        let mut rng = XorShift::new();
        let mut seed = 0;
        let mut done = false;
        for _ in 0..first_tries {
            seed = rng.next_u32();
            if attempt(keys, seed, m, &mut graph, &mut queue, &mut book, &mut out[8..8 + bmsz]) {
                done = true;
                break;
            }
        }
        if !done && check && has_duplicates(keys, seed) {
            return Err(CacheError::DuplicateKeys);
        }
        if !done {
            for _ in 0..second_tries {
                seed = rng.next_u32();
                if attempt(keys, seed, m, &mut graph, &mut queue, &mut book, &mut out[8..8 + bmsz]) {
                    done = true;
                    break;
                }
            }
        }
        if !done {
            return Err(CacheError::IndexBuildFailed);
        }

        LittleEndian::write_u32(&mut out[4..], seed);
        if blocks > 0 {
            let mut cnt = 0u32;
            for i in 0..blocks {
                let at = 8 + bmsz + i * entry_width;
                match entry_width {
                    4 => LittleEndian::write_u32(&mut out[at..], cnt),
                    2 => LittleEndian::write_u16(&mut out[at..], cnt as u16),
                    _ => out[at] = cnt as u8,
                }
                cnt += count_used_slots(LittleEndian::read_u64(&out[8 + i * 8..]));
            }
            debug_assert_eq!(cnt, total);
        }
        Ok(Self { data: out })
    }
}

/// One seeded build attempt: graph, peel, assign. Leaves the tag bitmap
/// filled on success.
fn attempt<K: AsRef<[u8]>>(
    keys: &[K],
    seed: u32,
    m: u32,
    graph: &mut Graph,
    queue: &mut Vec<u32>,
    book: &mut [u8],
    bitmap: &mut [u8],
) -> bool {
    debug!("perfect hash attempt with seed {seed:08x}");
    if !create_graph(keys, seed, m, graph) {
        return false;
    }
    tear_graph(graph, keys.len() as u32, queue, book);
    if queue.len() != keys.len() {
        return false;
    }
    assign(graph, queue, book, bitmap);
    true
}

fn create_graph<K: AsRef<[u8]>>(keys: &[K], seed: u32, m: u32, g: &mut Graph) -> bool {
    g.nodes.fill(NIL);
    g.sizes.fill(0);
    for (i, key) in keys.iter().enumerate() {
        let slots = three_slots(key.as_ref(), seed, m);
        for (j, &slot) in slots.iter().enumerate() {
            let v = &mut g.edges[i][j];
            v.slot = slot;
            v.next = g.nodes[slot as usize];
            g.nodes[slot as usize] = i as u32;
            g.sizes[slot as usize] += 1;
            if g.sizes[slot as usize] > 50 {
                // a pathologically loaded slot; cheaper to redraw the seed
                return false;
            }
        }
    }
    true
}

/// Peel degree-1 slots until no edge is left (success) or the queue stops
/// growing (a 2-core remains, retry with a new seed).
fn tear_graph(g: &mut Graph, n: u32, queue: &mut Vec<u32>, book: &mut [u8]) {
    queue.clear();
    book.fill(0);
    for i in (0..n).rev() {
        for j in 0..3 {
            let slot = g.edges[i as usize][j].slot;
            if g.sizes[slot as usize] == 1 && test_and_set_bit(book, i) {
                debug_assert_eq!(g.nodes[slot as usize], i);
                queue.push(i);
            }
        }
    }
    let mut head = 0;
    while head < queue.len() {
        let curr = queue[head];
        head += 1;
        for j in 0..3 {
            let slot = g.edges[curr as usize][j].slot;

            // unlink curr from the slot's chain
            let mut prev = NIL;
            let mut it = g.nodes[slot as usize];
            while it != curr {
                debug_assert_ne!(it, NIL);
                prev = it;
                it = g.edges[it as usize][j].next;
            }
            let next = g.edges[curr as usize][j].next;
            if prev == NIL {
                g.nodes[slot as usize] = next;
            } else {
                g.edges[prev as usize][j].next = next;
            }
            g.edges[curr as usize][j].next = NIL;

            g.sizes[slot as usize] -= 1;
            if g.sizes[slot as usize] == 1 {
                let leaf = g.nodes[slot as usize];
                if test_and_set_bit(book, leaf) {
                    queue.push(leaf);
                }
            }
        }
    }
}

/// Replay the peel in reverse: each edge claims one still-free slot and
/// tags it so the three tags sum to that slot's index mod 3. Untagged
/// slots keep `11`.
fn assign(g: &Graph, queue: &[u32], book: &mut [u8], bitmap: &mut [u8]) {
    bitmap.fill(0xff);
    book.fill(0);
    for &idx in queue.iter().rev() {
        let edge = &g.edges[idx as usize];
        let (a, b, c) = (edge[0].slot, edge[1].slot, edge[2].slot);
        if test_and_set_bit(book, a) {
            set_bit(book, b);
            set_bit(book, c);
            let sum = bit2(bitmap, b) + bit2(bitmap, c);
            set_bit2_on11(bitmap, a, ((6 - sum) % 3) as u8);
        } else if test_and_set_bit(book, b) {
            set_bit(book, c);
            let sum = bit2(bitmap, a) + bit2(bitmap, c);
            set_bit2_on11(bitmap, b, ((7 - sum) % 3) as u8);
        } else if test_and_set_bit(book, c) {
            let sum = bit2(bitmap, a) + bit2(bitmap, b);
            set_bit2_on11(bitmap, c, ((8 - sum) % 3) as u8);
        } else {
            debug_assert!(false, "peeled edge without a free slot");
        }
    }
}

fn has_duplicates<K: AsRef<[u8]>>(keys: &[K], seed: u32) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(keys.len() * 2);
    for key in keys {
        if !seen.insert(hash128(key.as_ref(), seed as u64)) {
            return true;
        }
    }
    false
}
