use protocache::{CacheError, PerfectHash, PerfectHashObject};

fn keys(n: usize, tag: &str) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| format!("{tag}:{i}:{}", (i as u64).wrapping_mul(2654435761)).into_bytes())
        .collect()
}

#[test]
fn bijection_across_entry_widths() {
    // crosses the one-, two-, and four-byte rank-table entry thresholds
    for n in [2usize, 10, 24, 25, 255, 256, 4096, 65535, 65536, 80_000] {
        let set = keys(n, "bij");
        let index = PerfectHashObject::build(&set, true).unwrap();
        assert_eq!(index.size() as usize, n);

        let mut hit = vec![false; n];
        for key in &set {
            let pos = index.locate(key) as usize;
            assert!(pos < n, "{n} keys: position {pos} out of range");
            assert!(!hit[pos], "{n} keys: position {pos} doubly assigned");
            hit[pos] = true;
        }
    }
}

#[test]
fn serialized_size_is_bounded() {
    for n in [2usize, 100, 1000, 70_000] {
        let set = keys(n, "size");
        let index = PerfectHashObject::build(&set, true).unwrap();

        let section = 10usize.max((n * 105 + 255) / 256);
        let bitmap = ((section * 3 + 31) & !31) / 4;
        let entry = if n > 65535 {
            4
        } else if n > 255 {
            2
        } else if n > 24 {
            1
        } else {
            0
        };
        let bound = 16 + bitmap + (bitmap / 8) * entry;
        assert!(
            index.data().len() <= bound,
            "{n} keys: {} bytes exceeds bound {bound}",
            index.data().len()
        );
    }
}

#[test]
fn lookup_through_reparsed_view() {
    let set = keys(1234, "view");
    let index = PerfectHashObject::build(&set, true).unwrap();
    let bytes = index.data().to_vec();
    let view = PerfectHash::new(&bytes).unwrap();
    for key in &set {
        assert_eq!(view.locate(key), index.locate(key));
    }
}

#[test]
fn two_builds_agree_on_behavior_not_bytes() {
    // the seed is drawn fresh per builder, so only behavior is comparable
    let set = keys(500, "twice");
    let a = PerfectHashObject::build(&set, true).unwrap();
    let b = PerfectHashObject::build(&set, true).unwrap();
    let mut positions_a: Vec<u32> = set.iter().map(|k| a.locate(k)).collect();
    let mut positions_b: Vec<u32> = set.iter().map(|k| b.locate(k)).collect();
    positions_a.sort_unstable();
    positions_b.sort_unstable();
    assert_eq!(positions_a, positions_b); // both are 0..n
}

#[test]
fn duplicates_fail_the_build() {
    let mut set = keys(100, "dup");
    set[99] = set[0].clone();
    assert!(matches!(
        PerfectHashObject::build(&set, true),
        Err(CacheError::DuplicateKeys)
    ));
}

#[test]
fn empty_keys_are_legal() {
    // the empty byte string is a valid key like any other
    let mut set = keys(31, "empty");
    set.push(Vec::new());
    let index = PerfectHashObject::build(&set, true).unwrap();
    let mut hit = vec![false; set.len()];
    for key in &set {
        let pos = index.locate(key) as usize;
        assert!(!hit[pos]);
        hit[pos] = true;
    }
}
