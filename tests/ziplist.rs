// List-pack: entry encodings, negative indexing, deletion, search, and the
// grow-only cascading update of previous-length fields.

use rudis::ds::ziplist::{ZlValue, Ziplist};

fn collect(zl: &Ziplist) -> Vec<Vec<u8>> {
    zl.values().map(|v| v.to_bytes()).collect()
}

#[test]
fn push_both_ends_preserves_order() {
    let mut zl = Ziplist::new();
    zl.push(b"b", false);
    zl.push(b"c", false);
    zl.push(b"a", true);
    assert_eq!(collect(&zl), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(zl.len(), 3);
}

#[test]
fn negative_index_counts_from_tail() {
    let mut zl = Ziplist::new();
    for w in ["one", "two", "three", "four"] {
        zl.push(w.as_bytes(), false);
    }
    assert_eq!(zl.get(zl.index(-1).unwrap()), ZlValue::Str(b"four"));
    assert_eq!(zl.get(zl.index(-4).unwrap()), ZlValue::Str(b"one"));
    assert!(zl.index(-5).is_none());
    assert!(zl.index(4).is_none());
}

#[test]
fn integer_encodings_round_trip() {
    let mut zl = Ziplist::new();
    let cases: &[i64] = &[
        0,
        12,
        13,
        -1,
        127,
        -128,
        32767,
        -32768,
        8_388_607,
        -8_388_608,
        2_147_483_647,
        -2_147_483_648,
        i64::MAX,
        i64::MIN,
    ];
    for v in cases {
        zl.push(v.to_string().as_bytes(), false);
    }
    for (i, v) in cases.iter().enumerate() {
        assert_eq!(zl.get(zl.index(i as isize).unwrap()), ZlValue::Int(*v));
    }
}

#[test]
fn delete_range_from_middle() {
    let mut zl = Ziplist::new();
    for i in 0..10 {
        zl.push(format!("item{i}").as_bytes(), false);
    }
    assert_eq!(zl.delete_range(3, 4), 4);
    assert_eq!(zl.len(), 6);
    assert_eq!(
        collect(&zl),
        ["item0", "item1", "item2", "item7", "item8", "item9"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect::<Vec<_>>()
    );
}

#[test]
fn delete_through_tail_updates_tail() {
    let mut zl = Ziplist::new();
    for i in 0..5 {
        zl.push(format!("v{i}").as_bytes(), false);
    }
    zl.delete_range(3, 10);
    assert_eq!(zl.len(), 2);
    assert_eq!(zl.tail(), zl.index(-1));
    zl.delete_range(0, 10);
    assert!(zl.is_empty());
    assert!(zl.tail().is_none());
}

#[test]
fn find_with_skip_matches_interleaved_layout() {
    // Alternating field/value entries, as the hash encoding lays them out.
    let mut zl = Ziplist::new();
    for (f, v) in [("f1", "v1"), ("f2", "v2"), ("f3", "f2")] {
        zl.push(f.as_bytes(), false);
        zl.push(v.as_bytes(), false);
    }
    // skip=1 only looks at field positions, so the value "f2" is not found.
    let pos = zl.find(zl.head().unwrap(), b"f2", 1).unwrap();
    assert_eq!(pos, zl.index(2).unwrap());
}

#[test]
fn cascading_update_grows_prevlen_fields() {
    // A chain of entries each 252 bytes long: their prevlen fields all fit
    // in one byte.  Replacing the head with a 254-byte entry forces the
    // next entry's prevlen to the 5-byte form, which grows that entry
    // past 253 bytes and cascades forward.
    let mut zl = Ziplist::new();
    let medium = vec![b'x'; 250]; // total entry size: 1 + 2 + 250 = 253
    for _ in 0..6 {
        zl.push(&medium, false);
    }
    let big = vec![b'y'; 254];
    zl.push(&big, true);

    // Every entry still decodes and the header invariants hold.
    let items = collect(&zl);
    assert_eq!(items.len(), 7);
    assert_eq!(items[0], big);
    for item in &items[1..] {
        assert_eq!(item, &medium);
    }
    assert_eq!(zl.tail(), zl.index(-1));
    assert_eq!(zl.len(), 7);

    // Walking backwards from the tail agrees with walking forward.
    let mut back = Vec::new();
    let mut pos = zl.tail();
    while let Some(p) = pos {
        back.push(zl.get(p).to_bytes());
        pos = zl.prev(p);
    }
    back.reverse();
    assert_eq!(back, items);
}

#[test]
fn insert_before_middle_entry() {
    let mut zl = Ziplist::new();
    zl.push(b"a", false);
    zl.push(b"c", false);
    let pos = zl.index(1).unwrap();
    zl.insert_at(pos, b"b");
    assert_eq!(collect(&zl), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn compare_mixed_encodings() {
    let mut zl = Ziplist::new();
    zl.push(b"300", false);
    zl.push(b"text", false);
    let p0 = zl.index(0).unwrap();
    let p1 = zl.index(1).unwrap();
    assert!(zl.compare(p0, b"300"));
    assert!(!zl.compare(p0, b"301"));
    assert!(zl.compare(p1, b"text"));
    assert!(!zl.compare(p1, b"300"));
}

#[test]
fn large_values_use_wide_length_headers() {
    let mut zl = Ziplist::new();
    let small = vec![b'a'; 60];
    let medium = vec![b'b'; 300];
    let large = vec![b'c'; 17000];
    zl.push(&small, false);
    zl.push(&medium, false);
    zl.push(&large, false);
    assert_eq!(collect(&zl), vec![small, medium, large]);
}
