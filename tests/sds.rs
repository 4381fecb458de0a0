// Dynamic byte string: growth policy, binary safety, range editing.

use rudis::Sds;

#[test]
fn append_grows_with_spare_capacity() {
    let mut s = Sds::new();
    s.append(b"hello");
    assert_eq!(s.as_bytes(), b"hello");
    // Doubling policy leaves room for another append of the same size.
    assert!(s.avail() >= 5);
    s.append(b" world");
    assert_eq!(s.as_bytes(), b"hello world");
}

#[test]
fn binary_safe_content() {
    let mut s = Sds::new();
    s.append(b"a\x00b\x00c");
    assert_eq!(s.len(), 5);
    assert_eq!(s.as_bytes()[1], 0);
    let d = s.dup();
    assert_eq!(d, s);
}

#[test]
fn range_with_negative_indexes() {
    let mut s = Sds::from("Hello World");
    s.range(6, -1);
    assert_eq!(s.as_bytes(), b"World");

    let mut s = Sds::from("Hello World");
    s.range(0, 4);
    assert_eq!(s.as_bytes(), b"Hello");

    // Inverted range empties.
    let mut s = Sds::from("xyz");
    s.range(2, 1);
    assert!(s.is_empty());
}

#[test]
fn grow_zeroed_pads_with_zero_bytes() {
    let mut s = Sds::from("ab");
    s.grow_zeroed(6);
    assert_eq!(s.as_bytes(), b"ab\x00\x00\x00\x00");
    // Shorter target is a no-op.
    s.grow_zeroed(3);
    assert_eq!(s.len(), 6);
}

#[test]
fn overwrite_at_extends_as_needed() {
    let mut s = Sds::from("hello");
    s.overwrite_at(10, b"world");
    assert_eq!(s.len(), 15);
    assert_eq!(&s.as_bytes()[10..], b"world");
    assert_eq!(&s.as_bytes()[5..10], b"\x00\x00\x00\x00\x00");
}

#[test]
fn compare_is_lexicographic_with_length_tiebreak() {
    let a = Sds::from("abc");
    let b = Sds::from("abd");
    let c = Sds::from("ab");
    assert!(a < b);
    assert!(c < a);
    assert_eq!(a.cmp(&a.dup()), std::cmp::Ordering::Equal);
}

#[test]
fn clear_keeps_allocation() {
    let mut s = Sds::from("some content here");
    let cap_before = s.len() + s.avail();
    s.clear();
    assert!(s.is_empty());
    assert_eq!(s.avail(), cap_before);
}
