// Value objects: encodings, decoded text, LRU stamp arithmetic.

use rudis::obj::object::{lru_clock_from_ms, Encoding, ObjType, Robj, LRU_CLOCK_MAX};

#[test]
fn short_strings_use_the_compact_immutable_encoding() {
    let o = Robj::string_from_slice(b"short");
    assert_eq!(o.obj_type(), ObjType::String);
    assert_eq!(o.encoding(), Encoding::Embstr);

    let o = Robj::string_from_slice(&vec![b'a'; 39]);
    assert_eq!(o.encoding(), Encoding::Embstr);

    let o = Robj::string_from_slice(&vec![b'a'; 40]);
    assert_eq!(o.encoding(), Encoding::Raw);
}

#[test]
fn try_encoding_compacts_canonical_integers() {
    let o = Robj::string_from_slice(b"9223372036854775807").try_object_encoding();
    assert_eq!(o.encoding(), Encoding::Int);
    assert_eq!(o.get_i64(), Some(i64::MAX));

    // Non-canonical forms stay strings.
    let o = Robj::string_from_slice(b"007").try_object_encoding();
    assert_ne!(o.encoding(), Encoding::Int);
    let o = Robj::string_from_slice(b"3.14").try_object_encoding();
    assert_ne!(o.encoding(), Encoding::Int);
}

#[test]
fn decoded_bytes_match_for_every_encoding() {
    for o in [
        Robj::from_i64(-42),
        Robj::string_from_slice(b"-42"),
        Robj::string_from_sds("-42".into()),
    ] {
        assert_eq!(&*o.string_bytes(), b"-42");
        assert_eq!(o.string_len(), 3);
        assert_eq!(o.get_i64(), Some(-42));
        assert_eq!(o.get_f64(), Some(-42.0));
    }
}

#[test]
fn string_equality_crosses_encodings() {
    let a = Robj::from_i64(100);
    let b = Robj::string_from_slice(b"100");
    assert!(a.string_eq(&b));
    let c = Robj::string_from_slice(b"101");
    assert!(!a.string_eq(&c));
}

#[test]
fn idle_time_handles_clock_wrap() {
    let o = Robj::from_i64(1);
    o.touch(LRU_CLOCK_MAX - 1);
    // Clock wrapped past zero: idle spans the wrap point.
    assert_eq!(o.idle_time_ms(1), 2 * 1000);
    o.touch(5);
    assert_eq!(o.idle_time_ms(5), 0);
}

#[test]
fn lru_clock_samples_milliseconds() {
    assert_eq!(lru_clock_from_ms(0), 0);
    assert_eq!(lru_clock_from_ms(10_000), 10);
    // The stamp wraps at 24 bits.
    let wrapped = lru_clock_from_ms((LRU_CLOCK_MAX as u64 + 3) * 1000);
    assert_eq!(wrapped, 2);
}
