// Int-set: ordering, uniqueness, and width promotion.

use rudis::Intset;

#[test]
fn keeps_sorted_unique_members() {
    let mut is = Intset::new();
    for v in [5, 3, 9, 3, -2, 5] {
        is.add(v);
    }
    let members: Vec<i64> = is.iter().collect();
    assert_eq!(members, vec![-2, 3, 5, 9]);
    assert!(is.contains(9));
    assert!(!is.contains(4));
}

#[test]
fn promotion_16_to_32() {
    let mut is = Intset::new();
    is.add(1);
    is.add(2);
    assert_eq!(is.encoding_width(), 2);
    is.add(65536);
    assert_eq!(is.encoding_width(), 4);
    assert_eq!(is.iter().collect::<Vec<_>>(), vec![1, 2, 65536]);
}

#[test]
fn promotion_32_to_64_places_value_at_the_end() {
    let mut is = Intset::new();
    is.add(100_000);
    is.add(-100_000);
    assert_eq!(is.encoding_width(), 4);
    is.add(1i64 << 31);
    assert_eq!(is.encoding_width(), 8);
    assert_eq!(is.get(is.len() - 1), Some(1i64 << 31));

    // Negative overflow lands at the head instead.
    let mut is = Intset::new();
    is.add(7);
    is.add(-(1i64 << 40));
    assert_eq!(is.get(0), Some(-(1i64 << 40)));
}

#[test]
fn no_demotion_after_removal() {
    let mut is = Intset::new();
    is.add(1);
    is.add(i64::MAX);
    assert_eq!(is.encoding_width(), 8);
    assert!(is.remove(i64::MAX));
    assert_eq!(is.encoding_width(), 8);
    assert_eq!(is.len(), 1);
}

#[test]
fn remove_missing_is_noop() {
    let mut is = Intset::new();
    is.add(10);
    assert!(!is.remove(11));
    // A value wider than the encoding cannot be a member.
    assert!(!is.remove(1i64 << 50));
    assert_eq!(is.len(), 1);
}
