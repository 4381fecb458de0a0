// Skip list: ordering, span/rank arithmetic, range queries, level bound.

use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use rudis::ds::skiplist::{RangeSpec, Skiplist, SKIPLIST_MAXLEVEL};
use rudis::Sds;

fn member(name: &str) -> Rc<Sds> {
    Rc::new(Sds::from(name))
}

fn build(n: usize, seed: u64) -> Skiplist {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut sl = Skiplist::new();
    for i in 0..n {
        sl.insert(&mut rng, i as f64, member(&format!("m{i:06}")));
    }
    sl
}

#[test]
fn forward_and_backward_walks_agree() {
    let sl = build(500, 3);
    let mut fwd = Vec::new();
    let mut node = sl.first();
    while let Some(n) = node {
        fwd.push(n.member().as_bytes().to_vec());
        node = n.next();
    }
    let mut back = Vec::new();
    let mut node = sl.last();
    while let Some(n) = node {
        back.push(n.member().as_bytes().to_vec());
        node = n.prev();
    }
    back.reverse();
    assert_eq!(fwd, back);
    assert_eq!(fwd.len(), 500);
}

#[test]
fn equal_scores_order_by_member() {
    let mut rng = SmallRng::seed_from_u64(9);
    let mut sl = Skiplist::new();
    for name in ["delta", "alpha", "charlie", "bravo"] {
        sl.insert(&mut rng, 1.0, member(name));
    }
    let mut order = Vec::new();
    let mut node = sl.first();
    while let Some(n) = node {
        order.push(String::from_utf8(n.member().as_bytes().to_vec()).unwrap());
        node = n.next();
    }
    assert_eq!(order, ["alpha", "bravo", "charlie", "delta"]);
}

#[test]
fn rank_and_element_by_rank_are_inverse() {
    let sl = build(1000, 17);
    for rank in [1usize, 2, 499, 500, 999, 1000] {
        let node = sl.element_by_rank(rank).unwrap();
        assert_eq!(sl.rank(node.score(), node.member()), Some(rank));
    }
    assert!(sl.element_by_rank(0).is_none());
    assert!(sl.element_by_rank(1001).is_none());
    assert_eq!(sl.rank(123.0, &Sds::from("absent")), None);
}

#[test]
fn spans_survive_deletion() {
    let mut sl = build(200, 5);
    for i in (0..200).step_by(2) {
        assert!(sl.delete(i as f64, &Sds::from(format!("m{i:06}").as_str())));
    }
    assert_eq!(sl.len(), 100);
    for (pos, i) in (1..200).step_by(2).enumerate() {
        let node = sl.element_by_rank(pos + 1).unwrap();
        assert_eq!(node.score(), i as f64);
        assert_eq!(sl.rank(node.score(), node.member()), Some(pos + 1));
    }
}

#[test]
fn range_queries_with_exclusive_bounds() {
    let sl = build(100, 21);
    let range = RangeSpec {
        min: 10.0,
        max: 20.0,
        minex: true,
        maxex: false,
    };
    let first = sl.first_in_range(&range).unwrap();
    assert_eq!(first.score(), 11.0);
    let last = sl.last_in_range(&range).unwrap();
    assert_eq!(last.score(), 20.0);

    let void = RangeSpec {
        min: 5.0,
        max: 5.0,
        minex: true,
        maxex: false,
    };
    assert!(!sl.is_in_range(&void));
    assert!(sl.first_in_range(&void).is_none());
}

#[test]
fn delete_range_by_score_invokes_callback() {
    let mut sl = build(50, 33);
    let mut removed = Vec::new();
    let n = sl.delete_range_by_score(
        &RangeSpec {
            min: 10.0,
            max: 19.0,
            minex: false,
            maxex: false,
        },
        |m, s| removed.push((m.as_bytes().to_vec(), s)),
    );
    assert_eq!(n, 10);
    assert_eq!(removed.len(), 10);
    assert_eq!(sl.len(), 40);
    assert!(removed.iter().all(|(_, s)| (10.0..=19.0).contains(s)));
}

#[test]
fn delete_range_by_rank_is_one_based_inclusive() {
    let mut sl = build(20, 41);
    let mut removed = Vec::new();
    let n = sl.delete_range_by_rank(1, 5, |m, _| removed.push(m.as_bytes().to_vec()));
    assert_eq!(n, 5);
    assert_eq!(sl.len(), 15);
    assert_eq!(sl.first().unwrap().score(), 5.0);
    assert_eq!(removed[0], b"m000000".to_vec());
}

#[test]
fn level_stays_within_the_cap() {
    // Large insert volumes never push a node past the fixed level cap.
    let sl = build(100_000, 77);
    assert!(sl.height() <= SKIPLIST_MAXLEVEL);
    assert_eq!(sl.len(), 100_000);
}
