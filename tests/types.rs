// Type operation layer: encoding transitions at the documented thresholds
// and cross-encoding behaviour equivalence.

use rudis::obj::object::{Encoding, Robj, SetEnc, Value, ZsetEnc};
use rudis::server::Config;
use rudis::types::{hash, list, set, zset};
use rudis::ds::intset::Intset;
use rudis::ds::ziplist::Ziplist;
use rudis::obj::object::{HashEnc, ListEnc};

fn cfg() -> Config {
    Config::default()
}

fn new_list() -> Robj {
    Robj::new(Value::List(ListEnc::Ziplist(Ziplist::new())))
}

fn new_hash() -> Robj {
    Robj::new(Value::Hash(HashEnc::Ziplist(Ziplist::new())))
}

fn new_intset() -> Robj {
    Robj::new(Value::Set(SetEnc::Intset(Intset::new())))
}

fn new_zset() -> Robj {
    Robj::new(Value::Zset(ZsetEnc::Ziplist(Ziplist::new())))
}

// ── Lists ────────────────────────────────────────────────────────────────────

#[test]
fn list_stays_compact_at_the_thresholds() {
    let cfg = cfg();
    let mut o = new_list();
    for i in 0..512 {
        list::list_push(&mut o, format!("v{i}").as_bytes(), false, &cfg);
    }
    assert_eq!(o.encoding(), Encoding::Ziplist);
    list::list_push(&mut o, b"one-more", false, &cfg);
    assert_eq!(o.encoding(), Encoding::Linkedlist);
    assert_eq!(list::list_len(&o), 513);
}

#[test]
fn long_element_converts_list() {
    let cfg = cfg();
    let mut o = new_list();
    list::list_push(&mut o, &[b'a'; 64], false, &cfg);
    assert_eq!(o.encoding(), Encoding::Ziplist);
    list::list_push(&mut o, &[b'a'; 65], false, &cfg);
    assert_eq!(o.encoding(), Encoding::Linkedlist);
}

#[test]
fn list_sequence_survives_conversion() {
    let cfg = cfg();
    let mut o = new_list();
    for i in 0..600 {
        list::list_push(&mut o, format!("item-{i}").as_bytes(), false, &cfg);
    }
    assert_eq!(o.encoding(), Encoding::Linkedlist);
    for i in 0..600 {
        assert_eq!(
            list::list_index(&o, i).unwrap(),
            format!("item-{i}").into_bytes()
        );
    }
    // Pops come back in the same order from both ends.
    assert_eq!(list::list_pop(&mut o, true).unwrap(), b"item-0".to_vec());
    assert_eq!(list::list_pop(&mut o, false).unwrap(), b"item-599".to_vec());
}

// ── Hashes ───────────────────────────────────────────────────────────────────

#[test]
fn hash_field_update_keeps_single_entry() {
    let cfg = cfg();
    let mut o = new_hash();
    assert!(hash::hash_set(&mut o, &cfg, b"f", b"v1"));
    assert!(!hash::hash_set(&mut o, &cfg, b"f", b"v2"));
    assert_eq!(hash::hash_len(&o), 1);
    assert_eq!(hash::hash_get(&o, b"f").unwrap(), b"v2".to_vec());
}

#[test]
fn hash_converts_on_long_field_or_value() {
    let cfg = cfg();
    let mut o = new_hash();
    hash::hash_set(&mut o, &cfg, b"f", &[b'v'; 64]);
    assert_eq!(o.encoding(), Encoding::Ziplist);
    hash::hash_set(&mut o, &cfg, b"g", &[b'v'; 65]);
    assert_eq!(o.encoding(), Encoding::Ht);
    assert_eq!(hash::hash_get(&o, b"f").unwrap(), vec![b'v'; 64]);
    assert_eq!(hash::hash_len(&o), 2);
}

#[test]
fn hash_pairs_match_across_encodings() {
    let cfg = cfg();
    let mut compact = new_hash();
    let mut wide = new_hash();
    for i in 0..100 {
        let f = format!("field{i}");
        let v = format!("value{i}");
        hash::hash_set(&mut compact, &cfg, f.as_bytes(), v.as_bytes());
        hash::hash_set(&mut wide, &cfg, f.as_bytes(), v.as_bytes());
    }
    // Force the general encoding on one copy.
    hash::hash_set(&mut wide, &cfg, &[b'x'; 70], b"v");
    hash::hash_del(&mut wide, &[b'x'; 70]);
    assert_eq!(wide.encoding(), Encoding::Ht);

    let mut a = hash::hash_pairs(&compact);
    let mut b = hash::hash_pairs(&wide);
    a.sort();
    b.sort();
    assert_eq!(a, b);
}

// ── Sets ─────────────────────────────────────────────────────────────────────

#[test]
fn intset_promotes_to_table_on_non_integer() {
    let cfg = cfg();
    let mut o = new_intset();
    assert!(set::set_add(&mut o, &cfg, b"10"));
    assert!(set::set_add(&mut o, &cfg, b"20"));
    assert_eq!(o.encoding(), Encoding::Intset);
    assert!(set::set_add(&mut o, &cfg, b"not-a-number"));
    assert_eq!(o.encoding(), Encoding::Ht);
    assert!(set::set_contains(&o, b"10"));
    assert!(set::set_contains(&o, b"not-a-number"));
    assert_eq!(set::set_len(&o), 3);
}

#[test]
fn intset_promotes_to_table_on_growth() {
    let cfg = cfg();
    let mut o = new_intset();
    for i in 0..512 {
        set::set_add(&mut o, &cfg, i.to_string().as_bytes());
    }
    assert_eq!(o.encoding(), Encoding::Intset);
    set::set_add(&mut o, &cfg, b"512");
    assert_eq!(o.encoding(), Encoding::Ht);
    assert_eq!(set::set_len(&o), 513);
}

#[test]
fn set_add_is_idempotent() {
    let cfg = cfg();
    let mut o = new_intset();
    assert!(set::set_add(&mut o, &cfg, b"7"));
    assert!(!set::set_add(&mut o, &cfg, b"7"));
    assert!(set::set_remove(&mut o, b"7"));
    assert!(!set::set_remove(&mut o, b"7"));
}

#[test]
fn membership_matches_member_listing() {
    let cfg = cfg();
    let mut o = new_intset();
    for m in ["1", "2", "3", "apple", "banana"] {
        set::set_add(&mut o, &cfg, m.as_bytes());
    }
    for m in set::set_members(&o) {
        assert!(set::set_contains(&o, &m));
    }
    assert!(!set::set_contains(&o, b"cherry"));
}

// ── Sorted sets ──────────────────────────────────────────────────────────────

#[test]
fn zset_compact_until_entry_count_threshold() {
    let cfg = cfg();
    let mut rng = rand::thread_rng();
    let mut o = new_zset();
    for i in 0..128 {
        zset::zset_add(&mut o, &cfg, &mut rng, i as f64, format!("m{i}").as_bytes());
    }
    assert_eq!(o.encoding(), Encoding::Ziplist);
    zset::zset_add(&mut o, &cfg, &mut rng, 128.0, b"m128");
    assert_eq!(o.encoding(), Encoding::Skiplist);
    assert_eq!(zset::zset_len(&o), 129);
}

#[test]
fn zset_add_updates_score_without_duplicating() {
    let cfg = cfg();
    let mut rng = rand::thread_rng();
    let mut o = new_zset();
    use rudis::types::zset::ZAddOutcome;
    assert!(zset::zset_add(&mut o, &cfg, &mut rng, 1.0, b"m") == ZAddOutcome::Added);
    assert!(zset::zset_add(&mut o, &cfg, &mut rng, 1.0, b"m") == ZAddOutcome::Unchanged);
    assert!(zset::zset_add(&mut o, &cfg, &mut rng, 2.0, b"m") == ZAddOutcome::Updated);
    assert_eq!(zset::zset_len(&o), 1);
    assert_eq!(zset::zset_score(&o, b"m"), Some(2.0));
}

#[test]
fn skiplist_backing_stays_consistent_after_updates() {
    let cfg = cfg();
    let mut rng = rand::thread_rng();
    let mut o = new_zset();
    // Push straight past the compact threshold, then churn scores.
    for i in 0..200 {
        zset::zset_add(&mut o, &cfg, &mut rng, i as f64, format!("m{i}").as_bytes());
    }
    assert_eq!(o.encoding(), Encoding::Skiplist);
    for i in 0..200 {
        zset::zset_add(
            &mut o,
            &cfg,
            &mut rng,
            (200 - i) as f64,
            format!("m{i}").as_bytes(),
        );
    }
    assert_eq!(zset::zset_len(&o), 200);
    for i in 0..200usize {
        let member = format!("m{i}");
        let score = zset::zset_score(&o, member.as_bytes()).unwrap();
        assert_eq!(score, (200 - i) as f64);
        let rank = zset::zset_rank(&o, member.as_bytes(), false).unwrap();
        let rev = zset::zset_rank(&o, member.as_bytes(), true).unwrap();
        assert_eq!(rank + rev, 199);
    }
}

#[test]
fn zset_range_deletion_by_score_and_rank() {
    let cfg = cfg();
    let mut rng = rand::thread_rng();
    for compact in [true, false] {
        let mut o = new_zset();
        let n = if compact { 100 } else { 200 };
        for i in 0..n {
            zset::zset_add(&mut o, &cfg, &mut rng, i as f64, format!("m{i:03}").as_bytes());
        }
        assert_eq!(
            o.encoding(),
            if compact { Encoding::Ziplist } else { Encoding::Skiplist }
        );

        // Scores [10, 20) go away; exclusive max keeps m020.
        let range = rudis::ds::skiplist::RangeSpec {
            min: 10.0,
            max: 20.0,
            minex: false,
            maxex: true,
        };
        assert_eq!(zset::zset_delete_range_by_score(&mut o, &range), 10);
        assert_eq!(zset::zset_len(&o), n - 10);
        assert_eq!(zset::zset_score(&o, b"m010"), None);
        assert_eq!(zset::zset_score(&o, b"m020"), Some(20.0));

        // Ranks 0..=4 are now m000..m004.
        assert_eq!(zset::zset_delete_range_by_rank(&mut o, 0, 4), 5);
        assert_eq!(zset::zset_len(&o), n - 15);
        assert_eq!(zset::zset_score(&o, b"m004"), None);
        assert_eq!(zset::zset_rank(&o, b"m005", false), Some(0));
    }
}

#[test]
fn zset_remove_keeps_both_views_aligned() {
    let cfg = cfg();
    let mut rng = rand::thread_rng();
    let mut o = new_zset();
    for i in 0..150 {
        zset::zset_add(&mut o, &cfg, &mut rng, i as f64, format!("m{i}").as_bytes());
    }
    for i in (0..150).step_by(3) {
        assert!(zset::zset_remove(&mut o, format!("m{i}").as_bytes()));
    }
    assert_eq!(zset::zset_len(&o), 100);
    assert_eq!(zset::zset_score(&o, b"m0"), None);
    assert_eq!(zset::zset_rank(&o, b"m0", false), None);
    assert!(zset::zset_score(&o, b"m1").is_some());
}
