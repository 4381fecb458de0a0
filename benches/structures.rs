//! Criterion benchmarks for the hot data structures: list-pack pushes and
//! index walks, dict insert/lookup under incremental rehash, skip-list
//! insertion and rank queries.

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use rudis::ds::skiplist::Skiplist;
use rudis::{Dict, Sds, Ziplist};

fn bench_ziplist(c: &mut Criterion) {
    c.bench_function("ziplist push 128 tail", |b| {
        b.iter(|| {
            let mut zl = Ziplist::new();
            for i in 0..128 {
                zl.push(black_box(format!("value-{i}").as_bytes()), false);
            }
            zl
        })
    });

    let mut zl = Ziplist::new();
    for i in 0..128 {
        zl.push(format!("value-{i}").as_bytes(), false);
    }
    c.bench_function("ziplist index middle", |b| {
        b.iter(|| black_box(zl.index(black_box(64))))
    });
}

fn bench_dict(c: &mut Criterion) {
    c.bench_function("dict insert 10k", |b| {
        b.iter(|| {
            let mut d: Dict<Sds, usize> = Dict::new();
            for i in 0..10_000 {
                d.add(Sds::from(format!("key:{i}").as_str()), i);
            }
            d
        })
    });

    let mut d: Dict<Sds, usize> = Dict::new();
    for i in 0..10_000 {
        d.add(Sds::from(format!("key:{i}").as_str()), i);
    }
    c.bench_function("dict lookup hit", |b| {
        b.iter(|| black_box(d.get(black_box(b"key:5000"))))
    });
}

fn bench_skiplist(c: &mut Criterion) {
    c.bench_function("skiplist insert 10k", |b| {
        b.iter(|| {
            let mut rng = SmallRng::seed_from_u64(42);
            let mut sl = Skiplist::new();
            for i in 0..10_000 {
                sl.insert(
                    &mut rng,
                    i as f64,
                    Rc::new(Sds::from(format!("m{i:05}").as_str())),
                );
            }
            sl
        })
    });

    let mut rng = SmallRng::seed_from_u64(42);
    let mut sl = Skiplist::new();
    for i in 0..10_000 {
        sl.insert(
            &mut rng,
            i as f64,
            Rc::new(Sds::from(format!("m{i:05}").as_str())),
        );
    }
    c.bench_function("skiplist rank query", |b| {
        b.iter(|| black_box(sl.element_by_rank(black_box(5000))))
    });
}

criterion_group!(benches, bench_ziplist, bench_dict, bench_skiplist);
criterion_main!(benches);
