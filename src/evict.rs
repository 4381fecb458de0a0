//! Memory-driven eviction: the sampling pool and the free loop that runs
//! before write commands are admitted under a configured memory cap.
//!
//! LRU policies do not scan the whole key space.  Each pass samples a
//! handful of random keys, measures their idle time from the access-clock
//! stamp, and merges them into a small pool kept sorted by ascending idle
//! time; the pool's back — the stalest key seen across passes — is evicted
//! first.  Random and TTL policies pick directly from the sampled keys.


use crate::ds::sds::Sds;
use crate::server::{MaxmemoryPolicy, Server};

/// Size of the per-database eviction candidate pool.
pub const EVICTION_POOL_SIZE: usize = 16;

/// One eviction candidate: a key and its observed idle time.
pub struct EvictionPoolEntry {
    pub idle: u64,
    pub key: Sds,
}

/// Sample `maxmemory_samples` random keys from `sample_from_expires`-chosen
/// dictionary and merge them into the pool, keeping it sorted by ascending
/// idle time and capped at [`EVICTION_POOL_SIZE`].
pub fn eviction_pool_populate(
    db: &mut crate::db::Db,
    sample_from_expires: bool,
    samples: usize,
    lru_clock: u32,
) {
    let mut rng = rand::thread_rng();
    let mut picked: Vec<(Sds, u64)> = Vec::with_capacity(samples);
    {
        let keys: Vec<Sds> = if sample_from_expires {
            db.expires
                .sample_entries(&mut rng, samples)
                .into_iter()
                .map(|(k, _)| k.dup())
                .collect()
        } else {
            db.dict
                .sample_entries(&mut rng, samples)
                .into_iter()
                .map(|(k, _)| k.dup())
                .collect()
        };
        for key in keys {
            // Idle time always comes from the key-space object, whichever
            // dictionary supplied the sample.
            if let Some(o) = db.dict.get(key.as_bytes()) {
                picked.push((key, o.idle_time_ms(lru_clock)));
            }
        }
    }

    for (key, idle) in picked {
        if db
            .eviction_pool
            .iter()
            .any(|e| e.key.as_bytes() == key.as_bytes())
        {
            continue;
        }
        let pos = db.eviction_pool.partition_point(|e| e.idle < idle);
        let full = db.eviction_pool.len() == EVICTION_POOL_SIZE;
        if pos == 0 && full {
            // Less idle than every candidate in a full pool.
            continue;
        }
        if full {
            // Make room by discarding the front — the smallest idle time —
            // so the stale tail the free loop consumes survives.
            db.eviction_pool.remove(0);
            db.eviction_pool.insert(pos - 1, EvictionPoolEntry { idle, key });
        } else {
            db.eviction_pool.insert(pos, EvictionPoolEntry { idle, key });
        }
    }
}

/// Free memory until usage drops below the cap.  `Err(())` when nothing
/// more can be evicted (or the policy forbids eviction) while still above
/// the cap.
pub fn free_memory_if_needed(server: &mut Server) -> Result<(), ()> {
    let maxmemory = server.config.maxmemory;
    if maxmemory == 0 || server.used_memory() <= maxmemory {
        return Ok(());
    }
    if server.config.maxmemory_policy == MaxmemoryPolicy::NoEviction {
        return Err(());
    }

    let policy = server.config.maxmemory_policy;
    let samples = server.config.maxmemory_samples;
    let num_dbs = server.dbs.len();
    let mut rng = rand::thread_rng();

    while server.used_memory() > maxmemory {
        let mut freed_this_round = false;

        for j in 0..num_dbs {
            let lru_clock = server.lru_clock;
            let dbid = server.dbs[j].id;

            let volatile = matches!(
                policy,
                MaxmemoryPolicy::VolatileLru
                    | MaxmemoryPolicy::VolatileRandom
                    | MaxmemoryPolicy::VolatileTtl
            );
            {
                let db = &server.dbs[j];
                let candidates = if volatile {
                    db.expires.len()
                } else {
                    db.dict.len()
                };
                if candidates == 0 {
                    continue;
                }
            }

            let bestkey: Option<Sds> = match policy {
                MaxmemoryPolicy::AllkeysRandom | MaxmemoryPolicy::VolatileRandom => {
                    let db = &mut server.dbs[j];
                    if volatile {
                        db.expires.random_entry(&mut rng).map(|(k, _)| k.dup())
                    } else {
                        db.dict.random_entry(&mut rng).map(|(k, _)| k.dup())
                    }
                }
                MaxmemoryPolicy::AllkeysLru | MaxmemoryPolicy::VolatileLru => {
                    let db = &mut server.dbs[j];
                    eviction_pool_populate(db, volatile, samples, lru_clock);
                    // Stalest-first from the back; skip entries whose key
                    // has meanwhile vanished.
                    let mut best = None;
                    while let Some(entry) = db.eviction_pool.pop() {
                        if db.dict.contains(entry.key.as_bytes()) {
                            best = Some(entry.key);
                            break;
                        }
                    }
                    best
                }
                MaxmemoryPolicy::VolatileTtl => {
                    let db = &mut server.dbs[j];
                    let mut best: Option<(Sds, u64)> = None;
                    for (k, when) in db.expires.sample_entries(&mut rng, samples) {
                        if best.as_ref().map(|(_, w)| when < w).unwrap_or(true) {
                            best = Some((k.dup(), *when));
                        }
                    }
                    best.map(|(k, _)| k)
                }
                MaxmemoryPolicy::NoEviction => unreachable!(),
            };

            if let Some(key) = bestkey {
                let db = &mut server.dbs[j];
                db.delete(key.as_bytes());
                server.dirty += 1;
                server.stats.evicted_keys += 1;
                server.sinks.propagate(dbid, &[b"DEL", key.as_bytes()]);
                server.sinks.notify_change(dbid, key.as_bytes());
                freed_this_round = true;
            }
        }

        if !freed_this_round {
            return Err(());
        }
    }
    Ok(())
}
