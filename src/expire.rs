//! Active expiration: periodic sampling of the expire sets so stale keys
//! are reclaimed even when nothing reads them.
//!
//! Two modes share one body.  The *slow* cycle runs from the periodic cron
//! task: per database it samples a batch of keys from the expire set,
//! deletes the stale ones, and repeats while more than a quarter of each
//! batch was stale — under a CPU budget proportional to the cron interval.
//! The *fast* cycle runs from the before-sleep hook only when the previous
//! slow cycle exhausted its budget, is bounded to one millisecond, and is
//! not re-entered within twice that.

use crate::server::Server;
use crate::util::{mstime, ustime};

/// Keys sampled from the expire set per inner loop.
pub const ACTIVE_EXPIRE_CYCLE_LOOKUPS_PER_LOOP: usize = 20;
/// Fast-cycle budget in microseconds.
pub const ACTIVE_EXPIRE_CYCLE_FAST_DURATION: u64 = 1000;
/// Slow-cycle CPU budget as a percentage of the cron interval.
pub const ACTIVE_EXPIRE_CYCLE_SLOW_TIME_PERC: u64 = 25;
/// Databases visited per cycle invocation.
const DBS_PER_CALL: usize = 16;

/// Which flavour of cycle to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Slow,
    Fast,
}

/// Rotating state carried between cycle invocations.
#[derive(Default)]
pub struct ActiveExpireState {
    /// Next database to visit.
    pub current_db: usize,
    /// The last slow cycle stopped on its time budget.
    pub timelimit_exit: bool,
    /// Start time of the last fast cycle (microseconds).
    pub last_fast_cycle: u64,
}

/// Run one active-expiration cycle.
pub fn active_expire_cycle(server: &mut Server, kind: CycleKind) {
    let start = ustime();

    if kind == CycleKind::Fast {
        // Fast cycles only pay off right after a budget-bounded slow cycle,
        // and never twice within their own duration doubled.
        if !server.expire_state.timelimit_exit {
            return;
        }
        if start < server.expire_state.last_fast_cycle + ACTIVE_EXPIRE_CYCLE_FAST_DURATION * 2 {
            return;
        }
        server.expire_state.last_fast_cycle = start;
    }

    let timelimit = match kind {
        CycleKind::Slow => {
            // 25% of a cron tick, in microseconds.
            (1_000_000 * ACTIVE_EXPIRE_CYCLE_SLOW_TIME_PERC / server.config.hz as u64 / 100).max(1)
        }
        CycleKind::Fast => ACTIVE_EXPIRE_CYCLE_FAST_DURATION,
    };
    server.expire_state.timelimit_exit = false;

    let num_dbs = server.dbs.len().min(DBS_PER_CALL);
    let mut rng = rand::thread_rng();

    'cycle: for _ in 0..num_dbs {
        let dbid = server.expire_state.current_db % server.dbs.len();
        server.expire_state.current_db += 1;

        let mut iteration = 0u32;
        loop {
            let now = mstime();
            {
                let db = &server.dbs[dbid];
                let num = db.expires.len();
                if num == 0 {
                    break;
                }
                // A nearly-empty expire table is not worth sampling.
                let slots = db.expires.size();
                if slots > crate::ds::dict::DICT_HT_INITIAL_SIZE && num * 100 / slots < 1 {
                    break;
                }
            }

            let to_sample = server.dbs[dbid]
                .expires
                .len()
                .min(ACTIVE_EXPIRE_CYCLE_LOOKUPS_PER_LOOP);
            let sampled: Vec<(crate::ds::sds::Sds, u64)> = server.dbs[dbid]
                .expires
                .sample_entries(&mut rng, to_sample)
                .into_iter()
                .map(|(k, when)| (k.dup(), *when))
                .collect();

            let mut expired = 0usize;
            for (key, when) in sampled {
                if when <= now {
                    server.dbs[dbid].delete(key.as_bytes());
                    server.stats.expired_keys += 1;
                    server.dirty += 1;
                    server.sinks.propagate(dbid, &[b"DEL", key.as_bytes()]);
                    server.sinks.notify_change(dbid, key.as_bytes());
                    expired += 1;
                }
            }

            // Check the budget every sixteen inner iterations.
            iteration += 1;
            if iteration & 0xF == 0 && ustime() - start > timelimit {
                server.expire_state.timelimit_exit = true;
                break 'cycle;
            }

            // Keep draining this database while the batch was at least a
            // quarter stale.
            if expired <= ACTIVE_EXPIRE_CYCLE_LOOKUPS_PER_LOOP / 4 {
                break;
            }
        }
    }
}
