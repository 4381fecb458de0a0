//! Event loop: file-readiness dispatch plus a timed-event scheduler, all on
//! one cooperative thread.
//!
//! Each iteration runs, in order: the before-sleep hook, a readiness poll
//! bounded by the nearest timer deadline, file events in report order
//! (readable handler before writable for the same descriptor), then due
//! timed events.  Handlers never block; all sockets are non-blocking and
//! partial I/O resumes on the next readiness report.
//!
//! The loop is generic over a context type `C` (the server); handlers are
//! plain function pointers receiving both the loop and the context, so a
//! handler can re-register events or schedule timers while it runs.
//!
//! Timed events live on an unordered list with monotonically assigned
//! identifiers.  Processing restarts from the head after every fired
//! handler so handler-induced list mutation is safe, and events created
//! during this cycle (id above the cycle's snapshot) are not considered
//! until the next cycle, so a handler adding events cannot loop forever.
//! If the wall clock moves backwards, every pending timer fires at the next
//! opportunity rather than stalling for the skipped interval.

pub mod epoll;

use std::io;
use std::os::unix::io::RawFd;

use crate::util::mstime;

pub const AE_NONE: i32 = 0;
pub const AE_READABLE: i32 = 1;
pub const AE_WRITABLE: i32 = 2;

/// File event handler.
pub type AeFileProc<C> = fn(&mut AeEventLoop<C>, &mut C, RawFd, i32);
/// Timed event handler; returns the next period in milliseconds, or `None`
/// to not reschedule.
pub type AeTimeProc<C> = fn(&mut AeEventLoop<C>, &mut C, u64) -> Option<u64>;
/// Hook invoked before each readiness poll.
pub type AeBeforeSleepProc<C> = fn(&mut AeEventLoop<C>, &mut C);

struct FileEvent<C> {
    mask: i32,
    rfile_proc: Option<AeFileProc<C>>,
    wfile_proc: Option<AeFileProc<C>>,
}

impl<C> FileEvent<C> {
    fn none() -> Self {
        FileEvent {
            mask: AE_NONE,
            rfile_proc: None,
            wfile_proc: None,
        }
    }
}

struct TimeEvent<C> {
    id: u64,
    when_ms: u64,
    proc: AeTimeProc<C>,
}

/// The event loop.
pub struct AeEventLoop<C> {
    setsize: usize,
    events: Vec<FileEvent<C>>,
    time_events: Vec<TimeEvent<C>>,
    time_event_next_id: u64,
    /// Wall-clock seconds at the previous timer pass, to detect regression.
    last_time: u64,
    stop: bool,
    api: epoll::ApiState,
    pub before_sleep: Option<AeBeforeSleepProc<C>>,
}

impl<C> AeEventLoop<C> {
    /// Create a loop able to monitor descriptors `0..setsize`.
    pub fn new(setsize: usize) -> io::Result<Self> {
        let mut events = Vec::with_capacity(setsize);
        events.resize_with(setsize, FileEvent::none);
        Ok(AeEventLoop {
            setsize,
            events,
            time_events: Vec::new(),
            time_event_next_id: 0,
            last_time: mstime() / 1000,
            stop: false,
            api: epoll::ApiState::new(setsize)?,
            before_sleep: None,
        })
    }

    pub fn setsize(&self) -> usize {
        self.setsize
    }

    /// Ask the loop to exit after the current iteration.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    // ── File events ─────────────────────────────────────────────────────────

    /// Register `proc` for `mask` readiness on `fd`.
    pub fn create_file_event(
        &mut self,
        fd: RawFd,
        mask: i32,
        proc: AeFileProc<C>,
    ) -> io::Result<()> {
        let idx = fd as usize;
        if idx >= self.setsize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fd outside event loop setsize",
            ));
        }
        self.api.add_event(fd, self.events[idx].mask, mask)?;
        let fe = &mut self.events[idx];
        fe.mask |= mask;
        if mask & AE_READABLE != 0 {
            fe.rfile_proc = Some(proc);
        }
        if mask & AE_WRITABLE != 0 {
            fe.wfile_proc = Some(proc);
        }
        Ok(())
    }

    /// Remove `mask` interest from `fd`.  Idempotent.
    pub fn delete_file_event(&mut self, fd: RawFd, mask: i32) {
        let idx = fd as usize;
        if idx >= self.setsize {
            return;
        }
        let fe = &mut self.events[idx];
        if fe.mask == AE_NONE {
            return;
        }
        fe.mask &= !mask;
        if mask & AE_READABLE != 0 {
            fe.rfile_proc = None;
        }
        if mask & AE_WRITABLE != 0 {
            fe.wfile_proc = None;
        }
        self.api.del_event(fd, self.events[idx].mask);
    }

    /// Registered mask for `fd`.
    pub fn file_event_mask(&self, fd: RawFd) -> i32 {
        self.events
            .get(fd as usize)
            .map(|fe| fe.mask)
            .unwrap_or(AE_NONE)
    }

    // ── Timed events ────────────────────────────────────────────────────────

    /// Schedule `proc` to fire `after_ms` from now; returns its identifier.
    pub fn create_time_event(&mut self, after_ms: u64, proc: AeTimeProc<C>) -> u64 {
        let id = self.time_event_next_id;
        self.time_event_next_id += 1;
        self.time_events.push(TimeEvent {
            id,
            when_ms: mstime() + after_ms,
            proc,
        });
        id
    }

    /// Cancel a timed event by identifier; `true` when found.
    pub fn delete_time_event(&mut self, id: u64) -> bool {
        match self.time_events.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.time_events.remove(idx);
                true
            }
            None => false,
        }
    }

    fn nearest_timer_deadline(&self) -> Option<u64> {
        self.time_events.iter().map(|t| t.when_ms).min()
    }

    fn process_time_events(&mut self, ctx: &mut C) -> usize {
        let mut processed = 0;

        // Wall-clock regression: fire everything at the next opportunity
        // rather than letting timers stall for the skipped interval.
        let now_s = mstime() / 1000;
        if now_s < self.last_time {
            for te in &mut self.time_events {
                te.when_ms = 0;
            }
        }
        self.last_time = now_s;

        let maxid = self.time_event_next_id.wrapping_sub(1);
        let mut i = 0;
        while i < self.time_events.len() {
            let te = &self.time_events[i];
            if te.id > maxid {
                i += 1;
                continue;
            }
            if te.when_ms <= mstime() {
                let id = te.id;
                let proc = te.proc;
                let ret = proc(self, ctx, id);
                processed += 1;
                // The handler may have added or removed events; re-locate
                // by identifier before applying the reschedule decision.
                if let Some(idx) = self.time_events.iter().position(|t| t.id == id) {
                    match ret {
                        Some(period_ms) => self.time_events[idx].when_ms = mstime() + period_ms,
                        None => {
                            self.time_events.remove(idx);
                        }
                    }
                }
                // Restart from the head to tolerate list mutation.
                i = 0;
            } else {
                i += 1;
            }
        }
        processed
    }

    // ── Main loop ───────────────────────────────────────────────────────────

    /// One iteration: poll (bounded by the nearest timer), dispatch file
    /// events, then run due timers.  Returns the number of events handled.
    pub fn process_events(&mut self, ctx: &mut C) -> usize {
        let mut processed = 0;

        let timeout_ms = self.nearest_timer_deadline().map(|when| {
            let now = mstime();
            if when > now {
                when - now
            } else {
                0
            }
        });

        let fired = self.api.poll(timeout_ms);
        for (fd, mask) in fired {
            let idx = fd as usize;
            if idx >= self.setsize {
                continue;
            }
            let mut rfired = false;
            // Handlers can unregister the descriptor mid-dispatch; re-read
            // the registration before each call.
            if self.events[idx].mask & mask & AE_READABLE != 0 {
                if let Some(proc) = self.events[idx].rfile_proc {
                    rfired = true;
                    proc(self, ctx, fd, mask);
                }
            }
            if self.events[idx].mask & mask & AE_WRITABLE != 0 {
                if let Some(proc) = self.events[idx].wfile_proc {
                    let same_as_read = rfired
                        && self.events[idx]
                            .rfile_proc
                            .map(|r| r as usize == proc as usize)
                            .unwrap_or(false);
                    if !same_as_read {
                        proc(self, ctx, fd, mask);
                    }
                }
            }
            processed += 1;
        }

        processed + self.process_time_events(ctx)
    }

    /// Run until [`stop`](Self::stop) is called.
    pub fn run(&mut self, ctx: &mut C) {
        self.stop = false;
        while !self.stop {
            if let Some(hook) = self.before_sleep {
                hook(self, ctx);
            }
            self.process_events(ctx);
        }
    }
}
