//! epoll driver for the event loop.
//!
//! Thin state wrapper translating (fd, mask) registrations into epoll
//! interest sets and readiness reports back into mask form.

use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use super::{AE_READABLE, AE_WRITABLE};

pub struct ApiState {
    epoll: Epoll,
    events: Vec<EpollEvent>,
}

fn flags_for(mask: i32) -> EpollFlags {
    let mut f = EpollFlags::empty();
    if mask & AE_READABLE != 0 {
        f |= EpollFlags::EPOLLIN;
    }
    if mask & AE_WRITABLE != 0 {
        f |= EpollFlags::EPOLLOUT;
    }
    f
}

impl ApiState {
    pub fn new(setsize: usize) -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::empty()).map_err(io::Error::from)?;
        Ok(ApiState {
            epoll,
            events: vec![EpollEvent::empty(); setsize],
        })
    }

    /// Register interest `mask` for `fd`; `old_mask` selects between add and
    /// modify.
    pub fn add_event(&mut self, fd: RawFd, old_mask: i32, mask: i32) -> io::Result<()> {
        // SAFETY: the event loop only registers descriptors it keeps open
        // until the matching delete.
        let bfd = unsafe { BorrowedFd::borrow_raw(fd) };
        let event = EpollEvent::new(flags_for(old_mask | mask), fd as u64);
        let res = if old_mask == 0 {
            self.epoll.add(bfd, event)
        } else {
            let mut event = event;
            self.epoll.modify(bfd, &mut event)
        };
        res.map_err(io::Error::from)
    }

    /// Drop interest so that only `remaining_mask` stays registered.
    pub fn del_event(&mut self, fd: RawFd, remaining_mask: i32) {
        // SAFETY: as for `add_event`.
        let bfd = unsafe { BorrowedFd::borrow_raw(fd) };
        if remaining_mask == 0 {
            let _ = self.epoll.delete(bfd);
        } else {
            let mut event = EpollEvent::new(flags_for(remaining_mask), fd as u64);
            let _ = self.epoll.modify(bfd, &mut event);
        }
    }

    /// Wait for readiness; `timeout_ms = None` blocks indefinitely.
    /// Returns (fd, fired-mask) pairs.
    pub fn poll(&mut self, timeout_ms: Option<u64>) -> Vec<(RawFd, i32)> {
        let timeout = match timeout_ms {
            // Cron timers keep real waits short; clamping to u16 range only
            // matters for pathological timer gaps.
            Some(ms) => EpollTimeout::from(ms.min(u16::MAX as u64) as u16),
            None => EpollTimeout::NONE,
        };
        let n = match self.epoll.wait(&mut self.events, timeout) {
            Ok(n) => n,
            Err(_) => 0,
        };
        let mut fired = Vec::with_capacity(n);
        for e in &self.events[..n] {
            let flags = e.events();
            let mut mask = 0;
            if flags.contains(EpollFlags::EPOLLIN) {
                mask |= AE_READABLE;
            }
            if flags.contains(EpollFlags::EPOLLOUT) {
                mask |= AE_WRITABLE;
            }
            if flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP) {
                mask |= AE_WRITABLE;
            }
            fired.push((e.data() as RawFd, mask));
        }
        fired
    }
}
