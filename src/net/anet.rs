//! Low-level socket plumbing: listening endpoints, non-blocking accept, and
//! per-connection socket options.
//!
//! Raw descriptors are used for listeners (their lifetime spans the whole
//! process and they are closed explicitly at shutdown); accepted
//! connections are immediately wrapped in owning stream types so an error
//! path can never leak a descriptor.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

use nix::sys::socket::setsockopt;
use nix::sys::socket::sockopt;

/// Accepts processed per readiness event before yielding back to the loop.
pub const MAX_ACCEPTS_PER_CALL: usize = 1000;

fn last_os_error<T>() -> io::Result<T> {
    Err(io::Error::last_os_error())
}

/// Switch a descriptor to non-blocking mode.
pub fn set_nonblock(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor the caller owns.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return last_os_error();
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return last_os_error();
        }
    }
    Ok(())
}

/// Disable Nagle batching for a connection socket.
pub fn enable_nodelay(fd: RawFd) -> io::Result<()> {
    // SAFETY: fd is a live socket owned by the caller.
    let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    setsockopt(&bfd, sockopt::TcpNoDelay, &true).map_err(io::Error::from)
}

/// Enable TCP keepalive with `interval` seconds between probes (0 leaves
/// the kernel defaults for the probe timing).
pub fn keepalive(fd: RawFd, interval: u32) -> io::Result<()> {
    // SAFETY: fd is a live socket owned by the caller.
    let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    setsockopt(&bfd, sockopt::KeepAlive, &true).map_err(io::Error::from)?;
    if interval > 0 {
        setsockopt(&bfd, sockopt::TcpKeepIdle, &interval).map_err(io::Error::from)?;
        let probe = (interval / 3).max(1);
        setsockopt(&bfd, sockopt::TcpKeepInterval, &probe).map_err(io::Error::from)?;
        setsockopt(&bfd, sockopt::TcpKeepCount, &3u32).map_err(io::Error::from)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Listening sockets
// ─────────────────────────────────────────────────────────────────────────────

/// Create a non-blocking TCP listener on `addr:port` with the requested
/// accept backlog.
pub fn tcp_server(port: u16, bindaddr: Option<&str>, backlog: i32) -> io::Result<RawFd> {
    let ip: Ipv4Addr = match bindaddr {
        Some(a) => a
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid bind address"))?,
        None => Ipv4Addr::UNSPECIFIED,
    };

    // SAFETY: plain socket syscalls; the descriptor is closed on every
    // error path before returning.
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return last_os_error();
        }
        let yes: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &yes as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            libc::close(fd);
            return last_os_error();
        }

        let mut sa: libc::sockaddr_in = mem::zeroed();
        sa.sin_family = libc::AF_INET as libc::sa_family_t;
        sa.sin_port = port.to_be();
        sa.sin_addr.s_addr = u32::from(ip).to_be();
        if libc::bind(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) < 0
        {
            libc::close(fd);
            return last_os_error();
        }
        if libc::listen(fd, backlog) < 0 {
            libc::close(fd);
            return last_os_error();
        }
        if let Err(e) = set_nonblock(fd) {
            libc::close(fd);
            return Err(e);
        }
        Ok(fd)
    }
}

/// Create a non-blocking Unix-domain listener at `path` (an existing socket
/// file is removed first).
pub fn unix_server(path: &str, backlog: i32) -> io::Result<RawFd> {
    let _ = std::fs::remove_file(path);
    // SAFETY: as for `tcp_server`.
    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return last_os_error();
        }
        let mut sa: libc::sockaddr_un = mem::zeroed();
        sa.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let bytes = path.as_bytes();
        if bytes.len() >= sa.sun_path.len() {
            libc::close(fd);
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unix socket path too long",
            ));
        }
        for (i, b) in bytes.iter().enumerate() {
            sa.sun_path[i] = *b as libc::c_char;
        }
        if libc::bind(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        ) < 0
        {
            libc::close(fd);
            return last_os_error();
        }
        if libc::listen(fd, backlog) < 0 {
            libc::close(fd);
            return last_os_error();
        }
        if let Err(e) = set_nonblock(fd) {
            libc::close(fd);
            return Err(e);
        }
        Ok(fd)
    }
}

/// Close a raw listener descriptor.
pub fn close_listener(fd: RawFd) {
    // SAFETY: only called on descriptors this module returned.
    unsafe {
        libc::close(fd);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept
// ─────────────────────────────────────────────────────────────────────────────

/// One accepted connection: the raw descriptor (already non-blocking) and
/// the formatted peer identity.
pub struct Accepted {
    pub fd: RawFd,
    pub peer: String,
}

/// Accept one pending TCP connection; `Ok(None)` when the queue is empty.
pub fn tcp_accept(listen_fd: RawFd) -> io::Result<Option<Accepted>> {
    // SAFETY: accept fills at most `len` bytes of the storage; the new
    // descriptor is owned by the returned value.
    unsafe {
        let mut ss: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = libc::accept(listen_fd, &mut ss as *mut _ as *mut libc::sockaddr, &mut len);
        if fd < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(err),
            };
        }
        set_nonblock(fd)?;
        let peer = if ss.ss_family == libc::AF_INET as libc::sa_family_t {
            let sin = &*(&ss as *const _ as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            format!("{}:{}", ip, u16::from_be(sin.sin_port))
        } else {
            "?:0".to_string()
        };
        Ok(Some(Accepted { fd, peer }))
    }
}

/// Accept one pending Unix-domain connection; `Ok(None)` when the queue is
/// empty.
pub fn unix_accept(listen_fd: RawFd) -> io::Result<Option<Accepted>> {
    // SAFETY: as for `tcp_accept`.
    unsafe {
        let fd = libc::accept(listen_fd, std::ptr::null_mut(), std::ptr::null_mut());
        if fd < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(err),
            };
        }
        set_nonblock(fd)?;
        Ok(Some(Accepted {
            fd,
            peer: "/unixsocket:0".to_string(),
        }))
    }
}
