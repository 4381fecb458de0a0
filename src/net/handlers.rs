//! Event-loop handlers wiring sockets to the command pipeline: accept,
//! read-and-parse, and the two write paths (batched flush from the
//! before-sleep hook, readiness-driven drain for slow peers).

use std::io;
use std::net::TcpStream;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;

use log::{debug, warn};

use crate::ae::{AeEventLoop, AE_READABLE, AE_WRITABLE};
use crate::command;
use crate::net::anet::{self, MAX_ACCEPTS_PER_CALL};
use crate::net::client::{Client, ClientStream, WriteOutcome};
use crate::protocol::{
    self, ParseResult, ReqType, PROTO_IOBUF_LEN, PROTO_MAX_QUERYBUF_LEN, PROTO_MBULK_BIG_ARG,
};
use crate::server::Server;

// ─────────────────────────────────────────────────────────────────────────────
// Accept
// ─────────────────────────────────────────────────────────────────────────────

pub fn accept_tcp_handler(el: &mut AeEventLoop<Server>, server: &mut Server, fd: RawFd, _mask: i32) {
    for _ in 0..MAX_ACCEPTS_PER_CALL {
        match anet::tcp_accept(fd) {
            Ok(Some(acc)) => {
                // SAFETY: the accepted descriptor is owned by exactly this
                // stream from here on.
                let stream = unsafe { TcpStream::from_raw_fd(acc.fd) };
                accept_common(el, server, acc.fd, ClientStream::Tcp(stream), acc.peer, false);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("accept error: {e}");
                break;
            }
        }
    }
}

pub fn accept_unix_handler(
    el: &mut AeEventLoop<Server>,
    server: &mut Server,
    fd: RawFd,
    _mask: i32,
) {
    for _ in 0..MAX_ACCEPTS_PER_CALL {
        match anet::unix_accept(fd) {
            Ok(Some(acc)) => {
                // SAFETY: as above.
                let stream = unsafe { UnixStream::from_raw_fd(acc.fd) };
                accept_common(el, server, acc.fd, ClientStream::Unix(stream), acc.peer, true);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("accept error: {e}");
                break;
            }
        }
    }
}

fn accept_common(
    el: &mut AeEventLoop<Server>,
    server: &mut Server,
    fd: RawFd,
    mut stream: ClientStream,
    peer: String,
    is_unix: bool,
) {
    use std::io::Write;

    if server.clients.len() >= server.config.maxclients {
        // Best-effort short error, then drop (closing the socket).
        let _ = stream.write(b"-ERR max number of clients reached\r\n");
        server.stats.rejected_conn += 1;
        return;
    }
    if !is_unix {
        let _ = anet::enable_nodelay(fd);
        if server.config.tcp_keepalive > 0 {
            let _ = anet::keepalive(fd, server.config.tcp_keepalive);
        }
    }

    let id = server.next_client_id;
    server.next_client_id += 1;
    let client = Client::new(id, fd, stream, peer, is_unix, server.now_ms / 1000);

    if let Err(e) = el.create_file_event(fd, AE_READABLE, read_query_from_client) {
        warn!("cannot register client fd {fd}: {e}");
        return;
    }
    debug!("accepted client id={id} fd={fd} peer={}", client.peer);
    server.clients.insert(fd, client);
    server.stats.numconnections += 1;
}

// ─────────────────────────────────────────────────────────────────────────────
// Read path
// ─────────────────────────────────────────────────────────────────────────────

pub fn read_query_from_client(
    el: &mut AeEventLoop<Server>,
    server: &mut Server,
    fd: RawFd,
    _mask: i32,
) {
    let now_s = server.now_ms / 1000;
    let Some(c) = server.clients.get_mut(&fd) else {
        return;
    };

    let mut readlen = PROTO_IOBUF_LEN;
    // Mid-way through a large bulk argument, read exactly the rest of it so
    // the payload lands in one buffer.
    if c.reqtype == ReqType::Multibulk && c.bulklen != -1 && c.bulklen >= PROTO_MBULK_BIG_ARG as i64
    {
        let remaining = (c.bulklen as usize + 2).saturating_sub(c.querybuf.len());
        if remaining > 0 && remaining < readlen {
            readlen = remaining;
        }
    }

    let read_result = {
        let Client {
            querybuf, stream, ..
        } = &mut *c;
        querybuf.append_from(stream, readlen)
    };
    match read_result {
        Ok(0) => {
            debug!("client fd {fd} closed connection");
            free_client(el, server, fd);
            return;
        }
        Ok(_) => {
            c.lastinteraction = now_s;
            if c.querybuf.len() > c.querybuf_peak {
                c.querybuf_peak = c.querybuf.len();
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => return,
        Err(e) => {
            debug!("read error on client fd {fd}: {e}");
            free_client(el, server, fd);
            return;
        }
    }

    if server
        .clients
        .get(&fd)
        .map(|c| c.querybuf.len() > PROTO_MAX_QUERYBUF_LEN)
        .unwrap_or(false)
    {
        warn!("closing client fd {fd}: query buffer exceeds limit");
        free_client(el, server, fd);
        return;
    }

    process_input_buffer(el, server, fd);
    schedule_write(server, fd);
}

/// Parse and execute until the buffer has no complete request (or the
/// client got flagged for close).
fn process_input_buffer(el: &mut AeEventLoop<Server>, server: &mut Server, fd: RawFd) {
    loop {
        let Some(c) = server.clients.get_mut(&fd) else {
            return;
        };
        if c.close_after_reply || c.close_asap {
            return;
        }
        match protocol::try_parse_request(c) {
            ParseResult::Incomplete => return,
            ParseResult::BadProtocol => return,
            ParseResult::Ready => {
                if c.argv.is_empty() {
                    c.reset_request();
                    continue;
                }
                command::process_command(el, server, fd);
            }
        }
    }
}

/// Put the client on the pending-write list when it has queued output.
pub fn schedule_write(server: &mut Server, fd: RawFd) {
    if let Some(c) = server.clients.get_mut(&fd) {
        if c.has_pending_output() && !c.pending_write {
            c.pending_write = true;
            server.clients_pending_write.push(fd);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Write path
// ─────────────────────────────────────────────────────────────────────────────

/// Readiness-driven drain for clients whose output did not fit in one
/// flush.  Removes the writable registration once everything is out.
pub fn send_reply_to_client(
    el: &mut AeEventLoop<Server>,
    server: &mut Server,
    fd: RawFd,
    _mask: i32,
) {
    let force = server.config.maxmemory > 0 && server.used_memory() > server.config.maxmemory;
    let now_s = server.now_ms / 1000;
    let Some(c) = server.clients.get_mut(&fd) else {
        el.delete_file_event(fd, AE_WRITABLE);
        return;
    };
    match c.write_pending(force) {
        Ok(WriteOutcome::Drained) => {
            c.lastinteraction = now_s;
            el.delete_file_event(fd, AE_WRITABLE);
            if c.close_after_reply {
                free_client(el, server, fd);
            }
        }
        Ok(WriteOutcome::Partial) => {
            c.lastinteraction = now_s;
        }
        Err(e) => {
            debug!("write error on client fd {fd}: {e}");
            free_client(el, server, fd);
        }
    }
}

/// Flush every client on the pending-write list; slow peers get a writable
/// registration instead of blocking the loop.
pub fn handle_clients_with_pending_writes(el: &mut AeEventLoop<Server>, server: &mut Server) {
    let force = server.config.maxmemory > 0 && server.used_memory() > server.config.maxmemory;
    let pending = std::mem::take(&mut server.clients_pending_write);
    for fd in pending {
        let Some(c) = server.clients.get_mut(&fd) else {
            continue;
        };
        if !c.pending_write {
            continue;
        }
        c.pending_write = false;
        match c.write_pending(force) {
            Ok(WriteOutcome::Drained) => {
                if c.close_after_reply {
                    free_client(el, server, fd);
                }
            }
            Ok(WriteOutcome::Partial) => {
                if let Err(e) = el.create_file_event(fd, AE_WRITABLE, send_reply_to_client) {
                    warn!("cannot register writable event for fd {fd}: {e}");
                    free_client(el, server, fd);
                }
            }
            Err(e) => {
                debug!("write error on client fd {fd}: {e}");
                free_client(el, server, fd);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Teardown
// ─────────────────────────────────────────────────────────────────────────────

/// Remove both event registrations for a descriptor.
pub fn unlink_client_events(el: &mut AeEventLoop<Server>, fd: RawFd) {
    el.delete_file_event(fd, AE_READABLE | AE_WRITABLE);
}

/// Destroy a client: unregister, remove from every list, close the socket
/// (on drop of the owning stream).
pub fn free_client(el: &mut AeEventLoop<Server>, server: &mut Server, fd: RawFd) {
    unlink_client_events(el, fd);
    if let Some(c) = server.clients.remove(&fd) {
        debug!("freed client id={} fd={fd}", c.id);
    }
    server.clients_pending_write.retain(|&f| f != fd);
    server.clients_to_close.retain(|&f| f != fd);
}
