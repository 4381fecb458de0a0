//! Per-client state: the socket, the resumable request parser position, and
//! the two-tier output path (fixed buffer first, then a queue of chunks).
//!
//! Replies go into the 16 KiB fixed buffer while the queue is empty and the
//! data fits; everything else is appended to the queue.  The write path
//! always drains the fixed buffer before the queue, so ordering is
//! preserved.  A *deferred* array header is an empty queue slot that is
//! patched in place once the element count is known.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::os::unix::io::RawFd;

use crate::ds::sds::Sds;
use crate::obj::shared::{self, shared};
use crate::protocol::{ReqType, PROTO_REPLY_CHUNK_BYTES};
use crate::util::d2string;

/// Client output queued per write event unless memory pressure demands a
/// full flush.
pub const MAX_WRITE_PER_EVENT: usize = 1024 * 64;

/// The accepted connection, TCP or local socket.
pub enum ClientStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientStream::Tcp(s) => s.read(buf),
            ClientStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientStream::Tcp(s) => s.write(buf),
            ClientStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.flush(),
            ClientStream::Unix(s) => s.flush(),
        }
    }
}

/// Outcome of a drain attempt on a client's pending output.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Everything pending was written.
    Drained,
    /// The socket stopped accepting bytes (or the fairness cap was hit).
    Partial,
}

/// One connected client.
pub struct Client {
    pub id: u64,
    pub fd: RawFd,
    pub stream: ClientStream,
    /// Index of the selected database.
    pub db_index: usize,
    pub name: Option<Sds>,
    /// Cached peer identity (`ip:port` or the unix socket marker).
    pub peer: String,

    // ── Input ───────────────────────────────────────────────────────────────
    pub querybuf: Sds,
    pub querybuf_peak: usize,
    pub reqtype: ReqType,
    /// Remaining bulk items of the request being parsed (0 = none).
    pub multibulklen: i64,
    /// Byte length of the bulk item being parsed (-1 = reading the header).
    pub bulklen: i64,
    /// Parsed argument vector of the current request.
    pub argv: Vec<Sds>,

    // ── Output ──────────────────────────────────────────────────────────────
    buf: Box<[u8; PROTO_REPLY_CHUNK_BYTES]>,
    bufpos: usize,
    reply: VecDeque<Vec<u8>>,
    pub reply_bytes: u64,
    /// Progress inside the chunk currently being written.
    sentlen: usize,

    // ── Flags and bookkeeping ───────────────────────────────────────────────
    pub close_after_reply: bool,
    pub close_asap: bool,
    pub is_unix: bool,
    /// Already queued on the pending-write list.
    pub pending_write: bool,
    /// Creation time (seconds).
    pub ctime: u64,
    /// Last read or write activity (seconds).
    pub lastinteraction: u64,
    /// Name of the last command executed (for introspection).
    pub lastcmd: &'static str,
}

impl Client {
    pub fn new(id: u64, fd: RawFd, stream: ClientStream, peer: String, is_unix: bool, now_s: u64) -> Self {
        Client {
            id,
            fd,
            stream,
            db_index: 0,
            name: None,
            peer,
            querybuf: Sds::with_capacity(0),
            querybuf_peak: 0,
            reqtype: ReqType::None,
            multibulklen: 0,
            bulklen: -1,
            argv: Vec::new(),
            buf: Box::new([0u8; PROTO_REPLY_CHUNK_BYTES]),
            bufpos: 0,
            reply: VecDeque::new(),
            reply_bytes: 0,
            sentlen: 0,
            close_after_reply: false,
            close_asap: false,
            is_unix,
            pending_write: false,
            ctime: now_s,
            lastinteraction: now_s,
            lastcmd: "",
        }
    }

    /// Forget the current request (after execution or a parse reset).
    pub fn reset_request(&mut self) {
        self.argv.clear();
        self.reqtype = ReqType::None;
        self.multibulklen = 0;
        self.bulklen = -1;
    }

    // ── Reply emission ──────────────────────────────────────────────────────

    #[inline]
    pub fn has_pending_output(&self) -> bool {
        self.bufpos > 0 || !self.reply.is_empty()
    }

    /// Append raw reply bytes: fixed buffer while the queue is unused and
    /// the data fits, queue otherwise.
    pub fn add_reply(&mut self, data: &[u8]) {
        if self.reply.is_empty() && self.bufpos + data.len() <= PROTO_REPLY_CHUNK_BYTES {
            self.buf[self.bufpos..self.bufpos + data.len()].copy_from_slice(data);
            self.bufpos += data.len();
            return;
        }
        self.reply_bytes += data.len() as u64;
        match self.reply.back_mut() {
            // Merge into the tail chunk while it stays small; empty chunks
            // are deferred-length placeholders and must stay untouched.
            Some(last) if !last.is_empty() && last.len() + data.len() <= PROTO_REPLY_CHUNK_BYTES => {
                last.extend_from_slice(data);
            }
            _ => self.reply.push_back(data.to_vec()),
        }
    }

    pub fn add_reply_status(&mut self, status: &str) {
        self.add_reply(format!("+{status}\r\n").as_bytes());
    }

    /// Error line in the generic `-ERR <message>` shape.  Specific error
    /// kinds with their own prefix use the preformatted shared lines.
    pub fn add_reply_error(&mut self, msg: &str) {
        self.add_reply(format!("-ERR {msg}\r\n").as_bytes());
    }

    pub fn add_reply_i64(&mut self, v: i64) {
        match v {
            0 => self.add_reply(shared::CZERO),
            1 => self.add_reply(shared::CONE),
            _ => {
                if let Some(line) = shared().integer(v) {
                    self.add_reply(line);
                } else {
                    self.add_reply(format!(":{v}\r\n").as_bytes());
                }
            }
        }
    }

    pub fn add_reply_bulk(&mut self, data: &[u8]) {
        if let Some(hdr) = shared().bulk_header(data.len()) {
            self.add_reply(hdr);
        } else {
            self.add_reply(format!("${}\r\n", data.len()).as_bytes());
        }
        self.add_reply(data);
        self.add_reply(shared::CRLF);
    }

    pub fn add_reply_bulk_i64(&mut self, v: i64) {
        self.add_reply_bulk(v.to_string().as_bytes());
    }

    /// Bulk reply carrying a double rendered at full precision.
    pub fn add_reply_double(&mut self, v: f64) {
        self.add_reply_bulk(d2string(v).as_bytes());
    }

    pub fn add_reply_nil(&mut self) {
        self.add_reply(shared::NULL_BULK);
    }

    pub fn add_reply_multibulk_len(&mut self, len: usize) {
        if let Some(hdr) = shared().mbulk_header(len) {
            self.add_reply(hdr);
        } else {
            self.add_reply(format!("*{len}\r\n").as_bytes());
        }
    }

    /// Reserve an array-header slot in the queue to be patched once the
    /// element count is known.  Returns an opaque slot token.
    pub fn add_deferred_multibulk_len(&mut self) -> usize {
        if self.bufpos > 0 {
            let chunk = self.buf[..self.bufpos].to_vec();
            self.reply_bytes += chunk.len() as u64;
            self.reply.push_back(chunk);
            self.bufpos = 0;
        }
        self.reply.push_back(Vec::new());
        self.reply.len() - 1
    }

    /// Patch a reserved array-header slot with the final element count.
    pub fn set_deferred_multibulk_len(&mut self, slot: usize, len: usize) {
        let hdr = format!("*{len}\r\n").into_bytes();
        self.reply_bytes += hdr.len() as u64;
        debug_assert!(self.reply[slot].is_empty());
        self.reply[slot] = hdr;
    }

    // ── Write path ──────────────────────────────────────────────────────────

    /// Drain pending output to the socket.  At most
    /// [`MAX_WRITE_PER_EVENT`] bytes are written per call unless `force`
    /// is set (memory pressure wants buffers released now).
    pub fn write_pending(&mut self, force: bool) -> io::Result<WriteOutcome> {
        let mut totwritten = 0usize;
        loop {
            if self.bufpos > 0 {
                match self.stream.write(&self.buf[self.sentlen..self.bufpos]) {
                    Ok(0) => return Ok(WriteOutcome::Partial),
                    Ok(n) => {
                        self.sentlen += n;
                        totwritten += n;
                        if self.sentlen == self.bufpos {
                            self.bufpos = 0;
                            self.sentlen = 0;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(WriteOutcome::Partial)
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            } else if let Some(front) = self.reply.front() {
                if front.is_empty() {
                    // A deferred slot that was never patched is a bug.
                    debug_assert!(false, "unpatched deferred reply slot");
                    self.reply.pop_front();
                    continue;
                }
                let len = front.len();
                match self.stream.write(&front[self.sentlen..]) {
                    Ok(0) => return Ok(WriteOutcome::Partial),
                    Ok(n) => {
                        self.sentlen += n;
                        totwritten += n;
                        if self.sentlen == len {
                            self.reply_bytes -= len as u64;
                            self.reply.pop_front();
                            self.sentlen = 0;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(WriteOutcome::Partial)
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            } else {
                return Ok(WriteOutcome::Drained);
            }
            if totwritten > MAX_WRITE_PER_EVENT && !force {
                return Ok(WriteOutcome::Partial);
            }
        }
    }

    /// One line of `CLIENT LIST` output.
    pub fn info_line(&self, now_s: u64) -> String {
        format!(
            "id={} addr={} fd={} name={} age={} idle={} db={} qbuf={} oll={} omem={} cmd={}",
            self.id,
            self.peer,
            self.fd,
            self.name
                .as_ref()
                .map(|n| String::from_utf8_lossy(n.as_bytes()).into_owned())
                .unwrap_or_default(),
            now_s.saturating_sub(self.ctime),
            now_s.saturating_sub(self.lastinteraction),
            self.db_index,
            self.querybuf.len(),
            self.reply.len(),
            self.reply_bytes,
            if self.lastcmd.is_empty() { "NULL" } else { self.lastcmd },
        )
    }
}
