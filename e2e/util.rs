//! Shared helpers for the end-to-end suites: spin a real server on an
//! ephemeral port, speak the wire protocol over a live socket, and read
//! back framed replies.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use rudis::server::{before_sleep, server_cron};
use rudis::{AeEventLoop, Config, Server};

/// A live server on 127.0.0.1 with its loop running on a worker thread.
pub struct TestServer {
    pub port: u16,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server; `tweak` adjusts the config before startup.
    pub fn start(tweak: impl FnOnce(&mut Config)) -> TestServer {
        // Reserve an ephemeral port, then hand it to the server.  The gap
        // between drop and bind is harmless for loopback test traffic.
        let probe = TcpListener::bind("127.0.0.1:0").expect("probe bind");
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let mut config = Config {
            port,
            bind: Some("127.0.0.1".to_string()),
            ..Config::default()
        };
        tweak(&mut config);

        let handle = std::thread::spawn(move || {
            let mut server = Server::new(config);
            let mut el =
                AeEventLoop::<Server>::new(server.event_loop_size()).expect("event loop");
            server.listen(&mut el).expect("listen");
            el.create_time_event(1, server_cron);
            el.before_sleep = Some(before_sleep);
            el.run(&mut server);
            server.teardown(&mut el);
        });

        // Wait for the listener to come up.
        for _ in 0..200 {
            if TcpStream::connect(("127.0.0.1", port)).is_ok() {
                return TestServer {
                    port,
                    handle: Some(handle),
                };
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("server did not start listening on port {port}");
    }

    pub fn connect(&self) -> Conn {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Conn { stream, reader }
    }

    /// Ask the server to exit and join its thread.
    pub fn shutdown(mut self) {
        let mut conn = self.connect();
        conn.send_command(&[b"SHUTDOWN", b"NOSAVE"]);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Best effort: the test may already have shut the server down.
            if let Ok(mut conn) = TcpStream::connect(("127.0.0.1", self.port)) {
                let _ = conn.write_all(b"SHUTDOWN NOSAVE\r\n");
            }
            let _ = handle.join();
        }
    }
}

/// One client connection with framed reply reading.
pub struct Conn {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Conn {
    /// Send one command in multi-bulk form.
    pub fn send_command(&mut self, args: &[&[u8]]) {
        let mut out = Vec::new();
        out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for a in args {
            out.extend_from_slice(format!("${}\r\n", a.len()).as_bytes());
            out.extend_from_slice(a);
            out.extend_from_slice(b"\r\n");
        }
        self.stream.write_all(&out).expect("send");
    }

    /// Send raw bytes (for inline requests and protocol error cases).
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("send raw");
    }

    /// Read exactly one framed reply, returning its raw bytes.
    pub fn read_reply(&mut self) -> Vec<u8> {
        let mut line = Vec::new();
        read_line(&mut self.reader, &mut line);
        match line.first() {
            Some(b'+') | Some(b'-') | Some(b':') => line,
            Some(b'$') => {
                let n: i64 = line_number(&line);
                if n < 0 {
                    return line;
                }
                let mut payload = vec![0u8; n as usize + 2];
                self.reader.read_exact(&mut payload).expect("bulk payload");
                line.extend_from_slice(&payload);
                line
            }
            Some(b'*') => {
                let n: i64 = line_number(&line);
                if n < 0 {
                    return line;
                }
                for _ in 0..n {
                    let element = self.read_reply();
                    line.extend_from_slice(&element);
                }
                line
            }
            _ => panic!("unexpected reply start: {line:?}"),
        }
    }

    /// Round trip: send, then read one reply.
    pub fn cmd(&mut self, args: &[&[u8]]) -> Vec<u8> {
        self.send_command(args);
        self.read_reply()
    }

    /// True once the peer has closed the connection.
    pub fn eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            Ok(0) => true,
            Ok(_) => false,
            Err(_) => false,
        }
    }
}

fn read_line(reader: &mut BufReader<TcpStream>, out: &mut Vec<u8>) {
    reader.read_until(b'\n', out).expect("reply line");
    assert!(out.ends_with(b"\r\n"), "reply line not CRLF terminated: {out:?}");
}

fn line_number(line: &[u8]) -> i64 {
    let text = std::str::from_utf8(&line[1..line.len() - 2]).expect("ascii length");
    text.parse().expect("numeric length")
}

/// Sorted multi-bulk element payloads (for set replies with undefined
/// order).
pub fn bulk_elements(reply: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    // Skip the array header line.
    while reply[i] != b'\n' {
        i += 1;
    }
    i += 1;
    while i < reply.len() {
        assert_eq!(reply[i], b'$');
        let mut j = i;
        while reply[j] != b'\n' {
            j += 1;
        }
        let n: usize = std::str::from_utf8(&reply[i + 1..j - 1])
            .unwrap()
            .parse()
            .unwrap();
        let start = j + 1;
        out.push(reply[start..start + n].to_vec());
        i = start + n + 2;
    }
    out.sort();
    out
}
