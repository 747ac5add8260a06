//! Minimal HTTP/1.1 server for integration tests: HEAD, Range GET,
//! validators, scripted 503s, close-delimited bodies, and a stall gate.
//!
//! Serves a single static body; every response closes its connection. Test
//! code mutates the shared state (ETag, 503 budget, gate) between requests.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
    /// If true, 200 responses omit Content-Length and end at connection
    /// close (unknown-size origin).
    pub unknown_length: bool,
    /// Stall every body past this many sent bytes until the gate opens.
    /// 0 disables the gate.
    pub gate_after: usize,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            unknown_length: false,
            gate_after: 0,
        }
    }
}

pub struct ServerState {
    body: Vec<u8>,
    opts: RangeServerOptions,
    etag: Mutex<Option<String>>,
    last_modified: Mutex<Option<String>>,
    /// Remaining GETs to answer with 503.
    fail_503: AtomicUsize,
    gate_open: AtomicBool,
    /// Total GET requests served (503s included).
    get_hits: AtomicUsize,
}

/// Running server plus the shared knobs tests poke at.
pub struct ServerHandle {
    pub url: String,
    pub state: Arc<ServerState>,
}

impl ServerHandle {
    pub fn set_etag(&self, etag: Option<&str>) {
        *self.state.etag.lock().unwrap() = etag.map(str::to_string);
    }

    pub fn set_last_modified(&self, value: Option<&str>) {
        *self.state.last_modified.lock().unwrap() = value.map(str::to_string);
    }

    /// Answer the next `n` GETs with 503.
    pub fn fail_next_gets(&self, n: usize) {
        self.state.fail_503.store(n, Ordering::SeqCst);
    }

    pub fn close_gate(&self) {
        self.state.gate_open.store(false, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.state.gate_open.store(true, Ordering::SeqCst);
    }

    pub fn get_hits(&self) -> usize {
        self.state.get_hits.load(Ordering::SeqCst)
    }
}

/// Starts a server serving `body` with default options.
pub fn start(body: Vec<u8>) -> ServerHandle {
    start_with_options(body, RangeServerOptions::default())
}

/// Starts a server with custom behavior. The returned URL points at
/// `/file.bin`; the server answers any path.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> ServerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(ServerState {
        body,
        opts,
        etag: Mutex::new(None),
        last_modified: Mutex::new(None),
        fail_503: AtomicUsize::new(0),
        gate_open: AtomicBool::new(true),
        get_hits: AtomicUsize::new(0),
    });
    let accept_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&accept_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    ServerHandle {
        url: format!("http://127.0.0.1:{port}/file.bin"),
        state,
    }
}

fn read_request(stream: &mut std::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() > 16 * 1024 {
            break;
        }
    }
    String::from_utf8(buf).ok()
}

fn validator_headers(state: &ServerState) -> String {
    let mut out = String::new();
    if let Some(etag) = state.etag.lock().unwrap().as_deref() {
        out.push_str(&format!("ETag: \"{etag}\"\r\n"));
    }
    if let Some(lm) = state.last_modified.lock().unwrap().as_deref() {
        out.push_str(&format!("Last-Modified: {lm}\r\n"));
    }
    out
}

fn write_body_gated(stream: &mut std::net::TcpStream, state: &ServerState, slice: &[u8]) {
    let gate_after = state.opts.gate_after;
    let mut sent = 0usize;
    for chunk in slice.chunks(4096) {
        if gate_after > 0 && sent >= gate_after {
            while !state.gate_open.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        }
        if stream.write_all(chunk).is_err() {
            return;
        }
        sent += chunk.len();
    }
}

fn handle(mut stream: std::net::TcpStream, state: &ServerState) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(30)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let (method, range) = parse_request(&request);
    let total = state.body.len() as u64;
    let accept_ranges = if state.opts.advertise_ranges && state.opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        if !state.opts.head_allowed {
            let _ = stream.write_all(
                b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        let length = if state.opts.unknown_length {
            String::new()
        } else {
            format!("Content-Length: {total}\r\n")
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\n{length}{accept_ranges}{}Connection: close\r\n\r\n",
            validator_headers(state)
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    state.get_hits.fetch_add(1, Ordering::SeqCst);

    // Scripted throttling: burn the 503 budget first.
    loop {
        let left = state.fail_503.load(Ordering::SeqCst);
        if left == 0 {
            break;
        }
        if state
            .fail_503
            .compare_exchange(left, left - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = stream.write_all(
                b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
            );
            return;
        }
    }

    if state.opts.support_ranges {
        if let Some((start, end_incl)) = range {
            if start >= total {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
            let end_incl = end_incl.min(total.saturating_sub(1));
            let slice = &state.body[start as usize..=end_incl as usize];
            let response = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end_incl}/{total}\r\n{accept_ranges}{}Connection: close\r\n\r\n",
                slice.len(),
                validator_headers(state)
            );
            if stream.write_all(response.as_bytes()).is_ok() {
                write_body_gated(&mut stream, state, slice);
            }
            return;
        }
    }

    // Full-body 200.
    let length = if state.opts.unknown_length {
        String::new()
    } else {
        format!("Content-Length: {total}\r\n")
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\n{length}{accept_ranges}{}Connection: close\r\n\r\n",
        validator_headers(state)
    );
    if stream.write_all(response.as_bytes()).is_ok() {
        write_body_gated(&mut stream, state, &state.body);
    }
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
