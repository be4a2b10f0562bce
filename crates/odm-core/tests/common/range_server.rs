//! Minimal HTTP/1.1 server with Range support and fault injection for
//! integration tests.
//!
//! Serves a single static body. Faults are opt-in per server: HEAD blocked,
//! ranges ignored, ETag flips after N requests, first ranged response
//! truncated, first body corrupted, or responses that stall after a byte
//! budget (long reads never finish, short ones do).

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even when ranges work.
    pub advertise_ranges: bool,
    /// ETag served (unquoted); `None` omits the header.
    pub etag: Option<String>,
    /// After this many requests the ETag gains a `-v2` suffix.
    pub flip_etag_after: Option<usize>,
    /// The first 206 response advertises the full slice but sends only half.
    pub truncate_first_ranged: bool,
    /// The first body-carrying response serves flipped bytes.
    pub corrupt_first_body: bool,
    /// Responses longer than this send the budget, then hold the connection
    /// open without further bytes (sequential-read degradation).
    pub stall_over_bytes: Option<usize>,
    /// If false, omit `Content-Length` entirely; bodies are delimited by
    /// connection close.
    pub send_content_length: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            etag: Some("fixture".to_string()),
            flip_etag_after: None,
            truncate_first_ranged: false,
            corrupt_first_body: false,
            stall_over_bytes: None,
            send_content_length: true,
        }
    }
}

pub struct ServerHandle {
    pub url: String,
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Requests observed so far (HEAD and GET alike).
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

struct ServerState {
    body: Vec<u8>,
    opts: ServerOptions,
    requests: AtomicUsize,
    truncated_once: AtomicBool,
    corrupted_once: AtomicBool,
}

/// Starts a server in a background thread serving `body` with default
/// options. Returns a handle carrying the base URL.
pub fn start(body: Vec<u8>) -> ServerHandle {
    start_with_options(body, ServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: ServerOptions) -> ServerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(ServerState {
        body,
        opts,
        requests: AtomicUsize::new(0),
        truncated_once: AtomicBool::new(false),
        corrupted_once: AtomicBool::new(false),
    });
    let state_in_thread = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&state_in_thread);
            thread::spawn(move || handle(stream, &state));
        }
    });
    ServerHandle {
        url: format!("http://127.0.0.1:{}/data/resource.bin", port),
        state,
    }
}

struct Request {
    method: String,
    range: Option<RangeSpec>,
    if_range: Option<String>,
}

enum RangeSpec {
    /// bytes=a-b (inclusive) or bytes=a- (open end).
    FromTo(u64, Option<u64>),
    /// bytes=-n
    Suffix(u64),
}

fn handle(mut stream: std::net::TcpStream, state: &ServerState) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(raw) = std::str::from_utf8(&buf[..n]) else { return };
    let req = parse_request(raw);
    let req_no = state.requests.fetch_add(1, Ordering::SeqCst) + 1;

    let opts = &state.opts;
    let total = state.body.len() as u64;
    let etag = current_etag(opts, req_no);
    let etag_header = etag
        .as_deref()
        .map(|e| format!("ETag: \"{}\"\r\n", e))
        .unwrap_or_default();
    let ranges_header = if opts.advertise_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if req.method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let length_header = if opts.send_content_length {
            format!("Content-Length: {}\r\n", total)
        } else {
            String::new()
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\n{}{}{}\r\n",
            length_header, ranges_header, etag_header
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !req.method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    // An If-Range carrying a stale validator downgrades to a full 200.
    let if_range_matches = match (&req.if_range, etag.as_deref()) {
        (Some(sent), Some(current)) => sent.trim_matches('"') == current,
        (Some(_), None) => false,
        (None, _) => true,
    };

    let honor_range = opts.support_ranges && if_range_matches;
    let (status, content_range, start, end_excl) = match (&req.range, honor_range) {
        (Some(spec), true) => {
            let (start, end_excl) = match resolve(spec, total) {
                Some(r) => r,
                None => {
                    let resp = format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
                        total
                    );
                    let _ = stream.write_all(resp.as_bytes());
                    return;
                }
            };
            (
                "206 Partial Content",
                format!(
                    "Content-Range: bytes {}-{}/{}\r\n",
                    start,
                    end_excl.saturating_sub(1),
                    total
                ),
                start,
                end_excl,
            )
        }
        _ => ("200 OK", String::new(), 0, total),
    };

    let mut slice = state.body[start as usize..end_excl as usize].to_vec();
    if opts.corrupt_first_body
        && !slice.is_empty()
        && !state.corrupted_once.swap(true, Ordering::SeqCst)
    {
        for b in &mut slice {
            *b ^= 0xFF;
        }
    }

    let advertised = slice.len();
    let length_header = if opts.send_content_length {
        format!("Content-Length: {}\r\n", advertised)
    } else {
        String::new()
    };
    let header = format!(
        "HTTP/1.1 {}\r\n{}{}{}{}\r\n",
        status, length_header, content_range, ranges_header, etag_header
    );
    if stream.write_all(header.as_bytes()).is_err() {
        return;
    }

    if status.starts_with("206")
        && opts.truncate_first_ranged
        && advertised > 1
        && !state.truncated_once.swap(true, Ordering::SeqCst)
    {
        let _ = stream.write_all(&slice[..advertised / 2]);
        return; // close early: body shorter than advertised
    }

    if let Some(budget) = opts.stall_over_bytes {
        if advertised > budget {
            let _ = stream.write_all(&slice[..budget]);
            let _ = stream.flush();
            // Hold the connection open; the client's stall detector, not a
            // connection error, must end this transfer.
            thread::sleep(Duration::from_secs(30));
            return;
        }
    }

    let _ = stream.write_all(&slice);
}

fn current_etag(opts: &ServerOptions, req_no: usize) -> Option<String> {
    let base = opts.etag.clone()?;
    match opts.flip_etag_after {
        Some(n) if req_no > n => Some(format!("{}-v2", base)),
        _ => Some(base),
    }
}

fn resolve(spec: &RangeSpec, total: u64) -> Option<(u64, u64)> {
    match spec {
        RangeSpec::FromTo(start, end) => {
            if *start >= total {
                return None;
            }
            let end_excl = end.map(|e| (e + 1).min(total)).unwrap_or(total);
            if *start >= end_excl {
                return None;
            }
            Some((*start, end_excl))
        }
        RangeSpec::Suffix(n) => {
            if *n == 0 {
                return None;
            }
            let start = total.saturating_sub(*n);
            Some((start, total))
        }
    }
}

fn parse_request(raw: &str) -> Request {
    let mut method = String::new();
    let mut range = None;
    let mut if_range = None;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("").to_string();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("range") {
                if let Some(spec) = value.strip_prefix("bytes=") {
                    let spec = spec.trim();
                    if let Some(n) = spec.strip_prefix('-') {
                        if let Ok(n) = n.parse() {
                            range = Some(RangeSpec::Suffix(n));
                        }
                    } else if let Some((a, b)) = spec.split_once('-') {
                        if let Ok(start) = a.trim().parse() {
                            let end = b.trim().parse().ok();
                            range = Some(RangeSpec::FromTo(start, end));
                        }
                    }
                }
            } else if name.eq_ignore_ascii_case("if-range") {
                if_range = Some(value.to_string());
            }
        }
    }
    Request {
        method,
        range,
        if_range,
    }
}
