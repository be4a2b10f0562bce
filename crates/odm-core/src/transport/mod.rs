//! Shared HTTP transport over libcurl.
//!
//! One transport is built per process and passed into every component;
//! it owns the request defaults (user-agent, identity encoding, timeouts,
//! HTTP/2 toggle, extra headers) and the probe logic. Handles are blocking;
//! callers run on worker threads or under `spawn_blocking`.

mod parse;
mod rate;

pub use parse::{parse_content_range_total, parse_headers, RemoteMeta};
pub use rate::RateLimiter;

use curl::easy::{Easy, HttpVersion, List};
use std::cell::RefCell;
use std::time::Duration;

use crate::config::{HttpConfig, OdmConfig};
use crate::retry::FetchError;

/// Ceiling on redirect hops; the final URL is logged, the stored resource
/// identity stays the plan URL.
const MAX_REDIRECTS: u32 = 5;

/// Hard wall-clock ceiling so a completely wedged transfer eventually fails
/// even if the low-speed window never triggers.
const HARD_TIMEOUT: Duration = Duration::from_secs(3600);

/// Minimum throughput for the read-liveness window.
const LOW_SPEED_LIMIT: u32 = 1024;

/// Per-request knobs layered over the transport defaults.
#[derive(Debug, Default)]
pub struct RequestOpts<'a> {
    /// Range value without the `bytes=` prefix (e.g. `0-1048575`, `-4096`).
    pub range: Option<String>,
    /// Unquoted ETag for `If-Range`, invalidating resume on remote change.
    pub if_range: Option<&'a str>,
    /// Send `Connection: close` and forbid handle reuse.
    pub close_connection: bool,
}

/// Shared client configuration; cheap to pass by reference everywhere.
pub struct HttpTransport {
    http: HttpConfig,
    rate: RateLimiter,
}

impl HttpTransport {
    pub fn new(cfg: &OdmConfig) -> Self {
        HttpTransport {
            http: cfg.http.clone(),
            rate: RateLimiter::new(cfg.rate_limit_rps),
        }
    }

    /// Build a configured handle for one request.
    pub(crate) fn request(&self, url: &str, opts: &RequestOpts<'_>) -> Result<Easy, FetchError> {
        let mut easy = Easy::new();
        easy.url(url).map_err(FetchError::Curl)?;
        easy.useragent(&self.http.user_agent).map_err(FetchError::Curl)?;
        // Identity keeps Content-Length meaningful for ranged transfers.
        easy.accept_encoding("identity").map_err(FetchError::Curl)?;
        easy.follow_location(true).map_err(FetchError::Curl)?;
        easy.max_redirections(MAX_REDIRECTS).map_err(FetchError::Curl)?;
        easy.connect_timeout(Duration::from_secs(self.http.timeout_connect_s))
            .map_err(FetchError::Curl)?;
        easy.low_speed_limit(LOW_SPEED_LIMIT).map_err(FetchError::Curl)?;
        easy.low_speed_time(Duration::from_secs(self.http.timeout_read_s))
            .map_err(FetchError::Curl)?;
        easy.timeout(HARD_TIMEOUT).map_err(FetchError::Curl)?;
        easy.http_version(if self.http.http2 {
            HttpVersion::V2TLS
        } else {
            HttpVersion::V11
        })
        .map_err(FetchError::Curl)?;
        // Progress callbacks let a cancelled transfer abort even while the
        // socket is silent.
        easy.progress(true).map_err(FetchError::Curl)?;

        if let Some(range) = &opts.range {
            easy.range(range).map_err(FetchError::Curl)?;
        }
        if opts.close_connection {
            easy.forbid_reuse(true).map_err(FetchError::Curl)?;
        }

        let mut list = List::new();
        for (k, v) in &self.http.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))
                .map_err(FetchError::Curl)?;
        }
        if let Some(etag) = opts.if_range {
            list.append(&format!("If-Range: \"{}\"", etag))
                .map_err(FetchError::Curl)?;
        }
        if opts.close_connection {
            list.append("Connection: close").map_err(FetchError::Curl)?;
        }
        easy.http_headers(list).map_err(FetchError::Curl)?;

        Ok(easy)
    }

    /// Probe remote metadata: HEAD first; on 405/501/403 fall back to a
    /// `Range: bytes=0-0` GET whose body is aborted as soon as headers are
    /// in. Rate-limited.
    pub fn probe(&self, url: &str) -> Result<RemoteMeta, FetchError> {
        self.rate.acquire();
        match self.probe_head(url) {
            Ok(meta) => Ok(meta),
            Err(FetchError::Http(code)) if matches!(code, 403 | 405 | 501) => {
                tracing::debug!(code, url, "HEAD rejected, falling back to ranged probe");
                self.rate.acquire();
                self.probe_range(url)
            }
            Err(e) => Err(e),
        }
    }

    fn probe_head(&self, url: &str) -> Result<RemoteMeta, FetchError> {
        let mut easy = self.request(url, &RequestOpts::default())?;
        easy.nobody(true).map_err(FetchError::Curl)?;

        let headers = RefCell::new(Vec::<String>::new());
        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|data| {
                    if let Ok(s) = std::str::from_utf8(data) {
                        headers.borrow_mut().push(s.trim_end().to_string());
                    }
                    true
                })
                .map_err(FetchError::Curl)?;
            transfer.perform().map_err(FetchError::Curl)?;
        }

        let code = easy.response_code().map_err(FetchError::Curl)?;
        if !(200..300).contains(&code) {
            return Err(FetchError::Http(code));
        }
        self.log_redirect(&mut easy, url);
        Ok(parse_headers(&headers.into_inner()))
    }

    /// The stored resource identity stays the plan URL; the post-redirect
    /// URL is only recorded in the log.
    fn log_redirect(&self, easy: &mut Easy, url: &str) {
        if let Ok(Some(final_url)) = easy.effective_url() {
            if final_url != url {
                tracing::debug!(url, final_url, "probe followed redirects");
            }
        }
    }

    fn probe_range(&self, url: &str) -> Result<RemoteMeta, FetchError> {
        let mut easy = self.request(
            url,
            &RequestOpts {
                range: Some("0-0".to_string()),
                ..RequestOpts::default()
            },
        )?;

        let headers = RefCell::new(Vec::<String>::new());
        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|data| {
                    if let Ok(s) = std::str::from_utf8(data) {
                        headers.borrow_mut().push(s.trim_end().to_string());
                    }
                    true
                })
                .map_err(FetchError::Curl)?;
            // Headers are all we need; abort the body immediately.
            transfer.write_function(|_| Ok(0)).map_err(FetchError::Curl)?;
            match transfer.perform() {
                Ok(()) => {}
                Err(e) if e.is_write_error() => {}
                Err(e) => return Err(FetchError::Curl(e)),
            }
        }

        let code = easy.response_code().map_err(FetchError::Curl)?;
        self.log_redirect(&mut easy, url);
        let lines = headers.into_inner();
        match code {
            206 => {
                let mut meta = parse_headers(&lines);
                meta.accept_ranges = true;
                if let Some(total) = parse_content_range_total(&lines) {
                    meta.content_length = Some(total);
                }
                Ok(meta)
            }
            200 => {
                // Server ignored the range; headers still carry the length.
                let mut meta = parse_headers(&lines);
                meta.accept_ranges = false;
                Ok(meta)
            }
            _ => Err(FetchError::Http(code)),
        }
    }
}
