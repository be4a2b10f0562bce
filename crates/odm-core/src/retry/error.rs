//! Typed failure of one transport call or strategy attempt.

use thiserror::Error;

/// Error returned by a strategy attempt (curl failure, HTTP status, local
/// I/O, or a protocol-level condition observed mid-transfer).
///
/// `Display` renders the short stable strings that surface in history
/// records and summaries; no stack traces, no debug dumps.
#[derive(Debug, Error)]
pub enum FetchError {
    /// libcurl reported an error (timeout, connection, TLS, ...).
    #[error("{}", render_curl(.0))]
    Curl(#[source] curl::Error),
    /// Non-2xx HTTP status.
    #[error("{}", render_http(*.0))]
    Http(u32),
    /// Local write/fsync failure on the part file or sidecar.
    #[error("{}", render_storage(.0))]
    Storage(#[source] std::io::Error),
    /// Body shorter than the advertised range.
    #[error("truncated")]
    Truncated { expected: u64, received: u64 },
    /// ETag/Last-Modified changed mid-transfer, or a ranged request was
    /// answered with a full body.
    #[error("validator_changed")]
    ValidatorChanged,
    /// Cancelled by the stall detector.
    #[error("stalled")]
    Stalled,
    /// Cancelled by process-wide shutdown.
    #[error("interrupted")]
    Interrupted,
    /// External tool (curl binary) not found or not executable.
    #[error("tool_missing")]
    ToolMissing,
    /// External tool exited nonzero.
    #[error("curl_exit:{0}")]
    ToolExit(i32),
    /// Strategy invoked without its preconditions (guard; the manager's
    /// applicability rules normally prevent this).
    #[error("not_applicable")]
    NotApplicable,
}

impl FetchError {
    /// True for name-resolution failures; the manager escalates these to
    /// fatal once the in-strategy retry budget is exhausted.
    pub fn is_dns(&self) -> bool {
        matches!(self, FetchError::Curl(e) if e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy())
    }
}

fn render_curl(e: &curl::Error) -> String {
    if e.is_operation_timedout() {
        "read_timeout".into()
    } else if e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy() {
        "dns_unresolved".into()
    } else if e.is_couldnt_connect() {
        "connect_failed".into()
    } else if e.is_recv_error() || e.is_send_error() || e.is_got_nothing() || e.is_partial_file() {
        "connection_reset".into()
    } else {
        format!("curl_err:{}", e.code())
    }
}

fn render_http(code: u32) -> String {
    match code {
        429 => "http_429".into(),
        500..=599 => format!("http_5xx:{}", code),
        400..=499 => format!("http_4xx:{}", code),
        _ => format!("http_{}", code),
    }
}

fn render_storage(e: &std::io::Error) -> String {
    if is_disk_full(e) {
        "disk_full".into()
    } else if e.kind() == std::io::ErrorKind::PermissionDenied {
        "permission_denied".into()
    } else {
        format!("io_error:{}", e.kind())
    }
}

pub(crate) fn is_disk_full(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::ENOSPC)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_render_is_stable() {
        assert_eq!(FetchError::Http(503).to_string(), "http_5xx:503");
        assert_eq!(FetchError::Http(429).to_string(), "http_429");
        assert_eq!(FetchError::Http(416).to_string(), "http_4xx:416");
    }

    #[test]
    fn protocol_conditions_render_bare() {
        assert_eq!(FetchError::ValidatorChanged.to_string(), "validator_changed");
        assert_eq!(FetchError::Stalled.to_string(), "stalled");
        assert_eq!(
            FetchError::Truncated {
                expected: 10,
                received: 3
            }
            .to_string(),
            "truncated"
        );
        assert_eq!(FetchError::ToolExit(28).to_string(), "curl_exit:28");
        assert_eq!(FetchError::NotApplicable.to_string(), "not_applicable");
    }

    #[test]
    fn storage_render() {
        let perm = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(FetchError::Storage(perm).to_string(), "permission_denied");
        #[cfg(unix)]
        {
            let full = std::io::Error::from_raw_os_error(libc::ENOSPC);
            assert_eq!(FetchError::Storage(full).to_string(), "disk_full");
        }
    }
}
