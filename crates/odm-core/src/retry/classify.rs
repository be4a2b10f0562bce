//! Map typed fetch errors into the closed class set. Transport-level errors
//! enter the taxonomy here and nowhere above.

use super::error::is_disk_full;
use super::{ErrorClass, FetchError};

/// Classify an HTTP status code.
pub fn classify_http_status(code: u32) -> ErrorClass {
    match code {
        429 => ErrorClass::Retryable,
        500..=599 => ErrorClass::Retryable,
        401 | 403 => ErrorClass::Fatal,
        400..=499 => ErrorClass::Unsupported,
        _ => ErrorClass::Retryable,
    }
}

fn classify_curl(e: &curl::Error) -> ErrorClass {
    // DNS failures are retried in-strategy; the manager escalates them to
    // fatal via `FetchError::is_dns` once the budget is exhausted.
    if e.is_operation_timedout()
        || e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorClass::Retryable;
    }
    ErrorClass::Unsupported
}

fn classify_storage(e: &std::io::Error) -> ErrorClass {
    if is_disk_full(e) || e.kind() == std::io::ErrorKind::PermissionDenied {
        ErrorClass::Fatal
    } else {
        ErrorClass::Retryable
    }
}

/// Classify a fetch error into its cascade policy class.
pub fn classify(e: &FetchError) -> ErrorClass {
    match e {
        FetchError::Curl(ce) => classify_curl(ce),
        FetchError::Http(code) => classify_http_status(*code),
        FetchError::Storage(ioe) => classify_storage(ioe),
        FetchError::Truncated { .. } => ErrorClass::Retryable,
        FetchError::ValidatorChanged => ErrorClass::ValidatorChanged,
        FetchError::Stalled => ErrorClass::Stalled,
        FetchError::Interrupted => ErrorClass::Interrupted,
        FetchError::ToolMissing => ErrorClass::Unsupported,
        FetchError::ToolExit(_) => ErrorClass::Retryable,
        FetchError::NotApplicable => ErrorClass::Unsupported,
    }
}
