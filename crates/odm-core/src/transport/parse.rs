//! Response header parsing.

/// Remote metadata extracted from probe responses.
#[derive(Debug, Clone, Default)]
pub struct RemoteMeta {
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// `ETag` with surrounding quotes stripped.
    pub etag: Option<String>,
    /// `Last-Modified` verbatim.
    pub last_modified: Option<String>,
}

/// Parse collected header lines into remote metadata. Lines may span several
/// responses (redirect hops); each `HTTP/` status line starts a fresh
/// response, so only the final hop's headers survive.
pub fn parse_headers(lines: &[String]) -> RemoteMeta {
    let mut meta = RemoteMeta::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.to_ascii_uppercase().starts_with("HTTP/") {
            meta = RemoteMeta::default();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.parse::<u64>() {
                    meta.content_length = Some(n);
                }
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                meta.accept_ranges = value.eq_ignore_ascii_case("bytes");
            } else if name.eq_ignore_ascii_case("etag") {
                meta.etag = Some(value.trim_matches('"').to_string());
            } else if name.eq_ignore_ascii_case("last-modified") {
                meta.last_modified = Some(value.to_string());
            }
        }
    }
    meta
}

/// Total length from a `Content-Range: bytes a-b/total` header, if present
/// and known (`*` yields `None`).
pub fn parse_content_range_total(lines: &[String]) -> Option<u64> {
    let mut total = None;
    for line in lines {
        let line = line.trim();
        if let Some((name, value)) = line.split_once(':') {
            if !name.trim().eq_ignore_ascii_case("content-range") {
                continue;
            }
            let value = value.trim();
            let rest = value.strip_prefix("bytes").map(str::trim).unwrap_or(value);
            if let Some((_, t)) = rest.rsplit_once('/') {
                total = t.trim().parse::<u64>().ok();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_headers_basic() {
        let meta = parse_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 12345",
            "Accept-Ranges: bytes",
            "ETag: \"abc-123\"",
            "Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT",
        ]));
        assert_eq!(meta.content_length, Some(12345));
        assert!(meta.accept_ranges);
        assert_eq!(meta.etag.as_deref(), Some("abc-123"));
        assert_eq!(
            meta.last_modified.as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[test]
    fn parse_headers_redirect_keeps_final_hop() {
        let meta = parse_headers(&lines(&[
            "HTTP/1.1 302 Found",
            "Location: https://elsewhere/f.bin",
            "ETag: \"stale\"",
            "HTTP/1.1 200 OK",
            "Content-Length: 10",
        ]));
        assert_eq!(meta.content_length, Some(10));
        assert!(meta.etag.is_none(), "redirect hop headers discarded");
    }

    #[test]
    fn parse_headers_ranges_none() {
        let meta = parse_headers(&lines(&["Content-Length: 999", "Accept-Ranges: none"]));
        assert_eq!(meta.content_length, Some(999));
        assert!(!meta.accept_ranges);
    }

    #[test]
    fn content_range_total() {
        assert_eq!(
            parse_content_range_total(&lines(&["Content-Range: bytes 0-0/5000"])),
            Some(5000)
        );
        assert_eq!(
            parse_content_range_total(&lines(&["content-range: bytes 0-99/*"])),
            None
        );
        assert_eq!(parse_content_range_total(&lines(&["Content-Length: 5"])), None);
    }
}
