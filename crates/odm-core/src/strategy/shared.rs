//! Shared plumbing for the five strategies: the ranged fetch-into-part
//! primitive and sidecar checkpointing.

use std::cell::{Cell, RefCell};
use std::sync::atomic::Ordering;

use crate::retry::FetchError;
use crate::segmenter::{segment_count, Segment};
use crate::sidecar::Sidecar;
use crate::storage::{part_path, PartWriter};
use crate::transport::{parse_content_range_total, parse_headers, RequestOpts};

use super::{FetchCtx, FetchOutcome};

const MIB: u64 = 1024 * 1024;

/// One HTTP request streamed into the part file.
pub(super) struct RangedRequest<'a> {
    /// Absolute half-open byte range; `None` requests the whole body.
    pub range: Option<(u64, u64)>,
    /// Suffix length for a `bytes=-N` request (overrides `range`).
    pub suffix: Option<u64>,
    /// File offset where the first accepted body byte lands.
    pub write_base: u64,
    /// Leading body bytes to drop (resume overlap re-read).
    pub discard: u64,
    pub close_connection: bool,
    /// Unquoted ETag for `If-Range`.
    pub if_range: Option<&'a str>,
    /// ETag recorded in the sidecar; a differing response ETag fails the
    /// request with `validator_changed`.
    pub expect_etag: Option<&'a str>,
}

impl Default for RangedRequest<'_> {
    fn default() -> Self {
        RangedRequest {
            range: None,
            suffix: None,
            write_base: 0,
            discard: 0,
            close_connection: false,
            if_range: None,
            expect_etag: None,
        }
    }
}

pub(super) struct RangedResponse {
    /// Body bytes written after the discard prefix.
    pub received: u64,
    /// Response ETag, quotes stripped.
    pub etag: Option<String>,
    /// Total length advertised in `Content-Range`, when present.
    pub advertised_total: Option<u64>,
}

/// Issue one GET and stream the body into `part` at absolute offsets.
///
/// Cancellation and a `200 OK` answered to a ranged request abort the
/// transfer from the write callback before any byte lands at a wrong offset.
/// The caller is responsible for fsync and checkpointing.
pub(super) fn fetch_ranged(
    ctx: &FetchCtx<'_>,
    part: &PartWriter,
    req: &RangedRequest<'_>,
) -> Result<RangedResponse, FetchError> {
    let is_ranged = req.range.is_some() || req.suffix.is_some();
    let range_value = req.suffix.map(|n| format!("-{}", n)).or_else(|| {
        req.range
            .map(|(start, end)| Segment { start, end }.range_value())
    });

    let mut easy = ctx.transport.request(
        ctx.url,
        &RequestOpts {
            range: range_value,
            if_range: req.if_range,
            close_connection: req.close_connection,
        },
    )?;

    let status = Cell::new(0u32);
    let written = Cell::new(0u64);
    let discard_left = Cell::new(req.discard);
    let range_ignored = Cell::new(false);
    let storage_err: RefCell<Option<std::io::Error>> = RefCell::new(None);
    let header_lines: RefCell<Vec<String>> = RefCell::new(Vec::new());

    {
        let mut transfer = easy.transfer();
        // Fires even when no data arrives, so cancellation (stall/shutdown)
        // reaches a transfer blocked on a silent socket.
        transfer
            .progress_function(|_, _, _, _| !ctx.cancel.is_cancelled())
            .map_err(FetchError::Curl)?;
        transfer
            .header_function(|data| {
                if let Ok(s) = std::str::from_utf8(data) {
                    let line = s.trim_end();
                    if line.to_ascii_uppercase().starts_with("HTTP/") {
                        let code = line
                            .split_whitespace()
                            .nth(1)
                            .and_then(|c| c.parse::<u32>().ok())
                            .unwrap_or(0);
                        status.set(code);
                    }
                    header_lines.borrow_mut().push(line.to_string());
                }
                true
            })
            .map_err(FetchError::Curl)?;
        transfer
            .write_function(|data| {
                ctx.progress.fetch_add(data.len() as u64, Ordering::Relaxed);
                if ctx.cancel.is_cancelled() {
                    return Ok(0);
                }
                // A full body answered to a ranged request must never be
                // written at a range offset.
                if is_ranged && status.get() == 200 {
                    range_ignored.set(true);
                    return Ok(0);
                }
                let mut chunk = data;
                let d = discard_left.get();
                if d > 0 {
                    let skip = d.min(chunk.len() as u64) as usize;
                    discard_left.set(d - skip as u64);
                    chunk = &chunk[skip..];
                }
                if !chunk.is_empty() {
                    if let Err(e) = part.write_at(req.write_base + written.get(), chunk) {
                        *storage_err.borrow_mut() = Some(e);
                        return Ok(0);
                    }
                    written.set(written.get() + chunk.len() as u64);
                }
                Ok(data.len())
            })
            .map_err(FetchError::Curl)?;

        match transfer.perform() {
            Ok(()) => {}
            Err(e) if e.is_write_error() => {
                if let Some(ioe) = storage_err.borrow_mut().take() {
                    return Err(FetchError::Storage(ioe));
                }
                if range_ignored.get() {
                    return Err(FetchError::ValidatorChanged);
                }
                if ctx.cancel.is_cancelled() {
                    return Err(ctx.cancel.to_error());
                }
                return Err(FetchError::Curl(e));
            }
            Err(e) if e.is_aborted_by_callback() => {
                return Err(ctx.cancel.to_error());
            }
            Err(e) => return Err(FetchError::Curl(e)),
        }
    }

    let code = easy.response_code().map_err(FetchError::Curl)?;
    if is_ranged {
        match code {
            206 => {}
            200 => return Err(FetchError::ValidatorChanged),
            _ => return Err(FetchError::Http(code)),
        }
    } else if !(200..300).contains(&code) {
        return Err(FetchError::Http(code));
    }

    let lines = header_lines.into_inner();
    let meta = parse_headers(&lines);
    if let (Some(expect), Some(got)) = (req.expect_etag, meta.etag.as_deref()) {
        if expect != got {
            return Err(FetchError::ValidatorChanged);
        }
    }

    Ok(RangedResponse {
        received: written.get(),
        etag: meta.etag,
        advertised_total: parse_content_range_total(&lines),
    })
}

/// Load the sidecar the manager created for this destination.
pub(super) fn load_sidecar(ctx: &FetchCtx<'_>) -> Result<Sidecar, FetchError> {
    ctx.store
        .load(ctx.dest)
        .map_err(storage_err)?
        .ok_or(FetchError::NotApplicable)
}

/// Open the part file and make sure `total` bytes are allocated.
pub(super) fn open_part(ctx: &FetchCtx<'_>, total: u64) -> Result<PartWriter, FetchError> {
    let part = PartWriter::open(&part_path(ctx.dest)).map_err(storage_err)?;
    let len = part.len().map_err(storage_err)?;
    if len < total {
        part.preallocate(total).map_err(storage_err)?;
    }
    Ok(part)
}

/// Persist linear progress: mark every segment fully covered below `cursor`
/// (all of `[0, cursor)` is written and fsynced).
pub(super) fn checkpoint_linear(ctx: &FetchCtx<'_>, cursor: u64) -> Result<Sidecar, FetchError> {
    update_sidecar(ctx, |sc| {
        let Some(seg) = sc.segments.clone() else {
            sc.bytes_written = sc.bytes_written.max(cursor);
            return;
        };
        let Some(mut bm) = sc.bitmap() else { return };
        let total = sc.content_length.unwrap_or(0);
        let n = segment_count(total, seg.size);
        let full = if cursor >= total && total > 0 {
            n
        } else {
            (cursor / seg.size) as usize
        };
        for i in 0..full {
            bm.set_completed(i);
        }
        sc.set_bitmap(&bm);
    })
}

/// Persist completion of one segment.
pub(super) fn checkpoint_segment(ctx: &FetchCtx<'_>, index: usize) -> Result<Sidecar, FetchError> {
    update_sidecar(ctx, |sc| {
        if let Some(mut bm) = sc.bitmap() {
            bm.set_completed(index);
            sc.set_bitmap(&bm);
        }
    })
}

/// Persist a finished whole-body transfer; records the observed size when
/// the server never advertised one.
pub(super) fn checkpoint_whole_body(ctx: &FetchCtx<'_>, bytes: u64) -> Result<Sidecar, FetchError> {
    update_sidecar(ctx, |sc| {
        sc.bytes_written = bytes;
        if sc.content_length.is_none() {
            sc.content_length = Some(bytes);
        }
    })
}

/// Mark every segment complete (external tool finished the whole file).
pub(super) fn checkpoint_all(ctx: &FetchCtx<'_>) -> Result<Sidecar, FetchError> {
    update_sidecar(ctx, |sc| {
        if let (Some(total), Some(seg)) = (sc.content_length, sc.segments.clone()) {
            if let Some(mut bm) = sc.bitmap() {
                for i in 0..segment_count(total, seg.size) {
                    bm.set_completed(i);
                }
                sc.set_bitmap(&bm);
            }
        } else if let Some(total) = sc.content_length {
            sc.bytes_written = total;
        }
    })
}

pub(super) fn update_sidecar<F>(ctx: &FetchCtx<'_>, f: F) -> Result<Sidecar, FetchError>
where
    F: FnOnce(&mut Sidecar),
{
    ctx.store.update(ctx.dest, f).map_err(storage_err)
}

pub(super) fn storage_err(e: anyhow::Error) -> FetchError {
    match e.downcast::<std::io::Error>() {
        Ok(ioe) => FetchError::Storage(ioe),
        Err(e) => FetchError::Storage(std::io::Error::other(e.to_string())),
    }
}

/// Linear ascending fill of `[high-water mark, fill_limit)` in `chunk`-sized
/// requests; shared by S1, S4, and S5's fill phase. The first request of a
/// resumed transfer starts `overlap_bytes` early and discards the overlap.
pub(super) fn linear_fill(
    ctx: &FetchCtx<'_>,
    total: u64,
    chunk: u64,
    close_connection: bool,
    fill_limit: u64,
) -> Result<u64, FetchError> {
    let sc = load_sidecar(ctx)?;
    let part = open_part(ctx, total)?;
    let mut cursor = sc.high_water_mark().min(fill_limit);
    let etag = sc.etag.clone();
    let chunk = chunk.max(1);
    let mut first = true;

    while cursor < fill_limit {
        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancel.to_error());
        }
        let end = (cursor + chunk).min(fill_limit);
        let (req_start, discard) = if first && cursor > 0 {
            let s = cursor.saturating_sub(ctx.cfg.overlap_bytes);
            (s, cursor - s)
        } else {
            (cursor, 0)
        };
        let resp = fetch_ranged(
            ctx,
            &part,
            &RangedRequest {
                range: Some((req_start, end)),
                write_base: cursor,
                discard,
                close_connection,
                if_range: etag.as_deref(),
                expect_etag: etag.as_deref(),
                ..RangedRequest::default()
            },
        )?;
        let expected = end - cursor;
        if resp.received != expected {
            return Err(FetchError::Truncated {
                expected,
                received: resp.received,
            });
        }
        part.sync().map_err(storage_err)?;
        checkpoint_linear(ctx, end)?;
        first = false;
        cursor = end;
    }

    Ok(load_sidecar(ctx)?.bytes_written)
}

/// Single-stream whole-body GET (no Range): the fallback when the server
/// does not support ranges or never advertised a length. Restarts from zero
/// on every attempt; progress is checkpointed only at completion so
/// `bytes_written` stays monotonic.
pub(super) fn whole_body(
    ctx: &FetchCtx<'_>,
    close_connection: bool,
) -> Result<FetchOutcome, FetchError> {
    let sc = load_sidecar(ctx)?;
    let part = PartWriter::open(&part_path(ctx.dest)).map_err(storage_err)?;
    part.truncate().map_err(storage_err)?;

    let resp = fetch_ranged(
        ctx,
        &part,
        &RangedRequest {
            close_connection,
            expect_etag: sc.etag.as_deref(),
            ..RangedRequest::default()
        },
    )?;
    if let Some(total) = sc.content_length {
        if resp.received != total {
            return Err(FetchError::Truncated {
                expected: total,
                received: resp.received,
            });
        }
    }
    part.sync().map_err(storage_err)?;
    let sc = checkpoint_whole_body(ctx, resp.received)?;
    Ok(FetchOutcome {
        bytes_written: sc.bytes_written,
        etag: resp.etag.or(sc.etag),
    })
}

/// S1 chunk size from the configured MiB table: <50 MiB, 50-300 MiB, >300 MiB.
pub(super) fn dynamic_chunk_size(table: [u64; 3], total: u64) -> u64 {
    let [small, medium, large] = table;
    let mib = if total < 50 * MIB {
        small
    } else if total <= 300 * MIB {
        medium
    } else {
        large
    };
    (mib * MIB).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_chunk_table_boundaries() {
        let table = [2, 6, 12];
        assert_eq!(dynamic_chunk_size(table, 10 * MIB), 2 * MIB);
        assert_eq!(dynamic_chunk_size(table, 50 * MIB), 6 * MIB);
        assert_eq!(dynamic_chunk_size(table, 300 * MIB), 6 * MIB);
        assert_eq!(dynamic_chunk_size(table, 301 * MIB), 12 * MIB);
    }
}
