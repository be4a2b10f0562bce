//! S2: sparse segments. The resource is split at the bitmap granularity and
//! segments are fetched in a deliberately non-linear order (first, last,
//! then bisection), each over its own ranged GET. Sidesteps servers that
//! degrade or time out on long sequential reads.

use crate::retry::FetchError;
use crate::segmenter::{plan_segments, sparse_order};

use super::shared::{self, RangedRequest};
use super::{FetchCtx, FetchOutcome};

pub(super) fn fetch(ctx: &FetchCtx<'_>) -> Result<FetchOutcome, FetchError> {
    let sc = shared::load_sidecar(ctx)?;
    let (Some(total), Some(true)) = (sc.content_length, sc.accept_ranges) else {
        return Err(FetchError::NotApplicable);
    };
    let Some(seg) = sc.segments.clone() else {
        return Err(FetchError::NotApplicable);
    };
    if total == 0 {
        let part = shared::open_part(ctx, 0)?;
        part.sync().map_err(shared::storage_err)?;
        return Ok(FetchOutcome {
            bytes_written: 0,
            etag: sc.etag,
        });
    }

    let segments = plan_segments(total, seg.size);
    let part = shared::open_part(ctx, total)?;
    let bm = sc.bitmap().unwrap_or_default();
    let etag = sc.etag.clone();

    for idx in sparse_order(segments.len()) {
        if bm.is_completed(idx) {
            continue;
        }
        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancel.to_error());
        }
        let s = segments[idx];
        let resp = shared::fetch_ranged(
            ctx,
            &part,
            &RangedRequest {
                range: Some((s.start, s.end)),
                write_base: s.start,
                if_range: etag.as_deref(),
                expect_etag: etag.as_deref(),
                ..RangedRequest::default()
            },
        )?;
        if resp.received != s.len() {
            return Err(FetchError::Truncated {
                expected: s.len(),
                received: resp.received,
            });
        }
        part.sync().map_err(shared::storage_err)?;
        shared::checkpoint_segment(ctx, idx)?;
    }

    let sc = shared::load_sidecar(ctx)?;
    Ok(FetchOutcome {
        bytes_written: sc.bytes_written,
        etag: sc.etag,
    })
}
