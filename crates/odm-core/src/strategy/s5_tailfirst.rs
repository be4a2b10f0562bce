//! S5: tail-first. Fetch the final segment with a suffix range, check the
//! advertised total is consistent, then fill the remainder ascending. A
//! last-resort tactic that surfaces truncation/stability pathologies before
//! committing effort to a large transfer.

use crate::retry::FetchError;
use crate::segmenter::{plan_segments, segment_count};

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

    let n = segment_count(total, seg.size);
    let segments = plan_segments(total, seg.size);
    let tail = segments[n - 1];
    let part = shared::open_part(ctx, total)?;
    let etag = sc.etag.clone();

    let bm = sc.bitmap().unwrap_or_default();
    if !bm.is_completed(n - 1) {
        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancel.to_error());
        }
        let resp = shared::fetch_ranged(
            ctx,
            &part,
            &RangedRequest {
                suffix: Some(tail.len()),
                write_base: tail.start,
                if_range: etag.as_deref(),
                expect_etag: etag.as_deref(),
                ..RangedRequest::default()
            },
        )?;
        // A server advertising a different total for the suffix than the
        // probe reported is changing (or lying about) the resource.
        if let Some(advertised) = resp.advertised_total {
            if advertised != total {
                return Err(FetchError::ValidatorChanged);
            }
        }
        if resp.received != tail.len() {
            return Err(FetchError::Truncated {
                expected: tail.len(),
                received: resp.received,
            });
        }
        part.sync().map_err(shared::storage_err)?;
        shared::checkpoint_segment(ctx, n - 1)?;
    }

    // Ascending fill of everything before the tail, one segment per request.
    shared::linear_fill(ctx, total, seg.size, false, tail.start)?;

    let sc = shared::load_sidecar(ctx)?;
    Ok(FetchOutcome {
        bytes_written: sc.bytes_written,
        etag: sc.etag,
    })
}
