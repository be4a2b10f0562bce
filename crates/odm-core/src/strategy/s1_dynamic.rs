//! S1: linear ranged streaming with chunks scaled to the resource size.
//!
//! Missing bytes are fetched ascending over keep-alive ranged GETs; resuming
//! re-reads a small overlap before the high-water mark to tolerate a final
//! block lost before fsync. Degrades to a whole-body GET when the server
//! does not support ranges or never advertised a length.

use crate::retry::FetchError;

use super::shared::{self, dynamic_chunk_size};
use super::{FetchCtx, FetchOutcome};

pub(super) fn fetch(ctx: &FetchCtx<'_>) -> Result<FetchOutcome, FetchError> {
    let sc = shared::load_sidecar(ctx)?;
    match (sc.content_length, sc.accept_ranges) {
        (Some(0), _) => {
            // Zero-length resource: nothing to transfer, just materialize
            // the empty part.
            let part = shared::open_part(ctx, 0)?;
            part.sync().map_err(shared::storage_err)?;
            Ok(FetchOutcome {
                bytes_written: 0,
                etag: sc.etag,
            })
        }
        (Some(total), Some(true)) => {
            let chunk = dynamic_chunk_size(ctx.cfg.dynamic_chunks_mb, total);
            let bytes = shared::linear_fill(ctx, total, chunk, false, total)?;
            let etag = shared::load_sidecar(ctx)?.etag;
            Ok(FetchOutcome {
                bytes_written: bytes,
                etag,
            })
        }
        _ => shared::whole_body(ctx, false),
    }
}
