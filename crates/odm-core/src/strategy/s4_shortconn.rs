//! S4: short connections. Same ascending order as S1, but each chunk is a
//! small request carrying `Connection: close`, defeating servers that grow
//! unstable over one persistent connection.

use crate::retry::FetchError;

use super::shared;
use super::{FetchCtx, FetchOutcome};

pub(super) fn fetch(ctx: &FetchCtx<'_>) -> Result<FetchOutcome, FetchError> {
    let sc = shared::load_sidecar(ctx)?;
    match (sc.content_length, sc.accept_ranges) {
        (Some(0), _) => {
            let part = shared::open_part(ctx, 0)?;
            part.sync().map_err(shared::storage_err)?;
            Ok(FetchOutcome {
                bytes_written: 0,
                etag: sc.etag,
            })
        }
        (Some(total), Some(true)) => {
            let chunk = (ctx.cfg.snail_chunks_kb * 1024).max(1);
            let bytes = shared::linear_fill(ctx, total, chunk, true, total)?;
            let etag = shared::load_sidecar(ctx)?.etag;
            Ok(FetchOutcome {
                bytes_written: bytes,
                etag,
            })
        }
        _ => shared::whole_body(ctx, true),
    }
}
