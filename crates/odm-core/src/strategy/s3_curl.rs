//! S3: delegate the transfer to the external curl binary with byte-append
//! resume (`-C -`). The part file is the canonical resume target; because
//! curl resumes at the file's end, the part is first cut down to the
//! contiguous completed prefix (sparse progress beyond it is re-fetched).

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::retry::FetchError;
use crate::storage::{part_path, PartWriter};

use super::shared;
use super::{FetchCtx, FetchOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// True when the configured tool path resolves to something runnable.
pub(super) fn tool_present(curl_path: &str) -> bool {
    let p = Path::new(curl_path);
    if p.components().count() > 1 {
        return p.is_file();
    }
    // Bare name: resolve through PATH.
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(curl_path).is_file())
        })
        .unwrap_or(false)
}

pub(super) fn fetch(ctx: &FetchCtx<'_>) -> Result<FetchOutcome, FetchError> {
    if !ctx.cfg.enable_curl {
        return Err(FetchError::ToolMissing);
    }
    let sc = shared::load_sidecar(ctx)?;
    let part_file = part_path(ctx.dest);

    // Byte-append resume only works from the contiguous prefix; drop the
    // preallocated tail and any sparse islands beyond it.
    let hwm = sc.high_water_mark();
    {
        let part = PartWriter::open(&part_file).map_err(shared::storage_err)?;
        if part.len().map_err(shared::storage_err)? != hwm {
            part.truncate_to(hwm).map_err(shared::storage_err)?;
            shared::update_sidecar(ctx, |sc| {
                if let Some(seg) = sc.segments.clone() {
                    let keep = (hwm / seg.size) as usize;
                    let mut bm = crate::segmenter::SegmentBitmap::new(keep);
                    for i in 0..keep {
                        bm.set_completed(i);
                    }
                    sc.set_bitmap(&bm);
                    sc.notes = "s3_prefix_resume".to_string();
                }
            })?;
        }
    }

    let http = &ctx.cfg.http;
    let mut cmd = Command::new(&ctx.cfg.curl_path);
    cmd.arg("--fail")
        .arg("--location")
        .arg("--silent")
        .arg("--show-error")
        .arg("--max-redirs")
        .arg("5")
        .arg("--retry")
        .arg(ctx.cfg.retries_per_strategy.to_string())
        .arg("--continue-at")
        .arg("-")
        .arg("--user-agent")
        .arg(&http.user_agent)
        .arg("--connect-timeout")
        .arg(http.timeout_connect_s.to_string())
        .arg("--speed-limit")
        .arg("1024")
        .arg("--speed-time")
        .arg(http.timeout_read_s.to_string())
        .arg("--header")
        .arg("Accept-Encoding: identity");
    for (k, v) in &http.headers {
        cmd.arg("--header").arg(format!("{}: {}", k.trim(), v.trim()));
    }
    if let Some(rate) = &ctx.cfg.curl_limit_rate {
        cmd.arg("--limit-rate").arg(rate);
    }
    cmd.arg("--output").arg(&part_file).arg(ctx.url);
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FetchError::ToolMissing)
        }
        Err(e) => return Err(FetchError::Storage(e)),
    };
    tracing::debug!(url = ctx.url, tool = %ctx.cfg.curl_path, "external transfer started");

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if ctx.cancel.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ctx.cancel.to_error());
                }
                // File growth feeds the stall detector while the child runs.
                if let Ok(meta) = std::fs::metadata(&part_file) {
                    ctx.progress.store(meta.len(), Ordering::Relaxed);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FetchError::Storage(e));
            }
        }
    };
    if !status.success() {
        return Err(FetchError::ToolExit(status.code().unwrap_or(-1)));
    }

    let part = PartWriter::open(&part_file).map_err(shared::storage_err)?;
    part.sync().map_err(shared::storage_err)?;
    let len = part.len().map_err(shared::storage_err)?;
    let sc = if let Some(total) = sc.content_length {
        if len != total {
            return Err(FetchError::Truncated {
                expected: total,
                received: len,
            });
        }
        shared::checkpoint_all(ctx)?
    } else {
        shared::checkpoint_whole_body(ctx, len)?
    };

    Ok(FetchOutcome {
        bytes_written: sc.bytes_written,
        etag: sc.etag,
    })
}
