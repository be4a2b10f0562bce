//! The effectful cascade driver: probe, strategy attempts, verification,
//! commit, history emission.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

use crate::config::OdmConfig;
use crate::history::{unix_now, DownloadAttempt, HistoryLog};
use crate::persist;
use crate::plan::PlanItem;
use crate::retry::{classify, run_with_retry, ErrorClass, FetchError, RetryPolicy};
use crate::sidecar::{Sidecar, SidecarStore};
use crate::stall::{CancelToken, StallDetector};
use crate::storage::{part_path, PartWriter};
use crate::strategy::{self, strategy_order, FetchCtx, StrategyKind};
use crate::transport::HttpTransport;
use crate::verify::{verify_artifact, VerifyOutcome};

use super::{advance, Event, ManagerState};

const MIB: u64 = 1024 * 1024;

/// Validator-change resets tolerated before the item is failed.
const MAX_VALIDATOR_RESETS: u32 = 3;

/// Resets after which `accept_ranges` is pinned false (a server answering
/// ranged requests with full bodies would loop otherwise).
const PIN_NO_RANGES_AFTER: u32 = 2;

/// Everything the manager needs, passed explicitly; no process globals.
pub struct ManagerCtx<'a> {
    pub transport: &'a HttpTransport,
    pub store: &'a SidecarStore,
    pub history: &'a HistoryLog,
    pub cfg: &'a OdmConfig,
    /// Process-wide shutdown flag (SIGINT).
    pub interrupt: Arc<AtomicBool>,
}

/// Final disposition of one plan item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Transfer verified and committed; `bytes` is the final artifact size.
    Committed { bytes: u64 },
    /// Terminal sidecar matched plan expectations; no I/O performed.
    Skipped,
    Failed { error: String },
    Interrupted,
}

/// Intended action reported by `--dry-run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunDecision {
    Skip,
    Strategy(StrategyKind),
    NoStrategy,
}

/// Decide the first action for `item` from sidecar knowledge and config
/// alone; opens no sockets.
pub fn first_strategy_decision(
    store: &SidecarStore,
    cfg: &OdmConfig,
    item: &PlanItem,
) -> DryRunDecision {
    let known = store.load(&item.dest_path).ok().flatten();
    if let Some(sc) = &known {
        if sc.is_terminal() && expectations_match(item, sc) && item.dest_path.exists() {
            return DryRunDecision::Skip;
        }
    }
    let sc = known.unwrap_or_else(|| Sidecar::new(&item.resource_url, &item.dataset_slug));
    strategy_order(cfg)
        .into_iter()
        .find(|k| k.is_applicable(&sc, cfg))
        .map(DryRunDecision::Strategy)
        .unwrap_or(DryRunDecision::NoStrategy)
}

fn expectations_match(item: &PlanItem, sc: &Sidecar) -> bool {
    let etag_ok = item
        .expected_etag
        .as_deref()
        .map_or(true, |e| sc.etag.as_deref() == Some(e));
    let size_ok = item
        .expected_size
        .map_or(true, |s| sc.content_length == Some(s));
    etag_ok && size_ok
}

/// Drive one plan item to a final outcome. Blocking; run on a worker thread.
pub fn run_item(ctx: &ManagerCtx<'_>, item: &PlanItem) -> ItemOutcome {
    let dest = item.dest_path.as_path();
    let mut state = ManagerState::Idle;

    if let Some(parent) = dest.parent() {
        if let Err(e) = persist::ensure_dir(parent) {
            return ItemOutcome::Failed {
                error: format!("io_error:{e}"),
            };
        }
    }

    // Terminal sidecar: idempotent skip, or a full reset when the plan says
    // the remote changed (or the final file vanished underneath us).
    match ctx.store.load(dest) {
        Ok(Some(sc)) if sc.is_terminal() => {
            if expectations_match(item, &sc) && dest.exists() {
                state = advance(state, Event::SkipTerminal);
                debug_assert_eq!(state, ManagerState::Committed);
                tracing::debug!(dest = %dest.display(), "terminal sidecar matches plan, skipping");
                return ItemOutcome::Skipped;
            }
            if let Err(e) = reset_for_restart(ctx, dest, true, None) {
                return ItemOutcome::Failed {
                    error: format!("io_error:{e}"),
                };
            }
        }
        Ok(_) => {}
        Err(e) => {
            return ItemOutcome::Failed {
                error: format!("io_error:{e}"),
            }
        }
    }

    let order = strategy_order(ctx.cfg);
    let seg_size = (ctx.cfg.sparse_segment_mb * MIB).max(1);
    let policy = RetryPolicy::with_attempts(ctx.cfg.retries_per_strategy);
    let mut stalled: HashSet<StrategyKind> = HashSet::new();
    let mut validator_resets = 0u32;
    let mut had_integrity_failure = false;
    let mut pin_no_ranges = false;
    let mut last_error = String::from("no applicable strategy");

    'cascade: loop {
        if interrupted(ctx) {
            return ItemOutcome::Interrupted;
        }
        state = advance(state, Event::Probe);

        // Probe (rate-limited inside the transport), with the in-strategy
        // retry budget applied.
        let probe_cancel = CancelToken::new();
        let meta = match run_with_retry(&policy, &probe_cancel, || {
            ctx.transport.probe(&item.resource_url)
        }) {
            Ok(m) => m,
            Err(e) => {
                let class = escalate_dns(classify(&e), &e);
                tracing::warn!(url = %item.resource_url, error = %e, "probe failed");
                if class == ErrorClass::Interrupted {
                    return ItemOutcome::Interrupted;
                }
                return ItemOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        // Fold the probe into the sidecar; a changed validator or length
        // invalidates any recorded progress before a strategy runs.
        let sc = match upsert_probed_sidecar(ctx, item, dest, &meta, seg_size, pin_no_ranges) {
            Ok(sc) => sc,
            Err(e) => {
                return ItemOutcome::Failed {
                    error: format!("io_error:{e}"),
                }
            }
        };

        // Attempt queue for this sweep: configured order filtered by
        // applicability; after an integrity failure only the conservative
        // tail (S4, S5) runs. A strategy that stalled is deferred until all
        // others have been tried.
        let applicable: Vec<StrategyKind> = order
            .iter()
            .copied()
            .filter(|k| k.is_applicable(&sc, ctx.cfg))
            .filter(|k| {
                !had_integrity_failure
                    || matches!(k, StrategyKind::S4ShortConn | StrategyKind::S5TailFirst)
            })
            .collect();
        let mut queue: Vec<StrategyKind> = applicable
            .iter()
            .copied()
            .filter(|k| !stalled.contains(k))
            .collect();
        queue.extend(applicable.iter().copied().filter(|k| stalled.contains(k)));
        if queue.is_empty() {
            return ItemOutcome::Failed { error: last_error };
        }

        for (pos, kind) in queue.iter().copied().enumerate() {
            if interrupted(ctx) {
                return ItemOutcome::Interrupted;
            }
            if state == ManagerState::Probing {
                state = advance(state, Event::Start(kind));
            }
            debug_assert_eq!(state, ManagerState::Running(kind));
            tracing::info!(dest = %dest.display(), strategy = kind.name(), "attempt starting");

            let bytes_before = sidecar_bytes(ctx, dest);
            let started = unix_now();
            let cancel = Arc::new(CancelToken::new());
            let progress = Arc::new(AtomicU64::new(0));
            let detector = StallDetector::spawn(
                Arc::clone(&progress),
                Arc::clone(&cancel),
                Duration::from_secs(ctx.cfg.switch_after_seconds_without_progress),
                Arc::clone(&ctx.interrupt),
            );
            let fctx = FetchCtx {
                transport: ctx.transport,
                store: ctx.store,
                cfg: ctx.cfg,
                url: &item.resource_url,
                dest,
                cancel: &cancel,
                progress: &progress,
            };
            let result = run_with_retry(&policy, &cancel, || {
                ctx.store
                    .update(dest, |sc| sc.retries += 1)
                    .map_err(|e| FetchError::Storage(std::io::Error::other(e.to_string())))?;
                strategy::fetch(kind, &fctx)
            });
            detector.stop();
            let ended = unix_now();
            let delta = sidecar_bytes(ctx, dest).saturating_sub(bytes_before);
            let next = queue.get(pos + 1).copied();

            match result {
                Ok(outcome) => {
                    tracing::debug!(
                        strategy = kind.name(),
                        bytes_written = outcome.bytes_written,
                        "transfer complete, verifying"
                    );
                    state = advance(state, Event::TransferDone);
                    match finish_attempt(ctx, item, dest, kind, started, ended, delta) {
                        FinishResult::Committed { bytes } => {
                            state = advance(state, Event::VerifiedCommitted);
                            debug_assert_eq!(state, ManagerState::Committed);
                            return ItemOutcome::Committed { bytes };
                        }
                        FinishResult::IntegrityFailed => {
                            last_error = "integrity_failed".to_string();
                            if had_integrity_failure {
                                state = advance(state, Event::VerifyFailed { next: None });
                                return ItemOutcome::Failed { error: last_error };
                            }
                            had_integrity_failure = true;
                            if let Err(e) = reset_for_restart(ctx, dest, false, Some("corrupted")) {
                                return ItemOutcome::Failed {
                                    error: format!("io_error:{e}"),
                                };
                            }
                            state = ManagerState::Idle;
                            continue 'cascade;
                        }
                        FinishResult::Error(error) => {
                            return ItemOutcome::Failed { error };
                        }
                    }
                }
                Err(err) => {
                    if let FetchError::Truncated { expected, received } = &err {
                        tracing::debug!(expected, received, "body shorter than advertised");
                    }
                    let class = escalate_dns(classify(&err), &err);
                    last_error = err.to_string();
                    append_history(ctx, item, kind, started, ended, delta, false, Some(&last_error));
                    tracing::warn!(
                        dest = %dest.display(),
                        strategy = kind.name(),
                        error = %last_error,
                        "attempt failed"
                    );
                    state = advance(state, Event::TransferFailed { class, next });
                    match class {
                        ErrorClass::Stalled => {
                            stalled.insert(kind);
                        }
                        ErrorClass::Retryable | ErrorClass::Unsupported => {}
                        ErrorClass::ValidatorChanged => {
                            validator_resets += 1;
                            if validator_resets >= MAX_VALIDATOR_RESETS {
                                return ItemOutcome::Failed { error: last_error };
                            }
                            if validator_resets >= PIN_NO_RANGES_AFTER {
                                pin_no_ranges = true;
                            }
                            if let Err(e) = reset_for_restart(ctx, dest, true, None) {
                                return ItemOutcome::Failed {
                                    error: format!("io_error:{e}"),
                                };
                            }
                            state = ManagerState::Idle;
                            continue 'cascade;
                        }
                        ErrorClass::Fatal => {
                            return ItemOutcome::Failed { error: last_error };
                        }
                        ErrorClass::Interrupted => return ItemOutcome::Interrupted,
                        ErrorClass::IntegrityFailed => {
                            return ItemOutcome::Failed { error: last_error };
                        }
                    }
                }
            }
        }

        return ItemOutcome::Failed { error: last_error };
    }
}

enum FinishResult {
    Committed { bytes: u64 },
    IntegrityFailed,
    Error(String),
}

/// Verify the finished part and commit; emits the attempt's history record
/// with the verification outcome folded in.
fn finish_attempt(
    ctx: &ManagerCtx<'_>,
    item: &PlanItem,
    dest: &Path,
    kind: StrategyKind,
    started: u64,
    ended: u64,
    delta: u64,
) -> FinishResult {
    let sc = match ctx.store.load(dest) {
        Ok(Some(sc)) => sc,
        Ok(None) => return FinishResult::Error("io_error:sidecar missing".into()),
        Err(e) => return FinishResult::Error(format!("io_error:{e}")),
    };
    let part = part_path(dest);
    match verify_artifact(&part, sc.content_length, sc.etag.as_deref()) {
        Ok(VerifyOutcome::Ok { sha256, size }) => {
            append_history(ctx, item, kind, started, ended, delta, true, None);
            match ctx.store.commit(dest, &sha256, kind.name()) {
                Ok(_) => {
                    tracing::info!(dest = %dest.display(), bytes = size, strategy = kind.name(), "committed");
                    FinishResult::Committed { bytes: size }
                }
                Err(e) => FinishResult::Error(format!("io_error:{e}")),
            }
        }
        Ok(outcome) => {
            match &outcome {
                VerifyOutcome::SizeMismatch { expected, actual } => {
                    tracing::warn!(dest = %dest.display(), expected, actual, "size mismatch");
                }
                VerifyOutcome::DigestMismatch { expected, actual } => {
                    tracing::warn!(dest = %dest.display(), %expected, %actual, "digest mismatch");
                }
                VerifyOutcome::Ok { .. } => {}
            }
            append_history(ctx, item, kind, started, ended, delta, false, Some("integrity_failed"));
            // A corrupt final must never be observable.
            if dest.exists() {
                let _ = std::fs::remove_file(dest);
            }
            FinishResult::IntegrityFailed
        }
        Err(e) => {
            let error = format!("io_error:{e}");
            append_history(ctx, item, kind, started, ended, delta, false, Some(&error));
            FinishResult::Error(error)
        }
    }
}

fn append_history(
    ctx: &ManagerCtx<'_>,
    item: &PlanItem,
    kind: StrategyKind,
    start: u64,
    end: u64,
    bytes: u64,
    ok: bool,
    error: Option<&str>,
) {
    let record = DownloadAttempt {
        resource_url: item.resource_url.clone(),
        strategy: kind.name().to_string(),
        start,
        end,
        bytes,
        ok,
        error: error.map(str::to_string),
    };
    if let Err(e) = ctx.history.append(&record) {
        tracing::warn!(error = %e, "history append failed");
    }
}

fn sidecar_bytes(ctx: &ManagerCtx<'_>, dest: &Path) -> u64 {
    ctx.store
        .load(dest)
        .ok()
        .flatten()
        .map(|sc| sc.bytes_written)
        .unwrap_or(0)
}

fn interrupted(ctx: &ManagerCtx<'_>) -> bool {
    ctx.interrupt.load(std::sync::atomic::Ordering::Relaxed)
}

fn escalate_dns(class: ErrorClass, err: &FetchError) -> ErrorClass {
    // "DNS unresolved after retries" is fatal; the retry budget has already
    // been spent by the time the error reaches the cascade.
    if class == ErrorClass::Retryable && err.is_dns() {
        ErrorClass::Fatal
    } else {
        class
    }
}

/// Create or refresh the sidecar from a probe. Detects a remote that changed
/// since the last run (validator or length) and discards stale progress
/// before any strategy writes.
fn upsert_probed_sidecar(
    ctx: &ManagerCtx<'_>,
    item: &PlanItem,
    dest: &Path,
    meta: &crate::transport::RemoteMeta,
    seg_size: u64,
    pin_no_ranges: bool,
) -> anyhow::Result<Sidecar> {
    let existing = ctx.store.load(dest)?;
    let mut sc = match existing {
        Some(sc) => sc,
        None => {
            let sc = Sidecar::new(&item.resource_url, &item.dataset_slug);
            ctx.store.save(dest, &sc)?;
            sc
        }
    };

    let etag_changed = match (sc.etag.as_deref(), meta.etag.as_deref()) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    };
    let length_changed = match (sc.content_length, meta.content_length) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    };
    if (etag_changed || length_changed) && sc.bytes_written > 0 {
        tracing::info!(
            dest = %dest.display(),
            etag_changed,
            length_changed,
            "remote changed since last run, discarding partial progress"
        );
        let part = part_path(dest);
        if part.exists() {
            PartWriter::open(&part)?.truncate()?;
        }
        sc.reset_progress();
        sc.segments = None;
        sc.content_length = None;
    }

    sc.etag = meta.etag.clone().or(sc.etag);
    sc.last_modified = meta.last_modified.clone().or(sc.last_modified);
    if sc.content_length.is_none() {
        sc.content_length = meta.content_length;
    }
    sc.accept_ranges = Some(if pin_no_ranges { false } else { meta.accept_ranges });
    sc.ensure_segments(seg_size);
    ctx.store.save(dest, &sc)?;
    Ok(sc)
}

/// Discard progress before a cascade restart. `clear_identity` also forgets
/// the remote's validators and length (validator change / plan-driven
/// restart); an integrity reset keeps them and records the note.
fn reset_for_restart(
    ctx: &ManagerCtx<'_>,
    dest: &Path,
    clear_identity: bool,
    note: Option<&str>,
) -> anyhow::Result<()> {
    let part = part_path(dest);
    if part.exists() {
        PartWriter::open(&part)?.truncate()?;
    }
    ctx.store.update(dest, |sc| {
        sc.reset_progress();
        if clear_identity {
            sc.etag = None;
            sc.last_modified = None;
            sc.content_length = None;
            sc.segments = None;
        }
        if let Some(n) = note {
            sc.notes = n.to_string();
        }
    })?;
    Ok(())
}
