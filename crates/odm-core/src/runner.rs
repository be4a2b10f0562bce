//! Plan runner: drives plan items through the cascade manager with bounded
//! concurrency and aggregates the outcome.
//!
//! Transfers are blocking (libcurl); each item runs under `spawn_blocking`
//! while this task schedules and tallies. At most `max_concurrency` items
//! (clamped to 2) run at once, and never two for the same destination path;
//! a same-destination item is deferred, not dropped.

use anyhow::Result;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::config::OdmConfig;
use crate::history::HistoryLog;
use crate::manager::{first_strategy_decision, run_item, DryRunDecision, ItemOutcome, ManagerCtx};
use crate::plan::PlanItem;
use crate::sidecar::SidecarStore;
use crate::transport::HttpTransport;

/// Maximum concurrent plan items, regardless of configuration.
const MAX_JOBS: usize = 2;

/// Shared components for one run; passed explicitly into every manager.
pub struct RunContext {
    pub cfg: OdmConfig,
    pub transport: HttpTransport,
    pub store: SidecarStore,
    pub history: HistoryLog,
    /// Set by SIGINT: managers checkpoint and return `interrupted`.
    pub interrupt: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(cfg: OdmConfig) -> Result<Self> {
        let transport = HttpTransport::new(&cfg);
        let history = HistoryLog::new(&cfg.state_dir()?);
        Ok(RunContext {
            cfg,
            transport,
            store: SidecarStore::new(),
            history,
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Aggregate result of one plan run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub committed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: usize,
    /// Bytes of committed artifacts.
    pub bytes: u64,
}

impl RunSummary {
    /// Process exit code: 0 all ok, 20 nothing to do, 30 partial failures,
    /// 40 all downloads failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 && self.interrupted == 0 {
            if self.committed > 0 {
                0
            } else {
                20
            }
        } else if self.committed > 0 || self.skipped > 0 {
            30
        } else {
            40
        }
    }
}

/// Run every plan item to completion (or until interrupted).
pub async fn run_plan(ctx: Arc<RunContext>, items: Vec<PlanItem>) -> RunSummary {
    let jobs = ctx.cfg.max_concurrency.clamp(1, MAX_JOBS);
    let mut queue: VecDeque<PlanItem> = items.into();
    let mut in_flight: HashSet<PathBuf> = HashSet::new();
    let mut join_set: JoinSet<(PathBuf, ItemOutcome)> = JoinSet::new();
    let mut summary = RunSummary::default();

    loop {
        while join_set.len() < jobs && !ctx.interrupt.load(Ordering::Relaxed) {
            let Some(pos) = queue
                .iter()
                .position(|it| !in_flight.contains(&it.dest_path))
            else {
                break;
            };
            let item = queue.remove(pos).expect("position valid");
            in_flight.insert(item.dest_path.clone());
            let ctx = Arc::clone(&ctx);
            join_set.spawn_blocking(move || {
                let mctx = ManagerCtx {
                    transport: &ctx.transport,
                    store: &ctx.store,
                    history: &ctx.history,
                    cfg: &ctx.cfg,
                    interrupt: Arc::clone(&ctx.interrupt),
                };
                let dest = item.dest_path.clone();
                let outcome = run_item(&mctx, &item);
                (dest, outcome)
            });
        }
        if ctx.interrupt.load(Ordering::Relaxed) {
            queue.clear();
        }

        match join_set.join_next().await {
            Some(Ok((dest, outcome))) => {
                in_flight.remove(&dest);
                tally(&mut summary, &dest, outcome);
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "manager task panicked");
                summary.failed += 1;
            }
            None => {
                if queue.is_empty() {
                    break;
                }
            }
        }
    }

    summary
}

fn tally(summary: &mut RunSummary, dest: &std::path::Path, outcome: ItemOutcome) {
    match outcome {
        ItemOutcome::Committed { bytes } => {
            summary.committed += 1;
            summary.bytes += bytes;
        }
        ItemOutcome::Skipped => summary.skipped += 1,
        ItemOutcome::Failed { error } => {
            tracing::warn!(dest = %dest.display(), error = %error, "item failed");
            summary.failed += 1;
        }
        ItemOutcome::Interrupted => summary.interrupted += 1,
    }
}

/// Dry run: the intended first action per item, from sidecar knowledge and
/// config alone. Opens no sockets.
pub fn plan_decisions(ctx: &RunContext, items: &[PlanItem]) -> Vec<(PlanItem, DryRunDecision)> {
    items
        .iter()
        .map(|it| {
            (
                it.clone(),
                first_strategy_decision(&ctx.store, &ctx.cfg, it),
            )
        })
        .collect()
}
