//! `odm run <plan>` – execute a download plan.

use anyhow::Result;
use odm_core::config::OdmConfig;
use odm_core::manager::DryRunDecision;
use odm_core::plan;
use odm_core::runner::{self, RunContext};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub async fn run_plan_command(
    mut cfg: OdmConfig,
    plan_path: &Path,
    dry_run: bool,
    state_dir: Option<PathBuf>,
    jobs: Option<usize>,
) -> Result<i32> {
    if let Some(dir) = state_dir {
        cfg.state_dir = Some(dir);
    }
    if let Some(n) = jobs {
        cfg.max_concurrency = n;
    }

    let items = plan::read_plan(plan_path)?;
    let ctx = Arc::new(RunContext::new(cfg)?);

    if dry_run {
        for (item, decision) in runner::plan_decisions(&ctx, &items) {
            let action = match decision {
                DryRunDecision::Skip => "skip",
                DryRunDecision::Strategy(k) => k.name(),
                DryRunDecision::NoStrategy => "none",
            };
            println!("{}\t{}\t{}", action, item.resource_url, item.dest_path.display());
        }
        return Ok(0);
    }

    if items.is_empty() {
        println!("plan is empty: nothing to do");
        return Ok(20);
    }

    // SIGINT: set the global flag; managers finish their in-flight chunk,
    // checkpoint, and return interrupted.
    let interrupt = Arc::clone(&ctx.interrupt);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, checkpointing in-flight transfers");
            interrupt.store(true, Ordering::Relaxed);
        }
    });

    let total = items.len();
    let summary = runner::run_plan(Arc::clone(&ctx), items).await;
    println!(
        "{} item(s): {} committed ({} bytes), {} skipped, {} failed, {} interrupted",
        total,
        summary.committed,
        summary.bytes,
        summary.skipped,
        summary.failed,
        summary.interrupted
    );
    println!("history: {}", ctx.history.path().display());
    Ok(summary.exit_code())
}
