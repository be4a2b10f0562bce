//! Integration tests: the plan runner end to end (summary, exit codes,
//! destination exclusivity, dry run).

mod common;

use common::{pattern_body, test_config};
use odm_core::manager::DryRunDecision;
use odm_core::plan::{PlanItem, PlanReason};
use odm_core::runner::{plan_decisions, run_plan, RunContext};
use odm_core::strategy::StrategyKind;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;

fn plan_item(url: &str, dest: &Path) -> PlanItem {
    PlanItem {
        dataset_slug: "ds".into(),
        resource_url: url.into(),
        dest_path: dest.to_path_buf(),
        reason: PlanReason::Missing,
        expected_size: None,
        expected_etag: None,
    }
}

/// A URL nothing listens on (bind, note the port, drop the listener).
fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/gone.bin", port)
}

#[tokio::test]
async fn mixed_outcomes_summarize_as_partial_failure() {
    let body = pattern_body(64 * 1024);
    let server = common::range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let ctx = Arc::new(RunContext::new(cfg).unwrap());

    let good = dir.path().join("good.bin");
    let bad = dir.path().join("bad.bin");
    let items = vec![
        plan_item(&server.url, &good),
        plan_item(&dead_url(), &bad),
    ];

    let summary = run_plan(Arc::clone(&ctx), items).await;
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.bytes, body.len() as u64);
    assert_eq!(summary.exit_code(), 30);
    assert_eq!(std::fs::read(&good).unwrap(), body);
    assert!(!bad.exists());
}

#[tokio::test]
async fn all_failures_exit_40() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let ctx = Arc::new(RunContext::new(cfg).unwrap());

    let items = vec![plan_item(&dead_url(), &dir.path().join("a.bin"))];
    let summary = run_plan(ctx, items).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 40);
}

#[tokio::test]
async fn second_run_skips_everything_exit_20() {
    let body = pattern_body(64 * 1024);
    let server = common::range_server::start(body);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("resource.bin");
    let cfg = test_config(dir.path());

    let ctx = Arc::new(RunContext::new(cfg.clone()).unwrap());
    let summary = run_plan(Arc::clone(&ctx), vec![plan_item(&server.url, &dest)]).await;
    assert_eq!(summary.exit_code(), 0);

    let ctx2 = Arc::new(RunContext::new(cfg).unwrap());
    let summary2 = run_plan(ctx2, vec![plan_item(&server.url, &dest)]).await;
    assert_eq!(summary2.committed, 0);
    assert_eq!(summary2.skipped, 1);
    assert_eq!(summary2.exit_code(), 20, "nothing to do");
}

#[tokio::test]
async fn duplicate_destinations_never_run_concurrently() {
    let body = pattern_body(64 * 1024);
    let server = common::range_server::start(body.clone());
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("resource.bin");
    let mut cfg = test_config(dir.path());
    cfg.max_concurrency = 2;
    let ctx = Arc::new(RunContext::new(cfg).unwrap());

    // Same destination twice: the second must wait for the first and then
    // short-circuit on its terminal sidecar.
    let items = vec![
        plan_item(&server.url, &dest),
        plan_item(&server.url, &dest),
    ];
    let summary = run_plan(ctx, items).await;
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[test]
fn dry_run_reports_first_strategy_without_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let ctx = RunContext::new(cfg).unwrap();

    // Unroutable URL: a dry run must not care.
    let items = vec![plan_item(&dead_url(), &dir.path().join("a.bin"))];
    let decisions = plan_decisions(&ctx, &items);
    assert_eq!(decisions.len(), 1);
    assert_eq!(
        decisions[0].1,
        DryRunDecision::Strategy(StrategyKind::S1Dynamic)
    );
}
