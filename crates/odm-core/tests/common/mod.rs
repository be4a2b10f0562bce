pub mod range_server;

use odm_core::config::OdmConfig;
use std::path::Path;

/// Config tuned for tests: no probe pacing, no external tool, 1 MiB
/// segments, tight budgets.
pub fn test_config(state_dir: &Path) -> OdmConfig {
    let mut cfg = OdmConfig::default();
    cfg.rate_limit_rps = 0.0;
    cfg.enable_curl = false;
    cfg.sparse_segment_mb = 1;
    cfg.retries_per_strategy = 2;
    cfg.state_dir = Some(state_dir.to_path_buf());
    cfg.http.timeout_connect_s = 5;
    cfg.http.timeout_read_s = 30;
    cfg
}

/// Deterministic test payload.
pub fn pattern_body(len: usize) -> Vec<u8> {
    (0u8..=255).cycle().take(len).collect()
}
