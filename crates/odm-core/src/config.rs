use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/odm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdmConfig {
    /// Strategy cascade order; names drawn from
    /// {s1_dynamic, s2_sparse, s3_curl, s4_shortconn, s5_tailfirst}.
    pub strategies: Vec<String>,
    /// In-strategy retry budget before the cascade advances.
    pub retries_per_strategy: u32,
    /// Stall threshold: seconds without `bytes_written` progress before the
    /// running strategy is cancelled and the cascade advances.
    pub switch_after_seconds_without_progress: u64,
    /// S1 chunk sizes in MiB for small / medium / large resources
    /// (boundaries at 50 MiB and 300 MiB).
    pub dynamic_chunks_mb: [u64; 3],
    /// S2 segment size in MiB; also the bitmap granularity for every
    /// strategy once a resource's length is known.
    pub sparse_segment_mb: u64,
    /// S4 chunk size in KiB (one `Connection: close` request per chunk).
    pub snail_chunks_kb: u64,
    /// S1 resume overlap in bytes, re-read and discarded at the high-water
    /// mark.
    pub overlap_bytes: u64,
    /// Enable the external-tool strategy (S3).
    pub enable_curl: bool,
    /// Path of the curl binary for S3.
    pub curl_path: String,
    /// Optional bandwidth cap passed to S3 as `--limit-rate` (e.g. "2M").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curl_limit_rate: Option<String>,
    /// Token-bucket rate for probe requests, in requests per second.
    pub rate_limit_rps: f64,
    /// Plan items driven in parallel; clamped to 2, never two per
    /// destination path.
    pub max_concurrency: usize,
    /// Override for the state directory (history, logs). Defaults to the
    /// XDG state home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    pub http: HttpConfig,
}

/// Transport tuning shared by every in-process request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_connect_s: u64,
    /// Read liveness window: a transfer below 1 KiB/s for this long fails
    /// with a timeout.
    pub timeout_read_s: u64,
    pub http2: bool,
    pub user_agent: String,
    /// Extra request headers sent on every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                "s1_dynamic".into(),
                "s2_sparse".into(),
                "s3_curl".into(),
                "s4_shortconn".into(),
                "s5_tailfirst".into(),
            ],
            retries_per_strategy: 3,
            switch_after_seconds_without_progress: 300,
            dynamic_chunks_mb: [2, 6, 12],
            sparse_segment_mb: 4,
            snail_chunks_kb: 1024,
            overlap_bytes: 32 * 1024,
            enable_curl: true,
            curl_path: "curl".into(),
            curl_limit_rate: None,
            rate_limit_rps: 1.0,
            max_concurrency: 1,
            state_dir: None,
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_connect_s: 30,
            timeout_read_s: 60,
            http2: false,
            user_agent: "odm/0.1".into(),
            headers: HashMap::new(),
        }
    }
}

impl OdmConfig {
    /// State directory for history and logs: the configured override or the
    /// XDG state home.
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("odm")?;
        Ok(xdg_dirs.get_state_home())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("odm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<OdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = OdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: OdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
