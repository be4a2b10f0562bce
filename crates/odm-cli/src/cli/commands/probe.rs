//! `odm probe <url>` – one rate-limited probe, printed.

use anyhow::{Context, Result};
use odm_core::config::OdmConfig;
use odm_core::transport::HttpTransport;

pub async fn run_probe(cfg: OdmConfig, url: &str) -> Result<()> {
    let transport = HttpTransport::new(&cfg);
    let owned_url = url.to_string();
    let meta = tokio::task::spawn_blocking(move || transport.probe(&owned_url))
        .await
        .context("probe task join")??;

    println!("url: {url}");
    println!(
        "content-length: {}",
        meta.content_length
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".into())
    );
    println!(
        "accept-ranges: {}",
        if meta.accept_ranges { "bytes" } else { "none" }
    );
    println!("etag: {}", meta.etag.as_deref().unwrap_or("-"));
    println!(
        "last-modified: {}",
        meta.last_modified.as_deref().unwrap_or("-")
    );
    Ok(())
}
