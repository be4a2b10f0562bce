//! Per-file transfer state: the JSON document persisted next to each
//! destination as `<dest>.meta.json`.
//!
//! The sidecar is created on first attempt, mutated only through the store
//! (which serializes writes per destination), and becomes terminal once
//! `sha256` and `downloaded_at` are set at commit.

mod store;

pub use store::SidecarStore;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::segmenter::{segment_count, SegmentBitmap};

/// Suffix of the metadata document next to the destination.
pub const META_SUFFIX: &str = ".meta.json";

/// Path of the sidecar: appends `.meta.json` to the destination path.
pub fn sidecar_path(dest: &Path) -> PathBuf {
    let mut o = dest.as_os_str().to_owned();
    o.push(META_SUFFIX);
    PathBuf::from(o)
}

/// Segment bookkeeping: fixed granularity and the completion bitmap in its
/// canonical ASCII `0/1` form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentState {
    pub size: u64,
    pub bitmap: String,
}

/// Transfer state for one destination file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub url: String,
    pub dataset_slug: String,
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_ranges: Option<bool>,
    /// Set only on successful commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Unix seconds; set only on successful commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<u64>,
    /// Last strategy that touched the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<SegmentState>,
    /// Bytes durably covered by the bitmap (or by whole-body completion).
    /// Monotonically non-decreasing except at validator-change resets.
    #[serde(default)]
    pub bytes_written: u64,
    /// Strategy invocations attempted for this resource.
    #[serde(default)]
    pub retries: u32,
    /// Free-form diagnostic note (e.g. `corrupted`).
    #[serde(default)]
    pub notes: String,
}

impl Sidecar {
    /// Fresh sidecar for a plan item; `resource_name` is derived from the
    /// URL's final path segment.
    pub fn new(url: &str, dataset_slug: &str) -> Self {
        Sidecar {
            url: url.to_string(),
            dataset_slug: dataset_slug.to_string(),
            resource_name: resource_name_from_url(url),
            etag: None,
            last_modified: None,
            content_length: None,
            accept_ranges: None,
            sha256: None,
            downloaded_at: None,
            strategy: None,
            segments: None,
            bytes_written: 0,
            retries: 0,
            notes: String::new(),
        }
    }

    /// Terminal once integrity metadata is recorded at commit.
    pub fn is_terminal(&self) -> bool {
        self.sha256.is_some() && self.downloaded_at.is_some()
    }

    /// Ensure segment bookkeeping exists for a known `content_length`.
    /// The granularity is fixed for the lifetime of the resource.
    pub fn ensure_segments(&mut self, segment_size: u64) {
        if self.segments.is_some() {
            return;
        }
        if let Some(total) = self.content_length {
            if total > 0 {
                let n = segment_count(total, segment_size);
                self.segments = Some(SegmentState {
                    size: segment_size,
                    bitmap: SegmentBitmap::new(n).to_ascii(n),
                });
            }
        }
    }

    /// Parsed completion bitmap, when segment bookkeeping exists.
    pub fn bitmap(&self) -> Option<SegmentBitmap> {
        self.segments
            .as_ref()
            .map(|s| SegmentBitmap::from_ascii(&s.bitmap))
    }

    /// Store `bitmap` back and recompute `bytes_written` from it.
    pub fn set_bitmap(&mut self, bitmap: &SegmentBitmap) {
        let total = self.content_length.unwrap_or(0);
        if let Some(seg) = self.segments.as_mut() {
            let n = segment_count(total, seg.size);
            seg.bitmap = bitmap.to_ascii(n);
            self.bytes_written = bitmap.completed_bytes(total, seg.size);
        }
    }

    /// Resume point for linear strategies: end of the contiguous completed
    /// prefix, in bytes.
    pub fn high_water_mark(&self) -> u64 {
        let (Some(total), Some(seg)) = (self.content_length, self.segments.as_ref()) else {
            return 0;
        };
        let n = segment_count(total, seg.size);
        let prefix = SegmentBitmap::from_ascii(&seg.bitmap).completed_prefix(n);
        (prefix as u64 * seg.size).min(total)
    }

    /// Discard all transfer progress. The only legitimate path by which
    /// `bytes_written` shrinks (validator change or integrity reset).
    pub fn reset_progress(&mut self) {
        if let (Some(total), Some(seg)) = (self.content_length, self.segments.as_mut()) {
            let n = segment_count(total, seg.size);
            seg.bitmap = SegmentBitmap::new(n).to_ascii(n);
        }
        self.bytes_written = 0;
        self.sha256 = None;
        self.downloaded_at = None;
    }
}

fn resource_name_from_url(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segs| segs.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_else(|| "resource".to_string())
}
