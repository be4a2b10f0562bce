//! Range math and segment bookkeeping.
//!
//! Splits a resource into fixed-size segments, computes HTTP Range bounds,
//! provides the completion bitmap persisted in sidecars (ASCII `0/1`), and
//! the non-linear fetch order used by the sparse strategy.

mod bitmap;
mod order;
mod range;

pub use bitmap::SegmentBitmap;
pub use order::sparse_order;
pub use range::{plan_segments, segment_count, Segment};
