//! NRTM mirroring daemon library.
//!
//! Keeps copies of IRR sources consistent with their origin over NRTM v3
//! (streamed text diffs) and NRTM v4 (signed snapshot and delta files), and
//! publishes local sources as NRTM v4 and flat-file exports.

pub mod control;
pub mod domain;
pub mod jobs;
pub mod outbound;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
