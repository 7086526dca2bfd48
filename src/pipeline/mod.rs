//! Record processing after extraction.
//!
//! - `normalize`: raw fields to scored canonical records
//! - `quality`: per-batch health statistics

pub mod normalize;
pub mod quality;

pub use normalize::{Normalizer, dedup_key, external_id};
pub use quality::{QualityReporter, build_report};
