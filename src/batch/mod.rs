//! Batch orchestration
//!
//! [`BatchController`] is the public façade: queue tasks, start/stop a run, watch its
//! progress, and export the results.

mod controller;
mod stats;

/// Result export to JSON and CSV files
pub mod export;

pub use controller::{BatchController, BatchStatus};
pub use export::{ExportFormat, CSV_HEADER};
pub use stats::BatchStats;
