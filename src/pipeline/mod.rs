// src/pipeline/mod.rs

//! Run orchestration.

mod scrape;

pub use scrape::{CancelToken, RunContext, RunSummary, StopReason, run_site};
