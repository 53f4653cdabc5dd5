// src/storage/mod.rs

//! Persistence abstractions: the processed-title store and the output
//! sink contract the pipeline writes through.
//!
//! The engine does not prescribe an on-disk layout; [`LocalSink`] is the
//! default implementation, one folder per item with its attachments
//! alongside.

pub mod local;
pub mod processed;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Announcement, DetailContent, DownloadResult};

// Re-export for convenience
pub use local::LocalSink;
pub use processed::{ProcessedTitleStore, normalize_title, title_digest};

/// Destination for processed items.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Create and return the directory attachment files for this item
    /// should be written into. Called before downloads start.
    async fn prepare(&self, seq: usize, announcement: &Announcement) -> Result<PathBuf>;

    /// Persist one fully processed item: content plus the outcome of each
    /// attachment download. Called exactly once per item, after all of
    /// its downloads have finished.
    async fn persist(
        &self,
        seq: usize,
        announcement: &Announcement,
        detail: &DetailContent,
        downloads: &[DownloadResult],
    ) -> Result<()>;
}
