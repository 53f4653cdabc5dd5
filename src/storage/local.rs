// src/storage/local.rs

//! Local filesystem output sink.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── processed_titles_{site}.json   # duplicate tracker store
//! ├── 001_공고제목/
//! │   ├── content.md
//! │   └── attachments/
//! │       └── 공고문.hwp
//! └── 002_다른공고/
//!     └── content.md
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::models::{Announcement, DetailContent, DetailRef, DownloadResult};
use crate::services::filename::sanitize_filename;
use crate::storage::OutputSink;

/// Maximum characters of the title used in a folder name.
const FOLDER_TITLE_CHARS: usize = 100;

/// Writes each item to its own numbered folder under a root directory.
pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn item_dir(&self, seq: usize, announcement: &Announcement) -> PathBuf {
        let title: String = sanitize_filename(&announcement.title)
            .chars()
            .take(FOLDER_TITLE_CHARS)
            .collect();
        let title = if title.trim().is_empty() {
            "untitled".to_string()
        } else {
            title.trim().to_string()
        };
        self.root.join(format!("{seq:03}_{title}"))
    }

    /// Markdown front section: title, listing metadata, source link.
    fn meta_header(announcement: &Announcement) -> String {
        let mut lines = vec![format!("# {}", announcement.title), String::new()];

        if let Some(date) = &announcement.date {
            lines.push(format!("**작성일**: {date}"));
        }
        for (label, value) in &announcement.extra {
            let label = match label.as_str() {
                "writer" => "작성자",
                "status" => "상태",
                "period" => "접수기간",
                other => other,
            };
            lines.push(format!("**{label}**: {value}"));
        }
        if let DetailRef::Url(url) = &announcement.detail_ref {
            lines.push(format!("**원본 URL**: {url}"));
        }

        lines.push(String::new());
        lines.push("---".to_string());
        lines.push(String::new());
        lines.join("\n")
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl OutputSink for LocalSink {
    async fn prepare(&self, seq: usize, announcement: &Announcement) -> Result<PathBuf> {
        let dir = self.item_dir(seq, announcement).join("attachments");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn persist(
        &self,
        seq: usize,
        announcement: &Announcement,
        detail: &DetailContent,
        downloads: &[DownloadResult],
    ) -> Result<()> {
        let dir = self.item_dir(seq, announcement);
        let content = format!("{}{}\n", Self::meta_header(announcement), detail.body);
        Self::write_atomic(&dir.join("content.md"), content.as_bytes()).await?;

        let failed = downloads.iter().filter(|d| !d.is_saved()).count();
        if failed > 0 {
            log::warn!(
                "{}: {}/{} attachments failed",
                announcement.title,
                failed,
                downloads.len()
            );
        }

        // Remove the attachments dir again when nothing was saved into it.
        let attachments = dir.join("attachments");
        if downloads.iter().all(|d| !d.is_saved()) {
            let _ = tokio::fs::remove_dir(&attachments).await;
        }

        Ok(())
    }
}
