// src/storage/processed.rs

//! Processed-title store.
//!
//! Makes repeated runs incremental: titles are normalized, hashed, and the
//! hash set is persisted per site. Cosmetic differences between runs
//! (spacing, punctuation, case) must not defeat the check, so hashing
//! works on a normalized form.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};

/// Normalize a title for duplicate detection: collapse whitespace runs,
/// strip everything that is not alphanumeric (Unicode-aware, so Hangul
/// survives), lowercase. Idempotent.
pub fn normalize_title(title: &str) -> String {
    let stripped: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else {
                ' '
            }
        })
        .collect();

    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 16-byte digest of the normalized title, hex-encoded.
pub fn title_digest(title: &str) -> String {
    let normalized = normalize_title(title);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..16])
}

/// On-disk shape of the store.
#[derive(Debug, Serialize, Deserialize, Default)]
struct StoreFile {
    #[serde(default)]
    title_hashes: Vec<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    total_count: usize,
}

/// Persisted set of processed-title digests for one site.
pub struct ProcessedTitleStore {
    path: PathBuf,
    hashes: HashSet<String>,
}

impl ProcessedTitleStore {
    /// Store backed by `processed_titles_{code}.json` under the site's
    /// output root. One file per site keeps independent runs from
    /// contending.
    pub fn new(output_root: impl AsRef<Path>, site_code: &str) -> Self {
        Self {
            path: output_root
                .as_ref()
                .join(format!("processed_titles_{site_code}.json")),
            hashes: HashSet::new(),
        }
    }

    /// Load previously persisted hashes. A missing file is an empty store.
    pub async fn load(&mut self) -> Result<()> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.hashes = HashSet::new();
                return Ok(());
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let file: StoreFile = serde_json::from_slice(&bytes)?;
        self.hashes = file.title_hashes.into_iter().collect();
        log::info!(
            "Loaded {} processed titles from {}",
            self.hashes.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Persist the current hash set atomically (write temp, then rename).
    pub async fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut hashes: Vec<String> = self.hashes.iter().cloned().collect();
        hashes.sort();
        let file = StoreFile {
            total_count: hashes.len(),
            title_hashes: hashes,
            last_updated: Some(Utc::now()),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let tmp = self.path.with_extension("tmp");
        let mut out = tokio::fs::File::create(&tmp).await?;
        out.write_all(&bytes).await?;
        out.flush().await?;
        drop(out);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Whether a title (in any cosmetic variation) was already processed.
    pub fn is_processed(&self, title: &str) -> bool {
        self.hashes.contains(&title_digest(title))
    }

    /// Record a title as processed. Call only after the item's output is
    /// durably persisted, so a crash never marks unpersisted work done.
    pub fn mark_processed(&mut self, title: &str) {
        self.hashes.insert(title_digest(title));
    }

    /// Number of distinct processed titles.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
