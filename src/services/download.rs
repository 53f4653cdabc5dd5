// src/services/download.rs

//! Attachment download service.
//!
//! Materializes one remote file at a time, defending against the ways the
//! target servers misbehave: HTML error pages served with HTTP 200 where a
//! binary was promised, zero-byte bodies, and filename headers in the
//! wrong encoding. Retry with alternate URL patterns is the caller's
//! decision; this service never retries on its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use encoding_rs::Encoding;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::models::{
    AttachmentRef, DownloadFailure, DownloadResult, EngineConfig, RemoteLocator, SiteProfile,
};
use crate::services::fetch::declared_encoding;
use crate::services::filename::resolve_filename;
use crate::services::strategy::LocatorResolver;

/// Downloads attachments for one site.
pub struct AttachmentDownloader {
    client: reqwest::Client,
    referer: String,
    declared: Option<&'static Encoding>,
}

impl AttachmentDownloader {
    /// Build a downloader for one site. Uses the longer download timeout
    /// and sends the site's base URL as referer; several boards refuse
    /// downloads without it.
    pub fn new(config: &EngineConfig, site: &SiteProfile) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .danger_accept_invalid_certs(!(config.verify_tls && site.verify_tls))
            .build()?;

        Ok(Self {
            client,
            referer: site.base_url.clone(),
            declared: declared_encoding(&site.encoding),
        })
    }

    /// Download one attachment into `dest_dir`.
    ///
    /// `seq` is the attachment's 1-based position within its item, used
    /// for synthetic names. Failures are reported in the result, never
    /// raised.
    pub async fn download(
        &self,
        attachment: &AttachmentRef,
        dest_dir: &Path,
        seq: usize,
        resolver: Option<&dyn LocatorResolver>,
    ) -> DownloadResult {
        let url = match self.final_url(attachment, resolver).await {
            Ok(url) => url,
            Err(reason) => {
                warn!("Attachment locator unresolved ({}): {}", attachment.name, reason);
                return DownloadResult::failed(&attachment.name, DownloadFailure::Resolution);
            }
        };

        debug!("Downloading attachment from {}", url);

        let response = match self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, &self.referer)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Attachment request failed for {}: {}", url, e);
                return DownloadResult::failed(&attachment.name, DownloadFailure::Network);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Attachment HTTP {} for {}", status.as_u16(), url);
            return DownloadResult::failed(
                &attachment.name,
                DownloadFailure::HttpStatus(status.as_u16()),
            );
        }

        // Misbehaving servers return an HTML error page with HTTP 200;
        // saving it as the file would silently corrupt the output.
        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);
        if let Some(content_type) = &content_type {
            if content_type.to_ascii_lowercase().contains("text/html") {
                warn!("HTML response where a file was expected: {}", url);
                return DownloadResult::failed(&attachment.name, DownloadFailure::WrongContentType);
            }
        }

        let disposition = header_latin1(&response, reqwest::header::CONTENT_DISPOSITION);
        let file_name = resolve_filename(
            disposition.as_deref(),
            &attachment.name,
            response.url().path(),
            self.declared,
            seq,
        );
        let dest = unique_path(dest_dir, &file_name);
        let final_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(file_name);

        match self.stream_to_file(response, &dest).await {
            Ok(0) => {
                let _ = tokio::fs::remove_file(&dest).await;
                warn!("Zero-byte download removed: {}", url);
                DownloadResult::failed(final_name, DownloadFailure::EmptyFile)
            }
            Ok(bytes) => {
                info!("Saved {} ({} bytes)", final_name, bytes);
                DownloadResult::saved(final_name, bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&dest).await;
                warn!("Attachment stream failed for {}: {}", url, e);
                DownloadResult::failed(final_name, DownloadFailure::Network)
            }
        }
    }

    async fn final_url(
        &self,
        attachment: &AttachmentRef,
        resolver: Option<&dyn LocatorResolver>,
    ) -> std::result::Result<String, String> {
        match &attachment.locator {
            RemoteLocator::Direct(url) => Ok(url.clone()),
            RemoteLocator::Lookup { key } => match resolver {
                Some(resolver) => resolver.resolve(key).await.map_err(|e| e.to_string()),
                None => Err(format!("no resolver configured for lookup key '{key}'")),
            },
        }
    }

    /// Stream the response body to disk in chunks, never buffering the
    /// whole file. Returns the byte count written.
    async fn stream_to_file(&self, response: reqwest::Response, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Read a header preserving raw bytes as Latin-1 characters. Legacy
/// servers put raw euc-kr bytes into Content-Disposition, which are not
/// valid ASCII and must survive until the encoding recovery step.
fn header_latin1(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|v| v.as_bytes().iter().map(|&b| b as char).collect())
}

/// Pick a non-colliding path by suffixing `_1`, `_2`, ... before the
/// extension. Items regularly attach two files with the same display name.
fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
        _ => (file_name, ""),
    };

    for n in 1..1000 {
        let path = dir.join(format!("{stem}_{n}{ext}"));
        if !path.exists() {
            return path;
        }
    }
    candidate
}
