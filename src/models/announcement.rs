//! Announcement and attachment data structures.
//!
//! These types flow through one item's lifecycle: a list parser produces
//! [`Announcement`]s, a detail parser turns a fetched page into
//! [`DetailContent`], and the downloader reports one [`DownloadResult`]
//! per [`AttachmentRef`].

use serde::{Deserialize, Serialize};

/// Placeholder body text used when a detail page has no recognizable
/// content region. Some boards publish the real content only inside
/// attachments, so a missing body is a valid outcome, not an error.
pub const MISSING_BODY_PLACEHOLDER: &str = "본문 내용을 추출할 수 없습니다. 첨부파일을 확인해주세요.";

/// Reference to an announcement's detail page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetailRef {
    /// Plain URL, absolute.
    Url(String),
    /// A client-side call that reveals the detail content after the given
    /// page has been rendered. Requires a rendering-capable adapter.
    Call {
        /// Page to load before invoking the call.
        url: String,
        /// Named client-side function.
        name: String,
        /// Positional arguments, already stringified.
        args: Vec<String>,
    },
}

/// One row of a listing page.
///
/// Immutable after creation; the pipeline only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announcement {
    /// Announcement title as shown on the listing page
    pub title: String,

    /// How to reach the detail page
    pub detail_ref: DetailRef,

    /// Published date, verbatim from the listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Board-assigned sequence number, when one is recoverable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,

    /// Extra listing columns (writer, status, period, ...), in page order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(String, String)>,
}

impl Announcement {
    /// Create an announcement pointing at a plain detail URL.
    pub fn new(title: impl Into<String>, detail_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detail_ref: DetailRef::Url(detail_url.into()),
            date: None,
            sequence: None,
            extra: Vec::new(),
        }
    }

    /// The detail URL, when the reference is a plain URL.
    pub fn detail_url(&self) -> Option<&str> {
        match &self.detail_ref {
            DetailRef::Url(url) => Some(url),
            DetailRef::Call { .. } => None,
        }
    }
}

/// Where an attachment's bytes live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteLocator {
    /// Directly fetchable URL.
    Direct(String),
    /// Opaque key that a site-supplied resolver turns into a URL via a
    /// secondary listing call before the download can start.
    Lookup { key: String },
}

/// An attachment as described on a detail page, before download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Display name from the link text
    pub name: String,

    /// Download location, possibly requiring resolution
    pub locator: RemoteLocator,

    /// Size advertised by the page, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hint: Option<u64>,
}

impl AttachmentRef {
    /// Create an attachment with a directly fetchable URL.
    pub fn direct(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: RemoteLocator::Direct(url.into()),
            size_hint: None,
        }
    }
}

/// Parsed content of one detail page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailContent {
    /// Title as shown on the detail page, when it differs from the listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Body markup; never empty, see [`MISSING_BODY_PLACEHOLDER`]
    pub body: String,

    /// Attachments in page order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

impl DetailContent {
    /// Content standing in for a page whose body region could not be found.
    pub fn missing_body() -> Self {
        Self {
            title: None,
            body: MISSING_BODY_PLACEHOLDER.to_string(),
            attachments: Vec::new(),
        }
    }
}

/// Why an attachment download failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFailure {
    /// Server answered with an HTML page where a file was expected
    WrongContentType,
    /// Download completed but produced zero bytes
    EmptyFile,
    /// Non-success HTTP status
    HttpStatus(u16),
    /// Transport-level failure (timeout, connection, stream abort)
    Network,
    /// A lookup locator could not be resolved to a URL
    Resolution,
}

/// Outcome of one attachment download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadResult {
    /// Final on-disk file name. For failures, the name that would have
    /// been used.
    pub file_name: String,

    /// Bytes written
    pub bytes: u64,

    /// Failure kind, absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<DownloadFailure>,
}

impl DownloadResult {
    /// A successful download.
    pub fn saved(file_name: impl Into<String>, bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            failure: None,
        }
    }

    /// A failed download.
    pub fn failed(file_name: impl Into<String>, failure: DownloadFailure) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: 0,
            failure: Some(failure),
        }
    }

    /// Whether the file was written to disk.
    pub fn is_saved(&self) -> bool {
        self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_url_only_for_plain_refs() {
        let plain = Announcement::new("공고", "https://example.com/view?seq=1");
        assert_eq!(plain.detail_url(), Some("https://example.com/view?seq=1"));

        let call = Announcement {
            detail_ref: DetailRef::Call {
                url: "https://example.com/list".to_string(),
                name: "fn_view".to_string(),
                args: vec!["1234".to_string()],
            },
            ..plain
        };
        assert_eq!(call.detail_url(), None);
    }

    #[test]
    fn missing_body_is_never_empty() {
        let content = DetailContent::missing_body();
        assert!(!content.body.trim().is_empty());
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn download_result_outcomes() {
        assert!(DownloadResult::saved("a.pdf", 10).is_saved());
        assert!(!DownloadResult::failed("a.pdf", DownloadFailure::EmptyFile).is_saved());
    }
}
