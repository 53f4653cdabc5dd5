// src/services/fetch.rs

//! Page fetch capability.
//!
//! [`PageFetcher`] is the narrow transport the pipeline depends on; the
//! default implementation is a plain HTTP client. Sites that only render
//! their content client-side plug in through the adapter in
//! [`crate::services::rendered`] instead.

use std::time::Duration;

use async_trait::async_trait;
use chardetng::EncodingDetector;
use encoding_rs::Encoding;

use crate::error::{AppError, Result};
use crate::models::{EngineConfig, SiteProfile};

/// A fetched page, decoded to UTF-8.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub text: String,
    /// URL after redirects
    pub final_url: String,
}

impl FetchedPage {
    /// Whether the status code indicates success.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Narrow page-fetch capability consumed by the pipeline.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page with GET.
    async fn get(&self, url: &str) -> Result<FetchedPage>;

    /// Fetch a page with a POST form. Boards backed by server-side APIs
    /// page through results this way.
    async fn post(&self, url: &str, form: &[(String, String)]) -> Result<FetchedPage>;
}

/// Plain HTTP implementation of [`PageFetcher`].
///
/// Decodes response bodies through the site's declared encoding when one
/// is configured, otherwise BOM, Content-Type charset and byte-level
/// detection, in that order. Several target sites serve invalid TLS
/// certificates; verification follows the site profile.
pub struct HttpFetcher {
    client: reqwest::Client,
    declared: Option<&'static Encoding>,
}

impl HttpFetcher {
    /// Build a fetcher for one site.
    pub fn new(config: &EngineConfig, site: &SiteProfile) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!(config.verify_tls && site.verify_tls))
            .build()?;

        Ok(Self {
            client,
            declared: declared_encoding(&site.encoding),
        })
    }

    async fn into_page(&self, response: reqwest::Response) -> Result<FetchedPage> {
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = response.bytes().await?;

        Ok(FetchedPage {
            status,
            text: decode_page(&bytes, content_type.as_deref(), self.declared),
            final_url,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::fetch(url, e))?;
        self.into_page(response).await
    }

    async fn post(&self, url: &str, form: &[(String, String)]) -> Result<FetchedPage> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::fetch(url, e))?;
        self.into_page(response).await
    }
}

/// Map a configured encoding label to an encoding, treating "auto" as
/// unspecified.
pub fn declared_encoding(label: &str) -> Option<&'static Encoding> {
    let label = label.trim();
    if label.is_empty() || label.eq_ignore_ascii_case("auto") {
        return None;
    }
    Encoding::for_label(label.as_bytes())
}

/// Decode a page body to UTF-8: BOM, then Content-Type charset, then the
/// site's declared encoding, then byte-level detection.
pub fn decode_page(
    bytes: &[u8],
    content_type: Option<&str>,
    declared: Option<&'static Encoding>,
) -> String {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding.decode(bytes).0.into_owned();
    }

    if let Some(label) = content_type.and_then(extract_charset) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return encoding.decode(bytes).0.into_owned();
        }
    }

    if let Some(encoding) = declared {
        return encoding.decode(bytes).0.into_owned();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true).decode(bytes).0.into_owned()
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        let prefix = part.get(..8)?;
        if prefix.eq_ignore_ascii_case("charset=") {
            Some(part[8..].trim_matches(['"', '\'', ' ']).to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{EUC_KR, UTF_8};

    #[test]
    fn bom_wins_over_everything() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("공지".as_bytes());
        let text = decode_page(&bytes, Some("text/html; charset=euc-kr"), Some(EUC_KR));
        assert_eq!(text, "공지");
    }

    #[test]
    fn content_type_charset_is_honored() {
        let (bytes, _, _) = EUC_KR.encode("사업 공고");
        let text = decode_page(&bytes, Some("text/html; charset=euc-kr"), None);
        assert_eq!(text, "사업 공고");
    }

    #[test]
    fn declared_encoding_used_when_header_is_silent() {
        let (bytes, _, _) = EUC_KR.encode("지원사업 안내");
        let text = decode_page(&bytes, Some("text/html"), Some(EUC_KR));
        assert_eq!(text, "지원사업 안내");
    }

    #[test]
    fn plain_ascii_survives_detection() {
        let text = decode_page(b"<html><body>notice</body></html>", None, None);
        assert_eq!(text, "<html><body>notice</body></html>");
    }

    #[test]
    fn declared_encoding_labels() {
        assert!(declared_encoding("auto").is_none());
        assert!(declared_encoding("").is_none());
        assert_eq!(declared_encoding("euc-kr"), Some(EUC_KR));
        // windows-949 is an alias of the same decoder in the WHATWG registry
        assert_eq!(declared_encoding("windows-949"), Some(EUC_KR));
        assert_eq!(declared_encoding("utf-8"), Some(UTF_8));
    }

    #[test]
    fn charset_extraction_handles_quotes_and_case() {
        assert_eq!(
            extract_charset("text/html; Charset=\"EUC-KR\""),
            Some("EUC-KR".to_string())
        );
        assert_eq!(extract_charset("text/html"), None);
    }
}
