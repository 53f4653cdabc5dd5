//! Declarative per-site profiles.
//!
//! A fully specified profile (selectors + pagination) is enough to drive
//! the generic selector strategy; partially specified profiles still carry
//! the base URLs and transport settings for a hand-written strategy.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Registry of site profiles, loaded from a single TOML file with one
/// `[sites.<code>]` table per site.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiteRegistry {
    #[serde(default)]
    pub sites: BTreeMap<String, SiteProfile>,
}

impl SiteRegistry {
    /// Load the registry from a TOML file and fill in each profile's code
    /// from its table key.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            AppError::config(format!(
                "Site registry not found at {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        let mut registry: Self = toml::from_str(&content)?;
        for (code, profile) in registry.sites.iter_mut() {
            profile.code = code.clone();
        }
        Ok(registry)
    }

    /// Look up a profile by site code.
    pub fn get(&self, code: &str) -> Option<&SiteProfile> {
        self.sites.get(code)
    }

    /// All registered site codes, sorted.
    pub fn codes(&self) -> Vec<&str> {
        self.sites.keys().map(String::as_str).collect()
    }

    /// Validate every profile.
    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() {
            return Err(AppError::validation("No sites defined"));
        }
        for profile in self.sites.values() {
            profile.validate()?;
        }
        Ok(())
    }
}

/// Everything the engine knows about one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Site code, filled from the registry key
    #[serde(default)]
    pub code: String,

    /// Human-readable site name
    pub name: String,

    /// Base URL for resolving relative links and as download referer
    pub base_url: String,

    /// First listing page URL
    pub list_url: String,

    /// Page encoding label ("auto" to sniff; otherwise a WHATWG label
    /// such as "euc-kr")
    #[serde(default = "defaults::encoding")]
    pub encoding: String,

    /// Per-site TLS verification override
    #[serde(default = "defaults::verify_tls")]
    pub verify_tls: bool,

    /// How listing pages beyond the first are addressed
    #[serde(default)]
    pub pagination: Pagination,

    /// Listing page selectors; absent for code-driven sites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<ListSelectors>,

    /// Detail page selectors; absent for code-driven sites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<DetailSelectors>,
}

impl SiteProfile {
    /// Whether the profile carries everything the generic selector
    /// strategy needs. Partially specified profiles require a
    /// hand-written strategy.
    pub fn is_fully_declarative(&self) -> bool {
        self.selectors.is_some() && self.detail.is_some()
    }

    /// Listing URL for the given 1-based page number.
    pub fn list_url_for_page(&self, page: u32) -> String {
        self.pagination.page_url(&self.list_url, page)
    }

    /// Validate required fields.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation(format!("{}: name is empty", self.code)));
        }
        if self.base_url.trim().is_empty() {
            return Err(AppError::validation(format!(
                "{}: base_url is empty",
                self.code
            )));
        }
        if self.list_url.trim().is_empty() {
            return Err(AppError::validation(format!(
                "{}: list_url is empty",
                self.code
            )));
        }
        Ok(())
    }
}

/// Pagination scheme of a listing board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub mode: PaginationMode,

    /// Query parameter carrying the page number
    #[serde(default = "defaults::page_param")]
    pub param: String,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            mode: PaginationMode::default(),
            param: defaults::page_param(),
        }
    }
}

impl Pagination {
    /// Build the URL for a 1-based page number. Page 1 is always the
    /// plain listing URL.
    pub fn page_url(&self, list_url: &str, page: u32) -> String {
        match self.mode {
            PaginationMode::QueryParam if page > 1 => {
                let separator = if list_url.contains('?') { '&' } else { '?' };
                format!("{list_url}{separator}{}={page}", self.param)
            }
            _ => list_url.to_string(),
        }
    }
}

/// How subsequent pages are addressed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    /// Append `?<param>=<n>` to the listing URL
    #[default]
    QueryParam,
    /// Single-page board; only the listing URL itself is fetched
    None,
}

/// CSS selectors for parsing a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSelectors {
    /// Selector for the listing table (or list container)
    #[serde(default = "defaults::table")]
    pub table: String,

    /// Selector for each row within the table
    #[serde(default = "defaults::rows")]
    pub rows: String,

    /// Selector for the title link within a row
    #[serde(default = "defaults::title_link")]
    pub title_link: String,

    /// HTML attribute carrying the detail link (usually "href")
    #[serde(default = "defaults::link_attr")]
    pub link_attr: String,

    /// Selector for the date cell within a row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Selector for the writer cell within a row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<String>,

    /// Selector for the status cell within a row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Selector for the application-period cell within a row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

impl Default for ListSelectors {
    fn default() -> Self {
        Self {
            table: defaults::table(),
            rows: defaults::rows(),
            title_link: defaults::title_link(),
            link_attr: defaults::link_attr(),
            date: None,
            writer: None,
            status: None,
            period: None,
        }
    }
}

/// CSS selectors for parsing a detail page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailSelectors {
    /// Selector for the body content region
    pub body: String,

    /// Selector for attachment links
    #[serde(default = "defaults::attachment_links")]
    pub attachment_links: String,
}

mod defaults {
    pub fn encoding() -> String {
        "auto".into()
    }
    pub fn verify_tls() -> bool {
        true
    }
    pub fn page_param() -> String {
        "page".into()
    }
    pub fn table() -> String {
        "table".into()
    }
    pub fn rows() -> String {
        "tbody tr".into()
    }
    pub fn title_link() -> String {
        "td a[href]".into()
    }
    pub fn link_attr() -> String {
        "href".into()
    }
    pub fn attachment_links() -> String {
        "a[href]".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[sites.btp]
name = "부산테크노파크"
base_url = "https://www.btp.or.kr"
list_url = "https://www.btp.or.kr/kor/CMS/Board/Board.do?mCode=MN013"
encoding = "auto"

[sites.btp.selectors]
table = "table.bdListTbl"
rows = "tbody tr"
title_link = "td.tl a[href]"
date = "td:nth-child(5)"

[sites.btp.detail]
body = "div.bbsViewCont"
attachment_links = "div.bbsViewBtn a[href]"

[sites.gsif]
name = "강릉과학산업진흥원"
base_url = "https://www.gsif.or.kr"
list_url = "https://www.gsif.or.kr/board/list.do"
encoding = "euc-kr"
verify_tls = false
"#;

    fn load_sample() -> SiteRegistry {
        let mut registry: SiteRegistry = toml::from_str(SAMPLE).unwrap();
        for (code, profile) in registry.sites.iter_mut() {
            profile.code = code.clone();
        }
        registry
    }

    #[test]
    fn parses_registry_toml() {
        let registry = load_sample();
        assert_eq!(registry.codes(), vec!["btp", "gsif"]);
        assert!(registry.validate().is_ok());

        let btp = registry.get("btp").unwrap();
        assert_eq!(btp.name, "부산테크노파크");
        assert!(btp.verify_tls);

        let gsif = registry.get("gsif").unwrap();
        assert_eq!(gsif.encoding, "euc-kr");
        assert!(!gsif.verify_tls);
    }

    #[test]
    fn declarative_dispatch_needs_both_selector_blocks() {
        let registry = load_sample();
        assert!(registry.get("btp").unwrap().is_fully_declarative());
        assert!(!registry.get("gsif").unwrap().is_fully_declarative());
    }

    #[test]
    fn page_one_is_plain_list_url() {
        let registry = load_sample();
        let btp = registry.get("btp").unwrap();
        assert_eq!(btp.list_url_for_page(1), btp.list_url);
    }

    #[test]
    fn later_pages_append_query_param() {
        let registry = load_sample();
        let btp = registry.get("btp").unwrap();
        assert_eq!(
            btp.list_url_for_page(3),
            format!("{}&page=3", btp.list_url)
        );

        let gsif = registry.get("gsif").unwrap();
        assert_eq!(
            gsif.list_url_for_page(2),
            "https://www.gsif.or.kr/board/list.do?page=2"
        );
    }

    #[test]
    fn validate_rejects_missing_urls() {
        let mut registry = load_sample();
        registry.sites.get_mut("btp").unwrap().list_url = String::new();
        assert!(registry.validate().is_err());
    }
}
