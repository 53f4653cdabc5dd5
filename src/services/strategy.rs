// src/services/strategy.rs

//! Parsing strategy contract and the generic selector-driven strategy.
//!
//! A site is driven either by a declarative profile (selectors +
//! pagination) through [`SelectorStrategy`], or by hand-written code
//! implementing [`ParsingStrategy`] directly. The choice is made once,
//! when the [`SiteAdapter`] is constructed, never per call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    Announcement, AttachmentRef, DetailContent, DetailRef, RemoteLocator, SiteProfile,
};
use crate::services::fetch::PageFetcher;
use crate::services::rendered::{PostRenderAction, RenderedFetcher, WaitUntil};
use crate::utils::{extract_sequence, resolve_url};

/// The parser found no recognizable structure on the page. This is an
/// abstention, not an error: the page is treated as carrying no items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAbstention {
    pub reason: String,
}

impl ParseAbstention {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseAbstention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Site-specific parsing capability.
pub trait ParsingStrategy: Send + Sync {
    /// Parse a listing page into announcements, in page order.
    fn parse_listing(&self, html: &str) -> std::result::Result<Vec<Announcement>, ParseAbstention>;

    /// Parse a detail page. Total: a page without a recognizable body
    /// region yields placeholder content, never an error.
    fn parse_detail(&self, html: &str, announcement: &Announcement) -> DetailContent;
}

/// Resolves a two-phase attachment locator to its final download URL via
/// a site-specific secondary call.
#[async_trait]
pub trait LocatorResolver: Send + Sync {
    async fn resolve(&self, key: &str) -> Result<String>;
}

/// Generic strategy built from a fully declarative site profile.
pub struct SelectorStrategy {
    base_url: Url,
    list_url: String,
    list: crate::models::ListSelectors,
    detail: crate::models::DetailSelectors,
}

impl SelectorStrategy {
    /// Build the strategy, validating every configured selector up front.
    pub fn new(profile: &SiteProfile) -> Result<Self> {
        let (Some(list), Some(detail)) = (profile.selectors.clone(), profile.detail.clone()) else {
            return Err(AppError::config(format!(
                "site {} is not fully declarative",
                profile.code
            )));
        };

        for selector in [
            Some(&list.table),
            Some(&list.rows),
            Some(&list.title_link),
            list.date.as_ref(),
            list.writer.as_ref(),
            list.status.as_ref(),
            list.period.as_ref(),
            Some(&detail.body),
            Some(&detail.attachment_links),
        ]
        .into_iter()
        .flatten()
        {
            parse_selector(selector)?;
        }

        Ok(Self {
            base_url: Url::parse(&profile.base_url)?,
            list_url: profile.list_url.clone(),
            list,
            detail,
        })
    }

    fn row_announcement(&self, row: &ElementRef<'_>) -> Option<Announcement> {
        let title_sel = parse_selector(&self.list.title_link).ok()?;
        let link_elem = row.select(&title_sel).next()?;

        let title = collapse_text(&link_elem.text().collect::<String>());
        if title.is_empty() {
            return None;
        }

        let href = link_elem.value().attr(self.list.link_attr.as_str())?;
        let detail_ref = self.detail_ref_for(href)?;
        let sequence = match &detail_ref {
            DetailRef::Url(url) => extract_sequence(url),
            DetailRef::Call { args, .. } => args.first().cloned(),
        };

        let mut announcement = Announcement {
            title,
            detail_ref,
            date: None,
            sequence,
            extra: Vec::new(),
        };

        if let Some(date_sel) = &self.list.date {
            announcement.date = select_text(row, date_sel);
        }
        for (label, selector) in [
            ("writer", &self.list.writer),
            ("status", &self.list.status),
            ("period", &self.list.period),
        ] {
            if let Some(selector) = selector {
                if let Some(value) = select_text(row, selector) {
                    announcement.extra.push((label.to_string(), value));
                }
            }
        }

        Some(announcement)
    }

    fn detail_ref_for(&self, href: &str) -> Option<DetailRef> {
        let href = href.trim();
        if href.is_empty() || href == "#" {
            return None;
        }
        if let Some(call) = parse_script_call(href) {
            let (name, args) = call;
            return Some(DetailRef::Call {
                url: self.list_url.clone(),
                name,
                args,
            });
        }
        Some(DetailRef::Url(resolve_url(&self.base_url, href)))
    }

    fn attachment_for(&self, link: &ElementRef<'_>) -> Option<AttachmentRef> {
        let href = link.value().attr("href")?.trim();
        if href.is_empty() || href == "#" {
            return None;
        }

        let name = collapse_text(&link.text().collect::<String>());
        let locator = match parse_script_call(href) {
            Some((_, args)) if !args.is_empty() => RemoteLocator::Lookup {
                key: args.join(","),
            },
            Some(_) => return None,
            None => RemoteLocator::Direct(resolve_url(&self.base_url, href)),
        };

        Some(AttachmentRef {
            name,
            locator,
            size_hint: None,
        })
    }
}

impl ParsingStrategy for SelectorStrategy {
    fn parse_listing(&self, html: &str) -> std::result::Result<Vec<Announcement>, ParseAbstention> {
        let document = Html::parse_document(html);

        let table_sel = parse_selector(&self.list.table)
            .map_err(|e| ParseAbstention::new(e.to_string()))?;
        let Some(table) = document.select(&table_sel).next() else {
            return Err(ParseAbstention::new(format!(
                "no listing table matched '{}'",
                self.list.table
            )));
        };

        let rows_sel =
            parse_selector(&self.list.rows).map_err(|e| ParseAbstention::new(e.to_string()))?;

        Ok(table
            .select(&rows_sel)
            .filter_map(|row| self.row_announcement(&row))
            .collect())
    }

    fn parse_detail(&self, html: &str, _announcement: &Announcement) -> DetailContent {
        let document = Html::parse_document(html);

        let body = parse_selector(&self.detail.body)
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(|elem| elem.inner_html())
            .filter(|markup| !markup.trim().is_empty());

        let attachments = parse_selector(&self.detail.attachment_links)
            .map(|sel| {
                document
                    .select(&sel)
                    .filter_map(|link| self.attachment_for(&link))
                    .collect()
            })
            .unwrap_or_default();

        match body {
            Some(body) => DetailContent {
                title: None,
                body,
                attachments,
            },
            None => DetailContent {
                attachments,
                ..DetailContent::missing_body()
            },
        }
    }
}

/// One site, ready to crawl: transport, parsing strategy, and optional
/// rendering and attachment-resolution capabilities bound together.
pub struct SiteAdapter {
    profile: SiteProfile,
    fetcher: Arc<dyn PageFetcher>,
    strategy: Box<dyn ParsingStrategy>,
    resolver: Option<Arc<dyn LocatorResolver>>,
    renderer: Option<Arc<dyn RenderedFetcher>>,
    render_wait: WaitUntil,
}

impl SiteAdapter {
    /// Build an adapter from a fully declarative profile.
    pub fn from_profile(profile: SiteProfile, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        let strategy = SelectorStrategy::new(&profile)?;
        Ok(Self::with_strategy(profile, fetcher, Box::new(strategy)))
    }

    /// Build an adapter around a hand-written strategy.
    pub fn with_strategy(
        profile: SiteProfile,
        fetcher: Arc<dyn PageFetcher>,
        strategy: Box<dyn ParsingStrategy>,
    ) -> Self {
        Self {
            profile,
            fetcher,
            strategy,
            resolver: None,
            renderer: None,
            render_wait: WaitUntil::DelayMs(500),
        }
    }

    /// Attach a resolver for two-phase attachment locators.
    pub fn with_resolver(mut self, resolver: Arc<dyn LocatorResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Attach a rendering backend for scripted detail references.
    pub fn with_renderer(mut self, renderer: Arc<dyn RenderedFetcher>, wait: WaitUntil) -> Self {
        self.renderer = Some(renderer);
        self.render_wait = wait;
        self
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    pub fn strategy(&self) -> &dyn ParsingStrategy {
        self.strategy.as_ref()
    }

    pub fn locator_resolver(&self) -> Option<&dyn LocatorResolver> {
        self.resolver.as_deref()
    }

    /// Fetch one listing page's markup.
    pub async fn fetch_listing(&self, page: u32) -> Result<String> {
        let url = self.profile.list_url_for_page(page);
        let fetched = self.fetcher.get(&url).await?;
        if !fetched.is_success() {
            return Err(AppError::fetch(url, format!("HTTP {}", fetched.status)));
        }
        Ok(fetched.text)
    }

    /// Fetch one announcement's detail markup.
    pub async fn fetch_detail(&self, announcement: &Announcement) -> Result<String> {
        match &announcement.detail_ref {
            DetailRef::Url(url) => {
                let fetched = self.fetcher.get(url).await?;
                if !fetched.is_success() {
                    return Err(AppError::fetch(url, format!("HTTP {}", fetched.status)));
                }
                Ok(fetched.text)
            }
            DetailRef::Call { url, name, args } => {
                let renderer = self.renderer.as_ref().ok_or_else(|| {
                    AppError::render(format!(
                        "site {} uses scripted detail refs but has no rendering backend",
                        self.profile.code
                    ))
                })?;
                let step = PostRenderAction {
                    action: name.clone(),
                    args: args.clone(),
                    wait: self.render_wait.clone(),
                };
                renderer.fetch_rendered(url, Some(&step)).await
            }
        }
    }
}

/// Parse `javascript:fn_name('a','b')` style links into a call name and
/// stringified arguments.
fn parse_script_call(href: &str) -> Option<(String, Vec<String>)> {
    let body = href.strip_prefix("javascript:")?.trim();
    let open = body.find('(')?;
    let close = body.rfind(')')?;
    if close <= open {
        return None;
    }

    let name = body[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return None;
    }
    if name == "void" {
        return None;
    }

    let args = body[open + 1..close]
        .split(',')
        .map(|arg| arg.trim().trim_matches(['\'', '"']).to_string())
        .filter(|arg| !arg.is_empty())
        .collect();

    Some((name.to_string(), args))
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))
}

fn select_text(row: &ElementRef<'_>, selector: &str) -> Option<String> {
    let sel = parse_selector(selector).ok()?;
    let elem = row.select(&sel).next()?;
    let text = collapse_text(&elem.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn collapse_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetailSelectors, ListSelectors, Pagination};

    fn sample_profile() -> SiteProfile {
        SiteProfile {
            code: "btp".to_string(),
            name: "부산테크노파크".to_string(),
            base_url: "https://www.btp.or.kr".to_string(),
            list_url: "https://www.btp.or.kr/board/list.do".to_string(),
            encoding: "auto".to_string(),
            verify_tls: true,
            pagination: Pagination::default(),
            selectors: Some(ListSelectors {
                table: "table.board".to_string(),
                rows: "tbody tr".to_string(),
                title_link: "td.title a[href]".to_string(),
                link_attr: "href".to_string(),
                date: Some("td.date".to_string()),
                writer: Some("td.writer".to_string()),
                status: None,
                period: None,
            }),
            detail: Some(DetailSelectors {
                body: "div.view-content".to_string(),
                attachment_links: "div.files a[href]".to_string(),
            }),
        }
    }

    const LISTING: &str = r##"
        <html><body>
        <table class="board"><tbody>
            <tr>
                <td class="num">102</td>
                <td class="title"><a href="/board/view.do?seq=102">2026년 창업지원  사업 공고</a></td>
                <td class="writer">운영팀</td>
                <td class="date">2026-08-01</td>
            </tr>
            <tr>
                <td class="num">101</td>
                <td class="title"><a href="javascript:fn_view('101')">수출바우처 모집</a></td>
                <td class="writer">지원팀</td>
                <td class="date">2026-07-28</td>
            </tr>
            <tr><td class="num">-</td><td class="title"><a href="#">  </a></td></tr>
        </tbody></table>
        </body></html>
    "##;

    const DETAIL: &str = r##"
        <html><body>
        <div class="view-content"><p>신청 기간: 2026-08-01 ~ 2026-08-31</p></div>
        <div class="files">
            <a href="/files/download.do?fileId=55">공고문.hwp</a>
            <a href="javascript:fn_down('ATCH001','1')">신청서식.zip</a>
            <a href="#">목록</a>
        </div>
        </body></html>
    "##;

    #[test]
    fn listing_rows_become_announcements() {
        let strategy = SelectorStrategy::new(&sample_profile()).unwrap();
        let announcements = strategy.parse_listing(LISTING).unwrap();

        assert_eq!(announcements.len(), 2);

        let first = &announcements[0];
        assert_eq!(first.title, "2026년 창업지원 사업 공고");
        assert_eq!(
            first.detail_ref,
            DetailRef::Url("https://www.btp.or.kr/board/view.do?seq=102".to_string())
        );
        assert_eq!(first.sequence.as_deref(), Some("102"));
        assert_eq!(first.date.as_deref(), Some("2026-08-01"));
        assert_eq!(first.extra, vec![("writer".to_string(), "운영팀".to_string())]);

        let second = &announcements[1];
        assert_eq!(
            second.detail_ref,
            DetailRef::Call {
                url: "https://www.btp.or.kr/board/list.do".to_string(),
                name: "fn_view".to_string(),
                args: vec!["101".to_string()],
            }
        );
    }

    #[test]
    fn missing_table_is_an_abstention() {
        let strategy = SelectorStrategy::new(&sample_profile()).unwrap();
        let result = strategy.parse_listing("<html><body><p>점검 중</p></body></html>");
        assert!(result.is_err());
    }

    #[test]
    fn detail_page_parses_body_and_attachments() {
        let strategy = SelectorStrategy::new(&sample_profile()).unwrap();
        let announcement = Announcement::new("t", "https://www.btp.or.kr/board/view.do?seq=102");
        let detail = strategy.parse_detail(DETAIL, &announcement);

        assert!(detail.body.contains("신청 기간"));
        assert_eq!(detail.attachments.len(), 2);
        assert_eq!(detail.attachments[0].name, "공고문.hwp");
        assert_eq!(
            detail.attachments[0].locator,
            RemoteLocator::Direct("https://www.btp.or.kr/files/download.do?fileId=55".to_string())
        );
        assert_eq!(
            detail.attachments[1].locator,
            RemoteLocator::Lookup {
                key: "ATCH001,1".to_string()
            }
        );
    }

    #[test]
    fn missing_body_yields_placeholder_not_error() {
        let strategy = SelectorStrategy::new(&sample_profile()).unwrap();
        let announcement = Announcement::new("t", "https://www.btp.or.kr/view?seq=1");
        let detail = strategy.parse_detail("<html><body><p>no region</p></body></html>", &announcement);
        assert_eq!(detail.body, crate::models::MISSING_BODY_PLACEHOLDER);
    }

    #[test]
    fn construction_rejects_partial_profiles() {
        let mut profile = sample_profile();
        profile.detail = None;
        assert!(SelectorStrategy::new(&profile).is_err());
    }

    #[test]
    fn construction_rejects_bad_selectors() {
        let mut profile = sample_profile();
        profile.selectors.as_mut().unwrap().rows = "[[invalid".to_string();
        assert!(SelectorStrategy::new(&profile).is_err());
    }

    #[test]
    fn script_call_parsing() {
        assert_eq!(
            parse_script_call("javascript:fn_egov_downFile('FILE_01','0')"),
            Some((
                "fn_egov_downFile".to_string(),
                vec!["FILE_01".to_string(), "0".to_string()]
            ))
        );
        assert_eq!(parse_script_call("javascript:void(0)"), None);
        assert_eq!(parse_script_call("/plain/path"), None);
    }
}
