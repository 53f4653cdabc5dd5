// src/pipeline/scrape.rs

//! Scrape pipeline: walks listing pages for one site, drains new items in
//! order, and stops on saturation.
//!
//! Failure containment is the core policy here. A broken page or item is
//! logged and skipped; the run only aborts for construction-time
//! configuration problems. Newly published items appear at the head of
//! each listing, so a run of consecutive already-seen titles means the
//! crawl has reached previously processed content.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{error, info, warn};

use crate::error::Result;
use crate::models::{Announcement, EngineConfig};
use crate::services::download::AttachmentDownloader;
use crate::services::strategy::SiteAdapter;
use crate::storage::{OutputSink, ProcessedTitleStore};

/// Cooperative cancellation flag, honored between items and pages so a
/// cancel never interrupts an attachment mid-stream.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Walked every configured page
    MaxPages,
    /// Hit the consecutive-duplicate threshold
    DuplicateThreshold,
    /// A listing page carried no items
    EmptyPage,
    /// Cancelled from outside
    Cancelled,
}

/// Result of one site run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Items fetched, persisted, and marked processed
    pub processed: usize,
    /// Pages or items that failed and were skipped
    pub errors: usize,
    /// Listing pages actually requested
    pub pages_visited: u32,
    pub stopped: StopReason,
}

/// Immutable per-run parameters. Built once from the engine configuration
/// and passed through the whole run; nothing in the pipeline mutates
/// adapter-level state between calls.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub engine: EngineConfig,
    pub max_pages: u32,
    pub duplicate_threshold: usize,
    pub request_delay: Duration,
    pub page_delay: Duration,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(engine: &EngineConfig) -> Self {
        Self {
            engine: engine.clone(),
            max_pages: engine.max_pages,
            duplicate_threshold: engine.duplicate_threshold,
            request_delay: Duration::from_millis(engine.request_delay_ms),
            page_delay: Duration::from_millis(engine.page_delay_ms),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Run one site to completion.
///
/// Pages are walked in order; within a page, surviving items are processed
/// strictly in order, and an item is only marked processed after its
/// content and attachments are durably persisted.
pub async fn run_site(
    ctx: &RunContext,
    adapter: &SiteAdapter,
    store: &mut ProcessedTitleStore,
    sink: &dyn OutputSink,
) -> Result<RunSummary> {
    let site = adapter.profile();
    info!("{} ({}): crawling up to {} pages", site.name, site.code, ctx.max_pages);

    store.load().await?;
    let downloader = AttachmentDownloader::new(&ctx.engine, site)?;

    let mut summary = RunSummary {
        processed: 0,
        errors: 0,
        pages_visited: 0,
        stopped: StopReason::MaxPages,
    };
    // Carried across page boundaries; any new item resets it.
    let mut consecutive_duplicates = 0usize;
    let mut item_seq = 0usize;

    'pages: for page in 1..=ctx.max_pages {
        if ctx.cancel.is_cancelled() {
            summary.stopped = StopReason::Cancelled;
            break;
        }

        summary.pages_visited = page;

        let html = match adapter.fetch_listing(page).await {
            Ok(html) => html,
            Err(e) => {
                warn!("{}: page {} fetch failed, skipping: {}", site.code, page, e);
                summary.errors += 1;
                continue;
            }
        };

        let announcements = match adapter.strategy().parse_listing(&html) {
            Ok(announcements) => announcements,
            Err(abstention) => {
                info!("{}: page {} yielded no structure: {}", site.code, page, abstention);
                continue;
            }
        };

        if announcements.is_empty() {
            info!("{}: page {} is empty, stopping", site.code, page);
            summary.stopped = StopReason::EmptyPage;
            break;
        }
        info!("{}: page {} carries {} items", site.code, page, announcements.len());

        for announcement in &announcements {
            if ctx.cancel.is_cancelled() {
                summary.stopped = StopReason::Cancelled;
                break 'pages;
            }

            if store.is_processed(&announcement.title) {
                consecutive_duplicates += 1;
                if consecutive_duplicates >= ctx.duplicate_threshold {
                    info!(
                        "{}: {} consecutive known items, stopping",
                        site.code, consecutive_duplicates
                    );
                    summary.stopped = StopReason::DuplicateThreshold;
                    break 'pages;
                }
                continue;
            }
            consecutive_duplicates = 0;

            item_seq += 1;
            match process_item(adapter, &downloader, store, sink, item_seq, announcement).await {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    error!("{}: item '{}' failed: {}", site.code, announcement.title, e);
                    summary.errors += 1;
                }
            }

            if !ctx.request_delay.is_zero() {
                tokio::time::sleep(ctx.request_delay).await;
            }
        }

        if page < ctx.max_pages && !ctx.page_delay.is_zero() {
            tokio::time::sleep(ctx.page_delay).await;
        }
    }

    store.flush().await?;
    info!(
        "{}: done, {} processed, {} errors ({:?})",
        site.code, summary.processed, summary.errors, summary.stopped
    );
    Ok(summary)
}

/// Fetch, parse, download and persist, then mark processed, in that
/// order, so a crash can never mark an item done without its output
/// existing.
async fn process_item(
    adapter: &SiteAdapter,
    downloader: &AttachmentDownloader,
    store: &mut ProcessedTitleStore,
    sink: &dyn OutputSink,
    seq: usize,
    announcement: &Announcement,
) -> Result<()> {
    info!("Processing {}: {}", seq, announcement.title);

    let html = adapter.fetch_detail(announcement).await?;
    let detail = adapter.strategy().parse_detail(&html, announcement);

    let attachment_dir = sink.prepare(seq, announcement).await?;
    let mut downloads = Vec::with_capacity(detail.attachments.len());
    for (index, attachment) in detail.attachments.iter().enumerate() {
        let result = downloader
            .download(attachment, &attachment_dir, index + 1, adapter.locator_resolver())
            .await;
        downloads.push(result);
    }

    sink.persist(seq, announcement, &detail, &downloads).await?;

    store.mark_processed(&announcement.title);
    store.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::error::AppError;
    use crate::models::{DetailContent, Pagination, SiteProfile};
    use crate::services::fetch::{FetchedPage, PageFetcher};
    use crate::services::strategy::{ParseAbstention, ParsingStrategy};

    /// Serves canned listing pages and counts detail fetches.
    struct FakeFetcher {
        pages: HashMap<String, String>,
        detail_fetches: AtomicUsize,
    }

    impl FakeFetcher {
        fn new(pages: Vec<(&str, &str)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                detail_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn get(&self, url: &str) -> Result<FetchedPage> {
            if url.contains("/detail/") {
                self.detail_fetches.fetch_add(1, Ordering::SeqCst);
                return Ok(FetchedPage {
                    status: 200,
                    text: "detail body".to_string(),
                    final_url: url.to_string(),
                });
            }
            match self.pages.get(url) {
                Some(text) => Ok(FetchedPage {
                    status: 200,
                    text: text.clone(),
                    final_url: url.to_string(),
                }),
                None => Err(AppError::fetch(url, "connection refused")),
            }
        }

        async fn post(&self, url: &str, _form: &[(String, String)]) -> Result<FetchedPage> {
            Err(AppError::fetch(url, "unsupported"))
        }
    }

    /// Parses the fake listing format: one `item:<title>` per line.
    struct LineStrategy;

    impl ParsingStrategy for LineStrategy {
        fn parse_listing(
            &self,
            html: &str,
        ) -> std::result::Result<Vec<Announcement>, ParseAbstention> {
            if html.contains("no-table") {
                return Err(ParseAbstention::new("no listing table"));
            }
            Ok(html
                .lines()
                .filter_map(|line| line.trim().strip_prefix("item:"))
                .map(|title| {
                    Announcement::new(title, format!("https://example.com/detail/{title}"))
                })
                .collect())
        }

        fn parse_detail(&self, html: &str, _announcement: &Announcement) -> DetailContent {
            DetailContent {
                title: None,
                body: html.to_string(),
                attachments: Vec::new(),
            }
        }
    }

    /// Records persisted titles.
    #[derive(Default)]
    struct CollectingSink {
        dir: PathBuf,
        persisted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutputSink for CollectingSink {
        async fn prepare(&self, _seq: usize, _announcement: &Announcement) -> Result<PathBuf> {
            Ok(self.dir.clone())
        }

        async fn persist(
            &self,
            _seq: usize,
            announcement: &Announcement,
            _detail: &DetailContent,
            _downloads: &[crate::models::DownloadResult],
        ) -> Result<()> {
            self.persisted
                .lock()
                .unwrap()
                .push(announcement.title.clone());
            Ok(())
        }
    }

    fn fast_context() -> RunContext {
        let mut engine = EngineConfig::default();
        engine.request_delay_ms = 0;
        engine.page_delay_ms = 0;
        RunContext::new(&engine)
    }

    fn profile() -> SiteProfile {
        SiteProfile {
            code: "test".to_string(),
            name: "테스트".to_string(),
            base_url: "https://example.com".to_string(),
            list_url: "https://example.com/list".to_string(),
            encoding: "auto".to_string(),
            verify_tls: true,
            pagination: Pagination::default(),
            selectors: None,
            detail: None,
        }
    }

    fn adapter_with(fetcher: Arc<FakeFetcher>) -> SiteAdapter {
        SiteAdapter::with_strategy(profile(), fetcher, Box::new(LineStrategy))
    }

    async fn run(
        ctx: &RunContext,
        adapter: &SiteAdapter,
        store: &mut ProcessedTitleStore,
        tmp: &TempDir,
    ) -> (RunSummary, Vec<String>) {
        let sink = CollectingSink {
            dir: tmp.path().to_path_buf(),
            persisted: Mutex::new(Vec::new()),
        };
        let summary = run_site(ctx, adapter, store, &sink).await.unwrap();
        let persisted = sink.persisted.lock().unwrap().clone();
        (summary, persisted)
    }

    #[tokio::test]
    async fn fresh_page_processes_every_item() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(vec![(
            "https://example.com/list",
            "item:공고 하나\nitem:공고 둘\nitem:공고 셋",
        )]));
        let adapter = adapter_with(Arc::clone(&fetcher));
        let ctx = fast_context().with_max_pages(1);
        let mut store = ProcessedTitleStore::new(tmp.path(), "test");

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.stopped, StopReason::MaxPages);
        assert_eq!(persisted, vec!["공고 하나", "공고 둘", "공고 셋"]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_threshold_stops_before_trailing_new_item() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(vec![(
            "https://example.com/list",
            "item:신규 공고\nitem:아는 공고 1\nitem:아는 공고 2\nitem:아는 공고 3\nitem:늦은 신규",
        )]));
        let adapter = adapter_with(Arc::clone(&fetcher));
        let ctx = fast_context().with_max_pages(1);

        let mut store = ProcessedTitleStore::new(tmp.path(), "test");
        store.mark_processed("아는 공고 1");
        store.mark_processed("아는 공고 2");
        store.mark_processed("아는 공고 3");
        store.flush().await.unwrap();
        let known_before = store.len();

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        assert_eq!(summary.stopped, StopReason::DuplicateThreshold);
        assert_eq!(persisted, vec!["신규 공고"]);
        // The trailing new item was never reached.
        assert_eq!(fetcher.detail_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), known_before + 1);
    }

    #[tokio::test]
    async fn all_seen_page_stops_after_exactly_threshold_items() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(vec![(
            "https://example.com/list",
            "item:아는 1\nitem:아는 2\nitem:아는 3\nitem:아는 4\nitem:아는 5",
        )]));
        let adapter = adapter_with(Arc::clone(&fetcher));
        let ctx = fast_context().with_max_pages(1);

        let mut store = ProcessedTitleStore::new(tmp.path(), "test");
        for n in 1..=5 {
            store.mark_processed(&format!("아는 {n}"));
        }
        store.flush().await.unwrap();

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        assert_eq!(summary.stopped, StopReason::DuplicateThreshold);
        assert!(persisted.is_empty());
        assert_eq!(fetcher.detail_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_page_terminates_the_run() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(vec![
            ("https://example.com/list", "item:첫 공고"),
            ("https://example.com/list?page=2", "nothing here"),
            ("https://example.com/list?page=3", "item:세번째 페이지"),
        ]));
        let adapter = adapter_with(Arc::clone(&fetcher));
        let ctx = fast_context().with_max_pages(3);
        let mut store = ProcessedTitleStore::new(tmp.path(), "test");

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        assert_eq!(summary.stopped, StopReason::EmptyPage);
        assert_eq!(summary.pages_visited, 2);
        assert_eq!(persisted, vec!["첫 공고"]);
    }

    #[tokio::test]
    async fn failed_page_is_skipped_and_run_continues() {
        let tmp = TempDir::new().unwrap();
        // Page 2 is missing from the fake server entirely.
        let fetcher = Arc::new(FakeFetcher::new(vec![
            ("https://example.com/list", "item:하나"),
            ("https://example.com/list?page=3", "item:셋"),
        ]));
        let adapter = adapter_with(Arc::clone(&fetcher));
        let ctx = fast_context().with_max_pages(3);
        let mut store = ProcessedTitleStore::new(tmp.path(), "test");

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        assert_eq!(summary.errors, 1);
        assert_eq!(persisted, vec!["하나", "셋"]);
        assert_eq!(summary.stopped, StopReason::MaxPages);
    }

    #[tokio::test]
    async fn abstention_skips_page_without_terminating() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(vec![
            ("https://example.com/list", "no-table maintenance"),
            ("https://example.com/list?page=2", "item:둘째 페이지"),
        ]));
        let adapter = adapter_with(Arc::clone(&fetcher));
        let ctx = fast_context().with_max_pages(2);
        let mut store = ProcessedTitleStore::new(tmp.path(), "test");

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        assert_eq!(summary.errors, 0);
        assert_eq!(persisted, vec!["둘째 페이지"]);
    }

    #[tokio::test]
    async fn duplicate_counter_carries_across_pages() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(vec![
            ("https://example.com/list", "item:아는 1\nitem:아는 2"),
            ("https://example.com/list?page=2", "item:아는 3\nitem:새 공고"),
        ]));
        let adapter = adapter_with(Arc::clone(&fetcher));
        let ctx = fast_context().with_max_pages(2);

        let mut store = ProcessedTitleStore::new(tmp.path(), "test");
        for n in 1..=3 {
            store.mark_processed(&format!("아는 {n}"));
        }
        store.flush().await.unwrap();

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        // Two known items on page 1 plus one on page 2 reach the threshold.
        assert_eq!(summary.stopped, StopReason::DuplicateThreshold);
        assert!(persisted.is_empty());
    }

    #[tokio::test]
    async fn cancellation_takes_effect_between_items() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::new(vec![(
            "https://example.com/list",
            "item:하나\nitem:둘",
        )]));
        let adapter = adapter_with(Arc::clone(&fetcher));

        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = fast_context().with_max_pages(1).with_cancel(cancel);
        let mut store = ProcessedTitleStore::new(tmp.path(), "test");

        let (summary, persisted) = run(&ctx, &adapter, &mut store, &tmp).await;

        assert_eq!(summary.stopped, StopReason::Cancelled);
        assert!(persisted.is_empty());
    }
}
