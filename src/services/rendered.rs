// src/services/rendered.rs

//! Dynamic rendering capability.
//!
//! A handful of boards populate their listing or detail content only after
//! client-side script execution, and some page through results by invoking
//! a named script function rather than navigating. This module defines the
//! narrow contract such sites need: load a URL in a scripted session,
//! optionally invoke one named action, wait, and hand back the rendered
//! markup. Sessions are scoped to a single fetch sequence and never pooled,
//! trading overhead for crash isolation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::services::fetch::{FetchedPage, PageFetcher};

/// Condition to wait for after navigation or an invoked action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    /// Wait until an element matching the selector exists
    Selector(String),
    /// Wait a fixed number of milliseconds
    DelayMs(u64),
}

/// A named client-side action to run after the page has rendered, e.g.
/// switching the board to page N or revealing an inline detail pane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostRenderAction {
    /// Name of the client-side function
    pub action: String,

    /// Positional arguments, already stringified
    #[serde(default)]
    pub args: Vec<String>,

    /// What to wait for once the action has been invoked
    pub wait: WaitUntil,
}

impl PostRenderAction {
    /// Action that waits a fixed delay after invocation.
    pub fn with_delay(action: impl Into<String>, args: Vec<String>, delay_ms: u64) -> Self {
        Self {
            action: action.into(),
            args,
            wait: WaitUntil::DelayMs(delay_ms),
        }
    }
}

/// One live scripted browser session.
#[async_trait]
pub trait RenderSession: Send {
    /// Navigate to a URL and wait for the initial render.
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// Invoke a named client-side function with the given arguments.
    async fn invoke(&mut self, action: &str, args: &[String]) -> Result<()>;

    /// Block until the condition holds.
    async fn wait_for(&mut self, wait: &WaitUntil) -> Result<()>;

    /// Current rendered markup of the page.
    async fn content(&mut self) -> Result<String>;

    /// Tear the session down.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Factory for rendering sessions; implemented by browser-automation
/// backends supplied per site.
#[async_trait]
pub trait RenderedFetcher: Send + Sync {
    /// Open a fresh session.
    async fn open(&self) -> Result<Box<dyn RenderSession>>;

    /// Fetch one page's rendered markup, optionally running a post-render
    /// action first. Opens a session for this fetch alone and closes it
    /// before returning, even on failure.
    async fn fetch_rendered(
        &self,
        url: &str,
        post_render: Option<&PostRenderAction>,
    ) -> Result<String> {
        let mut session = self.open().await?;

        let outcome = async {
            session.goto(url).await?;
            if let Some(step) = post_render {
                session.invoke(&step.action, &step.args).await?;
                session.wait_for(&step.wait).await?;
            }
            session.content().await
        }
        .await;

        let close_result = session.close().await;
        let markup = outcome?;
        close_result?;
        Ok(markup)
    }
}

/// Adapter presenting a [`RenderedFetcher`] as the plain page-fetch
/// capability, so the pipeline stays agnostic to how a page is obtained.
pub struct RenderedPageFetcher<F> {
    inner: F,
}

impl<F: RenderedFetcher> RenderedPageFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: RenderedFetcher> PageFetcher for RenderedPageFetcher<F> {
    async fn get(&self, url: &str) -> Result<FetchedPage> {
        let text = self.inner.fetch_rendered(url, None).await?;
        Ok(FetchedPage {
            status: 200,
            text,
            final_url: url.to_string(),
        })
    }

    async fn post(&self, url: &str, _form: &[(String, String)]) -> Result<FetchedPage> {
        Err(AppError::fetch(
            url,
            "form posts are not supported by rendered sessions",
        ))
    }
}
