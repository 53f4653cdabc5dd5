// src/services/mod.rs

//! Engine services: transport, parsing strategies, rendering, and
//! attachment downloads.

pub mod download;
pub mod fetch;
pub mod filename;
pub mod rendered;
pub mod strategy;

pub use download::AttachmentDownloader;
pub use fetch::{FetchedPage, HttpFetcher, PageFetcher};
pub use filename::{resolve_filename, sanitize_filename};
pub use rendered::{PostRenderAction, RenderSession, RenderedFetcher, RenderedPageFetcher, WaitUntil};
pub use strategy::{
    LocatorResolver, ParseAbstention, ParsingStrategy, SelectorStrategy, SiteAdapter,
};
