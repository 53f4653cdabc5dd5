// src/models/mod.rs

//! Domain models for the scrape engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod announcement;
mod config;
mod site;

// Re-export all public types
pub use announcement::{
    Announcement, AttachmentRef, DetailContent, DetailRef, DownloadFailure, DownloadResult,
    MISSING_BODY_PLACEHOLDER, RemoteLocator,
};
pub use config::{Config, EngineConfig, OutputConfig};
pub use site::{
    DetailSelectors, ListSelectors, Pagination, PaginationMode, SiteProfile, SiteRegistry,
};
