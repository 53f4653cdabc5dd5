//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Output locations
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.output.dir.trim().is_empty() {
            return Err(AppError::validation("output.dir is empty"));
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Page request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Longer timeout for attachment downloads
    #[serde(default = "defaults::download_timeout")]
    pub download_timeout_secs: u64,

    /// Delay between item requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Delay between listing pages in milliseconds
    #[serde(default = "defaults::page_delay")]
    pub page_delay_ms: u64,

    /// Delay between independent site runs in milliseconds
    #[serde(default = "defaults::site_delay")]
    pub site_delay_ms: u64,

    /// Maximum listing pages walked per run
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    /// Consecutive already-seen items before a run stops early
    #[serde(default = "defaults::duplicate_threshold")]
    pub duplicate_threshold: usize,

    /// Verify TLS certificates. Sites may override this per profile;
    /// several boards present invalid certificates.
    #[serde(default = "defaults::verify_tls")]
    pub verify_tls: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            download_timeout_secs: defaults::download_timeout(),
            request_delay_ms: defaults::request_delay(),
            page_delay_ms: defaults::page_delay(),
            site_delay_ms: defaults::site_delay(),
            max_pages: defaults::max_pages(),
            duplicate_threshold: defaults::duplicate_threshold(),
            verify_tls: defaults::verify_tls(),
        }
    }
}

impl EngineConfig {
    /// Validate engine values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(AppError::validation("engine.user_agent is empty"));
        }
        if self.timeout_secs == 0 {
            return Err(AppError::validation("engine.timeout_secs must be > 0"));
        }
        if self.download_timeout_secs == 0 {
            return Err(AppError::validation(
                "engine.download_timeout_secs must be > 0",
            ));
        }
        if self.max_pages == 0 {
            return Err(AppError::validation("engine.max_pages must be > 0"));
        }
        if self.duplicate_threshold == 0 {
            return Err(AppError::validation(
                "engine.duplicate_threshold must be > 0",
            ));
        }
        Ok(())
    }
}

/// Output location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for per-site output folders
    #[serde(default = "defaults::output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: defaults::output_dir(),
        }
    }
}

mod defaults {
    // Engine defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn download_timeout() -> u64 {
        120
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn page_delay() -> u64 {
        2000
    }
    pub fn site_delay() -> u64 {
        3000
    }
    pub fn max_pages() -> u32 {
        4
    }
    pub fn duplicate_threshold() -> usize {
        3
    }
    pub fn verify_tls() -> bool {
        true
    }

    // Output defaults
    pub fn output_dir() -> String {
        "output".into()
    }
}
