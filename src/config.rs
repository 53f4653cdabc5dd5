// src/config.rs

//! Configuration loading utilities.
//!
//! This module provides convenience functions for loading the engine
//! configuration and the site registry from files.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::{Config, SiteRegistry};

/// Load configuration from a TOML file.
///
/// Falls back to defaults if loading fails.
pub fn load_config(path: &Path) -> Config {
    Config::load_or_default(path)
}

/// Load the site registry from a TOML file. Unlike the engine config,
/// there is no useful default: without sites there is nothing to crawl.
pub fn load_sites(path: &Path) -> Result<SiteRegistry> {
    let registry = SiteRegistry::load(path)?;
    registry
        .validate()
        .map_err(|e| AppError::config(format!("Invalid site registry: {e}")))?;
    Ok(registry)
}

/// Load and validate config and site registry from a data directory
/// (`config.toml` and `sites.toml`).
pub fn load_all(data_dir: &Path) -> Result<(Config, SiteRegistry)> {
    let config = load_config(&data_dir.join("config.toml"));
    config.validate()?;

    let registry = load_sites(&data_dir.join("sites.toml"))?;
    Ok((config, registry))
}
