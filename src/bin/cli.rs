//! gongo CLI
//!
//! Local execution entry point for crawling configured announcement
//! boards.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gongo::{
    config,
    error::{AppError, Result},
    models::{Config, SiteProfile, SiteRegistry},
    pipeline::{self, CancelToken, RunContext},
    services::{HttpFetcher, SiteAdapter},
    storage::{LocalSink, ProcessedTitleStore},
};

/// gongo - Support-Program Announcement Crawler
#[derive(Parser, Debug)]
#[command(name = "gongo", version, about = "Support-program announcement crawler")]
struct Cli {
    /// Path to the data directory containing config.toml and sites.toml
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl one site, or every registered site
    Crawl {
        /// Site code to crawl; omit to crawl all sites
        #[arg(long)]
        site: Option<String>,

        /// Override the configured page limit
        #[arg(long)]
        max_pages: Option<u32>,

        /// Override the configured output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration and site registry
    Validate,

    /// List registered sites
    Sites,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("gongo starting...");

    match cli.command {
        Command::Crawl {
            site,
            max_pages,
            output,
        } => {
            let (mut config, registry) = config::load_all(&cli.data_dir)?;
            if let Some(dir) = output {
                config.output.dir = dir.to_string_lossy().into_owned();
            }

            let codes: Vec<String> = match site {
                Some(code) => {
                    if registry.get(&code).is_none() {
                        return Err(AppError::config(format!("Unknown site: {code}")));
                    }
                    vec![code]
                }
                None => registry.codes().iter().map(|c| c.to_string()).collect(),
            };

            let cancel = CancelToken::new();
            spawn_ctrl_c_handler(cancel.clone());

            crawl_sites(&config, &registry, &codes, max_pages, cancel).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            let (config, registry) = config::load_all(&cli.data_dir)?;
            config.validate()?;
            registry.validate()?;

            let declarative = registry
                .sites
                .values()
                .filter(|p| p.is_fully_declarative())
                .count();
            log::info!(
                "✓ Config OK ({} sites, {} fully declarative)",
                registry.sites.len(),
                declarative
            );
        }

        Command::Sites => {
            let registry = config::load_sites(&cli.data_dir.join("sites.toml"))?;
            for (code, profile) in &registry.sites {
                let kind = if profile.is_fully_declarative() {
                    "selectors"
                } else {
                    "code"
                };
                log::info!("{code}: {} [{kind}] {}", profile.name, profile.list_url);
            }
        }
    }

    log::info!("Done!");

    Ok(())
}

/// Crawl the given sites sequentially. Each site gets its own store and
/// output folder; a failing site is logged and the remaining sites still
/// run.
async fn crawl_sites(
    config: &Config,
    registry: &SiteRegistry,
    codes: &[String],
    max_pages: Option<u32>,
    cancel: CancelToken,
) -> Result<()> {
    let site_delay = Duration::from_millis(config.engine.site_delay_ms);
    let mut failures = 0usize;

    for (index, code) in codes.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("Cancelled; skipping remaining sites");
            break;
        }

        let profile = registry.get(code).expect("codes come from the registry");
        match crawl_one(config, profile, max_pages, cancel.clone()).await {
            Ok(summary) => {
                log::info!(
                    "{}: {} processed, {} errors, {} pages ({:?})",
                    code,
                    summary.processed,
                    summary.errors,
                    summary.pages_visited,
                    summary.stopped
                );
            }
            Err(e) => {
                failures += 1;
                log::error!("{}: run failed: {}", code, e);
            }
        }

        if index + 1 < codes.len() && !site_delay.is_zero() {
            tokio::time::sleep(site_delay).await;
        }
    }

    if failures == codes.len() && !codes.is_empty() {
        return Err(AppError::config("Every site run failed"));
    }
    Ok(())
}

async fn crawl_one(
    config: &Config,
    profile: &SiteProfile,
    max_pages: Option<u32>,
    cancel: CancelToken,
) -> Result<pipeline::RunSummary> {
    if !profile.is_fully_declarative() {
        return Err(AppError::config(format!(
            "site {} needs a code-level strategy and cannot be crawled from the CLI",
            profile.code
        )));
    }

    let fetcher = Arc::new(HttpFetcher::new(&config.engine, profile)?);
    let adapter = SiteAdapter::from_profile(profile.clone(), fetcher)?;

    let site_output = PathBuf::from(&config.output.dir).join(&profile.code);
    let mut store = ProcessedTitleStore::new(&site_output, &profile.code);
    let sink = LocalSink::new(&site_output);

    let mut ctx = RunContext::new(&config.engine).with_cancel(cancel);
    if let Some(pages) = max_pages {
        ctx = ctx.with_max_pages(pages);
    }

    pipeline::run_site(&ctx, &adapter, &mut store, &sink).await
}

/// Flip the cancel token on Ctrl-C so the current item finishes before
/// the run winds down.
fn spawn_ctrl_c_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; finishing current item...");
            cancel.cancel();
        }
    });
}
