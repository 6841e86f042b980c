//! Application configuration for MarketCrawl.
//!
//! User config lives at `~/.marketcrawl/marketcrawl.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MarketCrawlError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "marketcrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".marketcrawl";

/// User-Agent sent with every marketplace request.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; MarketCrawl/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

// ---------------------------------------------------------------------------
// Config structs (matching marketcrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Crawl tuning.
    #[serde(default)]
    pub crawl: CrawlSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory the result spreadsheets are written to.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Run metadata database.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Requested fetch workers per run (hard-capped at 12).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Split oversized categories into price bands.
    #[serde(default = "default_true")]
    pub price_split: bool,

    /// Result files older than this are removed by `cleanup`.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: default_db_path(),
            max_workers: default_max_workers(),
            price_split: true,
            retention_days: default_retention_days(),
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}
fn default_db_path() -> String {
    "state/marketcrawl.db".into()
}
fn default_max_workers() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_retention_days() -> u64 {
    7
}

/// `[crawl]` section. Delays are `[min, max]` in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u64,
    /// Categories with more items than this are partitioned by price.
    #[serde(default = "default_partition_threshold")]
    pub partition_threshold: u64,
    #[serde(default = "default_price_step")]
    pub price_step: u64,
    /// Upper end of the partitioned price span.
    #[serde(default = "default_max_price")]
    pub max_price: u64,
    /// Pages to try when the category size could not be estimated.
    #[serde(default = "default_fallback_pages")]
    pub fallback_pages: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: [u64; 2],
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: [u64; 2],
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Page requested through a proxy by `check-proxy`.
    #[serde(default = "default_health_check_url")]
    pub health_check_url: String,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
            partition_threshold: default_partition_threshold(),
            price_step: default_price_step(),
            max_price: default_max_price(),
            fallback_pages: default_fallback_pages(),
            page_delay_ms: default_page_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            user_agent: default_user_agent(),
            health_check_url: default_health_check_url(),
        }
    }
}

fn default_items_per_page() -> u64 {
    48
}
fn default_partition_threshold() -> u64 {
    10_000
}
fn default_price_step() -> u64 {
    30_000
}
fn default_max_price() -> u64 {
    3_000_000
}
fn default_fallback_pages() -> u32 {
    50
}
fn default_page_delay_ms() -> [u64; 2] {
    [300, 900]
}
fn default_batch_delay_ms() -> [u64; 2] {
    [500, 1200]
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}
fn default_health_check_url() -> String {
    "https://halykmarket.kz".into()
}

// ---------------------------------------------------------------------------
// Crawl config (runtime)
// ---------------------------------------------------------------------------

/// A `[min, max]` window a random pause is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    /// No pause at all.
    pub const ZERO: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn from_millis([min, max]: [u64; 2]) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }
}

/// Runtime crawl configuration, derived from the config file.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub items_per_page: u64,
    pub partition_threshold: u64,
    pub price_step: u64,
    pub max_price: u64,
    pub fallback_pages: u32,
    /// Pause between listing pages.
    pub page_delay: DelayRange,
    /// Pause after each dispatched batch.
    pub batch_delay: DelayRange,
    pub user_agent: String,
    pub health_check_url: String,
    /// Catalog estimation and pagination.
    pub listing_timeout: Duration,
    pub product_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let crawl = &config.crawl;
        Self {
            items_per_page: crawl.items_per_page.max(1),
            partition_threshold: crawl.partition_threshold,
            price_step: crawl.price_step,
            max_price: crawl.max_price,
            fallback_pages: crawl.fallback_pages,
            page_delay: DelayRange::from_millis(crawl.page_delay_ms),
            batch_delay: DelayRange::from_millis(crawl.batch_delay_ms),
            user_agent: crawl.user_agent.clone(),
            health_check_url: crawl.health_check_url.clone(),
            listing_timeout: Duration::from_secs(15),
            product_timeout: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(8),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.marketcrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MarketCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.marketcrawl/marketcrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MarketCrawlError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        MarketCrawlError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MarketCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MarketCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MarketCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
