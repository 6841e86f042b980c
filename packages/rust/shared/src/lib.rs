//! Shared types, error model, and configuration for MarketCrawl.
//!
//! This crate is the foundation depended on by all other MarketCrawl crates.
//! It provides:
//! - [`MarketCrawlError`] — the unified error type
//! - Domain types ([`RunId`], [`RunParameters`], [`Category`], [`PriceRange`], [`ProductRecord`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSection, DEFAULT_USER_AGENT, DefaultsConfig, DelayRange,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{MarketCrawlError, Result};
pub use types::{
    Category, PriceRange, ProductCard, ProductRecord, ProxyIdentity, Row, RunId, RunParameters,
    RunStatus, SELLER_SLOTS,
};
