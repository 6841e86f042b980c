//! Marketplace crawling primitives.
//!
//! This crate provides:
//! - [`proxy`] — round-robin proxy rotation and the proxy health probe
//! - [`client`] — HTTP clients shared across fetch tasks, one per proxy identity
//! - [`estimate`] — catalog size estimation from a listing page
//! - [`partition`] — price-band partitioning of oversized categories
//! - [`links`] — paginated product link collection
//! - [`product`] — product page fetching and card parsing
//! - [`dispatch`] — bounded concurrent fetch-and-parse
//! - [`stop`] — the cooperative stop signal

pub mod client;
pub mod dispatch;
pub mod estimate;
pub mod links;
pub mod partition;
pub mod product;
pub mod proxy;
pub mod stop;

pub use client::{ClientPool, pause};
pub use dispatch::{Dispatcher, FetchJob, MAX_WORKERS};
pub use estimate::{CatalogEstimate, estimate_catalog, parse_total};
pub use links::{DEFAULT_MAX_PAGES, collect_links, extract_product_links};
pub use partition::{partition, plan_ranges};
pub use product::{fetch_and_parse, parse_product_card};
pub use proxy::{ProxyRotator, check_proxy};
pub use stop::StopSignal;
