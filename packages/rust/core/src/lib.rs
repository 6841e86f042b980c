//! Run orchestration for MarketCrawl.
//!
//! This crate ties the crawling primitives together into a complete run
//! (categories → price bands → links → product records → workbook), and
//! manages concurrent runs and export retention.

pub mod controller;
pub mod export;
pub mod registry;
pub mod retention;

pub use controller::{NoopProgress, ProgressStore, RunController, RunState};
pub use export::{Exporter, XlsxExporter, column_union, filename_for_date, filename_ru};
pub use marketcrawl_crawler::StopSignal;
pub use registry::RunRegistry;
pub use retention::cleanup_old_files;
