//! Price-band partitioning for categories too large to paginate in one go.

use marketcrawl_shared::{Category, CrawlConfig, PriceRange};
use tracing::info;

/// Split `[min, max]` into contiguous inclusive bands of width `step`.
///
/// Band `k` spans `min + k*step (+1 after the first) ..= min + (k+1)*step`.
/// The last band may reach past `max`; it never stops short of it.
/// A zero `step` or `min > max` yields no bands.
pub fn partition(min: u64, max: u64, step: u64) -> Vec<PriceRange> {
    if step == 0 || min > max {
        return Vec::new();
    }

    let mut ranges = Vec::new();
    let mut low = min;
    let mut high = min.saturating_add(step);
    loop {
        ranges.push(PriceRange::band(low, high));
        if high >= max || high == u64::MAX {
            break;
        }
        low = high + 1;
        high = high.saturating_add(step);
    }
    ranges
}

/// Decide which price ranges a category is crawled in.
///
/// Only categories estimated above the partition threshold are split, and
/// only when splitting is enabled; everything else is one unfiltered range.
pub fn plan_ranges(
    total: Option<u64>,
    category: &Category,
    price_split: bool,
    config: &CrawlConfig,
) -> Vec<PriceRange> {
    let oversized = total.is_some_and(|t| t > config.partition_threshold);
    if !(oversized && price_split) {
        return vec![PriceRange::Unbounded];
    }

    let (min, max) = category.price_bounds.unwrap_or((0, config.max_price));
    let ranges = partition(min, max, config.price_step);
    if ranges.is_empty() {
        return vec![PriceRange::Unbounded];
    }

    info!(
        url = %category.url,
        ?total,
        bands = ranges.len(),
        "category partitioned by price"
    );
    ranges
}
