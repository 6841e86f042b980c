//! Catalog size estimation from a category's first listing page.

use std::sync::LazyLock;

use marketcrawl_shared::{CrawlConfig, ProxyIdentity};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use crate::client::{ClientPool, get_html};

static TOTAL_COUNT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".total-count").expect("valid selector"));

/// First run of digits, allowing grouping whitespace (`12 345`).
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d\s]*").expect("valid regex"));

/// Text fragment that marks an item-count phrase on the listing ("1 234 товара").
const ITEMS_MARKER: &str = "товар";

/// Estimated size of a category. Both fields are `None` when the listing
/// could not be fetched or carried no recognizable count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogEstimate {
    pub total: Option<u64>,
    pub pages: Option<u64>,
}

/// Fetch the listing page and estimate item and page counts. Never fails.
#[instrument(skip_all, fields(url = %category_url))]
pub async fn estimate_catalog(
    clients: &ClientPool,
    proxy: Option<&ProxyIdentity>,
    category_url: &Url,
    config: &CrawlConfig,
) -> CatalogEstimate {
    let client = clients.client_for(proxy);
    let body = match get_html(client, category_url.as_str(), config.listing_timeout).await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "listing unavailable, size unknown");
            return CatalogEstimate::default();
        }
    };

    let total = parse_total(&body);
    let pages = total
        .filter(|&t| t > 0)
        .map(|t| t.div_ceil(config.items_per_page));

    info!(?total, ?pages, "catalog estimated");
    CatalogEstimate { total, pages }
}

/// Pull the total item count out of a listing page.
///
/// Uses the `.total-count` element when present, otherwise the first text
/// node mentioning items; the first number found there is the total.
pub fn parse_total(html: &str) -> Option<u64> {
    let doc = Html::parse_document(html);

    let text = match doc.select(&TOTAL_COUNT).next() {
        Some(el) => el.text().collect::<String>(),
        None => doc
            .root_element()
            .descendants()
            .filter_map(|node| node.value().as_text())
            .find(|t| t.contains(ITEMS_MARKER))
            .map(|t| String::from(&**t))?,
    };

    let digits: String = NUMBER
        .find(&text)?
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use marketcrawl_shared::DelayRange;

    fn test_config() -> CrawlConfig {
        CrawlConfig {
            page_delay: DelayRange::ZERO,
            batch_delay: DelayRange::ZERO,
            ..CrawlConfig::default()
        }
    }

    #[test]
    fn total_from_count_element() {
        let html = r#"<html><body><div class="total-count">Найдено 12 345 шт.</div></body></html>"#;
        assert_eq!(parse_total(html), Some(12_345));
    }

    #[test]
    fn total_from_text_with_non_breaking_space() {
        let html = "<html><body><h2>Кольца</h2><span>1\u{a0}234 товара</span></body></html>";
        assert_eq!(parse_total(html), Some(1_234));
    }

    #[test]
    fn count_element_without_number_gives_none() {
        let html = r#"<div class="total-count">много</div><p>500 товаров</p>"#;
        assert_eq!(parse_total(html), None);
    }

    #[test]
    fn no_signal_gives_none() {
        assert_eq!(parse_total("<html><body><p>Hello</p></body></html>"), None);
    }

    #[tokio::test]
    async fn estimate_computes_page_count() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/c/rings"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string(r#"<span class="total-count">97</span>"#),
            )
            .mount(&server)
            .await;

        let clients = ClientPool::new(&[], "test-agent").unwrap();
        let url = Url::parse(&format!("{}/c/rings", server.uri())).unwrap();
        let estimate = estimate_catalog(&clients, None, &url, &test_config()).await;

        assert_eq!(estimate.total, Some(97));
        assert_eq!(estimate.pages, Some(3));
    }

    #[tokio::test]
    async fn estimate_on_error_status_is_unknown() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let clients = ClientPool::new(&[], "test-agent").unwrap();
        let url = Url::parse(&format!("{}/c/rings", server.uri())).unwrap();
        let estimate = estimate_catalog(&clients, None, &url, &test_config()).await;

        assert_eq!(estimate, CatalogEstimate::default());
    }

    #[tokio::test]
    async fn estimate_on_connection_failure_is_unknown() {
        let clients = ClientPool::new(&[], "test-agent").unwrap();
        let url = Url::parse("http://127.0.0.1:9/c/rings").unwrap();
        let estimate = estimate_catalog(&clients, None, &url, &test_config()).await;
        assert_eq!(estimate, CatalogEstimate::default());
    }
}
