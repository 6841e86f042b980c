//! Paginated product link collection for a catalog listing.

use std::collections::HashSet;
use std::sync::LazyLock;

use marketcrawl_shared::{CrawlConfig, ProxyIdentity};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::client::{ClientPool, get_html, pause};

/// Page limit when the caller has no estimate of its own.
pub const DEFAULT_MAX_PAGES: u32 = 100;

static PRODUCT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.product-link").expect("valid selector"));

static PRODUCT_CARD_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".product-card a").expect("valid selector"));

/// Walk listing pages `1..=max_pages` of `listing_url` and gather product URLs.
///
/// Pagination ends at the first page with no product links or the first
/// page that fails to load; both are treated as "no more pages". The result
/// holds each URL once, in the order it was first seen.
#[instrument(skip_all, fields(url = %listing_url, proxy = ?proxy.map(ToString::to_string)))]
pub async fn collect_links(
    clients: &ClientPool,
    proxy: Option<&ProxyIdentity>,
    listing_url: &Url,
    max_pages: Option<u32>,
    config: &CrawlConfig,
) -> Vec<String> {
    let client = clients.client_for(proxy);
    let max_pages = max_pages.unwrap_or(DEFAULT_MAX_PAGES);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut pages_read = 0;

    for page in 1..=max_pages {
        let url = page_url(listing_url, page);
        let body = match get_html(client, url.as_str(), config.listing_timeout).await {
            Ok(body) => body,
            Err(e) => {
                warn!(page, error = %e, "listing page failed, ending pagination");
                break;
            }
        };

        let found = extract_product_links(&body, &url);
        if found.is_empty() {
            debug!(page, "no product links, end of listing");
            break;
        }

        pages_read += 1;
        debug!(page, found = found.len(), "listing page read");
        for link in found {
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }

        pause(config.page_delay).await;
    }

    info!(pages_read, links = links.len(), "links collected");
    links
}

/// Product URLs on one listing page, resolved against `page_url`.
///
/// Falls back to links inside product cards when the page has no
/// dedicated product links.
pub fn extract_product_links(html: &str, page_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);

    let mut anchors: Vec<_> = doc.select(&PRODUCT_LINK).collect();
    if anchors.is_empty() {
        anchors = doc.select(&PRODUCT_CARD_LINK).collect();
    }

    anchors
        .into_iter()
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page_url.join(href.trim()).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url.to_string()
        })
        .collect()
}

/// `listing_url` with `page=N` appended to whatever query it already has.
fn page_url(listing_url: &Url, page: u32) -> Url {
    let mut url = listing_url.clone();
    url.query_pairs_mut().append_pair("page", &page.to_string());
    url
}
