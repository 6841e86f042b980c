//! Product page fetching and card parsing.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use marketcrawl_shared::{ProductCard, ProductRecord, SELLER_SLOTS};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::client::get_html;

/// Characteristic keys are cut to this many characters.
const SPEC_KEY_MAX_CHARS: usize = 60;

/// Prefix of characteristics-table attributes in the open record mapping.
const SPEC_PREFIX: &str = "spec_";

/// Substrings that mark a text as mentioning a weight in grams.
const WEIGHT_UNITS: [&str; 2] = ["г", "гр"];

/// Characteristics-table labels feeding each well-known jewelry field, in priority order.
const METAL_COLOR_LABELS: &[&str] = &["Цвет металла", "Цвет", "Metal color"];
const MATERIAL_LABELS: &[&str] = &["Материал"];
const INLAY_COUNTRY_LABELS: &[&str] = &["Страна вставки", "Страна"];
const LENGTH_LABELS: &[&str] = &["Длина"];
const SIZE_LABELS: &[&str] = &["Размер"];

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static PRICE: LazyLock<[Selector; 2]> =
    LazyLock::new(|| [selector("[data-test='price']"), selector(".price")]);
static DESCRIPTION: LazyLock<[Selector; 2]> =
    LazyLock::new(|| [selector(".description"), selector("[data-test='description']")]);
static SELLER_OFFER: LazyLock<Selector> = LazyLock::new(|| selector(".seller-offer"));
static SPEC_ROW: LazyLock<Selector> = LazyLock::new(|| selector("table.specs tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td"));

/// Fetch a product page and parse it. Any fetch failure yields `None`.
pub async fn fetch_and_parse(client: &Client, link: &str, timeout: Duration) -> Option<ProductRecord> {
    match get_html(client, link, timeout).await {
        Ok(body) => Some(parse_product_card(&body).stamp(link)),
        Err(e) => {
            debug!(link, error = %e, "product fetch failed");
            None
        }
    }
}

/// Extract the product card fields from a product page.
///
/// Missing elements leave their fields `None`; parsing never fails.
pub fn parse_product_card(html: &str) -> ProductCard {
    let doc = Html::parse_document(html);

    let title = first_text(&doc, std::slice::from_ref(&*TITLE));
    let price = first_text(&doc, &*PRICE);
    let description = first_text(&doc, &*DESCRIPTION);

    let mut seller_offers: [Option<String>; SELLER_SLOTS] = Default::default();
    for (slot, offer) in seller_offers.iter_mut().zip(doc.select(&SELLER_OFFER)) {
        *slot = Some(stripped_text(offer));
    }

    let table = spec_table(&doc);
    // A label present with an empty value counts as absent: the field stays `None`.
    let lookup = |labels: &[&str]| {
        labels
            .iter()
            .find_map(|label| table.get(*label).filter(|v| !v.is_empty()).cloned())
    };

    let specs = table
        .iter()
        .map(|(label, value)| (format!("{SPEC_PREFIX}{}", spec_key(label)), value.clone()))
        .collect();

    ProductCard {
        weight_in_title: title.clone().filter(|t| mentions_weight(t)),
        weight_in_description: description.clone().filter(|d| mentions_weight(d)),
        title,
        price,
        description,
        seller_offers,
        metal_color: lookup(METAL_COLOR_LABELS),
        material: lookup(MATERIAL_LABELS),
        inlay_country: lookup(INLAY_COUNTRY_LABELS),
        length: lookup(LENGTH_LABELS),
        size: lookup(SIZE_LABELS),
        specs,
    }
}

/// Label → value pairs from the characteristics table; a repeated label keeps its last value.
fn spec_table(doc: &Html) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for row in doc.select(&SPEC_ROW) {
        let cells: Vec<_> = row.select(&CELL).collect();
        if let [label, value, ..] = cells.as_slice() {
            table.insert(stripped_text(*label), stripped_text(*value));
        }
    }
    table
}

/// Normalize a characteristic label into a column key: lowercase, `_` for spaces, 60 chars max.
fn spec_key(label: &str) -> String {
    label
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .take(SPEC_KEY_MAX_CHARS)
        .collect()
}

fn mentions_weight(text: &str) -> bool {
    !text.is_empty() && WEIGHT_UNITS.iter().any(|unit| text.contains(unit))
}

/// Text of the first element matched by the first selector that matches anything.
fn first_text(doc: &Html, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(stripped_text)
}

/// Every text fragment trimmed, then concatenated.
fn stripped_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|t| !t.is_empty()).collect()
}
