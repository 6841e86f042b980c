//! HTTP clients shared by every request of a run.
//!
//! `reqwest` binds a proxy to a client, not to a request, so the pool builds
//! one client per proxy identity up front (plus a direct one). Clients are
//! cheap to clone and safe to use from many tasks at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use marketcrawl_shared::{DelayRange, MarketCrawlError, ProxyIdentity, Result};
use rand::Rng;
use reqwest::Client;
use tracing::debug;

/// Maximum redirects followed for any marketplace request.
const MAX_REDIRECTS: usize = 5;

/// Direct client plus one client per configured proxy.
#[derive(Debug, Clone)]
pub struct ClientPool {
    direct: Client,
    proxied: Arc<HashMap<ProxyIdentity, Client>>,
}

impl ClientPool {
    /// Build clients for every proxy in `proxies`.
    pub fn new(proxies: &[ProxyIdentity], user_agent: &str) -> Result<Self> {
        let direct = build_client(user_agent, None)?;
        let mut proxied = HashMap::with_capacity(proxies.len());
        for proxy in proxies {
            if !proxied.contains_key(proxy) {
                proxied.insert(proxy.clone(), build_client(user_agent, Some(proxy))?);
            }
        }

        Ok(Self {
            direct,
            proxied: Arc::new(proxied),
        })
    }

    /// Client routed through `proxy`, or the direct client for `None`.
    ///
    /// A proxy the pool was not built with also gets the direct client.
    pub fn client_for(&self, proxy: Option<&ProxyIdentity>) -> &Client {
        match proxy.and_then(|p| self.proxied.get(p)) {
            Some(client) => client,
            None => &self.direct,
        }
    }
}

/// Build a client with the run's User-Agent, optionally routed through a proxy.
pub(crate) fn build_client(user_agent: &str, proxy: Option<&ProxyIdentity>) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    builder = match proxy {
        Some(proxy) => {
            let proxy = reqwest::Proxy::all(proxy.url()).map_err(|e| {
                MarketCrawlError::config(format!("invalid proxy {proxy}: {e}"))
            })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| MarketCrawlError::Network(format!("failed to build HTTP client: {e}")))
}

/// GET `url` and return its body. Any non-success status is an error.
pub(crate) async fn get_html(client: &Client, url: &str, timeout: Duration) -> Result<String> {
    debug!(url, "fetching");

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| MarketCrawlError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MarketCrawlError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| MarketCrawlError::Network(format!("{url}: body read failed: {e}")))
}

/// Sleep for a random duration drawn from `range`.
pub async fn pause(range: DelayRange) {
    if range.max.is_zero() {
        return;
    }
    let delay = if range.min == range.max {
        range.min
    } else {
        rand::thread_rng().gen_range(range.min..=range.max)
    };
    tokio::time::sleep(delay).await;
}
