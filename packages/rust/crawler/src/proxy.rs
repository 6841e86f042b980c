//! Round-robin proxy rotation and the standalone proxy health probe.

use std::time::Duration;

use marketcrawl_shared::ProxyIdentity;
use tracing::debug;

use crate::client::build_client;

/// Cyclic supplier of outbound proxy identities.
///
/// The cursor is owned by one caller (`&mut self`); the run controller
/// resolves a proxy for each task before handing the task to a worker.
#[derive(Debug, Clone, Default)]
pub struct ProxyRotator {
    proxies: Vec<ProxyIdentity>,
    cursor: usize,
}

impl ProxyRotator {
    pub fn new(proxies: Vec<ProxyIdentity>) -> Self {
        Self { proxies, cursor: 0 }
    }

    /// Next proxy in list order, wrapping around. `None` means "connect
    /// directly" and is what an empty rotator always yields.
    pub fn next_proxy(&mut self) -> Option<ProxyIdentity> {
        if self.proxies.is_empty() {
            return None;
        }
        let proxy = self.proxies[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.proxies.len();
        Some(proxy)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

/// Probe a proxy by requesting `site_url` through it.
///
/// Returns `true` only when the site answers with a success status within
/// `timeout`. Not used by the crawl itself; a failing proxy stays in rotation.
pub async fn check_proxy(
    proxy: &ProxyIdentity,
    site_url: &str,
    timeout: Duration,
    user_agent: &str,
) -> bool {
    let client = match build_client(user_agent, Some(proxy)) {
        Ok(client) => client,
        Err(e) => {
            debug!(%proxy, error = %e, "proxy client could not be built");
            return false;
        }
    };

    match client.get(site_url).timeout(timeout).send().await {
        Ok(response) => {
            let ok = response.status().is_success();
            debug!(%proxy, status = %response.status(), ok, "proxy probe answered");
            ok
        }
        Err(e) => {
            debug!(%proxy, error = %e, "proxy probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxies(entries: &[&str]) -> Vec<ProxyIdentity> {
        entries.iter().map(|p| p.parse().unwrap()).collect()
    }

    #[test]
    fn rotation_is_periodic() {
        let list = proxies(&["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080"]);
        let mut rotator = ProxyRotator::new(list.clone());

        let first_cycle: Vec<_> = (0..3).map(|_| rotator.next_proxy().unwrap()).collect();
        let second_cycle: Vec<_> = (0..3).map(|_| rotator.next_proxy().unwrap()).collect();

        assert_eq!(first_cycle, list);
        assert_eq!(second_cycle, list);
    }

    #[test]
    fn single_proxy_repeats() {
        let mut rotator = ProxyRotator::new(proxies(&["10.0.0.1:8080"]));
        for _ in 0..5 {
            assert_eq!(rotator.next_proxy().unwrap().raw(), "10.0.0.1:8080");
        }
    }

    #[test]
    fn empty_rotator_always_yields_none() {
        let mut rotator = ProxyRotator::new(Vec::new());
        assert!(rotator.is_empty());
        for _ in 0..10 {
            assert!(rotator.next_proxy().is_none());
        }
    }

    #[tokio::test]
    async fn unreachable_proxy_is_bad() {
        // Port 9 (discard) on loopback is closed in test environments.
        let proxy: ProxyIdentity = "127.0.0.1:9".parse().unwrap();
        let ok = check_proxy(
            &proxy,
            "http://shop.example.com/",
            Duration::from_secs(2),
            "test-agent",
        )
        .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn proxy_refusing_requests_is_bad() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(wiremock::ResponseTemplate::new(407))
            .mount(&server)
            .await;

        let proxy: ProxyIdentity = server.address().to_string().parse().unwrap();
        let ok = check_proxy(
            &proxy,
            "http://shop.example.com/",
            Duration::from_secs(2),
            "test-agent",
        )
        .await;
        assert!(!ok);
    }
}
