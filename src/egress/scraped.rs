//! Scraped public-proxy candidates
//!
//! Candidates come from a remote newline-separated list fetched once per
//! campaign. Every candidate is untrusted until it survives a validation
//! request against the real target; failures are discarded permanently, so
//! the pool only ever shrinks.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};
use url::Url;

use super::EgressError;

/// Default timeout for validating one proxy candidate
pub const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// One `scheme://host:port` proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    uri: String,
}

impl ProxyEndpoint {
    /// Parse a single list entry. Entries without a scheme, host, or port are
    /// rejected; free lists are full of garbage lines.
    pub fn parse(entry: &str) -> Result<Self, EgressError> {
        let entry = entry.trim();
        let parsed = Url::parse(entry).map_err(|e| EgressError::InvalidEndpoint(format!("{}: {}", entry, e)))?;

        if parsed.host_str().is_none() || parsed.port().is_none() {
            return Err(EgressError::InvalidEndpoint(format!("{}: missing host or port", entry)));
        }

        Ok(Self { uri: entry.to_string() })
    }

    /// Full endpoint URI, usable directly as a proxy URL
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Validates a candidate endpoint before it is handed to a session
pub trait EndpointProbe: Send + Sync {
    fn validate(&self, endpoint: &ProxyEndpoint) -> impl Future<Output = bool> + Send;
}

/// Production probe: bounded-timeout GET to the real target through the
/// candidate. Anything short of an HTTP response is a discard.
pub struct HttpEndpointProbe {
    target_url: String,
    timeout: Duration,
}

impl HttpEndpointProbe {
    pub fn new(target_url: &str) -> Self {
        Self {
            target_url: target_url.to_string(),
            timeout: DEFAULT_VALIDATE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl EndpointProbe for HttpEndpointProbe {
    async fn validate(&self, endpoint: &ProxyEndpoint) -> bool {
        let proxy = match reqwest::Proxy::all(endpoint.uri()) {
            Ok(p) => p,
            Err(e) => {
                debug!("Proxy {} rejected by client: {}", endpoint.uri(), e);
                return false;
            }
        };

        let client = match reqwest::Client::builder().proxy(proxy).timeout(self.timeout).build() {
            Ok(c) => c,
            Err(e) => {
                debug!("Failed to build validation client for {}: {}", endpoint.uri(), e);
                return false;
            }
        };

        match client.get(&self.target_url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Valid proxy: {}", endpoint.uri());
                true
            }
            Ok(response) => {
                debug!("Proxy {} answered HTTP {}", endpoint.uri(), response.status());
                false
            }
            Err(e) => {
                debug!("Proxy {} failed validation: {}", endpoint.uri(), e);
                false
            }
        }
    }
}

/// Mutable pool of unvalidated proxy candidates, fetched once per campaign.
///
/// Members are removed permanently, on validation failure and on successful
/// hand-off alike, so no two workers ever share an endpoint.
#[derive(Debug, Default)]
pub struct ProxyCandidatePool {
    candidates: Mutex<Vec<ProxyEndpoint>>,
}

impl ProxyCandidatePool {
    /// Build a pool from raw list text (newline-separated entries).
    /// Blank lines and malformed entries are dropped, duplicates collapsed.
    pub fn from_list(raw: &str) -> Self {
        let mut candidates: Vec<ProxyEndpoint> = Vec::new();

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match ProxyEndpoint::parse(line) {
                Ok(endpoint) => {
                    if !candidates.contains(&endpoint) {
                        candidates.push(endpoint);
                    }
                }
                Err(e) => debug!("Skipping proxy list entry: {}", e),
            }
        }

        info!("Proxy candidate pool holds {} unique endpoints", candidates.len());
        Self {
            candidates: Mutex::new(candidates),
        }
    }

    /// Fetch the list from a remote URL. Fatal if the fetch fails or the
    /// resulting pool is empty; a campaign without sources cannot start.
    pub async fn fetch(list_url: &str) -> Result<Self, EgressError> {
        info!("Fetching proxy list from {}", list_url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EgressError::ListFetch(e.to_string()))?;

        let body = client
            .get(list_url)
            .send()
            .await
            .map_err(|e| EgressError::ListFetch(e.to_string()))?
            .text()
            .await
            .map_err(|e| EgressError::ListFetch(e.to_string()))?;

        let pool = Self::from_list(&body);
        if pool.is_empty() {
            warn!("Proxy list from {} produced no usable endpoints", list_url);
            return Err(EgressError::EmptyList);
        }
        Ok(pool)
    }

    /// Remove and return a uniformly random candidate
    pub fn take_random(&self) -> Option<ProxyEndpoint> {
        let mut candidates = self.candidates.lock();
        if candidates.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates.swap_remove(index))
    }

    /// Remaining candidate count
    pub fn len(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_full_endpoint() {
        let endpoint = ProxyEndpoint::parse("http://198.51.100.4:8080").unwrap();
        assert_eq!(endpoint.uri(), "http://198.51.100.4:8080");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ProxyEndpoint::parse("not a proxy").is_err());
        assert!(ProxyEndpoint::parse("http://198.51.100.4").is_err()); // no port
        assert!(ProxyEndpoint::parse("").is_err());
    }

    #[test]
    fn from_list_skips_blanks_and_dedups() {
        let raw = "http://198.51.100.4:8080\n\nsocks5://198.51.100.5:1080\nhttp://198.51.100.4:8080\nbogus\n";
        let pool = ProxyCandidatePool::from_list(raw);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn take_random_shrinks_pool() {
        let pool = ProxyCandidatePool::from_list("http://10.0.0.1:80\nhttp://10.0.0.2:80\nhttp://10.0.0.3:80");
        assert_eq!(pool.len(), 3);

        let mut taken = Vec::new();
        while let Some(endpoint) = pool.take_random() {
            taken.push(endpoint);
        }

        assert_eq!(taken.len(), 3);
        assert!(pool.is_empty());
        // No endpoint is ever returned twice
        for (i, a) in taken.iter().enumerate() {
            for b in &taken[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn take_random_on_empty_pool() {
        let pool = ProxyCandidatePool::from_list("");
        assert!(pool.take_random().is_none());
    }
}
