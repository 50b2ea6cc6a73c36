//! Egress acquisition
//!
//! Turns a raw egress source into a validated handle a session can own:
//! rotate-and-probe with registry dedup for managed circuits, pop-and-validate
//! for scraped proxies. Retries are bounded with fixed delays; the bottleneck
//! is the external rotation settle time, not contention, so there is no
//! exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::circuit::IdentitySource;
use super::registry::IdentityRegistry;
use super::scraped::{EndpointProbe, ProxyCandidatePool};
use super::EgressError;

/// Retry tuning for circuit acquisition
#[derive(Debug, Clone)]
pub struct AcquirePolicy {
    /// Maximum rotate-and-probe attempts before falling back to a duplicate
    pub max_retries: u32,
    /// Fixed wait after a rotation signal; the new identity takes effect
    /// asynchronously on the data plane and nothing confirms readiness
    pub settle_delay: Duration,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            settle_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(10),
        }
    }
}

/// A validated egress path, owned by exactly one session for one session
#[derive(Debug, Clone)]
pub struct EgressHandle {
    /// Proxy URL the browser uses to ride this egress
    pub proxy_url: String,
    /// Public IP observed through the egress, when the probe succeeded
    pub observed_ip: Option<String>,
    /// False when acquisition exhausted its retries and fell back to an IP
    /// already assigned elsewhere (or never observed one)
    pub unique: bool,
}

/// Produces registry-unique egress handles from either source kind
pub struct EgressAcquirer {
    registry: Arc<IdentityRegistry>,
    policy: AcquirePolicy,
}

impl EgressAcquirer {
    pub fn new(registry: Arc<IdentityRegistry>, policy: AcquirePolicy) -> Self {
        Self { registry, policy }
    }

    /// Campaign-wide identity registry backing the dedup check
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Acquire through a managed circuit: rotate, wait for the identity to
    /// settle, probe the public IP, and accept it only if the registry has
    /// not seen it.
    ///
    /// Exhausting the retry budget is a soft condition: the last observed
    /// handle is returned (flagged non-unique) rather than failing the
    /// worker. Only a control-channel failure is fatal here.
    pub async fn acquire_circuit<S: IdentitySource>(
        &self,
        source: &S,
        worker_id: usize,
    ) -> Result<EgressHandle, EgressError> {
        let mut last_observed: Option<String> = None;

        for attempt in 1..=self.policy.max_retries {
            source.rotate_identity().await?;
            sleep(self.policy.settle_delay).await;

            let ip = match source.probe_ip().await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!(
                        "Worker {}: identity probe failed (attempt {}/{}): {}",
                        worker_id, attempt, self.policy.max_retries, e
                    );
                    sleep(self.policy.retry_delay).await;
                    continue;
                }
            };

            last_observed = Some(ip.clone());

            if !self.registry.has(&ip) {
                self.registry.add(&ip);
                info!("Worker {}: unique egress IP acquired: {}", worker_id, ip);
                return Ok(EgressHandle {
                    proxy_url: source.proxy_url(),
                    observed_ip: Some(ip),
                    unique: true,
                });
            }

            info!(
                "Worker {}: duplicate egress IP {} (attempt {}/{}), retrying",
                worker_id, ip, attempt, self.policy.max_retries
            );
            sleep(self.policy.retry_delay).await;
        }

        warn!(
            "Worker {}: no unique IP after {} attempts, proceeding with {:?}",
            worker_id, self.policy.max_retries, last_observed
        );
        Ok(EgressHandle {
            proxy_url: source.proxy_url(),
            observed_ip: last_observed,
            unique: false,
        })
    }

    /// Acquire from the scraped-proxy pool: pop a random candidate, validate
    /// it against the real target, and hand it over on success. Candidates
    /// are consumed either way; a free-list proxy that failed once is not
    /// worth a second look. Hard-fails with `NoValidProxy` when the pool runs
    /// dry; the worker skips this round.
    pub async fn acquire_scraped<P: EndpointProbe>(
        &self,
        pool: &ProxyCandidatePool,
        probe: &P,
        worker_id: usize,
    ) -> Result<EgressHandle, EgressError> {
        while let Some(candidate) = pool.take_random() {
            if probe.validate(&candidate).await {
                info!("Worker {}: using proxy {} ({} candidates left)", worker_id, candidate.uri(), pool.len());
                return Ok(EgressHandle {
                    proxy_url: candidate.uri().to_string(),
                    observed_ip: None,
                    unique: true,
                });
            }
            debug!("Worker {}: discarded invalid proxy {}", worker_id, candidate.uri());
        }

        warn!("Worker {}: proxy candidate pool exhausted", worker_id);
        Err(EgressError::NoValidProxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::scraped::ProxyEndpoint;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Circuit stub replaying a scripted probe sequence
    struct ScriptedSource {
        probes: Mutex<VecDeque<Result<String, ()>>>,
    }

    impl ScriptedSource {
        fn new(probes: Vec<Result<&'static str, ()>>) -> Self {
            Self {
                probes: Mutex::new(probes.into_iter().map(|r| r.map(String::from)).collect()),
            }
        }
    }

    impl IdentitySource for ScriptedSource {
        async fn rotate_identity(&self) -> Result<(), EgressError> {
            Ok(())
        }

        async fn probe_ip(&self) -> Result<String, EgressError> {
            match self.probes.lock().pop_front() {
                Some(Ok(ip)) => Ok(ip),
                _ => Err(EgressError::ProbeFailed("scripted failure".into())),
            }
        }

        fn proxy_url(&self) -> String {
            "socks5://127.0.0.1:9001".into()
        }
    }

    /// Circuit stub whose control channel is down
    struct BrokenControl;

    impl IdentitySource for BrokenControl {
        async fn rotate_identity(&self) -> Result<(), EgressError> {
            Err(EgressError::ControlChannel("connection refused".into()))
        }

        async fn probe_ip(&self) -> Result<String, EgressError> {
            unreachable!("probe must not run when rotation fails")
        }

        fn proxy_url(&self) -> String {
            "socks5://127.0.0.1:9001".into()
        }
    }

    /// Endpoint probe replaying scripted verdicts
    struct ScriptedProbe {
        verdicts: Mutex<VecDeque<bool>>,
    }

    impl ScriptedProbe {
        fn new(verdicts: Vec<bool>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into()),
            }
        }
    }

    impl EndpointProbe for ScriptedProbe {
        async fn validate(&self, _endpoint: &ProxyEndpoint) -> bool {
            self.verdicts.lock().pop_front().unwrap_or(false)
        }
    }

    fn acquirer(max_retries: u32) -> EgressAcquirer {
        EgressAcquirer::new(
            Arc::new(IdentityRegistry::new()),
            AcquirePolicy {
                max_retries,
                settle_delay: Duration::from_secs(5),
                retry_delay: Duration::from_secs(10),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_fresh_ip_wins() {
        let acquirer = acquirer(20);
        let source = ScriptedSource::new(vec![Ok("198.51.100.1")]);

        let handle = acquirer.acquire_circuit(&source, 1).await.unwrap();
        assert_eq!(handle.observed_ip.as_deref(), Some("198.51.100.1"));
        assert!(handle.unique);
        assert!(acquirer.registry().has("198.51.100.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_are_skipped_until_a_fresh_ip_appears() {
        let acquirer = acquirer(20);
        acquirer.registry().add("198.51.100.1"); // A already burned by another worker

        let source = ScriptedSource::new(vec![
            Ok("198.51.100.1"),
            Ok("198.51.100.1"),
            Ok("198.51.100.1"),
            Ok("198.51.100.2"),
        ]);

        let handle = acquirer.acquire_circuit(&source, 1).await.unwrap();
        assert_eq!(handle.observed_ip.as_deref(), Some("198.51.100.2"));
        assert!(handle.unique);
        assert!(acquirer.registry().has("198.51.100.2"));
        assert_eq!(acquirer.registry().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_falls_back_to_the_duplicate() {
        let acquirer = acquirer(2);
        acquirer.registry().add("198.51.100.1");

        let source = ScriptedSource::new(vec![Ok("198.51.100.1"), Ok("198.51.100.1")]);

        let handle = acquirer.acquire_circuit(&source, 1).await.unwrap();
        assert_eq!(handle.observed_ip.as_deref(), Some("198.51.100.1"));
        assert!(!handle.unique);
        // No second copy is registered on fallback
        assert_eq!(acquirer.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failures_are_soft() {
        let acquirer = acquirer(20);
        let source = ScriptedSource::new(vec![Err(()), Err(()), Ok("198.51.100.9")]);

        let handle = acquirer.acquire_circuit(&source, 1).await.unwrap();
        assert_eq!(handle.observed_ip.as_deref(), Some("198.51.100.9"));
        assert!(handle.unique);
    }

    #[tokio::test(start_paused = true)]
    async fn never_observing_an_ip_still_yields_a_handle() {
        let acquirer = acquirer(3);
        let source = ScriptedSource::new(vec![]);

        let handle = acquirer.acquire_circuit(&source, 1).await.unwrap();
        assert!(handle.observed_ip.is_none());
        assert!(!handle.unique);
        assert!(acquirer.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn control_channel_failure_is_fatal() {
        let acquirer = acquirer(20);
        let err = acquirer.acquire_circuit(&BrokenControl, 1).await.unwrap_err();
        assert!(matches!(err, EgressError::ControlChannel(_)));
    }

    #[tokio::test]
    async fn scraped_survivor_is_returned_and_pool_drains() {
        let acquirer = acquirer(20);
        let pool = ProxyCandidatePool::from_list(
            "http://10.0.0.1:80\nhttp://10.0.0.2:80\nhttp://10.0.0.3:80",
        );
        let probe = ScriptedProbe::new(vec![false, false, true]);

        let handle = acquirer.acquire_scraped(&pool, &probe, 1).await.unwrap();
        assert!(handle.proxy_url.starts_with("http://10.0.0."));
        assert!(handle.observed_ip.is_none());
        // Failed candidates removed, survivor consumed after hand-off
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn scraped_empty_pool_is_a_hard_failure() {
        let acquirer = acquirer(20);
        let pool = ProxyCandidatePool::from_list("");
        let probe = ScriptedProbe::new(vec![]);

        let err = acquirer.acquire_scraped(&pool, &probe, 1).await.unwrap_err();
        assert!(matches!(err, EgressError::NoValidProxy));
    }

    #[tokio::test]
    async fn scraped_all_invalid_exhausts_the_pool() {
        let acquirer = acquirer(20);
        let pool = ProxyCandidatePool::from_list("http://10.0.0.1:80\nhttp://10.0.0.2:80");
        let probe = ScriptedProbe::new(vec![false, false]);

        let err = acquirer.acquire_scraped(&pool, &probe, 1).await.unwrap_err();
        assert!(matches!(err, EgressError::NoValidProxy));
        assert!(pool.is_empty());
    }
}
