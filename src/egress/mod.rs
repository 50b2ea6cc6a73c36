//! Egress rotation and acquisition
//!
//! Two source kinds share one acquisition contract: managed circuits rotate
//! their identity on a control channel and are deduplicated by observed
//! public IP; scraped proxies are popped from a shrinking candidate pool and
//! deduplicated by endpoint.

mod acquirer;
mod circuit;
mod errors;
mod registry;
mod scraped;

pub use acquirer::{AcquirePolicy, EgressAcquirer, EgressHandle};
pub use circuit::{IdentitySource, ManagedCircuit, DEFAULT_PROBE_TIMEOUT, IP_ECHO_URL};
pub use errors::EgressError;
pub use registry::IdentityRegistry;
pub use scraped::{EndpointProbe, HttpEndpointProbe, ProxyCandidatePool, ProxyEndpoint, DEFAULT_VALIDATE_TIMEOUT};

use std::future::Future;
use std::sync::Arc;

/// One configured egress source a worker can acquire through
pub enum EgressSource {
    /// A managed circuit dedicated to one worker slot
    Circuit(ManagedCircuit),
    /// The shared scraped-proxy candidate pool
    Scraped {
        pool: Arc<ProxyCandidatePool>,
        probe: HttpEndpointProbe,
    },
}

/// Seam between the worker pool and egress acquisition. The pool schedules
/// workers without knowing which source kind backs them; tests stub this.
pub trait EgressProvider: Send + Sync {
    fn acquire(&self, worker_id: usize) -> impl Future<Output = Result<EgressHandle, EgressError>> + Send;
}

/// Production egress provider: a fixed, ordered set of sources plus the
/// acquirer and its campaign-lifetime registry. Worker k is assigned
/// source k mod len, so circuit k stays pinned to worker slot k.
pub struct SourcePool {
    acquirer: EgressAcquirer,
    sources: Vec<EgressSource>,
}

impl SourcePool {
    pub fn new(acquirer: EgressAcquirer, sources: Vec<EgressSource>) -> Self {
        Self { acquirer, sources }
    }

    /// Build a per-worker circuit fleet
    pub fn circuits(acquirer: EgressAcquirer, circuits: Vec<ManagedCircuit>) -> Self {
        Self::new(acquirer, circuits.into_iter().map(EgressSource::Circuit).collect())
    }

    /// Build a provider backed by one shared scraped-proxy pool
    pub fn scraped(acquirer: EgressAcquirer, pool: ProxyCandidatePool, probe: HttpEndpointProbe) -> Self {
        Self::new(
            acquirer,
            vec![EgressSource::Scraped {
                pool: Arc::new(pool),
                probe,
            }],
        )
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Registry shared by every acquisition in this campaign
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        self.acquirer.registry()
    }
}

impl EgressProvider for SourcePool {
    async fn acquire(&self, worker_id: usize) -> Result<EgressHandle, EgressError> {
        if self.sources.is_empty() {
            return Err(EgressError::NoValidProxy);
        }
        let source = &self.sources[worker_id % self.sources.len()];
        match source {
            EgressSource::Circuit(circuit) => self.acquirer.acquire_circuit(circuit, worker_id).await,
            EgressSource::Scraped { pool, probe } => {
                self.acquirer.acquire_scraped(pool, probe, worker_id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_source_pool_refuses_acquisition() {
        let acquirer = EgressAcquirer::new(Arc::new(IdentityRegistry::new()), AcquirePolicy::default());
        let pool = SourcePool::new(acquirer, Vec::new());

        let err = pool.acquire(0).await.unwrap_err();
        assert!(matches!(err, EgressError::NoValidProxy));
    }
}
