//! viewfarm - campaign entry point
//!
//! Single entry point, configured entirely through the environment. Builds
//! the egress sources, wipes the artifact directory, and runs the worker
//! pool for the configured number of rounds.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use viewfarm::artifacts::ArtifactStore;
use viewfarm::campaign::WorkerPool;
use viewfarm::egress::{
    EgressAcquirer, HttpEndpointProbe, IdentityRegistry, ProxyCandidatePool, SourcePool,
};
use viewfarm::session::BrowserRunner;
use viewfarm::stats::CampaignStats;
use viewfarm::{CampaignConfig, EgressMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = viewfarm::init_logging();

    let config = CampaignConfig::from_env();
    info!(
        "Starting viewfarm: {} workers x {} rounds ({:?} egress)",
        config.workers, config.rounds, config.mode
    );
    if let Some(dir) = viewfarm::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let artifacts = ArtifactStore::new(&config.artifact_dir);
    artifacts
        .prepare()
        .context("failed to prepare artifact directory")?;

    let registry = Arc::new(IdentityRegistry::new());
    let acquirer = EgressAcquirer::new(registry.clone(), config.acquire_policy());

    // No usable sources at campaign start is the one unrecoverable failure
    let sources = match config.mode {
        EgressMode::Circuit => SourcePool::circuits(acquirer, config.circuits()),
        EgressMode::Scraped => {
            let pool = ProxyCandidatePool::fetch(&config.proxy_list_url)
                .await
                .context("proxy list fetch failed; cannot start campaign")?;
            let probe = HttpEndpointProbe::new(&config.target_url);
            SourcePool::scraped(acquirer, pool, probe)
        }
    };
    info!("Egress ready: {} source(s)", sources.source_count());

    let stats = Arc::new(CampaignStats::new());
    let driver = Arc::new(BrowserRunner::new(config.browser_config()));
    let pool = WorkerPool::new(
        Arc::new(sources),
        driver,
        artifacts,
        stats.clone(),
        config.pool_config(),
    );

    let outcomes = pool.run().await;

    for outcome in outcomes.iter().filter(|o| !o.is_completed()) {
        warn!(
            "Worker {} round {}: {:?}",
            outcome.worker_id, outcome.round, outcome.status
        );
    }

    let snap = stats.snapshot();
    info!(
        "Campaign finished: {} completed, {} skipped, {} failed across {} rounds ({} unique egress IPs)",
        snap.completed,
        snap.skipped,
        snap.failed,
        snap.rounds_done,
        registry.len()
    );

    Ok(())
}
