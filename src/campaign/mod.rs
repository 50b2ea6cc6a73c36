//! Worker-pool scheduling
//!
//! Runs N concurrent session workers per round, for R rounds. Worker starts
//! are staggered by a fixed delay so rotation requests against the shared
//! control plane do not all fire at once; within a round every session runs
//! to its own end, and the round settles only when all of them have.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::egress::EgressProvider;
use crate::session::{SessionContext, SessionDriver, SessionEnd, SessionOutcome, SessionStatus};
use crate::stats::CampaignStats;

/// Pool sizing and pacing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent workers per round
    pub workers: usize,
    /// Campaign rounds
    pub rounds: usize,
    /// Fixed delay between consecutive worker launches
    pub stagger: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            rounds: 10,
            stagger: Duration::from_secs(5),
        }
    }
}

/// Runs the campaign: acquisition, session, and outcome bookkeeping per
/// worker slot, repeated across rounds. Source-agnostic via `EgressProvider`.
pub struct WorkerPool<E, D> {
    egress: Arc<E>,
    driver: Arc<D>,
    artifacts: ArtifactStore,
    stats: Arc<CampaignStats>,
    config: PoolConfig,
}

impl<E, D> WorkerPool<E, D>
where
    E: EgressProvider + 'static,
    D: SessionDriver + 'static,
{
    pub fn new(
        egress: Arc<E>,
        driver: Arc<D>,
        artifacts: ArtifactStore,
        stats: Arc<CampaignStats>,
        config: PoolConfig,
    ) -> Self {
        Self {
            egress,
            driver,
            artifacts,
            stats,
            config,
        }
    }

    /// Run all configured rounds to completion and return every outcome
    pub async fn run(&self) -> Vec<SessionOutcome> {
        let mut outcomes = Vec::with_capacity(self.config.workers * self.config.rounds);

        for round in 0..self.config.rounds {
            info!("Round {}/{}: launching {} workers", round + 1, self.config.rounds, self.config.workers);

            let round_outcomes = self.run_round(round).await;

            let completed = round_outcomes.iter().filter(|o| o.is_completed()).count();
            self.stats.round_done();
            info!(
                "Round {}/{}: {}/{} sessions completed",
                round + 1,
                self.config.rounds,
                completed,
                round_outcomes.len()
            );

            outcomes.extend(round_outcomes);
        }

        outcomes
    }

    /// One round: staggered launches, then a wait-for-all barrier. A slow
    /// session delays the round but never cancels its siblings; every network
    /// call below carries its own timeout, so the barrier cannot deadlock.
    async fn run_round(&self, round: usize) -> Vec<SessionOutcome> {
        let mut handles = Vec::with_capacity(self.config.workers);

        for worker_id in 0..self.config.workers {
            let egress = self.egress.clone();
            let driver = self.driver.clone();
            let artifact_path = self.artifacts.path_for(worker_id, round);

            handles.push(tokio::spawn(run_worker(
                egress,
                driver,
                worker_id,
                round,
                artifact_path,
            )));

            if worker_id + 1 < self.config.workers {
                sleep(self.config.stagger).await;
            }
        }

        let results = join_all(handles).await;

        results
            .into_iter()
            .enumerate()
            .map(|(worker_id, result)| {
                let outcome = result.unwrap_or_else(|e| {
                    error!("Worker {} round {}: task panicked: {}", worker_id, round, e);
                    SessionOutcome {
                        worker_id,
                        round,
                        status: SessionStatus::Failed(format!("task panicked: {}", e)),
                        artifact: None,
                    }
                });
                self.stats.record(&outcome.status);
                outcome
            })
            .collect()
    }
}

/// One worker slot: acquire an egress, drive the session, report the outcome.
/// Every failure is absorbed here; nothing propagates past the slot.
async fn run_worker<E, D>(
    egress: Arc<E>,
    driver: Arc<D>,
    worker_id: usize,
    round: usize,
    artifact_path: std::path::PathBuf,
) -> SessionOutcome
where
    E: EgressProvider,
    D: SessionDriver,
{
    let handle = match egress.acquire(worker_id).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Worker {} round {}: no egress available: {}", worker_id, round, e);
            return SessionOutcome {
                worker_id,
                round,
                status: SessionStatus::SkippedNoEgress,
                artifact: None,
            };
        }
    };

    let ctx = SessionContext {
        worker_id,
        round,
        egress: handle,
        artifact_path: artifact_path.clone(),
    };

    let status = match driver.run(ctx).await {
        Ok(SessionEnd::Watched) => SessionStatus::Completed,
        Ok(SessionEnd::SignInRequired) => SessionStatus::SkippedSignInRequired,
        Err(e) => {
            warn!("Worker {} round {}: session failed: {}", worker_id, round, e);
            SessionStatus::Failed(e.to_string())
        }
    };

    let artifact = artifact_path.exists().then_some(artifact_path);

    SessionOutcome {
        worker_id,
        round,
        status,
        artifact,
    }
}
