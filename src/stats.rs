//! Lock-free campaign statistics
//!
//! Atomic counters shared by every worker task; no mutex contention on the
//! hot path.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::session::SessionStatus;

/// Counters aggregated across all workers and rounds
#[derive(Debug, Default)]
pub struct CampaignStats {
    pub completed: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    pub rounds_done: AtomicU64,
}

impl CampaignStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one settled session outcome
    pub fn record(&self, status: &SessionStatus) {
        match status {
            SessionStatus::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            SessionStatus::SkippedNoEgress | SessionStatus::SkippedSignInRequired => {
                self.skipped.fetch_add(1, Ordering::Relaxed)
            }
            SessionStatus::Failed(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Mark one round as fully settled
    pub fn round_done(&self) {
        self.rounds_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get snapshot for the summary log
    pub fn snapshot(&self) -> CampaignStatsSnapshot {
        CampaignStatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rounds_done: self.rounds_done.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of campaign stats
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStatsSnapshot {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub rounds_done: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_buckets_by_status() {
        let stats = CampaignStats::new();
        stats.record(&SessionStatus::Completed);
        stats.record(&SessionStatus::Completed);
        stats.record(&SessionStatus::SkippedNoEgress);
        stats.record(&SessionStatus::SkippedSignInRequired);
        stats.record(&SessionStatus::Failed("boom".into()));

        let snap = stats.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.skipped, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.rounds_done, 0);
    }
}
