//! Session contract and outcomes
//!
//! The worker pool hands an acquired egress to a `SessionDriver` and records
//! whatever comes back as a `SessionOutcome`. Page behavior lives behind the
//! driver seam; the pool never sees a browser.

mod browser;

pub use browser::{BrowserRunner, BrowserRunnerConfig};

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

use crate::egress::EgressHandle;

/// Everything one session run needs, owned for the session's lifetime
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub worker_id: usize,
    pub round: usize,
    /// Acquired egress, exclusive to this session
    pub egress: EgressHandle,
    /// Where the diagnostic snapshot for this worker/round goes
    pub artifact_path: PathBuf,
}

/// How a session that ran to its own end finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Target was watched for the configured duration
    Watched,
    /// Page demanded sign-in; nothing to watch without an account
    SignInRequired,
}

/// Failures during the page-interaction phase. Always caught per-session and
/// recorded; never propagated to sibling workers or the round barrier.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Page interaction failed: {0}")]
    Interaction(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Drives one browser session end-to-end over an acquired egress
pub trait SessionDriver: Send + Sync {
    fn run(&self, ctx: SessionContext) -> impl Future<Output = Result<SessionEnd, SessionError>> + Send;
}

/// Final status of one worker slot in one round
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Completed,
    SkippedNoEgress,
    SkippedSignInRequired,
    Failed(String),
}

/// Record of one worker's session in one round, consumed for logging and
/// aggregation only
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub worker_id: usize,
    pub round: usize,
    pub status: SessionStatus,
    /// Diagnostic snapshot, when capture succeeded
    pub artifact: Option<PathBuf>,
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}
