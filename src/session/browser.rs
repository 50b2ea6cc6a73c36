//! Browser-backed session driver
//!
//! Launches a Chrome instance riding the acquired egress, loads the target
//! page, watches it for the configured duration, and leaves a screenshot
//! behind as the diagnostic artifact.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{SessionContext, SessionDriver, SessionEnd, SessionError};

/// Abort a browser launch that has not come up within this window
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(45);

/// Watch progress is reported and interaction simulated in slices this long
const WATCH_SLICE: Duration = Duration::from_secs(5);

/// Marker the target renders when it refuses playback to anonymous visitors
const SIGN_IN_MARKER: &str = "Sign in to confirm";

/// Plain desktop user agents, one picked at random per session
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36",
];

/// Configuration for browser-backed sessions
#[derive(Debug, Clone)]
pub struct BrowserRunnerConfig {
    /// Page every session loads
    pub target_url: String,
    /// How long each session keeps watching after navigation
    pub watch_time: Duration,
    /// Run Chrome headless
    pub headless: bool,
    /// Explicit Chrome/Chromium executable, if auto-detection is not wanted
    pub chrome_path: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserRunnerConfig {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            watch_time: Duration::from_secs(50),
            headless: true,
            chrome_path: None,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// Find a Chrome/Chromium executable on the system
fn find_chrome() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Per-session scratch Chrome profile path, never shared between sessions
fn scratch_profile_dir() -> PathBuf {
    std::env::temp_dir()
        .join("viewfarm")
        .join("browser_data")
        .join(Uuid::new_v4().to_string())
}

/// Remove a session's scratch profile after teardown
async fn remove_scratch_profile(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        debug!("Failed to remove scratch profile {}: {}", dir.display(), e);
    }
}

/// Chromium-backed `SessionDriver`
pub struct BrowserRunner {
    config: BrowserRunnerConfig,
}

impl BrowserRunner {
    pub fn new(config: BrowserRunnerConfig) -> Self {
        Self { config }
    }

    async fn launch(&self, ctx: &SessionContext, profile_dir: &Path) -> Result<(Browser, Page), SessionError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.config.window_width, self.config.window_height)
            .user_data_dir(profile_dir)
            .args(vec![
                "--no-sandbox".to_string(),
                "--disable-setuid-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
                format!("--proxy-server={}", ctx.egress.proxy_url),
            ]);

        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref path) = self.config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(path) = find_chrome() {
            builder = builder.chrome_executable(path);
        } else {
            return Err(SessionError::Launch(
                "no Chrome/Chromium executable found".to_string(),
            ));
        }

        let browser_config = builder.build().map_err(SessionError::Launch)?;

        info!(
            "Worker {} round {}: launching browser via {}",
            ctx.worker_id, ctx.round, ctx.egress.proxy_url
        );

        let (browser, mut handler) = timeout(LAUNCH_TIMEOUT, Browser::launch(browser_config))
            .await
            .map_err(|_| SessionError::Timeout("browser launch timed out".to_string()))?
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        // Drive CDP events until Chrome disconnects
        let worker_id = ctx.worker_id;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Worker {} browser handler error: {}", worker_id, e);
                    break;
                }
            }
            debug!("Worker {} browser disconnected (handler ended)", worker_id);
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        page.set_user_agent(user_agent)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        Ok((browser, page))
    }

    /// Navigate and watch. Runs to its own end; the caller captures the
    /// artifact and tears the browser down regardless of the result.
    async fn drive(&self, page: &Page, ctx: &SessionContext) -> Result<SessionEnd, SessionError> {
        page.goto(self.config.target_url.as_str())
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;

        let content = page
            .content()
            .await
            .map_err(|e| SessionError::Interaction(e.to_string()))?;
        if content.contains(SIGN_IN_MARKER) {
            info!("Worker {} round {}: sign-in wall detected, skipping", ctx.worker_id, ctx.round);
            return Ok(SessionEnd::SignInRequired);
        }

        let slices = (self.config.watch_time.as_secs() / WATCH_SLICE.as_secs()).max(1);
        info!(
            "Worker {} round {}: watching {} for {}s",
            ctx.worker_id,
            ctx.round,
            self.config.target_url,
            slices * WATCH_SLICE.as_secs()
        );

        for i in 0..slices {
            if i != 0 && i % 3 == 0 {
                if let Err(e) = page.evaluate("window.scrollBy(0, 100)").await {
                    return Err(SessionError::Interaction(e.to_string()));
                }
            }
            sleep(WATCH_SLICE).await;
            debug!(
                "Worker {} round {}: {}%",
                ctx.worker_id,
                ctx.round,
                ((i + 1) * 100) / slices
            );
        }

        Ok(SessionEnd::Watched)
    }

    /// Best-effort diagnostic snapshot. Capture failures are logged and
    /// swallowed; they never change the session outcome.
    async fn capture_artifact(&self, page: &Page, ctx: &SessionContext) {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        match page.screenshot(params).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&ctx.artifact_path, bytes).await {
                    warn!(
                        "Worker {} round {}: failed to write snapshot {}: {}",
                        ctx.worker_id,
                        ctx.round,
                        ctx.artifact_path.display(),
                        e
                    );
                } else {
                    info!(
                        "Worker {} round {}: snapshot saved to {}",
                        ctx.worker_id,
                        ctx.round,
                        ctx.artifact_path.display()
                    );
                }
            }
            Err(e) => {
                warn!("Worker {} round {}: snapshot capture failed: {}", ctx.worker_id, ctx.round, e);
            }
        }
    }
}

impl SessionDriver for BrowserRunner {
    async fn run(&self, ctx: SessionContext) -> Result<SessionEnd, SessionError> {
        let profile_dir = scratch_profile_dir();
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| SessionError::Launch(format!("failed to create scratch profile: {}", e)))?;

        let result = match self.launch(&ctx, &profile_dir).await {
            Ok((mut browser, page)) => {
                let result = self.drive(&page, &ctx).await;

                self.capture_artifact(&page, &ctx).await;

                if let Err(e) = browser.close().await {
                    warn!("Worker {} round {}: browser close failed: {}", ctx.worker_id, ctx.round, e);
                }
                let _ = browser.wait().await;

                result
            }
            Err(e) => Err(e),
        };

        remove_scratch_profile(&profile_dir).await;

        result
    }
}
