//! viewfarm
//!
//! Orchestrates concurrent headless-browser view sessions, each routed
//! through its own anonymized egress (managed circuits or scraped public
//! proxies), across repeated campaign rounds.

pub mod artifacts;
pub mod campaign;
pub mod egress;
pub mod session;
pub mod stats;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use egress::{AcquirePolicy, ManagedCircuit};
use session::BrowserRunnerConfig;

/// Default remote proxy list (newline-separated `scheme://host:port` entries)
pub const DEFAULT_PROXY_LIST_URL: &str =
    "https://api.proxyscrape.com/v4/free-proxy-list/get?request=display_proxies&proxy_format=protocolipport&format=text";

/// Which egress source topology the campaign uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EgressMode {
    /// One managed circuit per worker slot, rotated via its control port
    Circuit,
    /// A shared pool of scraped public proxies, validated before use
    Scraped,
}

/// Campaign configuration, environment-style key/value with defaults.
/// The process has a single entry point and no other CLI surface.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignConfig {
    pub mode: EgressMode,

    /// Host running the managed circuit instances
    pub egress_host: String,
    /// Control port of circuit 0; circuit i listens at base + i
    pub control_base_port: u16,
    /// SOCKS data port of circuit 0; circuit i listens at base + i
    pub data_base_port: u16,
    pub control_password: String,

    /// Remote proxy list, fetched once at campaign start (scraped mode)
    pub proxy_list_url: String,

    /// Page every session loads
    pub target_url: String,

    /// Concurrent workers per round
    pub workers: usize,
    /// Campaign rounds
    pub rounds: usize,
    /// Per-session watch duration in seconds
    pub watch_time_sec: u64,
    /// Delay between consecutive worker launches
    pub stagger_sec: u64,

    /// Rotate-and-probe attempts before accepting a duplicate identity
    pub max_ip_retries: u32,
    /// Fixed delay between acquisition attempts
    pub ip_retry_delay_sec: u64,

    /// Snapshot output directory, cleared at campaign start
    pub artifact_dir: String,

    pub headless: bool,
    pub chrome_path: Option<String>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            mode: EgressMode::Circuit,
            egress_host: "127.0.0.1".to_string(),
            control_base_port: 7001,
            data_base_port: 9001,
            control_password: String::new(),
            proxy_list_url: DEFAULT_PROXY_LIST_URL.to_string(),
            target_url: "https://www.youtube.com/watch?v=BPydARoYxa4".to_string(),
            workers: 10,
            rounds: 10,
            watch_time_sec: 50,
            stagger_sec: 5,
            max_ip_retries: 20,
            ip_retry_delay_sec: 10,
            artifact_dir: "screenshots".to_string(),
            headless: true,
            chrome_path: None,
        }
    }
}

impl CampaignConfig {
    /// Load from process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an injectable lookup (tests never touch process env)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mode = match lookup("EGRESS_MODE").as_deref() {
            None | Some("circuit") => EgressMode::Circuit,
            Some("scraped") => EgressMode::Scraped,
            Some(other) => {
                warn!("Unknown EGRESS_MODE '{}', falling back to circuit", other);
                EgressMode::Circuit
            }
        };

        // Without a display there is nothing for a headed Chrome to attach to
        let headless_default = lookup("DISPLAY").map(|d| d.is_empty()).unwrap_or(true);

        Self {
            mode,
            egress_host: lookup("EGRESS_HOST").unwrap_or(defaults.egress_host),
            control_base_port: parsed(&lookup, "EGRESS_CONTROL_BASE_PORT", defaults.control_base_port),
            data_base_port: parsed(&lookup, "EGRESS_DATA_BASE_PORT", defaults.data_base_port),
            control_password: lookup("EGRESS_CONTROL_PASSWORD").unwrap_or(defaults.control_password),
            proxy_list_url: lookup("PROXY_LIST_URL").unwrap_or(defaults.proxy_list_url),
            target_url: lookup("TARGET_URL").unwrap_or(defaults.target_url),
            workers: parsed(&lookup, "WORKERS", defaults.workers).max(1),
            rounds: parsed(&lookup, "RERUN_TIMES", defaults.rounds).max(1),
            watch_time_sec: parsed(&lookup, "WATCH_TIME_SEC", defaults.watch_time_sec).max(30),
            stagger_sec: parsed(&lookup, "STAGGER_SEC", defaults.stagger_sec),
            max_ip_retries: parsed(&lookup, "MAX_IP_RETRIES", defaults.max_ip_retries).max(1),
            ip_retry_delay_sec: parsed(&lookup, "IP_RETRY_DELAY_SEC", defaults.ip_retry_delay_sec),
            artifact_dir: lookup("ARTIFACT_DIR").unwrap_or(defaults.artifact_dir),
            headless: parsed(&lookup, "HEADLESS", headless_default),
            chrome_path: lookup("CHROME_PATH").filter(|p| !p.is_empty()),
        }
    }

    /// Acquisition retry tuning derived from this config
    pub fn acquire_policy(&self) -> AcquirePolicy {
        AcquirePolicy {
            max_retries: self.max_ip_retries,
            retry_delay: Duration::from_secs(self.ip_retry_delay_sec),
            ..AcquirePolicy::default()
        }
    }

    /// Pool sizing and pacing derived from this config
    pub fn pool_config(&self) -> campaign::PoolConfig {
        campaign::PoolConfig {
            workers: self.workers,
            rounds: self.rounds,
            stagger: Duration::from_secs(self.stagger_sec),
        }
    }

    /// Browser session settings derived from this config
    pub fn browser_config(&self) -> BrowserRunnerConfig {
        BrowserRunnerConfig {
            target_url: self.target_url.clone(),
            watch_time: Duration::from_secs(self.watch_time_sec),
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            ..BrowserRunnerConfig::default()
        }
    }

    /// The fixed, ordered circuit fleet: one circuit per worker slot
    pub fn circuits(&self) -> Vec<ManagedCircuit> {
        ManagedCircuit::pool(
            &self.egress_host,
            self.control_base_port,
            self.data_base_port,
            self.workers,
            &self.control_password,
        )
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Could not parse {}='{}', using default", key, raw);
                default
            }
        },
        None => default,
    }
}

/// Get log directory path
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("viewfarm").join("logs"))
}

/// Initialize logging: console always, plus a daily-rolling file when a log
/// directory is available
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "viewfarm.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        let config = CampaignConfig::from_lookup(|_| None);
        assert_eq!(config.mode, EgressMode::Circuit);
        assert_eq!(config.control_base_port, 7001);
        assert_eq!(config.data_base_port, 9001);
        assert_eq!(config.workers, 10);
        assert_eq!(config.rounds, 10);
        assert!(config.headless);
    }

    #[test]
    fn values_are_parsed_from_lookup() {
        let config = CampaignConfig::from_lookup(lookup_from(&[
            ("EGRESS_MODE", "scraped"),
            ("EGRESS_HOST", "10.1.2.3"),
            ("WORKERS", "4"),
            ("RERUN_TIMES", "2"),
            ("WATCH_TIME_SEC", "90"),
            ("EGRESS_CONTROL_BASE_PORT", "8001"),
        ]));
        assert_eq!(config.mode, EgressMode::Scraped);
        assert_eq!(config.egress_host, "10.1.2.3");
        assert_eq!(config.workers, 4);
        assert_eq!(config.rounds, 2);
        assert_eq!(config.watch_time_sec, 90);
        assert_eq!(config.control_base_port, 8001);
    }

    #[test]
    fn floors_are_enforced() {
        let config = CampaignConfig::from_lookup(lookup_from(&[
            ("WORKERS", "0"),
            ("RERUN_TIMES", "0"),
            ("WATCH_TIME_SEC", "5"),
        ]));
        assert_eq!(config.workers, 1);
        assert_eq!(config.rounds, 1);
        assert_eq!(config.watch_time_sec, 30);
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let config = CampaignConfig::from_lookup(lookup_from(&[
            ("WORKERS", "lots"),
            ("EGRESS_MODE", "smoke-signals"),
        ]));
        assert_eq!(config.workers, 10);
        assert_eq!(config.mode, EgressMode::Circuit);
    }

    #[test]
    fn circuits_map_one_per_worker_slot() {
        let config = CampaignConfig::from_lookup(lookup_from(&[("WORKERS", "3")]));
        assert_eq!(config.circuits().len(), 3);
    }
}
