//! Managed anonymizing circuits
//!
//! One `ManagedCircuit` wraps a single Tor-style instance: a control port for
//! identity rotation and a SOCKS data port the browser and the IP probe ride
//! through. Circuits in a pool are derived from base ports plus the worker
//! index, so circuit i always maps to control_base+i / data_base+i.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::EgressError;

/// Public address-echo endpoint used as the uniqueness signal
pub const IP_ECHO_URL: &str = "https://api.ipify.org/?format=json";

/// Timeout for control-channel connect and each reply line
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the data-plane IP probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Abstraction over one rotatable egress identity.
///
/// The acquirer only needs rotation, a probe, and the proxy URL a session
/// should use; tests script these instead of talking to a real circuit.
pub trait IdentitySource: Send + Sync {
    /// Request a new identity on the control channel. Failure is fatal for
    /// the acquisition (the control plane itself is broken).
    fn rotate_identity(&self) -> impl Future<Output = Result<(), EgressError>> + Send;

    /// Observe the current public IP through the data plane. Failure is soft
    /// (the exit may still be settling) and the caller retries.
    fn probe_ip(&self) -> impl Future<Output = Result<String, EgressError>> + Send;

    /// Proxy URL a browser session uses to ride this egress
    fn proxy_url(&self) -> String;
}

/// A single managed circuit instance. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ManagedCircuit {
    host: String,
    control_port: u16,
    data_port: u16,
    control_password: String,
    probe_timeout: Duration,
}

impl ManagedCircuit {
    /// Create a circuit for the given control/data port pair
    pub fn new(host: &str, control_port: u16, data_port: u16, control_password: &str) -> Self {
        Self {
            host: host.to_string(),
            control_port,
            data_port,
            control_password: control_password.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the IP probe timeout
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Build a fixed-size ordered pool of circuits from base ports
    pub fn pool(host: &str, control_base: u16, data_base: u16, size: usize, password: &str) -> Vec<Self> {
        (0..size)
            .map(|i| Self::new(host, control_base + i as u16, data_base + i as u16, password))
            .collect()
    }

    /// Data-plane SOCKS URL with remote DNS (used by the probe client)
    fn socks_url(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.data_port)
    }

    /// Control-channel exchange: authenticate, then request a new identity.
    /// Both commands must be acknowledged with a 250 reply.
    async fn signal_new_identity(&self) -> Result<(), EgressError> {
        let addr = format!("{}:{}", self.host, self.control_port);

        let stream = timeout(CONTROL_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| EgressError::ControlChannel(format!("connect to {} timed out", addr)))?
            .map_err(|e| EgressError::ControlChannel(format!("connect to {} failed: {}", addr, e)))?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let auth = format!("AUTHENTICATE \"{}\"\r\n", self.control_password);
        write_half
            .write_all(auth.as_bytes())
            .await
            .map_err(|e| EgressError::ControlChannel(format!("write AUTHENTICATE failed: {}", e)))?;
        expect_ok(&mut reader, "AUTHENTICATE").await?;

        write_half
            .write_all(b"SIGNAL NEWNYM\r\n")
            .await
            .map_err(|e| EgressError::ControlChannel(format!("write SIGNAL NEWNYM failed: {}", e)))?;
        expect_ok(&mut reader, "SIGNAL NEWNYM").await?;

        let _ = write_half.write_all(b"QUIT\r\n").await;

        debug!("Circuit {}:{} accepted new-identity signal", self.host, self.control_port);
        Ok(())
    }
}

impl IdentitySource for ManagedCircuit {
    async fn rotate_identity(&self) -> Result<(), EgressError> {
        info!("Requesting new identity on {}:{}", self.host, self.control_port);
        self.signal_new_identity().await
    }

    async fn probe_ip(&self) -> Result<String, EgressError> {
        let proxy = reqwest::Proxy::all(self.socks_url())
            .map_err(|e| EgressError::ProbeFailed(format!("invalid SOCKS URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.probe_timeout)
            .build()
            .map_err(|e| EgressError::ProbeFailed(format!("failed to build probe client: {}", e)))?;

        let data: serde_json::Value = client
            .get(IP_ECHO_URL)
            .send()
            .await
            .map_err(|e| EgressError::ProbeFailed(format!("probe request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| EgressError::ProbeFailed(format!("probe response not JSON: {}", e)))?;

        data.get("ip")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| EgressError::ProbeFailed("no ip field in probe response".to_string()))
    }

    fn proxy_url(&self) -> String {
        // Chrome's --proxy-server only understands plain socks5
        format!("socks5://{}:{}", self.host, self.data_port)
    }
}

/// Parse the 3-digit status code prefix of a control-channel reply
fn reply_code(line: &str) -> Option<u16> {
    line.get(..3)?.parse().ok()
}

/// Read one reply line and require a 250 acknowledgement
async fn expect_ok<R>(reader: &mut BufReader<R>, command: &str) -> Result<(), EgressError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let read = timeout(CONTROL_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| EgressError::ControlChannel(format!("{}: reply timed out", command)))?
        .map_err(|e| EgressError::ControlChannel(format!("{}: read failed: {}", command, e)))?;

    if read == 0 {
        return Err(EgressError::ControlChannel(format!("{}: connection closed", command)));
    }

    match reply_code(line.trim()) {
        Some(250) => Ok(()),
        _ => Err(EgressError::ControlChannel(format!("{}: rejected: {}", command, line.trim()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn reply_code_parsing() {
        assert_eq!(reply_code("250 OK"), Some(250));
        assert_eq!(reply_code("515 Bad authentication"), Some(515));
        assert_eq!(reply_code("ok"), None);
        assert_eq!(reply_code(""), None);
    }

    /// Stub control server that answers every command with the given replies
    async fn stub_control_server(replies: Vec<&'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            for reply in replies {
                let n = stream.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    return;
                }
                let _ = stream.write_all(reply.as_bytes()).await;
            }
        });

        port
    }

    #[tokio::test]
    async fn rotation_succeeds_on_250_replies() {
        let port = stub_control_server(vec!["250 OK\r\n", "250 OK\r\n"]).await;
        let circuit = ManagedCircuit::new("127.0.0.1", port, 9001, "secret");
        circuit.rotate_identity().await.unwrap();
    }

    #[tokio::test]
    async fn rotation_fails_on_auth_rejection() {
        let port = stub_control_server(vec!["515 Bad authentication\r\n"]).await;
        let circuit = ManagedCircuit::new("127.0.0.1", port, 9001, "wrong");
        let err = circuit.rotate_identity().await.unwrap_err();
        assert!(matches!(err, EgressError::ControlChannel(_)));
    }

    #[tokio::test]
    async fn rotation_fails_when_nothing_listens() {
        // Bind then drop to get a port that refuses connections
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let circuit = ManagedCircuit::new("127.0.0.1", port, 9001, "");
        let err = circuit.rotate_identity().await.unwrap_err();
        assert!(matches!(err, EgressError::ControlChannel(_)));
    }

    #[test]
    fn pool_maps_index_to_port_pair() {
        let pool = ManagedCircuit::pool("10.0.0.5", 7001, 9001, 3, "pw");
        assert_eq!(pool.len(), 3);
        assert_eq!(pool[0].control_port, 7001);
        assert_eq!(pool[2].control_port, 7003);
        assert_eq!(pool[2].data_port, 9003);
        assert_eq!(pool[1].proxy_url(), "socks5://10.0.0.5:9002");
    }
}
