use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::MAX_TIMEOUT;
use crate::error::{ProbeError, ProbeResult};
use crate::prober::budget::clamp_timeout;
use crate::socket::{self, SocketConfigurator};
use crate::target::parse_port;

/// Measures TCP handshake time. A single attempt; timeouts are not retried.
#[derive(Debug, Clone)]
pub struct TcpProber {
    max_timeout: Duration,
    configurator: SocketConfigurator,
}

impl Default for TcpProber {
    fn default() -> Self {
        Self {
            max_timeout: MAX_TIMEOUT,
            configurator: SocketConfigurator::noop(),
        }
    }
}

impl TcpProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hook applied to each socket before connect.
    pub fn with_socket_configurator(mut self, configurator: SocketConfigurator) -> Self {
        self.configurator = configurator;
        self
    }

    /// Set the cap applied to connect timeouts.
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    /// Connects to `target:port` and returns the handshake time.
    pub async fn probe(&self, target: IpAddr, port: &str, timeout: Duration) -> ProbeResult<Duration> {
        let port = parse_port(port)?;
        self.probe_addr(SocketAddr::new(target, port), timeout).await
    }

    /// Connects to `addr`; the connection is closed as soon as it is up.
    #[instrument(skip(self, addr), fields(target = %addr))]
    pub async fn probe_addr(&self, addr: SocketAddr, timeout: Duration) -> ProbeResult<Duration> {
        let limit = clamp_timeout(timeout, self.max_timeout)?;
        let socket = socket::open_tcp(&addr, &self.configurator)?;

        let start = Instant::now();
        let stream = match tokio::time::timeout(limit, socket.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(ProbeError::Timeout {
                    op: "dial",
                    elapsed: start.elapsed(),
                });
            }
            Ok(Err(e)) => return Err(ProbeError::io("dial", e)),
            Err(_) => {
                return Err(ProbeError::Timeout {
                    op: "dial",
                    elapsed: start.elapsed(),
                });
            }
        };
        let elapsed = start.elapsed();
        drop(stream);

        debug!(latency = ?elapsed, "tcp connect established");
        Ok(elapsed)
    }
}
