//! Round-trip latency probes over ICMP echo and TCP connect.
//!
//! Each call opens its own socket, probes one target and closes the socket
//! before returning:
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), latency_ping::ProbeError> {
//! let rtt = latency_ping::icmp_ping("8.8.8.8", Duration::from_secs(5), b"ping").await?;
//! let connect = latency_ping::tcp_ping("8.8.8.8", "53", Duration::from_secs(5)).await?;
//! println!("icmp {rtt:?}, tcp {connect:?}");
//! # Ok(())
//! # }
//! ```
//!
//! Targets must be IP literals; hostnames are rejected with a validation
//! error rather than resolved.

pub mod config;
pub mod error;
pub mod packet;
pub mod prober;
pub mod socket;
pub mod target;

use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub use config::{LogFormat, ProbeConfig, TargetConfig};
pub use error::{ErrorKind, ProbeError, ProbeResult};
pub use prober::icmp::{ECHO_IDENTIFIER, IcmpProber, ReplyMatching};
pub use prober::tcp_connect::TcpProber;
pub use prober::{LatencyProber, ProbeKind};
pub use socket::{RawSocketHandle, SocketConfigurator, SocketKind};

/// Longest overall timeout a single probe accepts. Longer ones are clamped.
pub const MAX_TIMEOUT: Duration = Duration::from_millis(5000);

/// Pings `host` (an IP literal) with the default [`IcmpProber`].
pub async fn icmp_ping(host: &str, timeout: Duration, payload: &[u8]) -> ProbeResult<Duration> {
    let ip = target::parse_ip(host)?;
    IcmpProber::default().probe(ip, timeout, payload).await
}

/// Measures TCP connect time to `host:port` with the default [`TcpProber`].
pub async fn tcp_ping(host: &str, port: &str, timeout: Duration) -> ProbeResult<Duration> {
    let ip = target::parse_ip(host)?;
    TcpProber::default().probe(ip, port, timeout).await
}

/// Installs a global `tracing` subscriber at the configured level.
///
/// If a subscriber is already installed it is left in place and the
/// refusal is logged at debug level through it.
pub fn init_tracing(config: &ProbeConfig) -> anyhow::Result<()> {
    let log_level = config.get_tracing_level()?;
    let filter = EnvFilter::from_default_env().add_directive(
        format!("latency_ping={}", log_level.as_str().to_lowercase()).parse()?,
    );

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = installed {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
    Ok(())
}
