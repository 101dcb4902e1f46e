use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::config::{ProbeConfig, TargetConfig};
use crate::error::ProbeResult;
use crate::socket::SocketConfigurator;

pub mod budget;
pub mod icmp;
pub mod tcp_connect;

use icmp::IcmpProber;
use tcp_connect::TcpProber;

/// Port used for TCP targets configured without one.
pub const DEFAULT_TCP_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Icmp,
    TcpConnect,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Icmp => "icmp",
            ProbeKind::TcpConnect => "tcp_connect",
        }
    }
}

/// Runs configured targets through the matching prober.
#[derive(Debug, Clone)]
pub struct LatencyProber {
    icmp: IcmpProber,
    tcp: TcpProber,
    default_timeout: Duration,
    payload: Vec<u8>,
}

impl Default for LatencyProber {
    fn default() -> Self {
        Self::from_config(&ProbeConfig::default())
    }
}

impl LatencyProber {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            icmp: IcmpProber::from_config(config),
            tcp: TcpProber::new().with_max_timeout(config.max_timeout()),
            default_timeout: config.default_timeout(),
            payload: default_payload(),
        }
    }

    /// Set the socket hook on both probers.
    pub fn with_socket_configurator(mut self, configurator: SocketConfigurator) -> Self {
        self.icmp = self.icmp.with_socket_configurator(configurator.clone());
        self.tcp = self.tcp.with_socket_configurator(configurator);
        self
    }

    /// Set the echo payload used for ICMP targets.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn icmp(&self) -> &IcmpProber {
        &self.icmp
    }

    pub fn tcp(&self) -> &TcpProber {
        &self.tcp
    }

    /// Probes a single configured target.
    pub async fn probe_target(&self, target: &TargetConfig) -> ProbeResult<Duration> {
        let timeout = target.timeout().unwrap_or(self.default_timeout);
        match target.kind {
            ProbeKind::Icmp => {
                let ip = target.ip()?;
                self.icmp.probe(ip, timeout, &self.payload).await
            }
            ProbeKind::TcpConnect => {
                let addr = target.socket_addr(DEFAULT_TCP_PORT)?;
                self.tcp.probe_addr(addr, timeout).await
            }
        }
    }

    /// Probes each target in turn, logging the outcome of every probe.
    pub async fn probe_all(
        &self,
        targets: &[TargetConfig],
    ) -> Vec<(String, ProbeResult<Duration>)> {
        let mut results = Vec::with_capacity(targets.len());
        for t in targets {
            let result = self.probe_target(t).await;
            match &result {
                Ok(latency) => {
                    info!("{} probe {} success: {:?}", t.kind.as_str(), t.host, latency);
                }
                Err(e) => {
                    error!("{} probe {} failed: {}", t.kind.as_str(), t.host, e);
                }
            }
            results.push((t.name.clone(), result));
        }
        results
    }
}

/// Echo payload identifying this process.
fn default_payload() -> Vec<u8> {
    let process_id = std::process::id() as u16;
    process_id.to_be_bytes().to_vec()
}
