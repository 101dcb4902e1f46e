use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::error::ProbeResult;
use crate::prober::ProbeKind;
use crate::prober::icmp::{ECHO_IDENTIFIER, ReplyMatching};
use crate::socket::SocketKind;
use crate::target::{parse_host_port, parse_ip};

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "LATENCY_PROBE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "probe.json";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TargetConfig {
    pub name: String,
    pub kind: ProbeKind,
    /// IP literal, optionally with `:port` for TCP targets.
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TargetConfig {
    pub fn ip(&self) -> ProbeResult<IpAddr> {
        parse_ip(&self.host)
    }

    /// Resolves the target to an address, preferring the explicit `port`.
    pub fn socket_addr(&self, default_port: u16) -> ProbeResult<SocketAddr> {
        match self.port {
            Some(port) => Ok(SocketAddr::new(self.ip()?, port)),
            None => parse_host_port(&self.host, default_port),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Timeout for targets that do not set their own.
    #[serde(default = "default_max_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_echo_identifier")]
    pub echo_identifier: u16,
    #[serde(default)]
    pub socket_kind: SocketKind,
    #[serde(default)]
    pub reply_matching: ReplyMatching,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_max_timeout_ms() -> u64 {
    5000
}

fn default_attempt_timeout_ms() -> u64 {
    1000
}

fn default_echo_identifier() -> u16 {
    ECHO_IDENTIFIER
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_timeout_ms: default_max_timeout_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            default_timeout_ms: default_max_timeout_ms(),
            echo_identifier: default_echo_identifier(),
            socket_kind: SocketKind::default(),
            reply_matching: ReplyMatching::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            targets: Vec::new(),
        }
    }
}

impl ProbeConfig {
    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!(
                "Invalid log level: {}. Valid levels are: trace, debug, info, warn, error",
                self.log_level
            )),
        }
    }

    /// Validate the log level is one of the supported values
    pub fn validate_log_level(&self) -> Result<()> {
        self.get_tracing_level().map(|_| ())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_timeout_ms == 0 || self.attempt_timeout_ms == 0 || self.default_timeout_ms == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        if self.attempt_timeout_ms > self.max_timeout_ms {
            anyhow::bail!(
                "attempt_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.attempt_timeout_ms,
                self.max_timeout_ms
            );
        }
        self.validate_log_level()
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Loads and validates a JSON config file.
    pub async fn load_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        if !file_path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path.display()));
        }

        let content = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("reading {}", file_path.display()))?;
        let config: ProbeConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", file_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `file_path`, or the defaults when it does not exist.
    pub async fn load_or_default(file_path: impl AsRef<Path>) -> Result<Self> {
        if !file_path.as_ref().exists() {
            tracing::debug!(
                "config file {} not found, using defaults",
                file_path.as_ref().display()
            );
            return Ok(Self::default());
        }
        Self::load_file(file_path).await
    }

    /// Loads the file named by `LATENCY_PROBE_CONFIG` (default `probe.json`).
    pub async fn from_env() -> Result<Self> {
        let config_file =
            std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_or_default(config_file).await
    }
}
