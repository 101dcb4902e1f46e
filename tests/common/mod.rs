#![allow(dead_code)]

use latency_ping::packet::Family;
use latency_ping::socket::{self, SocketConfigurator, SocketKind};
use latency_ping::{ProbeConfig, init_tracing};
use once_cell::sync::Lazy;

static TRACING: Lazy<()> = Lazy::new(|| {
    let config = ProbeConfig {
        log_level: "debug".to_string(),
        ..ProbeConfig::default()
    };
    init_tracing(&config).expect("tracing init");
});

pub fn setup() {
    Lazy::force(&TRACING);
}

pub const TEST_IPV4_ADDRESS: &str = "8.8.8.8";
pub const TEST_IPV6_ADDRESS: &str = "2001:4860:4860::8888";

/// Whether this environment lets us open an ICMP socket at all.
///
/// Unprivileged sandboxes often allow neither kind; tests that need one
/// return early instead of failing.
pub fn icmp_available(family: Family) -> bool {
    match socket::open_icmp(family, SocketKind::Auto, &SocketConfigurator::noop()) {
        Ok(_) => true,
        Err(e) => {
            eprintln!("skipping: cannot open ICMP socket: {e}");
            false
        }
    }
}

pub fn payload() -> Vec<u8> {
    (0..40u8).collect()
}
