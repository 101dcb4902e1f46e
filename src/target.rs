// Target validation. Hostnames are rejected here; resolving them is the
// caller's job.

use std::net::{IpAddr, SocketAddr};

use crate::error::{ProbeError, ProbeResult};

/// Parses an IP literal, accepting the bracketed `[v6]` form.
///
/// IPv4-mapped IPv6 addresses come back as plain IPv4.
pub fn parse_ip(host: &str) -> ProbeResult<IpAddr> {
    let trimmed = host.trim();
    let literal = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    literal
        .parse::<IpAddr>()
        .map(|ip| ip.to_canonical())
        .map_err(|_| ProbeError::InvalidTarget {
            input: host.to_string(),
        })
}

/// Parses a TCP port. Port 0 cannot be connected to and is rejected.
pub fn parse_port(port: &str) -> ProbeResult<u16> {
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ProbeError::InvalidPort {
            input: port.to_string(),
        }),
        Ok(port) => Ok(port),
    }
}

/// Splits `host:port` (or `[v6]:port`) into a socket address.
///
/// A bare IP literal gets `default_port`.
pub fn parse_host_port(s: &str, default_port: u16) -> ProbeResult<SocketAddr> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = parse_ip(s) {
        return Ok(SocketAddr::new(ip, default_port));
    }

    if let Some(idx) = s.rfind(':') {
        let ip = parse_ip(&s[..idx])?;
        let port = parse_port(&s[idx + 1..])?;
        return Ok(SocketAddr::new(ip, port));
    }

    Err(ProbeError::InvalidTarget {
        input: s.to_string(),
    })
}
