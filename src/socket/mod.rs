//! Socket creation for probes.
//!
//! Every probe call opens exactly one socket here and owns it until the
//! call returns. A [`SocketConfigurator`] runs on the fresh socket before
//! any I/O so callers can bind to an interface, set a mark, and so on.

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

#[cfg(not(any(unix, windows)))]
mod unsupported;

#[cfg(unix)]
pub use unix::IcmpSocket;

#[cfg(windows)]
pub use windows::IcmpSocket;

#[cfg(not(any(unix, windows)))]
pub use unsupported::IcmpSocket;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpSocket;
use tracing::debug;

use crate::error::{ProbeError, ProbeResult};
use crate::packet::Family;

/// Whether ICMP probing is available on the current platform.
pub const ICMP_SUPPORTED: bool = cfg!(any(unix, windows));

/// OS handle handed to a [`SocketConfigurator`].
#[cfg(unix)]
pub type RawSocketHandle = std::os::fd::RawFd;

/// OS handle handed to a [`SocketConfigurator`].
#[cfg(windows)]
pub type RawSocketHandle = std::os::windows::io::RawSocket;

/// Caller-supplied hook applied to each new socket before first use.
///
/// The default does nothing. The hook runs once per socket on the
/// probing task, so it must not block for long.
#[derive(Clone, Default)]
pub struct SocketConfigurator(Option<Arc<dyn Fn(RawSocketHandle) + Send + Sync>>);

impl SocketConfigurator {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(RawSocketHandle) + Send + Sync + 'static,
    {
        Self(Some(Arc::new(hook)))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    pub fn is_noop(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn apply(&self, socket: &Socket) {
        let Some(hook) = &self.0 else {
            return;
        };

        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            hook(socket.as_raw_fd());
        }

        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            hook(socket.as_raw_socket());
        }
    }
}

impl fmt::Debug for SocketConfigurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SocketConfigurator")
            .field(&if self.is_noop() { "noop" } else { "custom" })
            .finish()
    }
}

/// Which kind of ICMP socket to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    /// Unprivileged datagram socket, falling back to raw when refused.
    /// Windows has no datagram ICMP sockets and always opens a raw one.
    #[default]
    Auto,
    /// `SOCK_DGRAM` ICMP socket. On Linux the caller's group must be inside
    /// `net.ipv4.ping_group_range`.
    Datagram,
    /// `SOCK_RAW` ICMP socket. Needs root or CAP_NET_RAW.
    Raw,
}

/// Opens an ICMP socket for `family`.
///
/// Fails with [`ProbeError::Unsupported`] on platforms without ICMP
/// sockets, before anything is created. Must be called from within a tokio
/// runtime.
pub fn open_icmp(
    family: Family,
    kind: SocketKind,
    configurator: &SocketConfigurator,
) -> ProbeResult<IcmpSocket> {
    #[cfg(unix)]
    return unix::open_icmp(family, kind, configurator);

    #[cfg(windows)]
    return windows::open_icmp(family, kind, configurator);

    #[cfg(not(any(unix, windows)))]
    return unsupported::open_icmp(family, kind, configurator);
}

/// Creates a TCP socket for connecting to `addr`, with the hook applied.
pub fn open_tcp(addr: &SocketAddr, configurator: &SocketConfigurator) -> ProbeResult<TcpSocket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ProbeError::setup("create tcp socket", e))?;

    configurator.apply(&socket);

    socket
        .set_nonblocking(true)
        .map_err(|e| ProbeError::setup("set nonblocking", e))?;

    debug!(addr = %addr, "created tcp socket");
    let stream: std::net::TcpStream = socket.into();
    Ok(TcpSocket::from_std_stream(stream))
}

#[cfg_attr(not(any(unix, windows)), allow(dead_code))]
pub(crate) fn protocol_for(family: Family) -> (Domain, Protocol) {
    match family {
        Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
        Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
    }
}
