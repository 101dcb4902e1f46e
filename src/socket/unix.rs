//! ICMP sockets on unix, driven by the tokio reactor.
//!
//! Datagram and raw ICMP sockets are message sockets, so once created they
//! are handed to tokio as a [`UdpSocket`] for readiness-driven send/recv.

use socket2::{Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use super::{SocketConfigurator, SocketKind, protocol_for};
use crate::error::{ProbeError, ProbeResult};
use crate::packet::Family;

/// A non-blocking ICMP socket owned by a single ping call.
///
/// Dropping it deregisters from the reactor and closes the descriptor.
pub struct IcmpSocket {
    inner: UdpSocket,
    kind: SocketKind,
    family: Family,
}

impl IcmpSocket {
    /// The kind actually opened: never [`SocketKind::Auto`].
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Sends one ICMP message to `target`.
    pub async fn send_to(&self, buf: &[u8], target: IpAddr) -> io::Result<usize> {
        self.inner.send_to(buf, SocketAddr::new(target, 0)).await
    }

    /// Reads one packet, failing with `TimedOut` once `deadline` passes.
    /// Raw IPv4 sockets include the IP header.
    pub async fn recv(&self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        match timeout_at(deadline, self.inner.recv(buf)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(io::Error::from(io::ErrorKind::TimedOut)),
        }
    }
}

pub(super) fn open_icmp(
    family: Family,
    kind: SocketKind,
    configurator: &SocketConfigurator,
) -> ProbeResult<IcmpSocket> {
    let (socket, kind) = match kind {
        SocketKind::Auto => match create(family, SocketKind::Datagram) {
            Ok(socket) => (socket, SocketKind::Datagram),
            Err(e) if should_fall_back(&e) => {
                debug!(error = %e, "datagram ICMP socket refused, trying raw socket");
                let socket = create(family, SocketKind::Raw)
                    .map_err(|e| ProbeError::setup("listen", e))?;
                (socket, SocketKind::Raw)
            }
            Err(e) => return Err(ProbeError::setup("listen", e)),
        },
        kind => {
            let socket = create(family, kind).map_err(|e| ProbeError::setup("listen", e))?;
            (socket, kind)
        }
    };

    configurator.apply(&socket);

    socket
        .set_nonblocking(true)
        .map_err(|e| ProbeError::setup("set nonblocking", e))?;
    let std_socket: std::net::UdpSocket = socket.into();
    let inner = UdpSocket::from_std(std_socket)
        .map_err(|e| ProbeError::setup("register icmp socket", e))?;

    debug!(?family, ?kind, "created icmp socket");
    Ok(IcmpSocket { inner, kind, family })
}

fn create(family: Family, kind: SocketKind) -> io::Result<Socket> {
    let (domain, protocol) = protocol_for(family);
    let ty = match kind {
        SocketKind::Raw => Type::RAW,
        SocketKind::Auto | SocketKind::Datagram => Type::DGRAM,
    };
    Socket::new(domain, ty, Some(protocol))
}

fn should_fall_back(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
        || matches!(
            err.raw_os_error(),
            Some(libc::EACCES | libc::EPERM | libc::EPROTONOSUPPORT)
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_errors() {
        assert!(should_fall_back(&io::Error::from_raw_os_error(libc::EACCES)));
        assert!(should_fall_back(&io::Error::from_raw_os_error(libc::EPERM)));
        assert!(should_fall_back(&io::Error::from_raw_os_error(
            libc::EPROTONOSUPPORT
        )));
        assert!(!should_fall_back(&io::Error::from_raw_os_error(libc::EMFILE)));
    }
}
