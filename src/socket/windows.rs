//! ICMP sockets on Windows.
//!
//! Windows only offers raw ICMP sockets, and those cannot be registered with
//! the tokio reactor, so each read runs on the blocking pool with the socket
//! read timeout set to the attempt deadline.

use socket2::{SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::task;
use tokio::time::Instant;
use tracing::debug;

use super::{SocketConfigurator, SocketKind, protocol_for};
use crate::error::{ProbeError, ProbeResult};
use crate::packet::Family;

/// A raw ICMP socket owned by a single ping call.
///
/// A read still pending on the blocking pool keeps the socket alive until
/// its read timeout expires; it is closed when the last handle drops.
pub struct IcmpSocket {
    socket: Arc<Socket>,
    family: Family,
}

impl IcmpSocket {
    pub fn kind(&self) -> SocketKind {
        SocketKind::Raw
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Sends one ICMP message to `target`.
    pub async fn send_to(&self, buf: &[u8], target: IpAddr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddr::new(target, 0));
        self.socket.send_to(buf, &addr)
    }

    /// Reads one packet, failing with `TimedOut` once `deadline` passes.
    /// IPv4 packets include the IP header.
    pub async fn recv(&self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        let wait = deadline.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }

        let socket = Arc::clone(&self.socket);
        let capacity = buf.len();
        let (data, len) = task::spawn_blocking(move || {
            socket.set_read_timeout(Some(wait))?;
            let mut data = vec![0u8; capacity];
            let mut reader: &Socket = &socket;
            let len = reader.read(&mut data)?;
            Ok::<_, io::Error>((data, len))
        })
        .await
        .map_err(io::Error::other)??;

        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}

pub(super) fn open_icmp(
    family: Family,
    kind: SocketKind,
    configurator: &SocketConfigurator,
) -> ProbeResult<IcmpSocket> {
    if kind == SocketKind::Datagram {
        return Err(ProbeError::setup(
            "listen",
            io::Error::new(
                io::ErrorKind::Unsupported,
                "datagram ICMP sockets are not available on Windows",
            ),
        ));
    }

    let (domain, protocol) = protocol_for(family);
    let socket =
        Socket::new(domain, Type::RAW, Some(protocol)).map_err(|e| ProbeError::setup("listen", e))?;

    configurator.apply(&socket);

    // Raw sockets must be bound before Windows delivers anything to them.
    let unspecified = match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    socket
        .bind(&SockAddr::from(SocketAddr::new(unspecified, 0)))
        .map_err(|e| ProbeError::setup("bind", e))?;

    debug!(?family, "created raw icmp socket");
    Ok(IcmpSocket {
        socket: Arc::new(socket),
        family,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_datagram_kind_is_rejected() {
        let err = open_icmp(Family::V4, SocketKind::Datagram, &SocketConfigurator::noop())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Setup);
    }

    #[tokio::test]
    async fn test_recv_past_deadline_times_out() {
        let Ok(socket) = open_icmp(Family::V4, SocketKind::Raw, &SocketConfigurator::noop())
        else {
            // Raw sockets need an elevated process.
            return;
        };
        let mut buf = [0u8; 64];
        let err = socket.recv(&mut buf, Instant::now()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
