//! Platforms without ICMP socket support.

use std::convert::Infallible;
use std::io;
use std::net::IpAddr;
use tokio::time::Instant;

use super::{SocketConfigurator, SocketKind};
use crate::error::{ProbeError, ProbeResult};
use crate::packet::Family;

/// Never constructed: opening always fails on this platform.
pub struct IcmpSocket {
    never: Infallible,
}

impl IcmpSocket {
    pub fn kind(&self) -> SocketKind {
        match self.never {}
    }

    pub fn family(&self) -> Family {
        match self.never {}
    }

    pub async fn send_to(&self, _buf: &[u8], _target: IpAddr) -> io::Result<usize> {
        match self.never {}
    }

    pub async fn recv(&self, _buf: &mut [u8], _deadline: Instant) -> io::Result<usize> {
        match self.never {}
    }
}

pub(super) fn open_icmp(
    _family: Family,
    _kind: SocketKind,
    _configurator: &SocketConfigurator,
) -> ProbeResult<IcmpSocket> {
    Err(ProbeError::Unsupported {
        op: "open icmp socket",
    })
}
