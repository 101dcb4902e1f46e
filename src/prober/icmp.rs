use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::MAX_TIMEOUT;
use crate::config::ProbeConfig;
use crate::error::{ProbeError, ProbeResult, is_deadline_error};
use crate::packet::{self, Family};
use crate::prober::budget::{
    Attempt, AttemptBudget, AttemptState, MAX_ATTEMPT_TIMEOUT, clamp_timeout,
};
use crate::socket::{self, IcmpSocket, SocketConfigurator, SocketKind};

/// Identifier placed in every echo request.
///
/// Each probe owns its socket, so one constant is enough.
pub const ECHO_IDENTIFIER: u16 = 0x0DBB;

// Room for an IPv4 header with options in front of the echoed request.
const IP_HEADER_ROOM: usize = 60;
const MIN_RECV_BUFFER: usize = 1500;

/// How a received packet is matched to the outstanding request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMatching {
    /// Any packet read from a datagram socket counts as the reply.
    ///
    /// Raw sockets see all inbound ICMP traffic, so there only an echo reply
    /// carrying our identifier counts; the sequence number is not checked.
    #[default]
    Any,
    /// Only an echo reply carrying the current sequence number counts.
    /// Identifiers are also compared on raw sockets.
    Strict,
}

/// ICMP echo prober.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    max_timeout: Duration,
    attempt_timeout: Duration,
    identifier: u16,
    socket_kind: SocketKind,
    reply_matching: ReplyMatching,
    configurator: SocketConfigurator,
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self {
            max_timeout: MAX_TIMEOUT,
            attempt_timeout: MAX_ATTEMPT_TIMEOUT,
            identifier: ECHO_IDENTIFIER,
            socket_kind: SocketKind::Auto,
            reply_matching: ReplyMatching::Any,
            configurator: SocketConfigurator::noop(),
        }
    }
}

impl IcmpProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            max_timeout: config.max_timeout(),
            attempt_timeout: config.attempt_timeout(),
            identifier: config.echo_identifier,
            socket_kind: config.socket_kind,
            reply_matching: config.reply_matching,
            configurator: SocketConfigurator::noop(),
        }
    }

    /// Set the hook applied to each probe socket before use.
    pub fn with_socket_configurator(mut self, configurator: SocketConfigurator) -> Self {
        self.configurator = configurator;
        self
    }

    /// Set the longest single attempt.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the cap applied to overall timeouts.
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    pub fn with_socket_kind(mut self, kind: SocketKind) -> Self {
        self.socket_kind = kind;
        self
    }

    pub fn with_reply_matching(mut self, matching: ReplyMatching) -> Self {
        self.reply_matching = matching;
        self
    }

    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    /// Pings `target` and returns the time from the start of the call to the
    /// first reply.
    ///
    /// Attempts that see no reply are retried with the next sequence number
    /// until `timeout` is used up.
    pub async fn probe(
        &self,
        target: IpAddr,
        timeout: Duration,
        payload: &[u8],
    ) -> ProbeResult<Duration> {
        self.probe_with_cancel(target, timeout, payload, &CancellationToken::new())
            .await
    }

    /// Like [`probe`](Self::probe), aborting with [`ProbeError::Cancelled`]
    /// once `cancel` fires.
    #[instrument(skip(self, target, payload, cancel), fields(target = %target))]
    pub async fn probe_with_cancel(
        &self,
        target: IpAddr,
        timeout: Duration,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> ProbeResult<Duration> {
        if !socket::ICMP_SUPPORTED {
            return Err(ProbeError::Unsupported { op: "icmp echo" });
        }
        let overall = clamp_timeout(timeout, self.max_timeout)?;

        // Mapped addresses would otherwise be sent over an ICMPv6 socket.
        let target = target.to_canonical();
        let family = Family::of(&target);
        let socket = socket::open_icmp(family, self.socket_kind, &self.configurator)?;
        let mut buf = vec![0u8; MIN_RECV_BUFFER.max(payload.len() + 2 * IP_HEADER_ROOM)];

        let start = Instant::now();
        let mut budget = AttemptBudget::new(overall, self.attempt_timeout);
        let mut state = budget.begin();

        loop {
            state = match state {
                AttemptState::Attempting(attempt) => {
                    if cancel.is_cancelled() {
                        AttemptState::Failed(ProbeError::Cancelled { op: "icmp echo" })
                    } else {
                        match self
                            .attempt(&socket, target, &attempt, payload, &mut buf, cancel)
                            .await
                        {
                            Ok(()) => AttemptState::Success(start.elapsed()),
                            Err(e) if e.is_retryable() => AttemptState::TimedOutRetry(attempt),
                            Err(e) => AttemptState::Failed(e),
                        }
                    }
                }
                AttemptState::TimedOutRetry(attempt) => {
                    debug!(seq = attempt.sequence, "no echo reply within attempt timeout");
                    budget.retry_after(attempt)
                }
                AttemptState::Success(elapsed) => {
                    debug!(latency = ?elapsed, "icmp echo reply received");
                    return Ok(elapsed);
                }
                AttemptState::Failed(err) => return Err(err),
            };
        }
    }

    /// Sends one echo request and waits for its reply until the attempt's
    /// deadline.
    async fn attempt(
        &self,
        socket: &IcmpSocket,
        target: IpAddr,
        attempt: &Attempt,
        payload: &[u8],
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> ProbeResult<()> {
        let deadline = Instant::now() + attempt.timeout;

        let request =
            packet::build_echo_request(socket.family(), self.identifier, attempt.sequence, payload)?;
        socket
            .send_to(&request, target)
            .await
            .map_err(|e| ProbeError::io("write icmp message", e))?;
        trace!(seq = attempt.sequence, len = request.len(), "sent echo request");

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ProbeError::Cancelled { op: "icmp echo" });
                }
                received = socket.recv(buf, deadline) => received,
            };

            let len = match received {
                Ok(len) => len,
                Err(e) if is_deadline_error(&e) => {
                    return Err(ProbeError::Timeout {
                        op: "read icmp message",
                        elapsed: attempt.timeout,
                    });
                }
                Err(e) => return Err(ProbeError::io("read icmp message", e)),
            };

            let accepted = reply_accepted(
                self.reply_matching,
                socket.kind(),
                socket.family(),
                self.identifier,
                attempt.sequence,
                &buf[..len],
            );
            if accepted {
                return Ok(());
            }
            trace!(seq = attempt.sequence, len, "discarding unmatched icmp packet");
        }
    }
}

/// Whether `packet`, read from a socket of `kind`, answers the request
/// with `identifier` and `sequence`.
fn reply_accepted(
    matching: ReplyMatching,
    kind: SocketKind,
    family: Family,
    identifier: u16,
    sequence: u16,
    packet: &[u8],
) -> bool {
    let raw = kind == SocketKind::Raw;
    match matching {
        // The kernel only hands echo replies to datagram sockets.
        ReplyMatching::Any if !raw => true,
        ReplyMatching::Any => packet::parse_echo_reply(family, packet)
            .is_some_and(|reply| reply.identifier == identifier),
        ReplyMatching::Strict => packet::parse_echo_reply(family, packet)
            .is_some_and(|reply| reply.answers(identifier, sequence, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let prober = IcmpProber::default();
        assert_eq!(prober.max_timeout, Duration::from_millis(5000));
        assert_eq!(prober.attempt_timeout, Duration::from_millis(1000));
        assert_eq!(prober.identifier, 0x0DBB);
        assert_eq!(prober.reply_matching, ReplyMatching::Any);
        assert!(prober.configurator.is_noop());
    }

    #[test]
    fn test_from_config() {
        let config = ProbeConfig {
            attempt_timeout_ms: 250,
            echo_identifier: 7,
            reply_matching: ReplyMatching::Strict,
            socket_kind: SocketKind::Raw,
            ..ProbeConfig::default()
        };
        let prober = IcmpProber::from_config(&config);
        assert_eq!(prober.attempt_timeout, Duration::from_millis(250));
        assert_eq!(prober.identifier, 7);
        assert_eq!(prober.reply_matching, ReplyMatching::Strict);
        assert_eq!(prober.socket_kind, SocketKind::Raw);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected_before_socket() {
        let prober = IcmpProber::new();
        let err = prober
            .probe("127.0.0.1".parse().unwrap(), Duration::ZERO, b"x")
            .await
            .unwrap_err();
        if socket::ICMP_SUPPORTED {
            assert_eq!(err.kind(), ErrorKind::Validation);
        } else {
            assert_eq!(err.kind(), ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_reply_matching_serde() {
        let matching: ReplyMatching = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(matching, ReplyMatching::Strict);
    }

    fn with_ipv4_header(icmp: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[2..4].copy_from_slice(&((20 + icmp.len()) as u16).to_be_bytes());
        packet[8] = 64;
        packet[9] = 1;
        packet.extend_from_slice(icmp);
        packet
    }

    fn echo_reply(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut icmp = packet::build_echo_request(Family::V4, identifier, sequence, b"pong").unwrap();
        icmp[0] = 0;
        with_ipv4_header(&icmp)
    }

    fn host_unreachable() -> Vec<u8> {
        let mut icmp = vec![3, 1, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&[0u8; 28]);
        with_ipv4_header(&icmp)
    }

    #[test]
    fn test_raw_socket_rejects_unreachable_in_any_mode() {
        let packet = host_unreachable();
        for matching in [ReplyMatching::Any, ReplyMatching::Strict] {
            assert!(!reply_accepted(
                matching,
                SocketKind::Raw,
                Family::V4,
                ECHO_IDENTIFIER,
                0,
                &packet
            ));
        }
    }

    #[test]
    fn test_datagram_socket_accepts_anything_in_any_mode() {
        assert!(reply_accepted(
            ReplyMatching::Any,
            SocketKind::Datagram,
            Family::V4,
            ECHO_IDENTIFIER,
            0,
            &host_unreachable()
        ));
    }

    #[test]
    fn test_raw_socket_any_mode_checks_identifier() {
        let ours = echo_reply(ECHO_IDENTIFIER, 9);
        let theirs = echo_reply(ECHO_IDENTIFIER + 1, 0);
        let any = |packet: &[u8]| {
            reply_accepted(
                ReplyMatching::Any,
                SocketKind::Raw,
                Family::V4,
                ECHO_IDENTIFIER,
                0,
                packet,
            )
        };
        // Late replies to an earlier attempt still count.
        assert!(any(&ours));
        assert!(!any(&theirs));
    }

    #[test]
    fn test_strict_mode_checks_sequence() {
        let packet = echo_reply(ECHO_IDENTIFIER, 2);
        let strict = |kind, sequence| {
            reply_accepted(
                ReplyMatching::Strict,
                kind,
                Family::V4,
                ECHO_IDENTIFIER,
                sequence,
                &packet,
            )
        };
        assert!(strict(SocketKind::Raw, 2));
        assert!(!strict(SocketKind::Raw, 3));
        assert!(strict(SocketKind::Datagram, 2));
    }
}
