//! ICMP echo packet construction and reply parsing using pnet.

use pnet_packet::Packet;
use pnet_packet::icmp::echo_reply::EchoReplyPacket;
use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use pnet_packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Types, MutableIcmpv6Packet};
use pnet_packet::ipv4::Ipv4Packet;
use std::net::IpAddr;

use crate::error::{ProbeError, ProbeResult};

/// Echo header: type, code, checksum, identifier, sequence.
pub const ICMP_HEADER_LEN: usize = 8;

/// Address family of a probe, selecting ICMP or ICMPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// The fields of a received echo reply that matter for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoReply {
    /// Whether this reply answers the request with `sequence`.
    ///
    /// Datagram sockets on Linux rewrite the identifier, so it is only
    /// compared when `check_identifier` is set.
    pub fn answers(&self, identifier: u16, sequence: u16, check_identifier: bool) -> bool {
        self.sequence == sequence && (!check_identifier || self.identifier == identifier)
    }
}

/// Creates an ICMP Echo Request message (no IP header).
///
/// IPv4 messages carry a computed checksum. ICMPv6 checksums cover a
/// pseudo-header the kernel fills in, so the field is left zero.
pub fn build_echo_request(
    family: Family,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> ProbeResult<Vec<u8>> {
    match family {
        Family::V4 => build_echo_request_v4(identifier, sequence, payload),
        Family::V6 => build_echo_request_v6(identifier, sequence, payload),
    }
}

fn build_echo_request_v4(identifier: u16, sequence: u16, payload: &[u8]) -> ProbeResult<Vec<u8>> {
    let mut buffer = vec![0u8; ICMP_HEADER_LEN + payload.len()];

    {
        let mut echo = MutableEchoRequestPacket::new(&mut buffer)
            .ok_or_else(|| ProbeError::Internal("Failed to create ICMP packet".to_string()))?;
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode::new(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence);
        echo.set_payload(payload);
    }

    let view = IcmpPacket::new(&buffer)
        .ok_or_else(|| ProbeError::Internal("Failed to create ICMP view".to_string()))?;
    let checksum = icmp::checksum(&view);
    buffer[2..4].copy_from_slice(&checksum.to_be_bytes());

    Ok(buffer)
}

fn build_echo_request_v6(identifier: u16, sequence: u16, payload: &[u8]) -> ProbeResult<Vec<u8>> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.extend_from_slice(&identifier.to_be_bytes());
    body.extend_from_slice(&sequence.to_be_bytes());
    body.extend_from_slice(payload);

    let mut buffer = vec![0u8; 4 + body.len()];
    let mut echo = MutableIcmpv6Packet::new(&mut buffer)
        .ok_or_else(|| ProbeError::Internal("Failed to create ICMPv6 packet".to_string()))?;
    echo.set_icmpv6_type(Icmpv6Types::EchoRequest);
    echo.set_icmpv6_code(Icmpv6Code::new(0));
    echo.set_checksum(0);
    echo.set_payload(&body);

    Ok(buffer)
}

/// Parses an echo reply, returning `None` for anything else.
///
/// Raw IPv4 sockets (and datagram sockets on BSD-derived systems) deliver
/// the IP header in front of the ICMP message; it is skipped when present.
pub fn parse_echo_reply(family: Family, buf: &[u8]) -> Option<EchoReply> {
    match family {
        Family::V4 => {
            let icmp = strip_ipv4_header(buf)?;
            let reply = EchoReplyPacket::new(icmp)?;
            if reply.get_icmp_type() != IcmpTypes::EchoReply {
                return None;
            }
            Some(EchoReply {
                identifier: reply.get_identifier(),
                sequence: reply.get_sequence_number(),
            })
        }
        Family::V6 => {
            let reply = Icmpv6Packet::new(buf)?;
            if reply.get_icmpv6_type() != Icmpv6Types::EchoReply {
                return None;
            }
            let body = reply.payload();
            if body.len() < 4 {
                return None;
            }
            Some(EchoReply {
                identifier: u16::from_be_bytes([body[0], body[1]]),
                sequence: u16::from_be_bytes([body[2], body[3]]),
            })
        }
    }
}

fn strip_ipv4_header(buf: &[u8]) -> Option<&[u8]> {
    // ICMP types never have 4 in the high nibble, an IPv4 header always does.
    if buf.first().map(|b| b >> 4) != Some(4) {
        return Some(buf);
    }
    let ip = Ipv4Packet::new(buf)?;
    let header_len = ip.get_header_length() as usize * 4;
    if header_len < 20 || buf.len() < header_len {
        return None;
    }
    Some(&buf[header_len..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_reply_v4(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut buffer = build_echo_request_v4(identifier, sequence, b"pong").unwrap();
        buffer[0] = 0; // Echo Reply
        buffer
    }

    #[test]
    fn test_create_echo_request_v4() {
        let packet = build_echo_request(Family::V4, 0xDBB, 1, &[0xAA; 40]).unwrap();

        // 8 ICMP header + 40 payload
        assert_eq!(packet.len(), 48);
        // Echo Request = 8, code 0
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 0xDBB);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 1);
        assert_eq!(&packet[8..], &[0xAA; 40]);
    }

    #[test]
    fn test_v4_checksum_verifies() {
        let packet = build_echo_request(Family::V4, 0x1234, 7, b"latency").unwrap();
        let view = IcmpPacket::new(&packet).unwrap();
        assert_eq!(icmp::checksum(&view), view.get_checksum());
    }

    #[test]
    fn test_create_echo_request_v6() {
        let packet = build_echo_request(Family::V6, 0xDBB, 3, b"abc").unwrap();

        assert_eq!(packet.len(), ICMP_HEADER_LEN + 3);
        // Echo Request = 128, code 0, checksum left to the kernel
        assert_eq!(packet[0], 128);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[2..4], &[0, 0]);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 0xDBB);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 3);
        assert_eq!(&packet[8..], b"abc");
    }

    #[test]
    fn test_empty_payload() {
        let packet = build_echo_request(Family::V4, 1, 1, &[]).unwrap();
        assert_eq!(packet.len(), ICMP_HEADER_LEN);
    }

    #[test]
    fn test_parse_reply_without_ip_header() {
        let reply = parse_echo_reply(Family::V4, &echo_reply_v4(0xDBB, 2)).unwrap();
        assert_eq!(
            reply,
            EchoReply {
                identifier: 0xDBB,
                sequence: 2
            }
        );
    }

    #[test]
    fn test_parse_reply_with_ip_header() {
        let icmp = echo_reply_v4(0xDBB, 5);
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[9] = 1;
        packet.extend_from_slice(&icmp);

        let reply = parse_echo_reply(Family::V4, &packet).unwrap();
        assert_eq!(reply.sequence, 5);
        assert_eq!(reply.identifier, 0xDBB);
    }

    #[test]
    fn test_parse_ignores_requests_and_short_packets() {
        let request = build_echo_request(Family::V4, 1, 1, b"x").unwrap();
        assert!(parse_echo_reply(Family::V4, &request).is_none());
        assert!(parse_echo_reply(Family::V4, &[0, 0, 0]).is_none());
        // Truncated IPv4 header
        assert!(parse_echo_reply(Family::V4, &[0x45, 0, 0, 0]).is_none());

        let request = build_echo_request(Family::V6, 1, 1, b"x").unwrap();
        assert!(parse_echo_reply(Family::V6, &request).is_none());
    }

    #[test]
    fn test_parse_reply_v6() {
        let mut packet = build_echo_request(Family::V6, 0xDBB, 9, b"payload").unwrap();
        packet[0] = 129; // Echo Reply
        let reply = parse_echo_reply(Family::V6, &packet).unwrap();
        assert_eq!(reply.sequence, 9);
        assert_eq!(reply.identifier, 0xDBB);
    }

    #[test]
    fn test_reply_answers_request() {
        let reply = EchoReply {
            identifier: 0x4242,
            sequence: 3,
        };
        assert!(reply.answers(0xDBB, 3, false));
        assert!(!reply.answers(0xDBB, 3, true));
        assert!(reply.answers(0x4242, 3, true));
        assert!(!reply.answers(0x4242, 2, true));
    }
}
