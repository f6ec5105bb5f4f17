//! Encoding of outgoing probes and decoding of received IPv4/ICMP datagrams.
//!
//! Received datagrams are assumed to carry a fixed 20-byte IPv4 header: IP
//! options are not handled, so the ICMP header is always read at offset 20.
//! A datagram whose IHL announces options is decoded at the wrong offset and
//! will fail to match any probe.

use crate::checksum;
use crate::error::{Error, Result};
use pnet::packet::Packet;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use std::net::Ipv4Addr;

pub const IPV4_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;
pub const UDP_HEADER_LEN: usize = 8;

/// The largest payload an IPv4 datagram can carry behind an 8-byte ICMP or UDP header.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - IPV4_HEADER_LEN - ICMP_HEADER_LEN;

/// First byte of the echo payload filler; each following byte increments, wrapping at 256.
const ECHO_FILLER_START: u8 = 0x42;
const UDP_FILLER: u8 = b'A';

/// The fields of a received IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    /// Header length in bytes, as announced by the IHL field.
    pub header_length: usize,
    pub total_length: u16,
    pub ttl: u8,
    pub protocol: IpNextHeaderProtocol,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

/// The fixed 8-byte ICMP header.
///
/// `identification` and `sequence` are only meaningful for echo messages,
/// for error messages they hold the unused word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: IcmpType,
    pub code: IcmpCode,
    pub checksum: u16,
    pub identification: u16,
    pub sequence: u16,
}

/// The original datagram quoted in an ICMP time-exceeded or destination-unreachable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedUdp {
    pub ip: IpHeader,
    pub source_port: u16,
    pub destination_port: u16,
}

/// Build an ICMP echo request with a `payload_size` byte payload and a valid checksum.
///
/// The payload is an incrementing byte pattern starting at `0x42`.
pub fn encode_icmp_echo(
    identification: u16,
    sequence: u16,
    payload_size: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; ICMP_HEADER_LEN + payload_size];
    let payload = (0..payload_size)
        .map(|i| ECHO_FILLER_START.wrapping_add(i as u8))
        .collect::<Vec<_>>();
    let len = buf.len();
    let mut echo = MutableEchoRequestPacket::new(&mut buf).ok_or(Error::MalformedPacket {
        expected: ICMP_HEADER_LEN,
        actual: len,
    })?;
    echo.set_icmp_type(IcmpTypes::EchoRequest);
    echo.set_icmp_code(IcmpCode::new(0));
    echo.set_checksum(0);
    echo.set_identifier(identification);
    echo.set_sequence_number(sequence);
    echo.set_payload(&payload);
    let echo_checksum = checksum::compute(echo.packet());
    echo.set_checksum(echo_checksum);
    Ok(buf)
}

/// Build the payload of a UDP probe, a run of ASCII `'A'`.
///
/// The UDP and IP headers are added by the kernel.
#[must_use]
pub fn encode_udp_probe(payload_size: usize) -> Vec<u8> {
    vec![UDP_FILLER; payload_size]
}

/// Decode the IPv4 and ICMP headers of a raw datagram and return them with the ICMP payload.
pub fn decode_ip_and_icmp(raw: &[u8]) -> Result<(IpHeader, IcmpHeader, &[u8])> {
    let ip = decode_ip(raw, IPV4_HEADER_LEN + ICMP_HEADER_LEN)?;
    let icmp_bytes = &raw[IPV4_HEADER_LEN..];
    let malformed = || Error::MalformedPacket {
        expected: IPV4_HEADER_LEN + ICMP_HEADER_LEN,
        actual: raw.len(),
    };
    let icmp_packet = IcmpPacket::new(icmp_bytes).ok_or_else(malformed)?;
    let echo = EchoReplyPacket::new(icmp_bytes).ok_or_else(malformed)?;
    let icmp = IcmpHeader {
        icmp_type: icmp_packet.get_icmp_type(),
        code: icmp_packet.get_icmp_code(),
        checksum: icmp_packet.get_checksum(),
        identification: echo.get_identifier(),
        sequence: echo.get_sequence_number(),
    };
    Ok((ip, icmp, &raw[IPV4_HEADER_LEN + ICMP_HEADER_LEN..]))
}

/// Decode the IPv4 header and leading UDP header quoted in an ICMP error payload.
pub fn decode_quoted_udp(icmp_payload: &[u8]) -> Result<QuotedUdp> {
    let ip = decode_ip(icmp_payload, IPV4_HEADER_LEN + UDP_HEADER_LEN)?;
    let udp = UdpPacket::new(&icmp_payload[IPV4_HEADER_LEN..]).ok_or(Error::MalformedPacket {
        expected: IPV4_HEADER_LEN + UDP_HEADER_LEN,
        actual: icmp_payload.len(),
    })?;
    Ok(QuotedUdp {
        ip,
        source_port: udp.get_source(),
        destination_port: udp.get_destination(),
    })
}

fn decode_ip(raw: &[u8], minimum: usize) -> Result<IpHeader> {
    let malformed = Error::MalformedPacket {
        expected: minimum,
        actual: raw.len(),
    };
    if raw.len() < minimum {
        return Err(malformed);
    }
    let ipv4 = Ipv4Packet::new(&raw[..IPV4_HEADER_LEN]).ok_or(malformed)?;
    Ok(IpHeader {
        header_length: usize::from(ipv4.get_header_length()) * 4,
        total_length: ipv4.get_total_length(),
        ttl: ipv4.get_ttl(),
        protocol: ipv4.get_next_level_protocol(),
        checksum: ipv4.get_checksum(),
        source: ipv4.get_source(),
        destination: ipv4.get_destination(),
    })
}
