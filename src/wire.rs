//! Codec between [`TcpSegment`]s and raw IPv4/TCP bytes, the format
//! [`crate::net::interface::NetworkInterface`] hands to/from the wire.

use std::net::Ipv4Addr;

use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, TcpHeader, TcpHeaderSlice};

use crate::segment::{TcpFlags, TcpSegment};
use crate::wrapping::Wrapping32;

const DEFAULT_TTL: u8 = 64;

/// Source/destination socket pair identifying one TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourTuple {
    pub src: (Ipv4Addr, u16),
    pub dst: (Ipv4Addr, u16),
}

impl FourTuple {
    pub fn reversed(self) -> FourTuple {
        FourTuple { src: self.dst, dst: self.src }
    }
}

/// A parsed IPv4 datagram carrying a TCP segment.
pub struct ParsedSegment {
    pub tuple: FourTuple,
    pub segment: TcpSegment,
}

/// Parse a raw IPv4 datagram, returning `None` for anything that isn't an
/// IPv4-over-TCP datagram this stack understands.
pub fn parse_ipv4_tcp(datagram: &[u8]) -> Option<ParsedSegment> {
    let ip = Ipv4HeaderSlice::from_slice(datagram).ok()?;
    if ip.protocol() != IpNumber::TCP {
        return None;
    }
    let ip_len = ip.slice().len();
    let tcp_raw = &datagram[ip_len..];
    let tcp = TcpHeaderSlice::from_slice(tcp_raw).ok()?;
    let tcp_len = tcp.slice().len();
    let payload = tcp_raw[tcp_len..].to_vec();

    let mut flags = TcpFlags::empty();
    if tcp.syn() {
        flags |= TcpFlags::SYN;
    }
    if tcp.ack() {
        flags |= TcpFlags::ACK;
    }
    if tcp.fin() {
        flags |= TcpFlags::FIN;
    }
    if tcp.rst() {
        flags |= TcpFlags::RST;
    }

    Some(ParsedSegment {
        tuple: FourTuple {
            src: (ip.source_addr(), tcp.source_port()),
            dst: (ip.destination_addr(), tcp.destination_port()),
        },
        segment: TcpSegment {
            seqno: Wrapping32(tcp.sequence_number()),
            ackno: Wrapping32(tcp.acknowledgment_number()),
            win: tcp.window_size(),
            flags,
            payload,
        },
    })
}

/// Serialize `segment` as an IPv4 datagram from `tuple.src` to `tuple.dst`.
pub fn build_ipv4_tcp(tuple: FourTuple, segment: &TcpSegment) -> Vec<u8> {
    let mut tcp = TcpHeader::new(tuple.src.1, tuple.dst.1, segment.seqno.raw(), segment.win);
    tcp.syn = segment.syn();
    tcp.ack = segment.ack();
    tcp.fin = segment.fin();
    tcp.rst = segment.rst();
    tcp.acknowledgment_number = segment.ackno.raw();

    let ip_payload_len = tcp.header_len() as usize + segment.payload.len();
    let ip = Ipv4Header::new(
        ip_payload_len as u16,
        DEFAULT_TTL,
        IpNumber::TCP,
        tuple.src.0.octets(),
        tuple.dst.0.octets(),
    )
    .expect("TCP header plus payload never exceeds a u16 in this stack's MSS");

    tcp.checksum = tcp
        .calc_checksum_ipv4(&ip, &segment.payload)
        .expect("checksum fields are always in range here");

    let mut buf = Vec::with_capacity(ip.header_len() + tcp.header_len() as usize + segment.payload.len());
    ip.write(&mut buf).expect("writing to a Vec never fails");
    tcp.write(&mut buf).expect("writing to a Vec never fails");
    buf.extend_from_slice(&segment.payload);
    buf
}
