//! Ethernet + ARP boundary: turns outgoing IPv4 datagrams into Ethernet
//! frames addressed via ARP, and incoming frames back into datagrams.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use etherparse::{Ethernet2Header, Ethernet2HeaderSlice};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;

/// How long a learned ARP mapping stays valid before it must be re-resolved.
const ARP_ENTRY_TTL_MS: u64 = 30_000;
/// Minimum spacing between ARP broadcasts for the same unresolved address,
/// so an unanswered flood of datagrams doesn't spam the wire with requests.
const ARP_BROADCAST_THROTTLE_MS: u64 = 5_000;

pub type MacAddress = [u8; 6];
pub const BROADCAST_MAC: MacAddress = [0xff; 6];

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_OPER_REQUEST: u16 = 1;
const ARP_OPER_REPLY: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        buf.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        buf.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        buf.push(6); // hardware address length
        buf.push(4); // protocol address length
        buf.extend_from_slice(&self.operation.to_be_bytes());
        buf.extend_from_slice(&self.sender_mac);
        buf.extend_from_slice(&self.sender_ip.octets());
        buf.extend_from_slice(&self.target_mac);
        buf.extend_from_slice(&self.target_ip.octets());
        buf
    }

    fn from_bytes(data: &[u8]) -> Option<ArpPacket> {
        if data.len() < 28 {
            return None;
        }
        let operation = u16::from_be_bytes([data[6], data[7]]);
        let mut sender_mac = [0u8; 6];
        sender_mac.copy_from_slice(&data[8..14]);
        let sender_ip = Ipv4Addr::new(data[14], data[15], data[16], data[17]);
        let mut target_mac = [0u8; 6];
        target_mac.copy_from_slice(&data[18..24]);
        let target_ip = Ipv4Addr::new(data[24], data[25], data[26], data[27]);
        Some(ArpPacket {
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    mac: MacAddress,
    ttl_ms: u64,
}

/// Pairs a queued-but-unresolved datagram with the next-hop address ARP
/// needs to resolve before it can go out.
struct PendingDatagram {
    datagram: Vec<u8>,
    next_hop: Ipv4Addr,
}

/// One network interface: an Ethernet/IPv4 boundary with its own MAC, IP,
/// and ARP cache. Pure and synchronous — the caller owns the actual socket
/// or TUN device and pumps bytes through [`Self::recv_frame`] /
/// [`Self::send_datagram`] / [`Self::frames_out`].
pub struct NetworkInterface {
    mac: MacAddress,
    ip: Ipv4Addr,
    arp_table: Vec<(Ipv4Addr, ArpEntry)>,
    pending_broadcasts: Vec<(Ipv4Addr, u64)>,
    pending_datagrams: Vec<PendingDatagram>,
    frames_out: VecDeque<Vec<u8>>,
}

impl NetworkInterface {
    pub fn new(mac: MacAddress, ip: Ipv4Addr) -> Self {
        NetworkInterface {
            mac,
            ip,
            arp_table: Vec::new(),
            pending_broadcasts: Vec::new(),
            pending_datagrams: Vec::new(),
            frames_out: VecDeque::new(),
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Send an IPv4 datagram to `next_hop`. If we don't yet know its MAC,
    /// queue the datagram and (subject to the broadcast throttle) ARP for it.
    pub fn send_datagram(&mut self, datagram: &[u8], next_hop: Ipv4Addr) {
        if let Some(mac) = self.resolved_mac(next_hop) {
            self.frame_and_emit(mac, datagram);
            return;
        }

        self.pending_datagrams.push(PendingDatagram {
            datagram: datagram.to_vec(),
            next_hop,
        });

        let throttled = self
            .pending_broadcasts
            .iter()
            .any(|(ip, _)| *ip == next_hop);
        if !throttled {
            self.broadcast_arp_request(next_hop);
            self.pending_broadcasts.push((next_hop, 0));
        }
    }

    fn resolved_mac(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        self.arp_table
            .iter()
            .find(|(entry_ip, _)| *entry_ip == ip)
            .map(|(_, entry)| entry.mac)
    }

    fn broadcast_arp_request(&mut self, target_ip: Ipv4Addr) {
        let arp = ArpPacket {
            operation: ARP_OPER_REQUEST,
            sender_mac: self.mac,
            sender_ip: self.ip,
            target_mac: [0; 6],
            target_ip,
        };
        self.frame_and_emit_raw(BROADCAST_MAC, ETHERTYPE_ARP, &arp.to_bytes());
    }

    fn frame_and_emit(&mut self, dst_mac: MacAddress, datagram: &[u8]) {
        self.frame_and_emit_raw(dst_mac, ETHERTYPE_IPV4, datagram);
    }

    fn frame_and_emit_raw(&mut self, dst_mac: MacAddress, ethertype: u16, payload: &[u8]) {
        let header = Ethernet2Header {
            destination: dst_mac,
            source: self.mac,
            ether_type: ethertype,
        };
        let mut frame = Vec::with_capacity(14 + payload.len());
        header.write(&mut frame).expect("writing to a Vec never fails");
        frame.extend_from_slice(payload);
        self.frames_out.push_back(frame);
    }

    /// Process a raw incoming Ethernet frame. Learns ARP mappings and drains
    /// any datagrams that were waiting on them; returns an IPv4 datagram's
    /// payload bytes if the frame was IPv4 addressed to us.
    pub fn recv_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let header = Ethernet2HeaderSlice::from_slice(frame).ok()?;
        if header.destination() != self.mac && header.destination() != BROADCAST_MAC {
            return None;
        }
        let ethertype = header.ether_type();
        let payload = &frame[header.slice().len()..];

        if ethertype == ETHERTYPE_IPV4 {
            return Some(payload.to_vec());
        }

        if ethertype == ETHERTYPE_ARP {
            let arp = ArpPacket::from_bytes(payload)?;
            self.learn(arp.sender_ip, arp.sender_mac);

            if arp.operation == ARP_OPER_REQUEST && arp.target_ip == self.ip {
                let reply = ArpPacket {
                    operation: ARP_OPER_REPLY,
                    sender_mac: self.mac,
                    sender_ip: self.ip,
                    target_mac: arp.sender_mac,
                    target_ip: arp.sender_ip,
                };
                self.frame_and_emit_raw(arp.sender_mac, ETHERTYPE_ARP, &reply.to_bytes());
            }

            self.drain_pending();
        }

        None
    }

    fn learn(&mut self, ip: Ipv4Addr, mac: MacAddress) {
        if let Some((_, entry)) = self.arp_table.iter_mut().find(|(i, _)| *i == ip) {
            entry.mac = mac;
            entry.ttl_ms = ARP_ENTRY_TTL_MS;
        } else {
            self.arp_table.push((ip, ArpEntry { mac, ttl_ms: ARP_ENTRY_TTL_MS }));
        }
    }

    fn drain_pending(&mut self) {
        loop {
            let before = self.pending_datagrams.len();
            let mut still_pending = Vec::new();
            for pending in self.pending_datagrams.drain(..) {
                if let Some(mac) = self.resolved_mac(pending.next_hop) {
                    self.frame_and_emit(mac, &pending.datagram);
                } else {
                    still_pending.push(pending);
                }
            }
            self.pending_datagrams = still_pending;
            if self.pending_datagrams.len() == before {
                break;
            }
        }
    }

    /// Advance time: age out ARP entries and lift broadcast throttles.
    pub fn tick(&mut self, ms: u64) {
        for (_, entry) in self.arp_table.iter_mut() {
            entry.ttl_ms = entry.ttl_ms.saturating_sub(ms);
        }
        self.arp_table.retain(|(_, entry)| entry.ttl_ms > 0);

        for (_, elapsed) in self.pending_broadcasts.iter_mut() {
            *elapsed += ms;
        }
        self.pending_broadcasts
            .retain(|(_, elapsed)| *elapsed < ARP_BROADCAST_THROTTLE_MS);
    }

    /// Pop the next outgoing Ethernet frame, if any.
    pub fn frames_out(&mut self) -> Option<Vec<u8>> {
        self.frames_out.pop_front()
    }
}
