//! Wire-level TCP segment representation: header fields plus payload.

use bitflags::bitflags;

use crate::wrapping::Wrapping32;

bitflags! {
    /// Control bits carried by a [`TcpSegment`]'s header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const SYN = 0b0001;
        const ACK = 0b0010;
        const FIN = 0b0100;
        const RST = 0b1000;
    }
}

/// A single TCP segment: header fields plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub seqno: Wrapping32,
    pub ackno: Wrapping32,
    pub win: u16,
    pub flags: TcpFlags,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Number of sequence numbers this segment occupies: payload bytes plus
    /// one each for SYN and FIN.
    pub fn length_in_sequence_space(&self) -> u64 {
        self.payload.len() as u64
            + self.flags.contains(TcpFlags::SYN) as u64
            + self.flags.contains(TcpFlags::FIN) as u64
    }

    pub fn syn(&self) -> bool {
        self.flags.contains(TcpFlags::SYN)
    }

    pub fn ack(&self) -> bool {
        self.flags.contains(TcpFlags::ACK)
    }

    pub fn fin(&self) -> bool {
        self.flags.contains(TcpFlags::FIN)
    }

    pub fn rst(&self) -> bool {
        self.flags.contains(TcpFlags::RST)
    }
}
