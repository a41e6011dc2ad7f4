//! Owns the inbound [`Reassembler`] and derives the outgoing ackno/window.

use crate::config::TcpConfig;
use crate::reassembler::Reassembler;
use crate::segment::TcpSegment;
use crate::wrapping::Wrapping32;

/// Turns received segments into reassembled bytes and reports the receiver
/// side of the handshake back to the sender: `ackno` and `window_size`.
#[derive(Debug)]
pub struct TcpReceiver {
    reassembler: Reassembler,
    sender_isn: Option<Wrapping32>,
}

impl TcpReceiver {
    pub fn new(cfg: &TcpConfig) -> Self {
        TcpReceiver {
            reassembler: Reassembler::new(cfg.capacity),
            sender_isn: None,
        }
    }

    pub fn inbound_stream(&self) -> &crate::byte_stream::ByteStream {
        self.reassembler.inbound_stream()
    }

    pub fn inbound_stream_mut(&mut self) -> &mut crate::byte_stream::ByteStream {
        self.reassembler.inbound_stream_mut()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }

    /// Absolute index one past the last byte ever sequenced, or `None`
    /// before SYN has been seen.
    pub fn ackno(&self) -> Option<Wrapping32> {
        self.sender_isn.map(|isn| {
            let extra = if self.inbound_stream().input_ended() { 1 } else { 0 };
            Wrapping32::wrap(self.inbound_stream().bytes_written() + 1 + extra, isn)
        })
    }

    /// Remaining room in the inbound stream, clamped to what fits in a
    /// 16-bit TCP window field.
    pub fn window_size(&self) -> u16 {
        self.inbound_stream().remaining_capacity().min(u16::MAX as usize) as u16
    }

    /// Feed a received segment to the reassembler, learning the ISN from
    /// the handshake SYN if this is the first segment seen.
    pub fn segment_received(&mut self, seg: &TcpSegment) {
        if seg.syn() && self.sender_isn.is_none() {
            self.sender_isn = Some(seg.seqno);
        }

        let isn = match self.sender_isn {
            Some(isn) => isn,
            None => return, // strictly LISTEN: nothing to unwrap against yet
        };

        if self.inbound_stream().input_ended() {
            return;
        }

        let checkpoint = self.inbound_stream().bytes_written();
        let abs_seqno = seg.seqno.unwrap(isn, checkpoint);

        let stream_index = if abs_seqno == 0 {
            if !seg.syn() {
                return; // only the SYN itself may occupy absolute seqno 0
            }
            0
        } else {
            abs_seqno - 1
        };

        self.reassembler.push(&seg.payload, stream_index, seg.fin());
    }
}
