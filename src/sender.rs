//! Segments outbound bytes, manages the retransmission timer, and tracks
//! in-flight sequence space.

use std::collections::VecDeque;

use crate::byte_stream::ByteStream;
use crate::config::TcpConfig;
use crate::retx_timer::RetxTimer;
use crate::segment::{TcpFlags, TcpSegment};
use crate::wrapping::Wrapping32;

/// A previously-sent segment kept around in case it needs retransmitting.
#[derive(Debug, Clone)]
struct Outstanding {
    /// Absolute sequence number of the segment's first occupied slot.
    start: u64,
    segment: TcpSegment,
}

/// Cuts outbound bytes into segments, respects the receiver's advertised
/// window and MSS, and retransmits on timeout with exponential backoff.
#[derive(Debug)]
pub struct TcpSender {
    isn: Wrapping32,
    outbound: ByteStream,
    next_seqno: u64,
    segments_out: VecDeque<TcpSegment>,
    outstanding: VecDeque<Outstanding>,

    initial_rto_ms: u64,
    rto_ms: u64,
    consecutive_retransmissions: u32,
    timer: RetxTimer,

    window_left: u64,
    window_right: u64,
    zero_window: bool,

    mss: usize,
    syn_sent: bool,
    fin_sent: bool,
}

impl TcpSender {
    pub fn new(cfg: &TcpConfig, isn: Option<Wrapping32>) -> Self {
        let isn = isn.unwrap_or_else(|| Wrapping32(rand::random()));
        TcpSender {
            isn,
            outbound: ByteStream::new(cfg.capacity),
            next_seqno: 0,
            segments_out: VecDeque::new(),
            outstanding: VecDeque::new(),
            initial_rto_ms: cfg.initial_rto_ms,
            rto_ms: cfg.initial_rto_ms,
            consecutive_retransmissions: 0,
            timer: RetxTimer::new(),
            window_left: 0,
            window_right: 1,
            zero_window: false,
            mss: cfg.mss,
            syn_sent: false,
            fin_sent: false,
        }
    }

    pub fn isn(&self) -> Wrapping32 {
        self.isn
    }

    pub fn outbound_stream(&self) -> &ByteStream {
        &self.outbound
    }

    pub fn outbound_stream_mut(&mut self) -> &mut ByteStream {
        &mut self.outbound
    }

    pub fn next_seqno_absolute(&self) -> u64 {
        self.next_seqno
    }

    pub fn next_seqno(&self) -> Wrapping32 {
        Wrapping32::wrap(self.next_seqno, self.isn)
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.outstanding
            .iter()
            .map(|o| o.segment.length_in_sequence_space())
            .sum()
    }

    pub fn consecutive_retransmissions(&self) -> u32 {
        self.consecutive_retransmissions
    }

    /// Pop the next segment this sender wants transmitted, if any.
    pub fn pop_segment_out(&mut self) -> Option<TcpSegment> {
        self.segments_out.pop_front()
    }

    pub fn has_segments_out(&self) -> bool {
        !self.segments_out.is_empty()
    }

    /// Cut and enqueue segments to fill as much of the receiver's window as
    /// possible. Sends the initial SYN if no byte has been sent yet.
    pub fn fill_window(&mut self) {
        if self.next_seqno == 0 {
            let seg = TcpSegment {
                seqno: self.next_seqno(),
                ackno: Wrapping32(0),
                win: 0,
                flags: TcpFlags::SYN,
                payload: Vec::new(),
            };
            self.syn_sent = true;
            self.send(seg);
            return;
        }

        loop {
            let win = (self.window_right - self.window_left).max(1);
            let remaining = (self.window_left + win).saturating_sub(self.next_seqno);
            if remaining == 0 || self.fin_sent {
                break;
            }

            let payload_len = (remaining as usize).min(self.mss).min(self.outbound.buffer_size());
            let payload = self.outbound.read(payload_len);

            let mut flags = TcpFlags::empty();
            if self.outbound.eof() && !self.fin_sent && (payload.len() as u64) < remaining {
                flags |= TcpFlags::FIN;
                self.fin_sent = true;
            }

            if payload.is_empty() && flags.is_empty() {
                break;
            }

            let seg = TcpSegment {
                seqno: self.next_seqno(),
                ackno: Wrapping32(0),
                win: 0,
                flags,
                payload,
            };
            self.send(seg);
        }
    }

    fn send(&mut self, seg: TcpSegment) {
        let len = seg.length_in_sequence_space();
        let start = self.next_seqno;
        self.segments_out.push_back(seg.clone());
        if len > 0 {
            self.outstanding.push_back(Outstanding { start, segment: seg });
            if !self.timer.running() {
                self.timer.start(self.rto_ms);
            }
        }
        self.next_seqno += len;
    }

    /// Process a new acknowledgment and advertised window.
    pub fn ack_received(&mut self, ackno: Wrapping32, window_size: u16) {
        let abs_ackno = ackno.unwrap(self.isn, self.window_left);
        if abs_ackno > self.next_seqno {
            return; // acks data we haven't sent yet
        }

        self.zero_window = window_size == 0;
        let win = if self.zero_window { 1 } else { window_size as u64 };
        let previous_left = self.window_left;
        self.window_left = abs_ackno;
        self.window_right = abs_ackno + win;

        if abs_ackno > previous_left {
            self.rto_ms = self.initial_rto_ms;
            self.consecutive_retransmissions = 0;

            while let Some(o) = self.outstanding.front() {
                if o.start + o.segment.length_in_sequence_space() <= self.window_left {
                    self.outstanding.pop_front();
                } else {
                    break;
                }
            }

            if self.outstanding.is_empty() {
                self.timer.stop();
            } else {
                self.timer.start(self.rto_ms);
            }
        }

        self.fill_window();
    }

    /// Advance the retransmission timer; retransmit on expiry.
    pub fn tick(&mut self, ms: u64) {
        self.timer.tick(ms);
        if self.timer.expired() {
            if let Some(o) = self.outstanding.front() {
                self.segments_out.push_back(o.segment.clone());
            }
            if !self.zero_window {
                self.rto_ms *= 2;
            }
            self.consecutive_retransmissions += 1;
            self.timer.start(self.rto_ms);
        }
        if self.outstanding.is_empty() {
            self.timer.stop();
        }
    }

    /// Enqueue a bare, non-retransmitted segment (used to carry an ACK or
    /// RST that doesn't need to survive a timeout).
    pub fn send_empty_segment(&mut self) {
        let seg = TcpSegment {
            seqno: self.next_seqno(),
            ackno: Wrapping32(0),
            win: 0,
            flags: TcpFlags::empty(),
            payload: Vec::new(),
        };
        self.segments_out.push_back(seg);
    }

    pub fn is_closed(&self) -> bool {
        self.next_seqno == 0
    }

    pub fn is_syn_sent(&self) -> bool {
        self.next_seqno > 0 && self.next_seqno == self.bytes_in_flight()
    }

    pub fn is_syn_acked(&self) -> bool {
        (self.next_seqno > self.bytes_in_flight() && !self.outbound.eof())
            || (self.outbound.eof() && self.next_seqno < self.outbound.bytes_written() + 2)
    }

    pub fn is_fin_sent(&self) -> bool {
        self.outbound.eof()
            && self.next_seqno == self.outbound.bytes_written() + 2
            && self.bytes_in_flight() > 0
    }

    pub fn is_fin_acked(&self) -> bool {
        self.outbound.eof()
            && self.next_seqno == self.outbound.bytes_written() + 2
            && self.bytes_in_flight() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(mss: usize, capacity: usize) -> TcpConfig {
        TcpConfig {
            capacity,
            mss,
            initial_rto_ms: 1000,
            max_retx: 8,
            linger_multiplier: 10,
        }
    }

    #[test]
    fn closed_sender_emits_syn_only() {
        let mut s = TcpSender::new(&cfg(2, 4), Some(Wrapping32(100)));
        s.fill_window();
        let seg = s.pop_segment_out().unwrap();
        assert!(seg.syn());
        assert_eq!(seg.seqno, Wrapping32(100));
        assert!(seg.payload.is_empty());
        assert!(s.is_syn_sent());
        assert_eq!(s.bytes_in_flight(), 1);
    }

    #[test]
    fn segments_respect_mss_and_window() {
        let mut s = TcpSender::new(&cfg(2, 10), Some(Wrapping32(0)));
        s.fill_window();
        s.pop_segment_out(); // SYN
        s.ack_received(Wrapping32(1), 4);
        s.outbound_stream_mut().write(b"hello");
        s.fill_window();

        let mut lens = vec![];
        while let Some(seg) = s.pop_segment_out() {
            lens.push(seg.payload.len());
        }
        assert_eq!(lens, vec![2, 2]); // window=4 only allows 4 bytes total
    }

    #[test]
    fn ack_advances_window_and_drains_outstanding() {
        let mut s = TcpSender::new(&cfg(2, 10), Some(Wrapping32(0)));
        s.fill_window();
        s.pop_segment_out();
        s.ack_received(Wrapping32(1), 10);
        s.outbound_stream_mut().write(b"xy");
        s.fill_window();
        assert_eq!(s.bytes_in_flight(), 2);
        s.ack_received(Wrapping32(3), 10);
        assert_eq!(s.bytes_in_flight(), 0);
    }

    #[test]
    fn retransmission_backs_off_exponentially() {
        let mut s = TcpSender::new(&cfg(2, 10), Some(Wrapping32(0)));
        s.fill_window();
        s.pop_segment_out();
        s.ack_received(Wrapping32(1), 10);
        s.outbound_stream_mut().write(b"xy");
        s.fill_window();
        s.pop_segment_out();

        s.tick(999);
        assert_eq!(s.consecutive_retransmissions(), 0);
        s.tick(1);
        assert_eq!(s.consecutive_retransmissions(), 1);
        assert!(s.pop_segment_out().is_some());
        s.tick(2000);
        assert_eq!(s.consecutive_retransmissions(), 2);

        s.ack_received(Wrapping32(3), 10);
        assert_eq!(s.consecutive_retransmissions(), 0);
    }

    #[test]
    fn zero_window_probe_does_not_back_off() {
        let mut s = TcpSender::new(&cfg(2, 10), Some(Wrapping32(0)));
        s.fill_window();
        s.pop_segment_out();
        s.ack_received(Wrapping32(1), 0); // zero window
        s.outbound_stream_mut().write(b"z");
        s.fill_window();
        let seg = s.pop_segment_out().unwrap();
        assert_eq!(seg.payload.len(), 1);

        s.tick(1000);
        assert!(s.pop_segment_out().is_some());
        // zero-window retransmissions never double the RTO
        assert_eq!(s.consecutive_retransmissions(), 1);
    }
}
