//! Wires a [`TcpSender`] and [`TcpReceiver`] into the full per-connection
//! finite-state machine: handshake, data transfer, close, and RST handling.

use std::collections::VecDeque;

use crate::byte_stream::ByteStream;
use crate::config::TcpConfig;
use crate::receiver::TcpReceiver;
use crate::segment::{TcpFlags, TcpSegment};
use crate::sender::TcpSender;
use crate::wrapping::Wrapping32;

/// A single TCP connection's state machine. Pure and synchronous: callers
/// push segments in via [`Self::segment_received`], advance time via
/// [`Self::tick`], and drain outbound wire segments via
/// [`Self::pop_segment_out`]. No I/O happens inside this type.
#[derive(Debug)]
pub struct TcpConnection {
    cfg: TcpConfig,
    sender: TcpSender,
    receiver: TcpReceiver,
    segments_out: VecDeque<TcpSegment>,

    time_since_last_segment_received_ms: u64,
    linger_after_streams_finish: bool,
    rst_sent: bool,
    rst_received: bool,
    done_since_ms: Option<u64>,
}

impl TcpConnection {
    pub fn new(cfg: TcpConfig, isn: Option<Wrapping32>) -> Self {
        TcpConnection {
            sender: TcpSender::new(&cfg, isn),
            receiver: TcpReceiver::new(&cfg),
            segments_out: VecDeque::new(),
            time_since_last_segment_received_ms: 0,
            linger_after_streams_finish: true,
            rst_sent: false,
            rst_received: false,
            done_since_ms: None,
            cfg,
        }
    }

    /// Kick off the handshake by sending our SYN.
    pub fn connect(&mut self) {
        self.sender.fill_window();
        self.send_outbound_segments();
        self.check_done();
    }

    /// Queue outbound application bytes and segment as much as the window
    /// allows. Returns the number of bytes actually accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = self.sender.outbound_stream_mut().write(data);
        self.sender.fill_window();
        self.send_outbound_segments();
        n
    }

    /// Signal that no more application bytes will ever be written.
    pub fn end_input_stream(&mut self) {
        self.sender.outbound_stream_mut().end_input();
        self.sender.fill_window();
        self.send_outbound_segments();
        self.check_done();
    }

    /// Advance time by `ms` milliseconds: ticks the retransmission timer and
    /// gives up (RST) after too many consecutive retransmissions.
    pub fn tick(&mut self, ms: u64) {
        self.time_since_last_segment_received_ms += ms;
        self.sender.tick(ms);

        if self.sender.consecutive_retransmissions() > self.cfg.max_retx {
            log::warn!(
                "giving up after {} consecutive retransmissions, resetting connection",
                self.sender.consecutive_retransmissions()
            );
            self.close();
        }

        self.send_outbound_segments();
        self.check_done();
    }

    /// Explicit unclean-teardown API (spec's re-architecture of an
    /// exception-based destructor RST into an explicit `close()` plus a drop
    /// guard): if the connection is still [`Self::active`], mark it reset,
    /// error both streams, and enqueue a RST-flagged empty segment for the
    /// caller to drain. A no-op if the connection is already inactive.
    pub fn close(&mut self) {
        if !self.active() {
            return;
        }
        self.rst_sent = true;
        self.sender.outbound_stream_mut().set_error();
        self.receiver.inbound_stream_mut().set_error();
        self.sender.send_empty_segment();
        self.send_outbound_segments();
    }

    /// True while strictly in LISTEN: no SYN has been sent by us and none
    /// has been seen from the peer yet.
    fn in_listen(&self) -> bool {
        self.sender.is_closed() && self.receiver.ackno().is_none()
    }

    /// Process an incoming segment from the peer.
    pub fn segment_received(&mut self, seg: &TcpSegment) {
        self.time_since_last_segment_received_ms = 0;

        if seg.rst() {
            if self.in_listen() {
                log::debug!("RST ignored while listening");
                return;
            }
            if self.sender.is_syn_sent() && !seg.ack() {
                log::debug!("RST ignored in SYN_SENT without ACK (off-path guard)");
                return;
            }
            log::debug!("RST received, tearing down connection");
            self.sender.outbound_stream_mut().set_error();
            self.receiver.inbound_stream_mut().set_error();
            self.rst_received = true;
            return;
        }

        if self.in_listen() && !seg.syn() {
            log::debug!("non-SYN segment ignored while listening");
            return;
        }

        if self.sender.is_syn_sent() && seg.ack() && !seg.payload.is_empty() {
            log::debug!("ACK+payload ignored in SYN_SENT");
            return;
        }

        let occupied_sequence_space = seg.length_in_sequence_space() > 0;

        self.receiver.segment_received(seg);
        if seg.ack() {
            self.sender.ack_received(seg.ackno, seg.win);
        }

        // The incoming segment used sequence space, so it must be acked.
        // Give the sender a chance to piggyback that ack on real data (or,
        // for a passive open, on its own SYN) before falling back to a bare
        // ACK with nothing queued.
        if occupied_sequence_space {
            self.sender.fill_window();
            if !self.sender.has_segments_out() {
                self.sender.send_empty_segment();
            }
        }

        if self.receiver.inbound_stream().eof() && !self.sender.outbound_stream().eof() {
            // Peer closed before we did: don't linger once we're done too,
            // there's nothing left to retransmit for.
            self.linger_after_streams_finish = false;
        }

        self.send_outbound_segments();
        self.check_done();
    }

    fn send_outbound_segments(&mut self) {
        while let Some(mut seg) = self.sender.pop_segment_out() {
            if let Some(ackno) = self.receiver.ackno() {
                seg.ackno = ackno;
                seg.flags |= TcpFlags::ACK;
            }
            seg.win = self.receiver.window_size();
            if self.rst_sent {
                seg.flags |= TcpFlags::RST;
            }
            self.segments_out.push_back(seg);
        }
    }

    fn is_done(&self) -> bool {
        self.receiver.inbound_stream().eof() && self.sender.is_fin_acked()
    }

    fn check_done(&mut self) {
        if self.done_since_ms.is_none() && self.is_done() {
            self.done_since_ms = Some(self.time_since_last_segment_received_ms);
        }
    }

    /// Whether this connection still needs attention (more segments may be
    /// sent or are expected). `false` once cleanly finished and past its
    /// linger window, or immediately after an RST in either direction.
    pub fn active(&self) -> bool {
        if self.rst_sent || self.rst_received {
            return false;
        }
        if !self.is_done() {
            return true;
        }
        if !self.linger_after_streams_finish {
            return false;
        }
        match self.done_since_ms {
            Some(done_since) => {
                self.time_since_last_segment_received_ms - done_since
                    < self.cfg.linger_multiplier * self.cfg.initial_rto_ms
            }
            None => true,
        }
    }

    pub fn pop_segment_out(&mut self) -> Option<TcpSegment> {
        self.segments_out.pop_front()
    }

    pub fn has_segments_out(&self) -> bool {
        !self.segments_out.is_empty()
    }

    pub fn remaining_outbound_capacity(&self) -> usize {
        self.sender.outbound_stream().remaining_capacity()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.sender.bytes_in_flight()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.receiver.unassembled_bytes()
    }

    pub fn time_since_last_segment_received(&self) -> u64 {
        self.time_since_last_segment_received_ms
    }

    pub fn inbound_stream(&self) -> &ByteStream {
        self.receiver.inbound_stream()
    }

    pub fn inbound_stream_mut(&mut self) -> &mut ByteStream {
        self.receiver.inbound_stream_mut()
    }

    pub fn outbound_stream(&self) -> &ByteStream {
        self.sender.outbound_stream()
    }
}

impl Drop for TcpConnection {
    /// An unclean shutdown: per spec, a connection torn down while still
    /// active must send a RST. `close()` stamps `rst_sent` and enqueues the
    /// RST segment onto `segments_out` before this value is deallocated;
    /// callers that want that segment actually delivered to the peer must
    /// call `close()` themselves and drain `segments_out` first (the socket
    /// facade's `TcpStream::drop` does exactly this) — once `Drop::drop`
    /// returns, the queue goes with it.
    fn drop(&mut self) {
        if self.active() {
            log::warn!("connection dropped while still active, sending RST");
            self.close();
        }
    }
}
