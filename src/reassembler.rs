//! Turns overlapping, out-of-order substrings at arbitrary 64-bit offsets
//! into the in-order byte stream, under a strict joint memory budget.

use std::collections::BTreeMap;

use crate::byte_stream::ByteStream;

/// Reassembles pushed substrings into an owned, in-order [`ByteStream`].
///
/// `capacity` bounds `inbound.buffer_size() + unassembled_bytes()` jointly:
/// bytes that arrive beyond `bytes_read() + capacity` are silently dropped.
#[derive(Debug)]
pub struct Reassembler {
    inbound: ByteStream,
    capacity: usize,
    segments: BTreeMap<u64, Vec<u8>>,
    unassembled_bytes: usize,
    got_eof: bool,
    end_index: u64,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Reassembler {
            inbound: ByteStream::new(capacity),
            capacity,
            segments: BTreeMap::new(),
            unassembled_bytes: 0,
            got_eof: false,
            end_index: 0,
        }
    }

    pub fn inbound_stream(&self) -> &ByteStream {
        &self.inbound
    }

    pub fn inbound_stream_mut(&mut self) -> &mut ByteStream {
        &mut self.inbound
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.unassembled_bytes
    }

    /// True if no substrings are waiting to be assembled.
    pub fn empty(&self) -> bool {
        self.unassembled_bytes == 0
    }

    /// Ingest a substring of `data` whose first byte sits at absolute
    /// stream index `index`. `eof` marks `data`'s last byte as the last
    /// byte of the entire stream.
    pub fn push(&mut self, data: &[u8], index: u64, eof: bool) {
        if self.inbound.input_ended() {
            return;
        }

        let next_expected = self.inbound.bytes_written();
        if index + data.len() as u64 < next_expected {
            return;
        }

        if eof && !self.got_eof {
            self.got_eof = true;
            self.end_index = index + data.len() as u64;
        }

        let right_bound = self.inbound.bytes_read() + self.capacity as u64;
        let mut start = index;
        let mut end = index + data.len() as u64;
        end = end.min(right_bound);
        start = start.max(next_expected);

        if start < end {
            let payload = &data[(start - index) as usize..(end - index) as usize];
            self.merge(start, payload);
        }

        self.drain();
    }

    /// Merge `[start, start + payload.len())` into the pending set. Existing
    /// data wins on overlap; segments fully contained by the new one are
    /// dropped (the new one subsumes them).
    fn merge(&mut self, orig_start: u64, payload: &[u8]) {
        let mut start = orig_start;
        let mut end = orig_start + payload.len() as u64;
        if start >= end {
            return;
        }

        if let Some((&pstart, pdata)) = self.segments.range(..=start).next_back() {
            let pend = pstart + pdata.len() as u64;
            if pend > start {
                if pend >= end {
                    return; // fully covered by an existing segment already
                }
                start = pend;
            }
        }

        let mut remove_keys = Vec::new();
        for (&s, d) in self.segments.range(start..end) {
            let e = s + d.len() as u64;
            if e <= end {
                remove_keys.push(s);
            } else {
                end = end.min(s);
            }
        }
        for k in remove_keys {
            if let Some(d) = self.segments.remove(&k) {
                self.unassembled_bytes -= d.len();
            }
        }

        if start >= end {
            return;
        }

        let slice_start = (start - orig_start) as usize;
        let slice_end = (end - orig_start) as usize;
        let trimmed = payload[slice_start..slice_end].to_vec();
        self.unassembled_bytes += trimmed.len();
        self.segments.insert(start, trimmed);
    }

    /// Push every pending segment that has become contiguous with the
    /// output stream, stopping as soon as the stream can't accept any more.
    fn drain(&mut self) {
        loop {
            let next_expected = self.inbound.bytes_written();
            let front = self.segments.iter().next().map(|(&s, d)| (s, d.clone()));
            match front {
                Some((s, d)) if s == next_expected => {
                    let n = self.inbound.write(&d);
                    if n == 0 {
                        break;
                    }
                    self.segments.remove(&s);
                    self.unassembled_bytes -= n;
                    if n < d.len() {
                        self.segments.insert(s + n as u64, d[n..].to_vec());
                        break;
                    }
                }
                _ => break,
            }
        }

        if self.got_eof && self.inbound.bytes_written() == self.end_index {
            self.inbound.end_input();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reads (and consumes) everything currently assembled.
    fn contents(r: &mut Reassembler) -> Vec<u8> {
        let n = r.inbound_stream().buffer_size();
        r.inbound_stream_mut().read(n)
    }

    #[test]
    fn reorder_and_overlap_reassemble_in_order() {
        let mut r = Reassembler::new(100);
        r.push(b"bcd", 1, false);
        r.push(b"ab", 0, false);
        r.push(b"cdef", 2, true);
        assert_eq!(contents(&mut r), b"abcdef");
        assert_eq!(r.unassembled_bytes(), 0);
        assert!(r.inbound_stream().eof());
    }

    #[test]
    fn capacity_clamps_and_discards_overflow() {
        let mut r = Reassembler::new(4);
        r.push(b"abcdef", 0, false);
        assert_eq!(contents(&mut r), b"abcd");
        assert_eq!(r.unassembled_bytes(), 0);
    }

    #[test]
    fn out_of_order_within_capacity_window_is_held() {
        let mut r = Reassembler::new(4);
        r.push(b"cd", 2, false);
        assert_eq!(r.unassembled_bytes(), 2);
        assert_eq!(contents(&mut r), b"");
        r.push(b"ab", 0, false);
        assert_eq!(contents(&mut r), b"abcd");
        assert_eq!(r.unassembled_bytes(), 0);
    }

    #[test]
    fn stale_fully_acked_data_is_dropped() {
        let mut r = Reassembler::new(10);
        r.push(b"ab", 0, false);
        assert_eq!(contents(&mut r), b"ab");
        // retransmission of already-consumed bytes is silently dropped
        r.push(b"ab", 0, false);
        assert_eq!(r.unassembled_bytes(), 0);
    }

    #[test]
    fn partial_overlap_trims_new_segment_keeping_existing_authoritative() {
        let mut r = Reassembler::new(20);
        r.push(b"bbbbbb", 2, false); // pending [2,8)
        assert_eq!(r.unassembled_bytes(), 6);
        // overlaps existing's left portion [2,5) but doesn't fully contain
        // it (existing extends to 8); existing wins, new is trimmed to [0,2).
        // That trim makes [0,8) contiguous from next_expected=0, so drain()
        // immediately writes all of it into the inbound stream.
        r.push(b"XXXXX", 0, false);
        assert_eq!(r.unassembled_bytes(), 0);
        r.push(&[], 8, true);
        assert_eq!(r.inbound_stream_mut().read(8), b"XXbbbbbb");
        assert!(r.inbound_stream().eof());
    }

    #[test]
    fn fully_contained_existing_segment_is_replaced() {
        let mut r = Reassembler::new(20);
        r.push(b"yyy", 3, false); // pending [3,6), fully inside the next push
        r.push(b"XXXXXXXX", 1, false); // [1,9) fully contains [3,6); replaces it
        assert_eq!(r.unassembled_bytes(), 8);
        r.push(b"a", 0, false);
        r.push(&[], 9, true);
        assert_eq!(r.inbound_stream_mut().read(9), b"aXXXXXXXX");
        assert!(r.inbound_stream().eof());
    }

    #[test]
    fn eof_recorded_even_if_payload_partly_discarded() {
        let mut r = Reassembler::new(2);
        r.push(b"ab", 0, false);
        assert_eq!(r.inbound_stream_mut().read(2), b"ab");
        // "cdef" at index 2 would need a window of 4 bytes but only 2 are
        // free; eof (end_index=6) must still be recorded per spec step 2,
        // even though only "cd" fits now.
        r.push(b"cdef", 2, true);
        assert!(!r.inbound_stream().eof());
        assert_eq!(r.inbound_stream_mut().read(2), b"cd");
        // completing the stream later should trip eof using the
        // previously-recorded end_index.
        r.push(b"ef", 4, false);
        assert!(r.inbound_stream().input_ended());
        assert_eq!(r.inbound_stream_mut().read(2), b"ef");
        assert!(r.inbound_stream().eof());
    }
}
