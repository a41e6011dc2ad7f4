//! A bounded, flow-controlled in-memory byte stream.
//!
//! One writer, one reader. Capacity is fixed at construction; writes beyond
//! the remaining capacity are truncated rather than rejected. `input_ended`
//! and `error` latch permanently once set.

use std::cmp::min;
use std::collections::VecDeque;

/// FIFO of bytes bounded by `capacity`, with EOF and error latches.
#[derive(Debug)]
pub struct ByteStream {
    capacity: usize,
    buffer: VecDeque<u8>,
    bytes_written: u64,
    bytes_read: u64,
    input_ended: bool,
    error: bool,
}

impl ByteStream {
    /// Construct a stream that holds at most `capacity` unread bytes.
    pub fn new(capacity: usize) -> Self {
        ByteStream {
            capacity,
            buffer: VecDeque::new(),
            bytes_written: 0,
            bytes_read: 0,
            input_ended: false,
            error: false,
        }
    }

    /// Write as much of `data` as fits in the remaining capacity. Never
    /// fails; returns the number of bytes actually accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.input_ended {
            return 0;
        }
        let n = min(data.len(), self.remaining_capacity());
        self.buffer.extend(data[..n].iter().copied());
        self.bytes_written += n as u64;
        n
    }

    /// Copy up to `min(n, buffer_size)` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Vec<u8> {
        let n = min(n, self.buffer_size());
        self.buffer.iter().take(n).copied().collect()
    }

    /// Discard up to `min(n, buffer_size)` bytes from the front.
    pub fn pop(&mut self, n: usize) {
        let n = min(n, self.buffer_size());
        self.buffer.drain(..n);
        self.bytes_read += n as u64;
    }

    /// Peek then pop: read and remove up to `n` bytes.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let data = self.peek(n);
        self.pop(data.len());
        data
    }

    /// Latch `input_ended`. No more bytes can be written afterward.
    pub fn end_input(&mut self) {
        self.input_ended = true;
    }

    /// Latch `error`. Permanent; never clears.
    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn buffer_size(&self) -> usize {
        (self.bytes_written - self.bytes_read) as usize
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buffer_size()
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended
    }

    /// True once input has ended and every written byte has been read.
    pub fn eof(&self) -> bool {
        self.input_ended && self.buffer_size() == 0
    }

    pub fn error(&self) -> bool {
        self.error
    }
}
