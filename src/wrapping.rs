//! Bijection between 64-bit absolute stream indices and 32-bit wire
//! sequence numbers, relative to an Initial Sequence Number (ISN).
//!
//! Absolute index 0 is the SYN; byte `i` of the payload has absolute index
//! `i + 1`; the FIN occupies the index right after the last payload byte.

use std::fmt;
use std::ops::Add;

const MOD: u64 = 1u64 << 32;

/// A 32-bit sequence number that wraps modulo 2^32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Wrapping32(pub u32);

impl Wrapping32 {
    pub fn new(raw: u32) -> Self {
        Wrapping32(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// `wrap(absolute, isn) = (isn + absolute) mod 2^32`.
    pub fn wrap(absolute: u64, isn: Wrapping32) -> Wrapping32 {
        let seqno = ((isn.0 as u64).wrapping_add(absolute)) % MOD;
        Wrapping32(seqno as u32)
    }

    /// Returns the unique `u` such that `wrap(u, isn) == self` and
    /// `|u - checkpoint|` is minimized. Ties break toward the smaller
    /// candidate; the result is never negative.
    pub fn unwrap(self, isn: Wrapping32, checkpoint: u64) -> u64 {
        let offset = self.0.wrapping_sub(isn.0) as u64; // in [0, 2^32)
        let base = (checkpoint / MOD) * MOD;

        let mut best: Option<u64> = None;
        let mut consider = |candidate: u64| {
            best = Some(match best {
                None => candidate,
                Some(b) => {
                    let d_new = abs_diff(candidate, checkpoint);
                    let d_best = abs_diff(b, checkpoint);
                    if d_new < d_best {
                        candidate
                    } else {
                        b
                    }
                }
            });
        };

        if base >= MOD {
            consider(base - MOD + offset);
        }
        consider(base + offset);
        consider(base + MOD + offset);

        best.expect("at least one candidate is always considered")
    }
}

impl Add<u64> for Wrapping32 {
    type Output = Wrapping32;

    fn add(self, rhs: u64) -> Wrapping32 {
        Wrapping32::wrap(rhs, self)
    }
}

impl fmt::Display for Wrapping32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn abs_diff(a: u64, b: u64) -> u64 {
    if a > b {
        a - b
    } else {
        b - a
    }
}
