//! Connection-wide tunables. Defaults mirror the classic Sponge lab config.

/// Configuration shared by a [`crate::connection::TcpConnection`]'s sender
/// and receiver.
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
    /// Joint capacity, in bytes, of each direction's byte stream /
    /// reassembler budget.
    pub capacity: usize,
    /// Maximum payload bytes per outbound segment.
    pub mss: usize,
    /// Initial retransmission timeout, in milliseconds.
    pub initial_rto_ms: u64,
    /// Consecutive retransmissions allowed before the connection gives up
    /// and resets itself.
    pub max_retx: u32,
    /// How many multiples of `initial_rto_ms` to linger after both streams
    /// finish, absorbing stray retransmissions.
    pub linger_multiplier: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            capacity: 64 * 1024,
            mss: 1452,
            initial_rto_ms: 1000,
            max_retx: 8,
            linger_multiplier: 10,
        }
    }
}
