//! A user-space TCP/IP data plane: byte streams, sequence number
//! arithmetic, reassembly, and a full sender/receiver/connection state
//! machine. `socket` wires it to a TUN device for end-to-end use; `net`
//! provides a standalone Ethernet/ARP/longest-prefix-match routing layer
//! for running the same stack behind a TAP-style link instead.

pub mod byte_stream;
pub mod config;
pub mod connection;
pub mod error;
pub mod net;
pub mod reassembler;
pub mod receiver;
pub mod retx_timer;
pub mod segment;
pub mod sender;
pub mod socket;
pub mod wire;
pub mod wrapping;

pub use config::TcpConfig;
pub use connection::TcpConnection;
pub use error::Error;
pub use socket::{Interface, TcpListener, TcpStream};
