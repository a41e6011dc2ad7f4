//! Errors surfaced at the system boundary (TUN device, sockets). The core
//! FSM never returns these: per the data-plane design, `active()`, `error()`
//! and `eof()` are the only truth it exposes.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TUN device error: {0}")]
    Tun(String),

    #[error("port {0} already has a listener bound")]
    PortInUse(u16),

    #[error("port {0} is not bound")]
    PortNotBound(u16),

    #[error("connection closed")]
    ConnectionClosed,
}
