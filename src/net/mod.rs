//! The external data-plane layer: Ethernet/ARP framing and IPv4 routing,
//! sitting below the connection-level sender/receiver/FSM.

pub mod interface;
pub mod router;
