//! lan-discovery: Peer discovery for LAN chat nodes over UDP broadcast.
//!
//! This crate provides:
//! - An unreliable datagram channel abstraction (UDP and in-memory)
//! - Periodic presence announcements and a listener that ingests them
//! - A concurrent membership table with liveness expiry
//! - `PeerDiscovery`, the start/stop/snapshot façade used by the server

pub mod announcer;
pub mod channel;
pub mod config;
pub mod listener;
pub mod membership;
pub mod peer_id;
pub mod presence;
pub mod service;

pub use channel::{
    ChannelError, Datagram, DatagramChannel, MemoryNetwork, MemoryTransport, Transport,
    UdpTransport,
};
pub use config::{ConfigError, DiscoveryConfig};
pub use membership::{MembershipTable, PeerRecord};
pub use peer_id::{PeerId, PeerIdError};
pub use presence::PresenceMessage;
pub use service::{DiscoveryStatus, PeerDiscovery};
