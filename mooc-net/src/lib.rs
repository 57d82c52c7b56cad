//! MOOC network runtime: LAN discovery, gossip and the host-facing `Network` handle.
//! All sockets and timers run on the caller's tokio runtime.

pub mod config;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod network;

pub use config::NetConfig;
pub use discovery::{DiscoveryEvent, DiscoveryService};
pub use error::NetError;
pub use gossip::GossipService;
pub use network::{Diagnostics, LinkState, Network, AMBIENT_QUEUE_CAPACITY};
