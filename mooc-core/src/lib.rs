//! MOOC protocol core: LAN discovery and gossip between companion creatures.
//! Host-driven: no I/O; the runtime passes messages and time in and acts on the outcomes.

pub mod buffer;
pub mod content;
pub mod dedup;
pub mod gossip;
pub mod identity;
pub mod integrity;
pub mod peers;
pub mod protocol;
pub mod state;
pub mod wire;

pub use buffer::BoundedBuffer;
pub use dedup::SeenNonces;
pub use gossip::{GossipCounters, GossipError, GossipState, Reception};
pub use identity::{obfuscated_display, Identity, NameFingerprint, ParticipantId};
pub use integrity::{IntegrityTag, Nonce};
pub use peers::{Observation, Peer, PeerTable};
pub use protocol::{
    ConsensusEvent, DeathCause, DeathNotice, DreamShare, MemoryFragment, Message, MessageKind,
    MoodSignal, ProtocolError, DEFAULT_TTL,
};
pub use state::{FriendRecord, NetworkState, StateError};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, MAX_DATAGRAM_SIZE};
