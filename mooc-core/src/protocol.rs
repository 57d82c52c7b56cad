//! MOOC wire protocol: message kinds, envelope, payloads.

use std::fmt;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::identity::{unix_nanos, Identity};
use crate::integrity::{compute_tag, verify_tag, IntegrityTag, Nonce};

/// Hop budget stamped on every new message.
pub const DEFAULT_TTL: u8 = 5;

/// All message kinds. The discriminant feeds the integrity tag, so the order is part of the
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// "Looking for friends."
    Discover = 0,
    /// "I exist." Periodic broadcast and direct reply to a newcomer.
    Announce = 1,
    /// Leaving the network.
    Goodbye = 2,
    Memory = 3,
    /// Only accepted between creatures with the same name.
    Dream = 4,
    MoodUpdate = 5,
    /// Direct message. Never flooded.
    Whisper = 6,
    Death = 7,
    /// Network-wide synchronized event.
    Consensus = 8,
    /// Liveness heartbeat. Never flooded.
    Pulse = 9,
}

impl MessageKind {
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            MessageKind::Discover | MessageKind::Announce | MessageKind::Goodbye
        )
    }

    /// Kinds eligible for flood propagation.
    pub fn floods(self) -> bool {
        matches!(
            self,
            MessageKind::Memory
                | MessageKind::Dream
                | MessageKind::MoodUpdate
                | MessageKind::Death
                | MessageKind::Consensus
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Discover => "DISCOVER",
            MessageKind::Announce => "ANNOUNCE",
            MessageKind::Goodbye => "GOODBYE",
            MessageKind::Memory => "MEMORY",
            MessageKind::Dream => "DREAM",
            MessageKind::MoodUpdate => "MOOD",
            MessageKind::Whisper => "WHISPER",
            MessageKind::Death => "DEATH",
            MessageKind::Consensus => "CONSENSUS",
            MessageKind::Pulse => "PULSE",
        };
        f.write_str(s)
    }
}

/// Message envelope. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: Identity,
    /// Unix nanoseconds.
    pub timestamp: u64,
    /// Kind-specific payload, bincode-encoded. Not covered by the tag.
    pub payload: Vec<u8>,
    pub tag: IntegrityTag,
    pub nonce: Nonce,
    pub ttl: u8,
}

impl Message {
    /// Build a message stamped now, with a fresh nonce and the default hop budget.
    pub fn new<P: Serialize>(
        kind: MessageKind,
        sender: &Identity,
        payload: &P,
    ) -> Result<Self, ProtocolError> {
        Self::with_parts(kind, sender, payload, SystemTime::now(), Nonce::generate())
    }

    /// Lifecycle message with an empty payload.
    pub fn lifecycle(kind: MessageKind, sender: &Identity) -> Result<Self, ProtocolError> {
        Self::new(kind, sender, &())
    }

    pub fn with_parts<P: Serialize>(
        kind: MessageKind,
        sender: &Identity,
        payload: &P,
        at: SystemTime,
        nonce: Nonce,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serialize(payload).map_err(ProtocolError::Encode)?;
        let timestamp = unix_nanos(at);
        let tag = compute_tag(kind, &sender.participant_id, &nonce, timestamp);
        Ok(Self {
            kind,
            sender: sender.clone(),
            timestamp,
            payload,
            tag,
            nonce,
            ttl: DEFAULT_TTL,
        })
    }

    /// Tamper check over kind, sender ID, nonce and timestamp. Not authentication.
    pub fn verify(&self) -> bool {
        verify_tag(
            self.kind,
            &self.sender.participant_id,
            &self.nonce,
            self.timestamp,
            &self.tag,
        )
    }

    pub fn should_propagate(&self) -> bool {
        self.kind.floods() && self.ttl > 0
    }

    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }

    pub fn decode_payload<P: DeserializeOwned>(&self) -> Result<P, ProtocolError> {
        bincode::deserialize(&self.payload).map_err(ProtocolError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode payload: {0}")]
    Encode(bincode::Error),
    #[error("failed to decode payload: {0}")]
    Decode(bincode::Error),
}

/// A shared memory fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub fragment: String,
    pub emotion: String,
    /// 0..=100.
    pub intensity: u8,
    pub origin_time: u64,
}

/// A dream shared between same-name creatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DreamShare {
    pub text: String,
    pub symbols: Vec<String>,
    pub lucid: bool,
    /// Short ID of the creature the dream was composed for.
    pub shared_with: String,
}

/// Mood contagion data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodSignal {
    pub mood: String,
    pub intensity: u8,
    pub contagious: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathCause {
    /// Announced by the creature's own host.
    Neglect,
    /// Inferred from a peer going silent. Speculative.
    Unknown,
}

impl fmt::Display for DeathCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathCause::Neglect => f.write_str("neglect"),
            DeathCause::Unknown => f.write_str("unknown"),
        }
    }
}

/// News of a death somewhere on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathNotice {
    pub name: String,
    pub death_time: u64,
    /// Age in hours; 0 when unknown.
    pub age_hours: u32,
    pub last_words: String,
    pub cause: DeathCause,
}

impl DeathNotice {
    pub fn is_speculative(&self) -> bool {
        self.cause == DeathCause::Unknown
    }

    /// One consumer-facing line. Speculative notices never read as confirmed.
    pub fn headline(&self) -> String {
        if self.is_speculative() {
            format!(
                "{} went silent. They may have passed, but nobody knows for sure.",
                self.name
            )
        } else {
            format!(
                "{} has died of {} at {}h old. Last words: \"{}\"",
                self.name, self.cause, self.age_hours, self.last_words
            )
        }
    }
}

/// Event every creature should act on at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusEvent {
    pub event_type: String,
    pub event_data: String,
    pub trigger_time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn sender() -> Identity {
        Identity::new("Nibbles", UNIX_EPOCH + Duration::from_secs(1_700_000_000), "Baby", true)
    }

    fn memory() -> Message {
        let payload = MemoryFragment {
            fragment: "The protocol connects us all.".into(),
            emotion: "serene".into(),
            intensity: 64,
            origin_time: 1,
        };
        Message::new(MessageKind::Memory, &sender(), &payload).unwrap()
    }

    #[test]
    fn new_message_verifies() {
        let msg = memory();
        assert_eq!(msg.ttl, DEFAULT_TTL);
        assert!(msg.verify());
    }

    #[test]
    fn tampering_breaks_verify() {
        let mut msg = memory();
        msg.nonce.0[0] ^= 0xff;
        assert!(!msg.verify());

        let mut msg = memory();
        msg.timestamp += 1;
        assert!(!msg.verify());

        let mut msg = memory();
        msg.kind = MessageKind::Death;
        assert!(!msg.verify());

        let mut msg = memory();
        msg.sender = Identity::new("Other", UNIX_EPOCH, "Baby", true);
        assert!(!msg.verify());
    }

    #[test]
    fn payload_and_ttl_not_covered() {
        let mut msg = memory();
        msg.payload.push(0);
        msg.decrement_ttl();
        assert!(msg.verify());
    }

    #[test]
    fn propagation_matrix() {
        let flooding = [
            MessageKind::Memory,
            MessageKind::Dream,
            MessageKind::MoodUpdate,
            MessageKind::Death,
            MessageKind::Consensus,
        ];
        let local = [
            MessageKind::Discover,
            MessageKind::Announce,
            MessageKind::Goodbye,
            MessageKind::Whisper,
            MessageKind::Pulse,
        ];
        for kind in flooding {
            let mut msg = Message::new(kind, &sender(), &()).unwrap();
            assert!(msg.should_propagate(), "{kind} should flood");
            msg.ttl = 0;
            assert!(!msg.should_propagate(), "{kind} at ttl 0 should not flood");
        }
        for kind in local {
            let mut msg = Message::new(kind, &sender(), &()).unwrap();
            msg.ttl = u8::MAX;
            assert!(!msg.should_propagate(), "{kind} never floods");
        }
    }

    #[test]
    fn decrement_ttl_saturates() {
        let mut msg = memory();
        for _ in 0..(DEFAULT_TTL as usize + 3) {
            msg.decrement_ttl();
        }
        assert_eq!(msg.ttl, 0);
    }

    #[test]
    fn payload_decodes_to_its_type() {
        let msg = memory();
        let fragment: MemoryFragment = msg.decode_payload().unwrap();
        assert_eq!(fragment.intensity, 64);
        let lifecycle = Message::lifecycle(MessageKind::Announce, &sender()).unwrap();
        assert!(lifecycle.payload.is_empty());
        assert!(lifecycle.decode_payload::<MemoryFragment>().is_err());
    }

    #[test]
    fn speculative_death_headline_is_hedged() {
        let notice = DeathNotice {
            name: "Pixel".into(),
            death_time: 0,
            age_hours: 0,
            last_words: "Connection lost...".into(),
            cause: DeathCause::Unknown,
        };
        assert!(notice.is_speculative());
        assert!(notice.headline().contains("may have passed"));
        let confirmed = DeathNotice {
            cause: DeathCause::Neglect,
            age_hours: 12,
            ..notice
        };
        assert!(confirmed.headline().contains("died of neglect"));
    }
}
