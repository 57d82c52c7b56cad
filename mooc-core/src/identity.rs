//! Creature identity: participant ID, name fingerprint, display helpers.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shown instead of names too short to obfuscate.
pub const OBFUSCATED_PLACEHOLDER: &str = "???";
const MASK: char = '*';

/// Participant ID (16 bytes): hash of name and creation time. Stable across restarts.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ParticipantId(#[serde(with = "bytes_16")] [u8; 16]);

mod bytes_16 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

impl ParticipantId {
    /// Derive from name and creation time (nanosecond resolution).
    pub fn derive(name: &str, created_at: SystemTime) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", name, unix_nanos(created_at)).as_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        ParticipantId(id)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        ParticipantId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First 4 bytes as hex, for display.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Hash of the name alone. Two creatures may share dreams iff their fingerprints match.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NameFingerprint([u8; 8]);

impl NameFingerprint {
    pub fn derive(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut fp = [0u8; 8];
        fp.copy_from_slice(&digest[..8]);
        NameFingerprint(fp)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

/// Snapshot of a creature as seen on the network. Carried in every message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: ParticipantId,
    pub display_name: String,
    /// Unix nanoseconds.
    pub created_at: u64,
    /// Decorative only; not a key and never used for verification.
    #[serde(with = "bytes_32")]
    pub public_tag: [u8; 32],
    pub stage: String,
    pub alive: bool,
}

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl Identity {
    pub fn new(name: &str, created_at: SystemTime, stage: &str, alive: bool) -> Self {
        let secs = created_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let public_tag: [u8; 32] = Sha256::digest(format!("MOOC:PK:{}:{}", name, secs)).into();
        Self {
            participant_id: ParticipantId::derive(name, created_at),
            display_name: name.to_string(),
            created_at: unix_nanos(created_at),
            public_tag,
            stage: stage.to_string(),
            alive,
        }
    }

    pub fn created_at(&self) -> SystemTime {
        from_unix_nanos(self.created_at)
    }

    pub fn fingerprint(&self) -> NameFingerprint {
        NameFingerprint::derive(&self.display_name)
    }

    pub fn short_id(&self) -> String {
        self.participant_id.short()
    }

    pub fn can_share_dreams_with(&self, other: &Identity) -> bool {
        self.fingerprint() == other.fingerprint()
    }

    pub fn obfuscated_name(&self) -> String {
        obfuscated_display(&self.display_name)
    }
}

/// Partially hidden name: "Nibbles" -> "N*****s". Names of two characters or fewer
/// become [`OBFUSCATED_PLACEHOLDER`].
pub fn obfuscated_display(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= 2 {
        return OBFUSCATED_PLACEHOLDER.to_string();
    }
    let mut out = String::with_capacity(name.len());
    out.push(chars[0]);
    out.extend(std::iter::repeat(MASK).take(chars.len() - 2));
    out.push(chars[chars.len() - 1]);
    out
}

/// Unix time in nanoseconds. Saturates at 0 before the epoch and at `u64::MAX` far in the future.
pub fn unix_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub fn from_unix_nanos(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}
