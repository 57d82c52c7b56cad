//! Integrity tag and nonce for message envelopes.
//!
//! The tag is a tamper-evidence checksum over (kind, sender participant ID, nonce,
//! timestamp). Anyone can compute it, so it proves nothing about who sent a message,
//! and the payload bytes are not covered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::ParticipantId;
use crate::protocol::MessageKind;

/// Truncated SHA-256 (16 bytes).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IntegrityTag(pub [u8; 16]);

/// Per-message nonce (8 bytes).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Nonce(pub [u8; 8]);

impl Nonce {
    /// Hash of the current time at two resolutions. A process-wide sequence number keeps
    /// nonces distinct when the clock does not advance between calls.
    pub fn generate() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        Self::from_clock(now.as_nanos(), now.subsec_nanos(), seq)
    }

    fn from_clock(unix_nanos: u128, subsec_nanos: u32, seq: u64) -> Self {
        let digest = Sha256::digest(format!("{}:{}:{}", unix_nanos, subsec_nanos, seq).as_bytes());
        let mut n = [0u8; 8];
        n.copy_from_slice(&digest[..8]);
        Nonce(n)
    }
}

/// Compute the tag for the covered envelope fields.
pub fn compute_tag(
    kind: MessageKind,
    sender: &ParticipantId,
    nonce: &Nonce,
    timestamp: u64,
) -> IntegrityTag {
    let mut hasher = Sha256::new();
    hasher.update([kind as u8]);
    hasher.update(sender.as_bytes());
    hasher.update(nonce.0);
    hasher.update(timestamp.to_le_bytes());
    let digest = hasher.finalize();
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&digest[..16]);
    IntegrityTag(tag)
}

/// Recompute and compare.
pub fn verify_tag(
    kind: MessageKind,
    sender: &ParticipantId,
    nonce: &Nonce,
    timestamp: u64,
    expected: &IntegrityTag,
) -> bool {
    compute_tag(kind, sender, nonce, timestamp) == *expected
}
