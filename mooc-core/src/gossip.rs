//! Gossip state: acceptance rules, bounded content buffers, mood and influence counters.
//! Host-driven: no I/O. The runtime decides when to originate and where to relay.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::buffer::BoundedBuffer;
use crate::content::MOOD_ADOPTION_CHANCE;
use crate::dedup::SeenNonces;
use crate::identity::Identity;
use crate::protocol::{
    DeathNotice, DreamShare, MemoryFragment, Message, MessageKind, MoodSignal, ProtocolError,
};

pub const MEMORY_CAPACITY: usize = 50;
pub const DREAM_CAPACITY: usize = 20;
pub const DEATH_CAPACITY: usize = 100;

pub const DEFAULT_MOOD: &str = "neutral";
pub const DEFAULT_MOOD_INTENSITY: u8 = 50;

/// Inputs to the influence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipCounters {
    pub originated: u64,
    pub relayed: u64,
    pub unique_peers: u64,
    pub deaths_witnessed: u64,
}

impl GossipCounters {
    /// originated x2 + relayed + unique peers x3.
    pub fn influence(&self) -> u64 {
        self.originated
            .saturating_mul(2)
            .saturating_add(self.relayed)
            .saturating_add(self.unique_peers.saturating_mul(3))
    }
}

/// Outcome of an accepted inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    MemoryStored,
    DreamStored,
    /// Sender's name fingerprint differs from ours.
    DreamRejected,
    MoodAdopted,
    MoodIgnored,
    DeathRecorded,
    /// Nothing stored locally (consensus, whisper, pulse, lifecycle).
    Passed,
}

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("duplicate message")]
    Duplicate,
    #[error(transparent)]
    Payload(#[from] ProtocolError),
}

pub struct GossipState {
    local: Identity,
    memories: BoundedBuffer<MemoryFragment>,
    dreams: BoundedBuffer<DreamShare>,
    deaths: BoundedBuffer<DeathNotice>,
    mood: String,
    mood_intensity: u8,
    counters: GossipCounters,
    seen: SeenNonces,
}

impl GossipState {
    pub fn new(local: Identity, seen_capacity: usize) -> Self {
        Self {
            local,
            memories: BoundedBuffer::new(MEMORY_CAPACITY),
            dreams: BoundedBuffer::new(DREAM_CAPACITY),
            deaths: BoundedBuffer::new(DEATH_CAPACITY),
            mood: DEFAULT_MOOD.to_string(),
            mood_intensity: DEFAULT_MOOD_INTENSITY,
            counters: GossipCounters::default(),
            seen: SeenNonces::new(seen_capacity),
        }
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    /// Apply an inbound message. Duplicates and undecodable payloads are errors: the caller
    /// must neither store nor relay them.
    pub fn receive<R: Rng + ?Sized>(
        &mut self,
        msg: &Message,
        rng: &mut R,
    ) -> Result<Reception, GossipError> {
        if !self.seen.check_and_mark(msg) {
            return Err(GossipError::Duplicate);
        }
        let reception = match msg.kind {
            MessageKind::Memory => {
                self.memories.push(msg.decode_payload()?);
                Reception::MemoryStored
            }
            MessageKind::Dream => {
                let dream: DreamShare = msg.decode_payload()?;
                if self.local.can_share_dreams_with(&msg.sender) {
                    self.dreams.push(dream);
                    Reception::DreamStored
                } else {
                    Reception::DreamRejected
                }
            }
            MessageKind::MoodUpdate => {
                let signal: MoodSignal = msg.decode_payload()?;
                if signal.contagious && rng.gen_bool(MOOD_ADOPTION_CHANCE) {
                    self.mood = signal.mood;
                    self.mood_intensity = signal.intensity;
                    Reception::MoodAdopted
                } else {
                    Reception::MoodIgnored
                }
            }
            MessageKind::Death => {
                self.record_death(msg.decode_payload()?);
                Reception::DeathRecorded
            }
            _ => Reception::Passed,
        };
        Ok(reception)
    }

    pub fn record_death(&mut self, notice: DeathNotice) {
        self.deaths.push(notice);
        self.counters.deaths_witnessed = self.counters.deaths_witnessed.saturating_add(1);
    }

    pub fn record_originated(&mut self) {
        self.counters.originated = self.counters.originated.saturating_add(1);
    }

    pub fn record_relayed(&mut self) {
        self.counters.relayed = self.counters.relayed.saturating_add(1);
    }

    pub fn record_peer_discovered(&mut self) {
        self.counters.unique_peers = self.counters.unique_peers.saturating_add(1);
    }

    pub fn counters(&self) -> GossipCounters {
        self.counters
    }

    /// Resume counters from persisted state.
    pub fn restore_counters(&mut self, counters: GossipCounters) {
        self.counters = counters;
    }

    pub fn mood(&self) -> (String, u8) {
        (self.mood.clone(), self.mood_intensity)
    }

    pub fn set_mood(&mut self, mood: &str, intensity: u8) {
        self.mood = mood.to_string();
        self.mood_intensity = intensity.min(100);
    }

    pub fn random_memory<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<MemoryFragment> {
        self.memories.pick(rng).cloned()
    }

    pub fn random_dream<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<DreamShare> {
        self.dreams.pick(rng).cloned()
    }

    pub fn random_death<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<DeathNotice> {
        self.deaths.pick(rng).cloned()
    }

    pub fn has_deaths(&self) -> bool {
        !self.deaths.is_empty()
    }

    pub fn memory_count(&self) -> usize {
        self.memories.len()
    }

    pub fn dream_count(&self) -> usize {
        self.dreams.len()
    }

    pub fn death_count(&self) -> usize {
        self.deaths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{compose_dream, compose_memory};
    use crate::protocol::DeathCause;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::{Duration, UNIX_EPOCH};

    fn local() -> Identity {
        Identity::new("Pixel", UNIX_EPOCH + Duration::from_secs(100), "Adult", true)
    }

    fn stranger(name: &str) -> Identity {
        Identity::new(name, UNIX_EPOCH + Duration::from_secs(999), "Baby", true)
    }

    #[test]
    fn memories_are_bounded() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut state = GossipState::new(local(), 4096);
        let from = stranger("Bolt");
        for i in 0..(MEMORY_CAPACITY + 25) {
            let memory = compose_memory(&mut rng, i as u64);
            let msg = Message::new(MessageKind::Memory, &from, &memory).unwrap();
            assert_eq!(state.receive(&msg, &mut rng).unwrap(), Reception::MemoryStored);
        }
        assert_eq!(state.memory_count(), MEMORY_CAPACITY);
        assert!(state.random_memory(&mut rng).unwrap().origin_time >= 25);
    }

    #[test]
    fn dreams_need_matching_name() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut state = GossipState::new(local(), 64);
        let twin = Identity::new("Pixel", UNIX_EPOCH + Duration::from_secs(5), "Baby", true);
        let other = stranger("Bolt");

        let dream = compose_dream(&mut rng, &local().short_id());
        let from_twin = Message::new(MessageKind::Dream, &twin, &dream).unwrap();
        let from_other = Message::new(MessageKind::Dream, &other, &dream).unwrap();

        assert_eq!(state.receive(&from_twin, &mut rng).unwrap(), Reception::DreamStored);
        assert_eq!(state.receive(&from_other, &mut rng).unwrap(), Reception::DreamRejected);
        assert_eq!(state.dream_count(), 1);
    }

    #[test]
    fn duplicates_are_refused() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut state = GossipState::new(local(), 64);
        let memory = compose_memory(&mut rng, 0);
        let msg = Message::new(MessageKind::Memory, &stranger("Bolt"), &memory).unwrap();
        assert!(state.receive(&msg, &mut rng).is_ok());
        assert!(matches!(state.receive(&msg, &mut rng), Err(GossipError::Duplicate)));
        assert_eq!(state.memory_count(), 1);
    }

    #[test]
    fn undecodable_payload_is_an_error() {
        let mut rng = StdRng::seed_from_u64(14);
        let mut state = GossipState::new(local(), 64);
        let msg = Message::new(MessageKind::Death, &stranger("Bolt"), &()).unwrap();
        assert!(matches!(state.receive(&msg, &mut rng), Err(GossipError::Payload(_))));
        assert!(!state.has_deaths());
    }

    #[test]
    fn contagious_mood_sometimes_adopted() {
        let mut rng = StdRng::seed_from_u64(15);
        let mut state = GossipState::new(local(), 4096);
        let from = stranger("Bolt");
        let calm = MoodSignal { mood: "serene".into(), intensity: 80, contagious: false };
        for _ in 0..50 {
            let msg = Message::new(MessageKind::MoodUpdate, &from, &calm).unwrap();
            assert_eq!(state.receive(&msg, &mut rng).unwrap(), Reception::MoodIgnored);
        }
        assert_eq!(state.mood(), (DEFAULT_MOOD.to_string(), DEFAULT_MOOD_INTENSITY));

        let catching = MoodSignal { mood: "euphoric".into(), intensity: 90, contagious: true };
        let adopted = (0..200).any(|_| {
            let msg = Message::new(MessageKind::MoodUpdate, &from, &catching).unwrap();
            state.receive(&msg, &mut rng).unwrap() == Reception::MoodAdopted
        });
        assert!(adopted);
        assert_eq!(state.mood(), ("euphoric".to_string(), 90));
    }

    #[test]
    fn deaths_counted_and_bounded() {
        let mut state = GossipState::new(local(), 0);
        for i in 0..(DEATH_CAPACITY + 10) {
            state.record_death(DeathNotice {
                name: format!("c{i}"),
                death_time: 0,
                age_hours: 1,
                last_words: String::new(),
                cause: DeathCause::Neglect,
            });
        }
        assert_eq!(state.death_count(), DEATH_CAPACITY);
        assert_eq!(state.counters().deaths_witnessed, (DEATH_CAPACITY + 10) as u64);
    }

    #[test]
    fn influence_formula() {
        let counters = GossipCounters {
            originated: 4,
            relayed: 7,
            unique_peers: 2,
            deaths_witnessed: 9,
        };
        assert_eq!(counters.influence(), 4 * 2 + 7 + 2 * 3);
    }
}
