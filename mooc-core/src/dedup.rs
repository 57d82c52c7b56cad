//! Bounded seen-message cache keyed by (sender, nonce).
//! Suppresses re-application and re-flooding of content that reaches us through several peers.

use std::collections::{HashSet, VecDeque};

use crate::identity::ParticipantId;
use crate::integrity::Nonce;
use crate::protocol::Message;

pub const DEFAULT_SEEN_CAPACITY: usize = 1024;

type SeenKey = (ParticipantId, Nonce);

#[derive(Debug)]
pub struct SeenNonces {
    seen: HashSet<SeenKey>,
    order: VecDeque<SeenKey>,
    capacity: usize,
}

impl SeenNonces {
    /// Capacity 0 disables suppression: every message counts as new.
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Mark as seen. Returns true if this message was new.
    pub fn check_and_mark(&mut self, msg: &Message) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let key = (msg.sender.participant_id, msg.nonce);
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key);
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenNonces {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::protocol::MessageKind;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn msg_with_nonce(n: u8) -> Message {
        let sender = Identity::new("Pixel", UNIX_EPOCH + Duration::from_secs(10), "Baby", true);
        Message::with_parts(
            MessageKind::Memory,
            &sender,
            &(),
            SystemTime::now(),
            Nonce([n; 8]),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_detected() {
        let mut seen = SeenNonces::new(8);
        let a = msg_with_nonce(1);
        assert!(seen.check_and_mark(&a));
        assert!(!seen.check_and_mark(&a));
        let mut relayed = a.clone();
        relayed.decrement_ttl();
        assert!(!seen.check_and_mark(&relayed));
        assert!(seen.check_and_mark(&msg_with_nonce(2)));
    }

    #[test]
    fn bounded_oldest_forgotten() {
        let mut seen = SeenNonces::new(4);
        for n in 0..10 {
            seen.check_and_mark(&msg_with_nonce(n));
        }
        assert_eq!(seen.len(), 4);
        assert!(seen.check_and_mark(&msg_with_nonce(0)));
        assert!(!seen.check_and_mark(&msg_with_nonce(9)));
    }

    #[test]
    fn zero_capacity_disables() {
        let mut seen = SeenNonces::new(0);
        let a = msg_with_nonce(3);
        assert!(seen.check_and_mark(&a));
        assert!(seen.check_and_mark(&a));
        assert!(seen.is_empty());
    }
}
