//! Peer table: per-peer lifecycle unknown -> online -> offline. Records are never removed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, ParticipantId};
use crate::protocol::{Message, MessageKind};

/// A creature seen on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub identity: Identity,
    /// Where its last datagram came from.
    pub addr: Option<SocketAddr>,
    pub first_seen: SystemTime,
    pub last_seen: SystemTime,
    pub message_count: u64,
    pub online: bool,
}

impl Peer {
    fn first_contact(identity: Identity, addr: SocketAddr, now: SystemTime) -> Self {
        Self {
            identity,
            addr: Some(addr),
            first_seen: now,
            last_seen: now,
            message_count: 1,
            online: true,
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.identity.participant_id
    }

    fn is_stale(&self, now: SystemTime, timeout: Duration) -> bool {
        now.duration_since(self.last_seen)
            .map(|age| age > timeout)
            .unwrap_or(false)
    }
}

/// What an inbound message did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// First discover/announce from this participant; owes a direct announce reply.
    Discovered(Peer),
    /// Known peer flagged offline came back; owes a direct announce reply.
    Returned(Peer),
    /// Known online peer; last-seen and message count refreshed.
    Refreshed,
    /// Explicit goodbye from an online peer.
    Departed(Peer),
    /// Non-discovery message about a peer that is unknown or offline, or a goodbye with
    /// nothing to do.
    Untracked,
}

impl Observation {
    /// True when the sender should get a unicast announce back.
    pub fn needs_reply(&self) -> bool {
        matches!(self, Observation::Discovered(_) | Observation::Returned(_))
    }
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<ParticipantId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an already-verified message from someone else.
    pub fn observe(&mut self, msg: &Message, from: SocketAddr, now: SystemTime) -> Observation {
        let id = msg.sender.participant_id;
        match msg.kind {
            MessageKind::Goodbye => match self.peers.get_mut(&id) {
                Some(peer) if peer.online => {
                    peer.online = false;
                    Observation::Departed(peer.clone())
                }
                _ => Observation::Untracked,
            },
            // Relayed content keeps the original sender, so it says nothing about where
            // that sender is or whether it is still around.
            kind if !kind.is_lifecycle() => match self.peers.get_mut(&id) {
                Some(peer) if peer.online => {
                    peer.last_seen = now;
                    peer.message_count = peer.message_count.saturating_add(1);
                    Observation::Refreshed
                }
                _ => Observation::Untracked,
            },
            _ => match self.peers.get_mut(&id) {
                Some(peer) => {
                    let was_online = peer.online;
                    peer.identity = msg.sender.clone();
                    peer.addr = Some(from);
                    peer.last_seen = now;
                    peer.message_count = peer.message_count.saturating_add(1);
                    peer.online = true;
                    if was_online {
                        Observation::Refreshed
                    } else {
                        Observation::Returned(peer.clone())
                    }
                }
                None => {
                    let peer = Peer::first_contact(msg.sender.clone(), from, now);
                    self.peers.insert(id, peer.clone());
                    Observation::Discovered(peer)
                }
            },
        }
    }

    /// Flag online peers silent for longer than `timeout` as offline. Returns the peers just lost.
    pub fn sweep(&mut self, now: SystemTime, timeout: Duration) -> Vec<Peer> {
        self.peers
            .values_mut()
            .filter(|p| p.online && p.is_stale(now, timeout))
            .map(|p| {
                p.online = false;
                p.clone()
            })
            .collect()
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn all(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn online(&self) -> Vec<Peer> {
        self.peers.values().filter(|p| p.online).cloned().collect()
    }

    pub fn online_addrs(&self) -> Vec<SocketAddr> {
        self.peers
            .values()
            .filter(|p| p.online)
            .filter_map(|p| p.addr)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.peers.values().filter(|p| p.online).count()
    }

    /// Restore saved peers as offline until they are heard from again. Live entries win.
    pub fn import(&mut self, peers: impl IntoIterator<Item = Peer>) -> usize {
        let mut added = 0;
        for mut peer in peers {
            peer.online = false;
            if let std::collections::hash_map::Entry::Vacant(slot) = self.peers.entry(peer.id()) {
                slot.insert(peer);
                added += 1;
            }
        }
        added
    }

    /// Drop restored records that were never heard from again. Returns how many went.
    pub fn discard_restored(&mut self, ids: impl IntoIterator<Item = ParticipantId>) -> usize {
        let mut dropped = 0;
        for id in ids {
            if self.peers.get(&id).is_some_and(|p| !p.online) {
                self.peers.remove(&id);
                dropped += 1;
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn t(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn addr() -> SocketAddr {
        "192.168.1.20:19847".parse().unwrap()
    }

    fn creature(name: &str, alive: bool) -> Identity {
        Identity::new(name, UNIX_EPOCH + Duration::from_secs(5), "Teen", alive)
    }

    fn msg(kind: MessageKind, who: &Identity) -> Message {
        Message::new(kind, who, &()).unwrap()
    }

    #[test]
    fn first_announce_creates_online_peer() {
        let mut table = PeerTable::new();
        let pixel = creature("Pixel", true);
        let obs = table.observe(&msg(MessageKind::Announce, &pixel), addr(), t(0));
        assert!(obs.needs_reply());
        let Observation::Discovered(peer) = obs else {
            panic!("expected Discovered");
        };
        assert!(peer.online);
        assert_eq!(peer.message_count, 1);
        assert_eq!(table.online_count(), 1);
    }

    #[test]
    fn subsequent_traffic_refreshes() {
        let mut table = PeerTable::new();
        let pixel = creature("Pixel", true);
        table.observe(&msg(MessageKind::Discover, &pixel), addr(), t(0));
        let obs = table.observe(&msg(MessageKind::Memory, &pixel), addr(), t(10));
        assert_eq!(obs, Observation::Refreshed);
        let peer = table.get(&pixel.participant_id).unwrap();
        assert_eq!(peer.message_count, 2);
        assert_eq!(peer.last_seen, t(10));
        assert_eq!(peer.first_seen, t(0));
    }

    #[test]
    fn gossip_from_stranger_is_untracked() {
        let mut table = PeerTable::new();
        let obs = table.observe(&msg(MessageKind::Memory, &creature("Ghost", true)), addr(), t(0));
        assert_eq!(obs, Observation::Untracked);
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_flags_stale_peers_offline_and_keeps_them() {
        let mut table = PeerTable::new();
        let pixel = creature("Pixel", true);
        let bolt = creature("Bolt", true);
        table.observe(&msg(MessageKind::Announce, &pixel), addr(), t(0));
        table.observe(&msg(MessageKind::Announce, &bolt), addr(), t(100));

        let timeout = Duration::from_secs(120);
        assert!(table.sweep(t(120), timeout).is_empty());
        let lost = table.sweep(t(121), timeout);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id(), pixel.participant_id);
        assert!(!lost[0].online);
        // Already offline: not reported twice.
        assert!(table.sweep(t(200), timeout).iter().all(|p| p.id() != pixel.participant_id));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn goodbye_is_immediate() {
        let mut table = PeerTable::new();
        let pixel = creature("Pixel", true);
        table.observe(&msg(MessageKind::Announce, &pixel), addr(), t(0));
        let obs = table.observe(&msg(MessageKind::Goodbye, &pixel), addr(), t(1));
        assert!(matches!(obs, Observation::Departed(ref p) if !p.online));
        assert_eq!(table.online_count(), 0);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.observe(&msg(MessageKind::Goodbye, &pixel), addr(), t(2)),
            Observation::Untracked
        );
    }

    #[test]
    fn offline_peer_returns_on_traffic() {
        let mut table = PeerTable::new();
        let pixel = creature("Pixel", true);
        table.observe(&msg(MessageKind::Announce, &pixel), addr(), t(0));
        table.observe(&msg(MessageKind::Goodbye, &pixel), addr(), t(1));
        let obs = table.observe(&msg(MessageKind::Announce, &pixel), addr(), t(2));
        assert!(matches!(obs, Observation::Returned(_)));
        assert_eq!(table.online_count(), 1);
    }

    #[test]
    fn relayed_content_does_not_move_or_revive_sender() {
        let mut table = PeerTable::new();
        let alice = creature("Alice", true);
        let home: SocketAddr = "192.168.1.10:19847".parse().unwrap();
        table.observe(&msg(MessageKind::Announce, &alice), home, t(0));

        let obs = table.observe(&msg(MessageKind::Memory, &alice), addr(), t(5));
        assert_eq!(obs, Observation::Refreshed);
        let peer = table.get(&alice.participant_id).unwrap();
        assert_eq!(peer.addr, Some(home));
        assert_eq!(peer.last_seen, t(5));

        table.observe(&msg(MessageKind::Goodbye, &alice), home, t(6));
        let obs = table.observe(&msg(MessageKind::Memory, &alice), addr(), t(7));
        assert_eq!(obs, Observation::Untracked);
        assert!(!obs.needs_reply());
        let peer = table.get(&alice.participant_id).unwrap();
        assert!(!peer.online);
        assert_eq!(peer.addr, Some(home));
        assert_eq!(peer.last_seen, t(5));
    }

    #[test]
    fn imported_peers_start_offline() {
        let mut source = PeerTable::new();
        let pixel = creature("Pixel", true);
        source.observe(&msg(MessageKind::Announce, &pixel), addr(), t(0));

        let mut restored = PeerTable::new();
        assert_eq!(restored.import(source.all()), 1);
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.online_count(), 0);
        assert!(restored.online_addrs().is_empty());
        assert_eq!(restored.import(source.all()), 0);
    }

    #[test]
    fn discarding_restored_keeps_reconfirmed_peers() {
        let mut source = PeerTable::new();
        let pixel = creature("Pixel", true);
        let bolt = creature("Bolt", true);
        source.observe(&msg(MessageKind::Announce, &pixel), addr(), t(0));
        source.observe(&msg(MessageKind::Announce, &bolt), addr(), t(0));

        let mut restored = PeerTable::new();
        restored.import(source.all());
        restored.observe(&msg(MessageKind::Announce, &bolt), addr(), t(10));
        let dropped = restored.discard_restored(source.all().iter().map(Peer::id));
        assert_eq!(dropped, 1);
        assert!(restored.get(&pixel.participant_id).is_none());
        assert!(restored.get(&bolt.participant_id).unwrap().online);
    }

    #[test]
    fn identity_snapshot_follows_latest_message() {
        let mut table = PeerTable::new();
        let alive = creature("Pixel", true);
        let dead = creature("Pixel", false);
        table.observe(&msg(MessageKind::Announce, &alive), addr(), t(0));
        table.observe(&msg(MessageKind::Announce, &dead), addr(), t(5));
        assert!(!table.get(&alive.participant_id).unwrap().identity.alive);
    }
}
