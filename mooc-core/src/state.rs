//! Persisted network state: friend ledger, counters, timestamps. Exported as an opaque JSON blob.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::gossip::GossipCounters;
use crate::identity::{Identity, ParticipantId};
use crate::peers::Peer;

/// A creature we have met at least once. Never removed from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRecord {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub first_met: SystemTime,
    pub last_seen: SystemTime,
    pub times_visited: u64,
    /// Same name as ours, so dreams can be shared.
    pub shares_dreams: bool,
    /// Last snapshot reported the creature as not alive.
    pub deceased: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkState {
    pub friends: Vec<FriendRecord>,
    pub memories_shared: u64,
    pub deaths_witnessed: u64,
    pub joined_at: Option<SystemTime>,
    pub last_sync: Option<SystemTime>,
    pub influence: u64,
    pub relayed: u64,
    pub unique_peers: u64,
    /// Discovery peer table snapshot; restored as offline.
    pub known_peers: Vec<Peer>,
}

impl NetworkState {
    /// Merge a peer snapshot into the ledger: update on match, append otherwise.
    pub fn merge_peers(&mut self, local: &Identity, peers: &[Peer], now: SystemTime) {
        self.last_sync = Some(now);
        let index: HashMap<ParticipantId, usize> = self
            .friends
            .iter()
            .enumerate()
            .map(|(i, f)| (f.participant_id, i))
            .collect();
        for peer in peers {
            match index.get(&peer.id()) {
                Some(&i) => {
                    let friend = &mut self.friends[i];
                    friend.last_seen = peer.last_seen;
                    friend.times_visited = friend.times_visited.saturating_add(1);
                    friend.deceased = !peer.identity.alive;
                }
                None => self.friends.push(FriendRecord {
                    participant_id: peer.id(),
                    display_name: peer.identity.display_name.clone(),
                    first_met: peer.first_seen,
                    last_seen: peer.last_seen,
                    times_visited: 1,
                    shares_dreams: local.can_share_dreams_with(&peer.identity),
                    deceased: !peer.identity.alive,
                }),
            }
        }
        self.known_peers = peers.to_vec();
    }

    /// Copy live gossip counters in and recompute the influence score.
    pub fn apply_counters(&mut self, counters: GossipCounters) {
        self.memories_shared = counters.originated;
        self.relayed = counters.relayed;
        self.unique_peers = counters.unique_peers;
        self.deaths_witnessed = counters.deaths_witnessed;
        self.influence = counters.influence();
    }

    /// Counters to resume gossip with after an import.
    pub fn counters(&self) -> GossipCounters {
        GossipCounters {
            originated: self.memories_shared,
            relayed: self.relayed,
            unique_peers: self.unique_peers,
            deaths_witnessed: self.deaths_witnessed,
        }
    }

    pub fn friend(&self, id: &ParticipantId) -> Option<&FriendRecord> {
        self.friends.iter().find(|f| f.participant_id == *id)
    }

    pub fn to_blob(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(self).map_err(StateError::Encode)
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(bytes).map_err(StateError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to encode network state: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode network state: {0}")]
    Decode(serde_json::Error),
}
