//! Gossip runtime: consumes discovery events, applies inbound content, relays floods and
//! originates memories, moods and dreams on a timer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use mooc_core::content::{
    choose_origination, compose_dream, compose_memory, compose_mood, Origination,
    DEATH_INFERENCE_CHANCE,
};
use mooc_core::identity::unix_nanos;
use mooc_core::{
    DeathCause, DeathNotice, DreamShare, GossipCounters, GossipError, GossipState, MemoryFragment,
    Message, MessageKind, Peer,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::discovery::{DiscoveryEvent, DiscoveryService};

const LOST_CONNECTION_WORDS: &str = "Connection lost...";

/// Where an outbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    AllOnline,
    Peer(SocketAddr),
}

struct Run {
    runtime: Handle,
    shutdown: watch::Sender<bool>,
}

pub struct GossipService {
    discovery: Arc<DiscoveryService>,
    config: NetConfig,
    state: RwLock<GossipState>,
    run: Mutex<Option<Run>>,
}

impl GossipService {
    pub fn new(discovery: Arc<DiscoveryService>, config: NetConfig) -> Self {
        let state = GossipState::new(discovery.identity().clone(), config.seen_capacity);
        Self {
            discovery,
            config,
            state: RwLock::new(state),
            run: Mutex::new(None),
        }
    }

    /// Spawn the event loop over `events` and the origination timer. A second call while
    /// running is ignored.
    pub fn start(
        self: &Arc<Self>,
        runtime: &Handle,
        events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) {
        let mut run = self.run.lock();
        if run.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        runtime.spawn(self.clone().event_loop(events, shutdown_rx.clone()));
        runtime.spawn(self.clone().origination_loop(shutdown_rx));
        *run = Some(Run {
            runtime: runtime.clone(),
            shutdown: shutdown_tx,
        });
        debug!("gossip started");
    }

    pub fn stop(&self) {
        if let Some(run) = self.run.lock().take() {
            let _ = run.shutdown.send(true);
            debug!("gossip stopped");
        }
    }

    /// Tell every online peer that we died of neglect.
    pub fn announce_death(&self, name: &str, age_hours: u32, last_words: &str) {
        let notice = DeathNotice {
            name: name.to_string(),
            death_time: unix_nanos(SystemTime::now()),
            age_hours,
            last_words: last_words.to_string(),
            cause: DeathCause::Neglect,
        };
        match Message::new(MessageKind::Death, self.discovery.identity(), &notice) {
            Ok(msg) => {
                info!(%name, age_hours, "announcing death");
                self.dispatch(vec![(msg, Target::AllOnline)]);
            }
            Err(e) => warn!(error = %e, "cannot encode death notice"),
        }
    }

    pub fn mood(&self) -> (String, u8) {
        self.state.read().mood()
    }

    pub fn set_mood(&self, mood: &str, intensity: u8) {
        self.state.write().set_mood(mood, intensity);
    }

    pub fn counters(&self) -> GossipCounters {
        self.state.read().counters()
    }

    pub fn restore_counters(&self, counters: GossipCounters) {
        self.state.write().restore_counters(counters);
    }

    pub fn random_memory<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<MemoryFragment> {
        self.state.read().random_memory(rng)
    }

    pub fn random_dream<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<DreamShare> {
        self.state.read().random_dream(rng)
    }

    pub fn random_death<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<DeathNotice> {
        self.state.read().random_death(rng)
    }

    pub fn has_deaths(&self) -> bool {
        self.state.read().has_deaths()
    }

    /// (memories, dreams, deaths) currently buffered.
    pub fn buffered(&self) -> (usize, usize, usize) {
        let state = self.state.read();
        (state.memory_count(), state.dream_count(), state.death_count())
    }

    /// Apply one discovery event and return what should be sent as a result.
    pub(crate) fn handle_event<R: Rng + ?Sized>(
        &self,
        event: DiscoveryEvent,
        rng: &mut R,
    ) -> Vec<(Message, Target)> {
        match event {
            DiscoveryEvent::PeerDiscovered(peer) => self.on_peer_discovered(&peer, rng),
            DiscoveryEvent::PeerLost(peer) => self.on_peer_lost(&peer, rng),
            DiscoveryEvent::Message(msg, from) => self.on_message(msg, from, rng),
        }
    }

    fn on_peer_discovered<R: Rng + ?Sized>(
        &self,
        peer: &Peer,
        rng: &mut R,
    ) -> Vec<(Message, Target)> {
        let fragment = compose_memory(rng, unix_nanos(SystemTime::now()));
        let msg = match Message::new(MessageKind::Memory, self.discovery.identity(), &fragment) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "cannot encode greeting memory");
                self.state.write().record_peer_discovered();
                return Vec::new();
            }
        };
        let mut state = self.state.write();
        state.record_peer_discovered();
        state.record_originated();
        debug!(peer = %peer.identity.display_name, "sharing a memory with new peer");
        vec![(msg, Target::AllOnline)]
    }

    fn on_peer_lost<R: Rng + ?Sized>(&self, peer: &Peer, rng: &mut R) -> Vec<(Message, Target)> {
        if !peer.identity.alive || !rng.gen_bool(DEATH_INFERENCE_CHANCE) {
            return Vec::new();
        }
        let notice = DeathNotice {
            name: peer.identity.display_name.clone(),
            death_time: unix_nanos(SystemTime::now()),
            age_hours: 0,
            last_words: LOST_CONNECTION_WORDS.to_string(),
            cause: DeathCause::Unknown,
        };
        info!(peer = %notice.name, "peer went silent, spreading speculative death notice");
        let msg = Message::new(MessageKind::Death, self.discovery.identity(), &notice);
        self.state.write().record_death(notice);
        match msg {
            Ok(m) => vec![(m, Target::AllOnline)],
            Err(e) => {
                warn!(error = %e, "cannot encode death notice");
                Vec::new()
            }
        }
    }

    fn on_message<R: Rng + ?Sized>(
        &self,
        msg: Message,
        from: SocketAddr,
        rng: &mut R,
    ) -> Vec<(Message, Target)> {
        let received = self.state.write().receive(&msg, rng);
        match received {
            Ok(reception) => {
                debug!(
                    kind = %msg.kind,
                    sender = %msg.sender.short_id(),
                    %from,
                    ?reception,
                    "gossip received"
                );
            }
            Err(GossipError::Duplicate) => {
                debug!(kind = %msg.kind, sender = %msg.sender.short_id(), "duplicate dropped");
                return Vec::new();
            }
            Err(e) => {
                debug!(kind = %msg.kind, %from, error = %e, "undecodable payload dropped");
                return Vec::new();
            }
        }
        if !msg.should_propagate() {
            return Vec::new();
        }
        let mut relay = msg;
        relay.decrement_ttl();
        self.state.write().record_relayed();
        vec![(relay, Target::AllOnline)]
    }

    /// One origination round. `None` when the dice say idle or there is nobody to talk to.
    pub(crate) fn originate<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(Message, Target)> {
        let choice = choose_origination(rng);
        if choice == Origination::Idle {
            return None;
        }
        let online = self.discovery.online_peers();
        if online.is_empty() {
            return None;
        }
        let me = self.discovery.identity();
        let built = match choice {
            Origination::Memory => {
                let fragment = compose_memory(rng, unix_nanos(SystemTime::now()));
                Message::new(MessageKind::Memory, me, &fragment).map(|m| (m, Target::AllOnline))
            }
            Origination::Mood => {
                let (mood, intensity) = self.mood();
                let signal = compose_mood(rng, &mood, intensity);
                Message::new(MessageKind::MoodUpdate, me, &signal).map(|m| (m, Target::AllOnline))
            }
            Origination::Dream => {
                let twin = online
                    .iter()
                    .find(|p| me.can_share_dreams_with(&p.identity))
                    .and_then(|p| p.addr.map(|addr| (p.identity.short_id(), addr)));
                let (short_id, addr) = twin?;
                let dream = compose_dream(rng, &short_id);
                Message::new(MessageKind::Dream, me, &dream).map(|m| (m, Target::Peer(addr)))
            }
            Origination::Idle => return None,
        };
        match built {
            Ok(out) => {
                self.state.write().record_originated();
                Some(out)
            }
            Err(e) => {
                warn!(error = %e, "cannot encode gossip");
                None
            }
        }
    }

    fn dispatch(&self, outbound: Vec<(Message, Target)>) {
        if outbound.is_empty() {
            return;
        }
        let Some(runtime) = self.run.lock().as_ref().map(|r| r.runtime.clone()) else {
            debug!(count = outbound.len(), "gossip not running, dropping outbound");
            return;
        };
        for (msg, target) in outbound {
            let discovery = self.discovery.clone();
            runtime.spawn(async move {
                let result = match target {
                    Target::AllOnline => discovery.send_to_all(&msg).await,
                    Target::Peer(addr) => discovery.send_to(&msg, addr).await.map(|_| 1),
                };
                match result {
                    Ok(sent) => debug!(kind = %msg.kind, sent, "gossip sent"),
                    Err(e) => debug!(kind = %msg.kind, error = %e, "gossip send failed"),
                }
            });
        }
    }

    async fn event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let outbound = self.handle_event(event, &mut rand::thread_rng());
                    self.dispatch(outbound);
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("gossip event loop exited");
    }

    async fn origination_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.gossip_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outbound = self.originate(&mut rand::thread_rng());
                    self.dispatch(outbound.into_iter().collect());
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
