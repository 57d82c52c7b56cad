//! Host-facing facade: lifecycle, persistence, ambient messages and the query surface.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use mooc_core::content::compose_ambient;
use mooc_core::{obfuscated_display, GossipCounters, Identity, NetworkState};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::discovery::DiscoveryService;
use crate::error::NetError;
use crate::gossip::GossipService;

pub const AMBIENT_QUEUE_CAPACITY: usize = 5;

const MEMORY_THOUGHT_CHANCE: f64 = 0.3;
const DREAM_THOUGHT_CHANCE: f64 = 0.4;
const REGARDS_THOUGHT_CHANCE: f64 = 0.2;
const SHOW_THOUGHT_CHANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Stopped => "stopped",
            LinkState::Starting => "starting",
            LinkState::Running => "running",
        };
        f.write_str(s)
    }
}

struct Facade {
    link: LinkState,
    isolated: bool,
    state: NetworkState,
    ambient: VecDeque<String>,
    ambient_shutdown: Option<watch::Sender<bool>>,
}

struct Shared {
    identity: Identity,
    config: NetConfig,
    discovery: Arc<DiscoveryService>,
    gossip: Arc<GossipService>,
    facade: RwLock<Facade>,
}

impl Shared {
    fn push_ambient(&self, line: &str) -> bool {
        let mut facade = self.facade.write();
        if facade.ambient.len() >= AMBIENT_QUEUE_CAPACITY {
            return false;
        }
        facade.ambient.push_back(line.to_string());
        true
    }

    /// Roll for one ambient line. Returns whether anything was queued.
    fn ambient_round<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let online = self.discovery.online_peer_count();
        let death_known = self.gossip.has_deaths();
        match compose_ambient(rng, online, death_known) {
            Some(line) => self.push_ambient(line),
            None => false,
        }
    }

    async fn ambient_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.ambient_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.ambient_round(&mut rand::thread_rng());
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

/// Handle to one creature's presence on the LAN. Dropping it stops the network.
pub struct Network {
    shared: Arc<Shared>,
}

impl Network {
    pub fn new(name: &str, created_at: SystemTime, stage: &str, alive: bool) -> Self {
        Self::with_config(name, created_at, stage, alive, NetConfig::default())
    }

    pub fn with_config(
        name: &str,
        created_at: SystemTime,
        stage: &str,
        alive: bool,
        config: NetConfig,
    ) -> Self {
        let identity = Identity::new(name, created_at, stage, alive);
        let discovery = Arc::new(DiscoveryService::new(identity.clone(), config.clone()));
        let gossip = Arc::new(GossipService::new(discovery.clone(), config.clone()));
        let isolated = config.isolated;
        Self {
            shared: Arc::new(Shared {
                identity,
                config,
                discovery,
                gossip,
                facade: RwLock::new(Facade {
                    link: LinkState::Stopped,
                    isolated,
                    state: NetworkState::default(),
                    ambient: VecDeque::with_capacity(AMBIENT_QUEUE_CAPACITY),
                    ambient_shutdown: None,
                }),
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// Isolation forces the network off; turning it on while running stops everything.
    pub fn set_isolated(&self, isolated: bool) {
        let running = {
            let mut facade = self.shared.facade.write();
            facade.isolated = isolated;
            facade.link != LinkState::Stopped
        };
        if isolated && running {
            info!("isolated mode on, leaving the network");
            self.stop();
        }
    }

    /// Join the LAN. No-op when isolated or already started. Needs an ambient tokio runtime;
    /// without one, or if the socket cannot be bound, the network stays stopped. Check
    /// `is_enabled` to see whether it came up.
    pub fn start(&self) {
        {
            let mut facade = self.shared.facade.write();
            if facade.isolated || facade.link != LinkState::Stopped {
                return;
            }
            facade.link = LinkState::Starting;
        }
        let runtime = match Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("no tokio runtime, staying offline");
                self.abort_start();
                return;
            }
        };
        let events = match self.shared.discovery.start(&runtime) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "discovery failed to start, staying offline");
                self.abort_start();
                return;
            }
        };
        self.shared.gossip.start(&runtime, events);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        runtime.spawn(self.shared.clone().ambient_loop(shutdown_rx));
        if self.commit_start(shutdown_tx) {
            info!(id = %self.shared.identity.short_id(), "network running");
        }
    }

    fn abort_start(&self) {
        let mut facade = self.shared.facade.write();
        if facade.link == LinkState::Starting {
            facade.link = LinkState::Stopped;
        }
    }

    /// Move Starting to Running. If a stop or isolation landed while starting, tear the
    /// services back down instead and return false.
    fn commit_start(&self, ambient_shutdown: watch::Sender<bool>) -> bool {
        {
            let mut facade = self.shared.facade.write();
            if facade.link == LinkState::Starting && !facade.isolated {
                facade.ambient_shutdown = Some(ambient_shutdown);
                facade.state.joined_at.get_or_insert_with(SystemTime::now);
                facade.link = LinkState::Running;
                return true;
            }
            if facade.link == LinkState::Starting {
                facade.link = LinkState::Stopped;
            }
        }
        debug!("stop requested while starting, tearing down");
        let _ = ambient_shutdown.send(true);
        self.shared.gossip.stop();
        self.shared.discovery.stop();
        false
    }

    /// Leave the LAN. Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        let ambient = {
            let mut facade = self.shared.facade.write();
            if facade.link == LinkState::Stopped {
                return;
            }
            facade.link = LinkState::Stopped;
            facade.ambient_shutdown.take()
        };
        if let Some(tx) = ambient {
            let _ = tx.send(true);
        }
        self.shared.gossip.stop();
        self.shared.discovery.stop();
        info!("network stopped");
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.facade.read().link
    }

    pub fn is_enabled(&self) -> bool {
        self.link_state() == LinkState::Running
    }

    pub fn is_isolated(&self) -> bool {
        self.shared.facade.read().isolated
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.discovery.local_addr()
    }

    /// Tell online peers we died of neglect. Ignored unless running.
    pub fn announce_death(&self, name: &str, age_hours: u32, last_words: &str) {
        if !self.is_enabled() {
            return;
        }
        self.shared.gossip.announce_death(name, age_hours, last_words);
    }

    pub fn set_mood(&self, mood: &str, intensity: u8) {
        self.shared.gossip.set_mood(mood, intensity);
    }

    pub fn mood(&self) -> (String, u8) {
        self.shared.gossip.mood()
    }

    pub fn status_summary(&self) -> String {
        let (isolated, link) = {
            let facade = self.shared.facade.read();
            (facade.isolated, facade.link)
        };
        if isolated {
            return "Network: Disabled (isolated)".to_string();
        }
        if link != LinkState::Running {
            return "Network: Offline".to_string();
        }
        let online = self.shared.discovery.online_peer_count();
        if online == 0 {
            return "Network: Searching...".to_string();
        }
        format!(
            "Network: {} online ({} known)",
            online,
            self.shared.discovery.peer_count()
        )
    }

    /// Oldest queued ambient line, if any.
    pub fn ambient_message(&self) -> Option<String> {
        self.shared.facade.write().ambient.pop_front()
    }

    pub fn narrative_thought(&self) -> Option<String> {
        self.narrative_thought_with(&mut rand::thread_rng())
    }

    pub(crate) fn narrative_thought_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let gossip = &self.shared.gossip;
        if let Some(memory) = gossip.random_memory(rng) {
            if rng.gen_bool(MEMORY_THOUGHT_CHANCE) {
                return Some(memory.fragment);
            }
        }
        if let Some(dream) = gossip.random_dream(rng) {
            if rng.gen_bool(DREAM_THOUGHT_CHANCE) {
                return Some(dream.text);
            }
        }
        let peers = self.shared.discovery.peers();
        let friend = peers.choose(rng)?;
        rng.gen_bool(REGARDS_THOUGHT_CHANCE).then(|| {
            format!(
                "Your friend {} sends regards.",
                obfuscated_display(&friend.identity.display_name)
            )
        })
    }

    pub fn should_show_thought(&self) -> bool {
        self.is_enabled() && rand::thread_rng().gen_bool(SHOW_THOUGHT_CHANCE)
    }

    /// A line about a random witnessed death. Speculative deaths stay hedged.
    pub fn death_announcement(&self) -> Option<String> {
        self.shared
            .gossip
            .random_death(&mut rand::thread_rng())
            .map(|notice| notice.headline())
    }

    /// Creatures ever met.
    pub fn friend_count(&self) -> usize {
        self.shared.facade.read().state.friends.len()
    }

    pub fn online_friend_count(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        self.shared.discovery.online_peer_count()
    }

    pub fn influence(&self) -> u64 {
        self.shared.gossip.counters().influence()
    }

    /// Fold the current peer table and counters into the persisted ledger.
    /// Only while running, so a stopped network does not inflate visit counts.
    pub fn update_state(&self) {
        if !self.is_enabled() {
            return;
        }
        let peers = self.shared.discovery.peers();
        let counters = self.shared.gossip.counters();
        let mut facade = self.shared.facade.write();
        facade
            .state
            .merge_peers(&self.shared.identity, &peers, SystemTime::now());
        facade.state.apply_counters(counters);
    }

    pub fn export_state(&self) -> Result<Vec<u8>, NetError> {
        self.update_state();
        let facade = self.shared.facade.read();
        Ok(facade.state.to_blob()?)
    }

    /// Restore a blob from `export_state`. An empty blob means first run. A corrupt blob
    /// resets to empty state and reports the error.
    pub fn import_state(&self, blob: &[u8]) -> Result<(), NetError> {
        if blob.is_empty() {
            return Ok(());
        }
        let state = match NetworkState::from_blob(blob) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "discarding corrupt network state");
                let previous = std::mem::take(&mut self.shared.facade.write().state);
                self.shared.gossip.restore_counters(GossipCounters::default());
                self.shared
                    .discovery
                    .discard_restored(previous.known_peers.iter().map(|p| p.id()).collect());
                return Err(e.into());
            }
        };
        self.shared.gossip.restore_counters(state.counters());
        let restored = self.shared.discovery.import_peers(state.known_peers.clone());
        debug!(friends = state.friends.len(), restored, "network state imported");
        self.shared.facade.write().state = state;
        Ok(())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let (link, isolated, friends, joined_at) = {
            let facade = self.shared.facade.read();
            (
                facade.link,
                facade.isolated,
                facade.state.friends.len(),
                facade.state.joined_at,
            )
        };
        let (memories, dreams, deaths) = self.shared.gossip.buffered();
        Diagnostics {
            participant: self.shared.identity.short_id(),
            link,
            isolated,
            local_addr: self.shared.discovery.local_addr(),
            known_peers: self.shared.discovery.peer_count(),
            online_peers: self.shared.discovery.online_peer_count(),
            friends,
            memories,
            dreams,
            deaths,
            counters: self.shared.gossip.counters(),
            joined_at,
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Point-in-time counters. `Display` renders a small report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub participant: String,
    pub link: LinkState,
    pub isolated: bool,
    pub local_addr: Option<SocketAddr>,
    pub known_peers: usize,
    pub online_peers: usize,
    pub friends: usize,
    pub memories: usize,
    pub dreams: usize,
    pub deaths: usize,
    pub counters: GossipCounters,
    pub joined_at: Option<SystemTime>,
}

impl Diagnostics {
    pub fn influence(&self) -> u64 {
        self.counters.influence()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "participant      {}", self.participant)?;
        write!(f, "link             {}", self.link)?;
        if self.isolated {
            write!(f, " (isolated)")?;
        }
        writeln!(f)?;
        if let Some(addr) = self.local_addr {
            writeln!(f, "listening        {}", addr)?;
        }
        writeln!(f, "peers            {} online / {} known", self.online_peers, self.known_peers)?;
        writeln!(f, "friends          {}", self.friends)?;
        writeln!(
            f,
            "buffered         {} memories, {} dreams, {} deaths",
            self.memories, self.dreams, self.deaths
        )?;
        writeln!(f, "originated       {}", self.counters.originated)?;
        writeln!(f, "relayed          {}", self.counters.relayed)?;
        writeln!(f, "unique peers     {}", self.counters.unique_peers)?;
        writeln!(f, "deaths witnessed {}", self.counters.deaths_witnessed)?;
        writeln!(f, "influence        {}", self.influence())?;
        let age = self
            .joined_at
            .and_then(|t| SystemTime::now().duration_since(t).ok());
        write!(f, "network age      {}", format_age(age))
    }
}

fn format_age(age: Option<Duration>) -> String {
    let Some(age) = age else {
        return "never joined".to_string();
    };
    let hours = age.as_secs() / 3600;
    match (hours / 24, hours % 24) {
        (0, 0) => "< 1h".to_string(),
        (0, h) => format!("{}h", h),
        (d, h) => format!("{}d {}h", d, h),
    }
}
