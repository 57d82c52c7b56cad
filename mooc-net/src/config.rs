//! Load config from file and environment.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration. File: ~/.config/mooc/config.toml or /etc/mooc/config.toml.
/// Env overrides: MOOC_DISCOVERY_PORT, MOOC_ISOLATED, MOOC_STATE_FILE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetConfig {
    /// Well-known discovery UDP port (default 19847). 0 binds an OS-assigned port.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Destination for lifecycle broadcasts (default 255.255.255.255).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Silence after which a peer is flagged offline.
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Receive loop read timeout; bounds how long stop takes to be observed.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    #[serde(default = "default_gossip_interval_secs")]
    pub gossip_interval_secs: u64,
    #[serde(default = "default_ambient_interval_secs")]
    pub ambient_interval_secs: u64,
    /// Seen-message cache size; 0 disables duplicate suppression.
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,

    /// Daemon only: creature name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Daemon only: creature birth time, unix seconds.
    #[serde(default)]
    pub born_unix_secs: u64,
    /// Daemon only: life-stage label.
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Daemon only: where exported state is kept between runs.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Never open a socket.
    #[serde(default)]
    pub isolated: bool,
}

fn default_discovery_port() -> u16 {
    19847
}
fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}
fn default_announce_interval_secs() -> u64 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_peer_timeout_secs() -> u64 {
    120
}
fn default_recv_timeout_ms() -> u64 {
    1000
}
fn default_gossip_interval_secs() -> u64 {
    45
}
fn default_ambient_interval_secs() -> u64 {
    60
}
fn default_seen_capacity() -> usize {
    mooc_core::dedup::DEFAULT_SEEN_CAPACITY
}
fn default_name() -> String {
    "Mooc".to_string()
}
fn default_stage() -> String {
    "Baby".to_string()
}
fn default_state_file() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".local/share/mooc/state.json")
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            broadcast_addr: default_broadcast_addr(),
            announce_interval_secs: default_announce_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            recv_timeout_ms: default_recv_timeout_ms(),
            gossip_interval_secs: default_gossip_interval_secs(),
            ambient_interval_secs: default_ambient_interval_secs(),
            seen_capacity: default_seen_capacity(),
            name: default_name(),
            born_unix_secs: 0,
            stage: default_stage(),
            state_file: default_state_file(),
            isolated: false,
        }
    }
}

impl NetConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms.max(10))
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_secs(self.gossip_interval_secs.max(1))
    }

    pub fn ambient_interval(&self) -> Duration {
        Duration::from_secs(self.ambient_interval_secs.max(1))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> NetConfig {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("MOOC_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("MOOC_ISOLATED") {
        c.isolated = matches!(s.as_str(), "1" | "true" | "yes");
    }
    if let Some(p) = std::env::var_os("MOOC_STATE_FILE") {
        c.state_file = PathBuf::from(p);
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/mooc/config.toml"));
    }
    out.push(PathBuf::from("/etc/mooc/config.toml"));
    out
}

fn load_file() -> Option<NetConfig> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<NetConfig>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => {
                        tracing::warn!(path = %p.display(), error = %e, "ignoring malformed config")
                    }
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
