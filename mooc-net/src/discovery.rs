//! LAN discovery: UDP broadcast announce, receive and verify datagrams, maintain the peer table.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use mooc_core::wire::{decode_frame, encode_frame};
use mooc_core::{
    Identity, Message, MessageKind, Observation, ParticipantId, Peer, PeerTable, MAX_DATAGRAM_SIZE,
};
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::error::NetError;

/// Delivered to the gossip layer outside the peer-table lock.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerDiscovered(Peer),
    PeerLost(Peer),
    /// Verified non-lifecycle message from another creature.
    Message(Message, SocketAddr),
}

struct Link {
    socket: Arc<UdpSocket>,
    shutdown: watch::Sender<bool>,
}

pub struct DiscoveryService {
    identity: Identity,
    config: NetConfig,
    peers: RwLock<PeerTable>,
    link: Mutex<Option<Link>>,
}

impl DiscoveryService {
    pub fn new(identity: Identity, config: NetConfig) -> Self {
        Self {
            identity,
            config,
            peers: RwLock::new(PeerTable::new()),
            link: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Bind the socket and spawn the receive, announce and sweep loops on `runtime`.
    /// Returns the event stream for this run. Fails with `AlreadyRunning` if started twice.
    pub fn start(
        self: &Arc<Self>,
        runtime: &Handle,
    ) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>, NetError> {
        let mut link = self.link.lock();
        if link.is_some() {
            return Err(NetError::AlreadyRunning);
        }
        let std_sock = bind_socket(self.config.discovery_port)?;
        let socket = {
            let _guard = runtime.enter();
            Arc::new(UdpSocket::from_std(std_sock)?)
        };
        let local = socket.local_addr()?;
        info!(addr = %local, id = %self.identity.short_id(), "discovery listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        runtime.spawn(self.clone().recv_loop(
            socket.clone(),
            events_tx.clone(),
            shutdown_rx.clone(),
        ));
        runtime.spawn(self.clone().announce_loop(socket.clone(), shutdown_rx.clone()));
        runtime.spawn(self.clone().sweep_loop(events_tx, shutdown_rx));

        *link = Some(Link {
            socket,
            shutdown: shutdown_tx,
        });
        Ok(events_rx)
    }

    /// Say goodbye and release the socket. Loops exit on their next tick or read timeout.
    pub fn stop(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        let _ = link.shutdown.send(true);
        match self.frame_for(MessageKind::Goodbye) {
            Ok(frame) => {
                if let Err(e) = link.socket.try_send_to(&frame, self.broadcast_dest(&link.socket)) {
                    debug!(error = %e, "goodbye broadcast failed");
                }
            }
            Err(e) => debug!(error = %e, "cannot encode goodbye"),
        }
        info!("discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.link.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link
            .lock()
            .as_ref()
            .and_then(|l| l.socket.local_addr().ok())
    }

    /// Send to every online peer. Returns how many datagrams went out.
    pub async fn send_to_all(&self, msg: &Message) -> Result<usize, NetError> {
        let frame = encode_frame(msg)?;
        let socket = self.socket().ok_or(NetError::NotRunning)?;
        let targets = self.peers.read().online_addrs();
        let mut sent = 0;
        for addr in targets {
            match socket.send_to(&frame, addr).await {
                Ok(_) => sent += 1,
                Err(e) => debug!(%addr, error = %e, "send failed"),
            }
        }
        Ok(sent)
    }

    pub async fn send_to(&self, msg: &Message, addr: SocketAddr) -> Result<(), NetError> {
        let frame = encode_frame(msg)?;
        let socket = self.socket().ok_or(NetError::NotRunning)?;
        socket.send_to(&frame, addr).await?;
        Ok(())
    }

    /// Snapshot of every peer ever seen.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().all()
    }

    pub fn online_peers(&self) -> Vec<Peer> {
        self.peers.read().online()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn online_peer_count(&self) -> usize {
        self.peers.read().online_count()
    }

    pub fn export_peers(&self) -> Vec<Peer> {
        self.peers()
    }

    /// Restore saved peers flagged offline. Returns how many were new.
    pub fn import_peers(&self, peers: Vec<Peer>) -> usize {
        self.peers.write().import(peers)
    }

    /// Undo an earlier import: forget listed peers that are still offline.
    pub fn discard_restored(&self, ids: Vec<ParticipantId>) -> usize {
        self.peers.write().discard_restored(ids)
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.link.lock().as_ref().map(|l| l.socket.clone())
    }

    fn frame_for(&self, kind: MessageKind) -> Result<Vec<u8>, NetError> {
        let msg = Message::lifecycle(kind, &self.identity)?;
        Ok(encode_frame(&msg)?)
    }

    fn broadcast_dest(&self, socket: &UdpSocket) -> SocketAddr {
        let port = match self.config.discovery_port {
            0 => socket.local_addr().map(|a| a.port()).unwrap_or(0),
            p => p,
        };
        SocketAddr::V4(SocketAddrV4::new(self.config.broadcast_addr, port))
    }

    async fn broadcast(&self, socket: &UdpSocket, kind: MessageKind) {
        let frame = match self.frame_for(kind) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, %kind, "cannot encode broadcast");
                return;
            }
        };
        if let Err(e) = socket.send_to(&frame, self.broadcast_dest(socket)).await {
            debug!(error = %e, %kind, "broadcast failed");
        }
    }

    /// Decode, verify and apply one datagram. Returns `None` for anything dropped:
    /// malformed frames, tag mismatches and our own echoes.
    pub(crate) fn handle_datagram(
        &self,
        bytes: &[u8],
        from: SocketAddr,
        now: SystemTime,
    ) -> Option<(Message, Observation)> {
        let msg = match decode_frame(bytes) {
            Ok((msg, _)) => msg,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed datagram");
                return None;
            }
        };
        if !msg.verify() {
            debug!(%from, kind = %msg.kind, "dropping message with bad integrity tag");
            return None;
        }
        if msg.sender.participant_id == self.identity.participant_id {
            return None;
        }
        let observation = self.peers.write().observe(&msg, from, now);
        Some((msg, observation))
    }

    async fn recv_loop(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
        shutdown: watch::Receiver<bool>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let read_timeout = self.config.recv_timeout();
        while !*shutdown.borrow() {
            let (n, from) =
                match tokio::time::timeout(read_timeout, socket.recv_from(&mut buf)).await {
                    Err(_) => continue,
                    Ok(Ok(r)) => r,
                    Ok(Err(e)) => {
                        debug!(error = %e, "recv failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                };
            let Some((msg, observation)) = self.handle_datagram(&buf[..n], from, SystemTime::now())
            else {
                continue;
            };
            if observation.needs_reply() {
                match self.frame_for(MessageKind::Announce) {
                    Ok(frame) => {
                        if let Err(e) = socket.send_to(&frame, from).await {
                            debug!(%from, error = %e, "announce reply failed");
                        }
                    }
                    Err(e) => debug!(error = %e, "cannot encode announce"),
                }
            }
            match observation {
                Observation::Discovered(peer) => {
                    info!(
                        peer = %peer.identity.display_name,
                        id = %peer.identity.short_id(),
                        %from,
                        "peer discovered"
                    );
                    let _ = events.send(DiscoveryEvent::PeerDiscovered(peer));
                }
                Observation::Returned(peer) => {
                    debug!(peer = %peer.identity.display_name, "peer back online");
                }
                Observation::Departed(peer) => {
                    info!(peer = %peer.identity.display_name, "peer said goodbye");
                    let _ = events.send(DiscoveryEvent::PeerLost(peer));
                }
                Observation::Refreshed | Observation::Untracked => {}
            }
            if !msg.kind.is_lifecycle() {
                let _ = events.send(DiscoveryEvent::Message(msg, from));
            }
        }
        debug!("receive loop exited");
    }

    async fn announce_loop(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.broadcast(&socket, MessageKind::Discover).await;
        let period = self.config.announce_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.broadcast(&socket, MessageKind::Announce).await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn sweep_loop(
        self: Arc<Self>,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.config.sweep_interval();
        let timeout = self.config.peer_timeout();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let lost = self.peers.write().sweep(SystemTime::now(), timeout);
                    for peer in lost {
                        info!(peer = %peer.identity.display_name, "peer timed out");
                        let _ = events.send(DiscoveryEvent::PeerLost(peer));
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

/// Bind the well-known port, falling back to an OS-assigned one if it is taken.
fn bind_socket(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let sock = match std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(s) => s,
        Err(e) if port != 0 => {
            warn!(port, error = %e, "discovery port unavailable, using an OS-assigned port");
            std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
        }
        Err(e) => return Err(e),
    };
    sock.set_broadcast(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn service(name: &str) -> DiscoveryService {
        let id = Identity::new(name, UNIX_EPOCH + Duration::from_secs(1_000), "Child", true);
        let config = NetConfig {
            discovery_port: 0,
            ..NetConfig::default()
        };
        DiscoveryService::new(id, config)
    }

    fn datagram(kind: MessageKind, who: &Identity) -> Vec<u8> {
        encode_frame(&Message::lifecycle(kind, who).unwrap()).unwrap()
    }

    fn from() -> SocketAddr {
        "192.168.0.42:19847".parse().unwrap()
    }

    #[test]
    fn announce_from_stranger_creates_peer() {
        let svc = service("Pixel");
        let bolt = Identity::new("Bolt", UNIX_EPOCH, "Baby", true);
        let (msg, obs) = svc
            .handle_datagram(&datagram(MessageKind::Announce, &bolt), from(), SystemTime::now())
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Announce);
        assert!(obs.needs_reply());
        assert_eq!(svc.online_peer_count(), 1);
        assert_eq!(svc.online_peers()[0].addr, Some(from()));
    }

    #[test]
    fn own_echo_dropped() {
        let svc = service("Pixel");
        let me = svc.identity().clone();
        assert!(svc
            .handle_datagram(&datagram(MessageKind::Announce, &me), from(), SystemTime::now())
            .is_none());
        assert_eq!(svc.peer_count(), 0);
    }

    #[test]
    fn tampered_and_malformed_dropped() {
        let svc = service("Pixel");
        let bolt = Identity::new("Bolt", UNIX_EPOCH, "Baby", true);
        let mut msg = Message::lifecycle(MessageKind::Announce, &bolt).unwrap();
        msg.nonce.0[3] ^= 1;
        let frame = encode_frame(&msg).unwrap();
        assert!(svc.handle_datagram(&frame, from(), SystemTime::now()).is_none());
        assert!(svc.handle_datagram(b"not a frame", from(), SystemTime::now()).is_none());
        assert_eq!(svc.peer_count(), 0);
    }

    #[test]
    fn goodbye_flags_offline_without_removal() {
        let svc = service("Pixel");
        let bolt = Identity::new("Bolt", UNIX_EPOCH, "Baby", true);
        svc.handle_datagram(&datagram(MessageKind::Announce, &bolt), from(), SystemTime::now());
        let (_, obs) = svc
            .handle_datagram(&datagram(MessageKind::Goodbye, &bolt), from(), SystemTime::now())
            .unwrap();
        assert!(matches!(obs, Observation::Departed(_)));
        assert_eq!(svc.online_peer_count(), 0);
        assert_eq!(svc.peer_count(), 1);
    }

    #[test]
    fn import_marks_offline() {
        let source = service("Pixel");
        let bolt = Identity::new("Bolt", UNIX_EPOCH, "Baby", true);
        source.handle_datagram(&datagram(MessageKind::Announce, &bolt), from(), SystemTime::now());

        let restored = service("Pixel");
        assert_eq!(restored.import_peers(source.export_peers()), 1);
        assert_eq!(restored.peer_count(), 1);
        assert_eq!(restored.online_peer_count(), 0);
    }

    #[test]
    fn stop_before_start_is_safe() {
        let svc = service("Pixel");
        svc.stop();
        svc.stop();
        assert!(!svc.is_running());
        assert!(svc.local_addr().is_none());
    }

    #[tokio::test]
    async fn start_twice_then_stop() {
        let svc = Arc::new(service("Pixel"));
        let handle = Handle::current();
        let _events = svc.start(&handle).unwrap();
        assert!(svc.is_running());
        assert!(svc.local_addr().is_some());
        assert!(matches!(svc.start(&handle), Err(NetError::AlreadyRunning)));
        svc.stop();
        assert!(!svc.is_running());
        assert!(matches!(
            svc.send_to_all(&Message::lifecycle(MessageKind::Pulse, svc.identity()).unwrap()).await,
            Err(NetError::NotRunning)
        ));
    }
}
