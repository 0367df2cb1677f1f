//! Ingests presence announcements into the membership table.

use crate::channel::{self, ChannelError, Datagram, DatagramChannel};
use crate::membership::{MembershipTable, Observation};
use crate::presence::PresenceMessage;
use crate::{DiscoveryConfig, PeerId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// What happened to one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// Not a presence message for our service
    Discarded,
    /// Our own broadcast, looped back
    OwnAnnouncement,
    /// First announcement from this peer
    Joined(PeerId),
    /// Repeat announcement from a known peer
    Refreshed(PeerId),
}

/// Receives announcements until stopped, keeping the membership table current.
pub struct Listener {
    channel: Box<dyn DatagramChannel>,
    table: Arc<MembershipTable>,
    local_id: PeerId,
    service: String,
    receive_timeout: Duration,
    liveness_threshold: Duration,
    sweep_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl Listener {
    pub fn new(
        channel: Box<dyn DatagramChannel>,
        table: Arc<MembershipTable>,
        local_id: PeerId,
        config: &DiscoveryConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channel,
            table,
            local_id,
            service: config.service.clone(),
            receive_timeout: config.receive_timeout(),
            liveness_threshold: config.liveness_threshold(),
            sweep_interval: config.announce_interval(),
            stop,
        }
    }

    /// Validate one datagram and, if it is a peer's announcement, record it.
    ///
    /// Foreign or malformed traffic is expected on a shared broadcast port
    /// and is dropped without touching the table.
    pub fn handle_datagram(&self, datagram: &Datagram, now: Instant) -> Ingest {
        let Some(message) = PresenceMessage::parse(&datagram.payload, &self.service) else {
            trace!("Discarding {} byte datagram from {}", datagram.payload.len(), datagram.source);
            return Ingest::Discarded;
        };

        if message.peer_id == self.local_id {
            return Ingest::OwnAnnouncement;
        }

        let id = message.peer_id;
        match self.table.observe(id.clone(), datagram.source.ip(), now) {
            Observation::Joined => Ingest::Joined(id),
            Observation::Refreshed => Ingest::Refreshed(id),
        }
    }

    /// Receive until the stop flag is raised.
    ///
    /// Transient receive errors are logged and retried. Returns an error only
    /// if the channel is closed underneath us.
    pub fn run(mut self) -> channel::Result<()> {
        debug!("Listening for peers as {}", self.local_id);
        let mut last_sweep = Instant::now();

        while !self.stop.load(Ordering::Acquire) {
            match self.channel.receive(self.receive_timeout) {
                Ok(Some(datagram)) => match self.handle_datagram(&datagram, Instant::now()) {
                    Ingest::Joined(id) => {
                        debug!("Discovered peer {} at {}", id, datagram.source.ip());
                    }
                    Ingest::Refreshed(id) => {
                        trace!("Refreshed peer {}", id);
                    }
                    Ingest::OwnAnnouncement | Ingest::Discarded => {}
                },
                Ok(None) => {}
                Err(ChannelError::Closed) => return Err(ChannelError::Closed),
                Err(e) => {
                    warn!("Discovery receive failed: {}", e);
                    // Avoid spinning on a persistent error
                    std::thread::sleep(self.receive_timeout);
                }
            }

            if last_sweep.elapsed() >= self.sweep_interval {
                self.sweep();
                last_sweep = Instant::now();
            }
        }

        debug!("Listener stopped");
        Ok(())
    }

    fn sweep(&self) {
        for id in self.table.sweep(Instant::now(), self.liveness_threshold) {
            debug!("Peer {} expired", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryNetwork, Transport};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    const PORT: u16 = 7100;

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            port: PORT,
            announce_interval_ms: 50,
            liveness_threshold_ms: 150,
            receive_timeout_ms: 20,
            ..Default::default()
        }
    }

    fn source(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, last)), 50000)
    }

    fn announcement(peer: &str, service: &str) -> Vec<u8> {
        PresenceMessage::new(service, &PeerId::new(peer)).to_json()
    }

    fn datagram(payload: Vec<u8>, from: SocketAddr) -> Datagram {
        Datagram {
            payload,
            source: from,
        }
    }

    fn listener(network: &MemoryNetwork, table: Arc<MembershipTable>) -> Listener {
        let channel = network
            .transport(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .open(Some(PORT))
            .unwrap();
        Listener::new(
            channel,
            table,
            PeerId::new("peer_self"),
            &test_config(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_new_peer_joins() {
        let table = Arc::new(MembershipTable::new());
        let listener = listener(&MemoryNetwork::new(), table.clone());

        let result = listener.handle_datagram(
            &datagram(announcement("peer_2", "lanchat"), source(2)),
            Instant::now(),
        );

        assert_eq!(result, Ingest::Joined(PeerId::new("peer_2")));
        let peer = table.get(&PeerId::new("peer_2")).unwrap();
        assert_eq!(peer.address, source(2).ip());
    }

    #[test]
    fn test_known_peer_refreshes_with_latest_address() {
        let table = Arc::new(MembershipTable::new());
        let listener = listener(&MemoryNetwork::new(), table.clone());
        let now = Instant::now();

        listener.handle_datagram(&datagram(announcement("peer_2", "lanchat"), source(2)), now);
        let result =
            listener.handle_datagram(&datagram(announcement("peer_2", "lanchat"), source(3)), now);

        assert_eq!(result, Ingest::Refreshed(PeerId::new("peer_2")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&PeerId::new("peer_2")).unwrap().address, source(3).ip());
    }

    #[test]
    fn test_own_announcement_is_suppressed() {
        let table = Arc::new(MembershipTable::new());
        let listener = listener(&MemoryNetwork::new(), table.clone());

        let result = listener.handle_datagram(
            &datagram(announcement("peer_self", "lanchat"), source(1)),
            Instant::now(),
        );

        assert_eq!(result, Ingest::OwnAnnouncement);
        assert!(table.is_empty());
    }

    #[test]
    fn test_malformed_payloads_never_touch_table() {
        let table = Arc::new(MembershipTable::new());
        let listener = listener(&MemoryNetwork::new(), table.clone());
        let now = Instant::now();

        let payloads: Vec<Vec<u8>> = vec![
            br#"{"type":"hello","service":"lanchat","peer_id":"peer_2","timestamp":1}"#.to_vec(),
            announcement("peer_2", "otherapp"),
            br#"{"type":"discovery","service":"lanchat","timestamp":1}"#.to_vec(),
            b"DISCOVER:peer_2:12345".to_vec(),
            vec![0xde, 0xad, 0xbe, 0xef],
        ];

        for payload in payloads {
            let result = listener.handle_datagram(&datagram(payload, source(2)), now);
            assert_eq!(result, Ingest::Discarded);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_malformed_payload_does_not_update_existing_peer() {
        let table = Arc::new(MembershipTable::new());
        let listener = listener(&MemoryNetwork::new(), table.clone());
        let t0 = Instant::now();

        listener.handle_datagram(&datagram(announcement("peer_2", "lanchat"), source(2)), t0);
        let bad = br#"{"type":"discovery","service":"other","peer_id":"peer_2","timestamp":1}"#;
        listener.handle_datagram(&datagram(bad.to_vec(), source(9)), t0 + Duration::from_secs(1));

        let peer = table.get(&PeerId::new("peer_2")).unwrap();
        assert_eq!(peer.address, source(2).ip());
        assert_eq!(peer.last_seen, t0);
    }

    #[test]
    fn test_run_ingests_and_stops() {
        let network = MemoryNetwork::new();
        let table = Arc::new(MembershipTable::new());
        let channel = network
            .transport(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .open(Some(PORT))
            .unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let listener = Listener::new(
            channel,
            table.clone(),
            PeerId::new("peer_self"),
            &test_config(),
            stop.clone(),
        );
        let handle = std::thread::spawn(move || listener.run());

        network.inject(PORT, &announcement("peer_2", "lanchat"), source(2));
        let deadline = Instant::now() + Duration::from_secs(2);
        while table.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(table.get(&PeerId::new("peer_2")).is_some());

        stop.store(true, Ordering::Release);
        assert!(handle.join().unwrap().is_ok());
        // Channel is released once the task exits
        assert_eq!(network.listeners(PORT), 0);
    }

    #[test]
    fn test_run_sweeps_on_its_own_timer() {
        let network = MemoryNetwork::new();
        let table = Arc::new(MembershipTable::new());
        let channel = network
            .transport(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .open(Some(PORT))
            .unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let listener = Listener::new(
            channel,
            table.clone(),
            PeerId::new("peer_self"),
            &test_config(),
            stop.clone(),
        );
        let handle = std::thread::spawn(move || listener.run());

        network.inject(PORT, &announcement("peer_2", "lanchat"), source(2));
        let deadline = Instant::now() + Duration::from_secs(2);
        while table.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(table.len(), 1);

        // No further announcements: the listener evicts without any snapshot call
        let deadline = Instant::now() + Duration::from_secs(2);
        while !table.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(table.is_empty());

        stop.store(true, Ordering::Release);
        handle.join().unwrap().unwrap();
    }
}
