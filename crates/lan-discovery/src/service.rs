//! Peer discovery service: owns the announcer, listener, and membership table.
//!
//! `start()` spawns one OS thread per worker; `stop()` signals both and joins
//! them, so no table mutation happens after it returns. `active_peers()` may be
//! called from any thread at any time and never fails.

use crate::announcer::Announcer;
use crate::channel::{Transport, UdpTransport};
use crate::listener::Listener;
use crate::membership::{MembershipTable, PeerRecord};
use crate::{DiscoveryConfig, PeerId};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info};

/// Lifecycle state reported for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryStatus {
    /// Not started, or stopped
    Stopped,
    /// Both workers running
    Running,
    /// Started, but a worker could not open its endpoint or died
    Degraded,
}

/// Handles for one start/stop session.
struct Workers {
    stop: Arc<AtomicBool>,
    announcer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

/// LAN peer discovery over an unreliable broadcast transport.
pub struct PeerDiscovery<T: Transport = UdpTransport> {
    config: DiscoveryConfig,
    transport: Arc<T>,
    peer_id: PeerId,
    table: Arc<MembershipTable>,
    /// Serializes start/stop; `Some` while a session is active
    workers: Mutex<Option<Workers>>,
    degraded: Arc<AtomicBool>,
}

impl PeerDiscovery<UdpTransport> {
    /// Discovery over real UDP sockets, broadcasting to `config.broadcast_address`.
    pub fn udp(config: DiscoveryConfig) -> Self {
        let transport = UdpTransport::new(config.broadcast_address);
        Self::new(config, transport)
    }
}

impl<T: Transport> PeerDiscovery<T> {
    /// Create a stopped service with a freshly generated identity.
    pub fn new(config: DiscoveryConfig, transport: T) -> Self {
        Self::with_peer_id(config, transport, PeerId::generate())
    }

    /// Create a stopped service with an explicit identity.
    pub fn with_peer_id(config: DiscoveryConfig, transport: T, peer_id: PeerId) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            peer_id,
            table: Arc::new(MembershipTable::new()),
            workers: Mutex::new(None),
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// This node's identity.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// The shared membership table. The listener is its only writer while running.
    pub fn table(&self) -> &Arc<MembershipTable> {
        &self.table
    }

    fn lock_workers(&self) -> MutexGuard<'_, Option<Workers>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the announcer and listener. No-op if already running.
    ///
    /// Endpoint failures are logged and mark the service `Degraded`; they
    /// never propagate to the caller.
    pub fn start(&self) {
        let mut workers = self.lock_workers();
        if workers.is_some() {
            debug!("Peer discovery already running");
            return;
        }

        self.degraded.store(false, Ordering::Release);
        self.table.clear();

        let stop = Arc::new(AtomicBool::new(false));
        let announcer = self.spawn_announcer(Arc::clone(&stop));
        let listener = self.spawn_listener(Arc::clone(&stop));

        *workers = Some(Workers {
            stop,
            announcer,
            listener,
        });

        info!(
            "Peer discovery started as {} (UDP port {}, service {:?})",
            self.peer_id, self.config.port, self.config.service
        );
    }

    /// Signal both workers and wait for them to exit. No-op if not running.
    ///
    /// The membership table is cleared once both workers are gone.
    pub fn stop(&self) {
        let mut workers = self.lock_workers();
        let Some(session) = workers.take() else {
            return;
        };

        session.stop.store(true, Ordering::Release);
        for handle in [session.announcer, session.listener].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("discovery worker").to_string();
            if handle.join().is_err() {
                error!("{} panicked", name);
            }
        }

        self.table.clear();
        info!("Peer discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_workers().is_some()
    }

    pub fn status(&self) -> DiscoveryStatus {
        if !self.is_running() {
            DiscoveryStatus::Stopped
        } else if self.degraded.load(Ordering::Acquire) {
            DiscoveryStatus::Degraded
        } else {
            DiscoveryStatus::Running
        }
    }

    /// Evict stale peers, then return a copy of the survivors sorted by ID.
    pub fn active_peers(&self) -> Vec<PeerRecord> {
        let (expired, mut peers) = self
            .table
            .sweep_and_snapshot(Instant::now(), self.config.liveness_threshold());
        for id in expired {
            debug!("Peer {} expired", id);
        }
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    fn spawn_announcer(&self, stop: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        let transport = Arc::clone(&self.transport);
        let degraded = Arc::clone(&self.degraded);
        let peer_id = self.peer_id.clone();
        let config = self.config.clone();

        self.spawn_worker("discovery-announcer", move || {
            let channel = match transport.open(None) {
                Ok(channel) => channel,
                Err(e) => {
                    error!("Discovery announcer unavailable: {}", e);
                    degraded.store(true, Ordering::Release);
                    return;
                }
            };
            Announcer::new(channel, peer_id, &config, stop).run();
        })
    }

    fn spawn_listener(&self, stop: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        let transport = Arc::clone(&self.transport);
        let degraded = Arc::clone(&self.degraded);
        let table = Arc::clone(&self.table);
        let peer_id = self.peer_id.clone();
        let config = self.config.clone();

        self.spawn_worker("discovery-listener", move || {
            let channel = match transport.open(Some(config.port)) {
                Ok(channel) => channel,
                Err(e) => {
                    error!("Discovery listener unavailable: {}", e);
                    degraded.store(true, Ordering::Release);
                    return;
                }
            };
            if let Err(e) = Listener::new(channel, table, peer_id, &config, stop).run() {
                error!("Discovery listener exited: {}", e);
                degraded.store(true, Ordering::Release);
            }
        })
    }

    fn spawn_worker<F>(&self, name: &str, work: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(work) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn {}: {}", name, e);
                self.degraded.store(true, Ordering::Release);
                None
            }
        }
    }
}

impl<T: Transport> Drop for PeerDiscovery<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
