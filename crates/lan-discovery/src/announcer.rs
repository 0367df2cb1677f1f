//! Periodic presence broadcasts.

use crate::channel::{self, DatagramChannel};
use crate::presence::PresenceMessage;
use crate::{DiscoveryConfig, PeerId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest uninterrupted sleep, so a stop request is seen promptly.
pub(crate) const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Broadcasts this node's presence every announce interval until stopped.
pub struct Announcer {
    channel: Box<dyn DatagramChannel>,
    peer_id: PeerId,
    service: String,
    port: u16,
    interval: Duration,
    stop: Arc<AtomicBool>,
}

impl Announcer {
    pub fn new(
        channel: Box<dyn DatagramChannel>,
        peer_id: PeerId,
        config: &DiscoveryConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channel,
            peer_id,
            service: config.service.clone(),
            port: config.port,
            interval: config.announce_interval(),
            stop,
        }
    }

    /// Send a single announcement.
    pub fn announce(&self) -> channel::Result<()> {
        let message = PresenceMessage::new(&self.service, &self.peer_id);
        self.channel.send_broadcast(&message.to_json(), self.port)
    }

    /// Announce on every interval until the stop flag is raised.
    ///
    /// A failed broadcast is logged and retried on the next interval.
    pub fn run(self) {
        debug!("Announcing {} on port {} every {:?}", self.peer_id, self.port, self.interval);

        while !self.stopped() {
            if let Err(e) = self.announce() {
                warn!("Presence broadcast failed: {}", e);
            }
            self.sleep_interval();
        }

        debug!("Announcer stopped");
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleep for one interval in short slices, returning early on stop.
    fn sleep_interval(&self) {
        let deadline = Instant::now() + self.interval;
        loop {
            if self.stopped() {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            std::thread::sleep(remaining.min(STOP_POLL_INTERVAL));
        }
    }
}
