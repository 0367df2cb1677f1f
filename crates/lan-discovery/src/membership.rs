//! Membership table for tracking discovered peers.
//!
//! Provides `MembershipTable`, a map from `PeerId` to the last announcement
//! received from that peer, and `PeerRecord` for per-peer metadata.
//!
//! Every read and write takes the same whole-table lock. Discovery traffic is
//! a handful of datagrams per interval, so contention is negligible.

use crate::PeerId;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Last-seen state for one remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Peer's identity (from its announcement)
    pub id: PeerId,
    /// Source IP of the most recently received announcement
    pub address: IpAddr,
    /// Local receipt time of the most recently received announcement
    pub last_seen: Instant,
}

impl PeerRecord {
    /// Time since the last announcement, as of `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Whether the record is older than `threshold` as of `now`.
    pub fn is_expired(&self, now: Instant, threshold: Duration) -> bool {
        self.age(now) > threshold
    }
}

/// Whether an observation added a peer or refreshed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Joined,
    Refreshed,
}

/// Concurrent map of live peers.
///
/// Thread-safe; wrap in `Arc` for shared ownership.
#[derive(Default)]
pub struct MembershipTable {
    peers: Mutex<HashMap<PeerId, PeerRecord>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, PeerRecord>> {
        // A panicked writer leaves the map structurally valid
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an announcement from `id` received at `at`.
    ///
    /// Last writer wins: address and timestamp are overwritten unconditionally.
    pub fn observe(&self, id: PeerId, address: IpAddr, at: Instant) -> Observation {
        let mut peers = self.lock();

        if let Some(peer) = peers.get_mut(&id) {
            peer.address = address;
            peer.last_seen = at;
            Observation::Refreshed
        } else {
            let peer = PeerRecord {
                id: id.clone(),
                address,
                last_seen: at,
            };
            peers.insert(id, peer);
            Observation::Joined
        }
    }

    /// Evict every record older than `threshold`. Returns the evicted IDs.
    pub fn sweep(&self, now: Instant, threshold: Duration) -> Vec<PeerId> {
        let mut peers = self.lock();
        Self::sweep_locked(&mut peers, now, threshold)
    }

    fn sweep_locked(
        peers: &mut HashMap<PeerId, PeerRecord>,
        now: Instant,
        threshold: Duration,
    ) -> Vec<PeerId> {
        let expired: Vec<PeerId> = peers
            .values()
            .filter(|p| p.is_expired(now, threshold))
            .map(|p| p.id.clone())
            .collect();

        for id in &expired {
            peers.remove(id);
        }
        expired
    }

    /// Point-in-time copy of every record.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.lock().values().cloned().collect()
    }

    /// Sweep, then copy the survivors, under a single lock acquisition.
    pub fn sweep_and_snapshot(&self, now: Instant, threshold: Duration) -> (Vec<PeerId>, Vec<PeerRecord>) {
        let mut peers = self.lock();
        let expired = Self::sweep_locked(&mut peers, now, threshold);
        (expired, peers.values().cloned().collect())
    }

    /// Specific peer info.
    pub fn get(&self, id: &PeerId) -> Option<PeerRecord> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
