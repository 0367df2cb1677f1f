//! PeerId: Unique identifier for a chat node on the local network.
//!
//! An opaque string token, generated once per process as `peer_<n>`
//! and passed by value from then on.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Peer ID cannot be empty")]
    Empty,
}

/// A unique identifier for a node in the discovery network.
///
/// # Examples
/// ```
/// use lan_discovery::PeerId;
///
/// let peer_id = PeerId::generate();
/// assert!(peer_id.as_str().starts_with("peer_"));
///
/// let parsed: PeerId = "peer_1".parse().unwrap();
/// assert_eq!(parsed.as_str(), "peer_1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a new random peer ID with a numeric suffix.
    ///
    /// Collisions are unlikely but not cryptographically guarded against.
    pub fn generate() -> Self {
        use rand::Rng;
        let n: u32 = rand::rng().random();
        Self(format!("peer_{n}"))
    }

    /// Wrap an explicit identity (configured or supplied by a test).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PeerIdError::Empty);
        }
        Ok(Self(s.to_string()))
    }
}

impl From<PeerId> for String {
    fn from(peer_id: PeerId) -> String {
        peer_id.0
    }
}

// Serialize as a plain string so the wire format stays `"peer_id":"peer_1234"`
impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
