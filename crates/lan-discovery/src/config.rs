//! Configuration for peer discovery.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Service tag cannot be empty")]
    EmptyService,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error(
        "Liveness threshold ({liveness_ms}ms) must be at least 3x the announce interval ({announce_ms}ms)"
    )]
    ThresholdTooShort { liveness_ms: u64, announce_ms: u64 },
}

/// Discovery settings. Announcer and listener must agree on `port` and `service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port announcements are broadcast to and received on (default: 45454)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Tag that distinguishes our traffic from other broadcasts on the port
    #[serde(default = "default_service")]
    pub service: String,

    /// Destination address for announcements (default: 255.255.255.255)
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: Ipv4Addr,

    /// Milliseconds between announcements (default: 15s)
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,

    /// Milliseconds without an announcement before a peer is dropped (default: 90s)
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold_ms: u64,

    /// Upper bound on one blocking receive, so shutdown is noticed (default: 1000ms)
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
}

fn default_port() -> u16 {
    45454
}

fn default_service() -> String {
    "lanchat".to_string()
}

fn default_broadcast_address() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_announce_interval() -> u64 {
    15_000
}

fn default_liveness_threshold() -> u64 {
    90_000
}

fn default_receive_timeout() -> u64 {
    1000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            service: default_service(),
            broadcast_address: default_broadcast_address(),
            announce_interval_ms: default_announce_interval(),
            liveness_threshold_ms: default_liveness_threshold(),
            receive_timeout_ms: default_receive_timeout(),
        }
    }
}

impl DiscoveryConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_millis(self.liveness_threshold_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Check the settings are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.is_empty() {
            return Err(ConfigError::EmptyService);
        }
        if self.announce_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("announce_interval_ms"));
        }
        if self.liveness_threshold_ms == 0 {
            return Err(ConfigError::ZeroDuration("liveness_threshold_ms"));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("receive_timeout_ms"));
        }
        // Tolerate a couple of lost broadcasts before declaring a peer gone
        if self.liveness_threshold_ms < self.announce_interval_ms.saturating_mul(3) {
            return Err(ConfigError::ThresholdTooShort {
                liveness_ms: self.liveness_threshold_ms,
                announce_ms: self.announce_interval_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.port, 45454);
        assert_eq!(config.service, "lanchat");
        assert_eq!(config.announce_interval(), Duration::from_secs(15));
        assert_eq!(config.liveness_threshold(), Duration::from_secs(90));
        assert_eq!(config.receive_timeout(), Duration::from_secs(1));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: DiscoveryConfig = serde_json::from_str(r#"{"port": 9999}"#).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.liveness_threshold_ms, 90_000);
        assert_eq!(config.broadcast_address, Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_threshold_must_cover_three_intervals() {
        let config = DiscoveryConfig {
            announce_interval_ms: 30_000,
            liveness_threshold_ms: 60_000,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ThresholdTooShort {
                liveness_ms: 60_000,
                announce_ms: 30_000
            })
        );
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = DiscoveryConfig {
            receive_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroDuration("receive_timeout_ms")));
    }

    #[test]
    fn test_empty_service_rejected() {
        let config = DiscoveryConfig {
            service: String::new(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyService));
    }
}
