//! Configuration loading and management

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lan_discovery::DiscoveryConfig;
use serde::{Deserialize, Serialize};

/// Main configuration for the chat server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Fixed peer ID for this node (generated at startup if not set)
    #[serde(default)]
    pub peer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_http_port(),
        }
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid HTTP bind address: {}:{}", self.bind, self.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file chat messages are persisted to
    #[serde(default = "default_messages_file")]
    pub messages_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            messages_file: default_messages_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Directory the browser client is served from
    #[serde(default = "default_web_root")]
    pub root: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            root: default_web_root(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_messages_file() -> PathBuf {
    PathBuf::from("messages.json")
}

fn default_web_root() -> PathBuf {
    PathBuf::from("web")
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// If the file doesn't exist, the defaults are written there for reference.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", path);
            let config = Config::default();

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write default config: {:?}", path))?;
            tracing::info!("Created default config at {:?}", path);

            Ok(config)
        }
    }
}
