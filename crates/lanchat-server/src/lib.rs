//! lanchat-server library: HTTP API, message store, and configuration.
//!
//! The binary in `main.rs` wires these together with peer discovery;
//! integration tests drive the router directly.

pub mod api;
pub mod config;
pub mod messages;

pub use api::{AppState, PeerView, router};
pub use config::Config;
pub use messages::{ChatMessage, MAX_MESSAGE_LENGTH, MAX_MESSAGES, MessageError, MessageStore};
