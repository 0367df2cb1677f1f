//! Chat message store persisted as a single JSON file.
//!
//! File format: `{"messages":[{"id","user","message","timestamp"}, ...]}`.
//! The whole file is rewritten on every change.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Oldest messages are dropped beyond this count.
pub const MAX_MESSAGES: usize = 1000;

/// Longest accepted message body, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 1000;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Missing user or message field")]
    MissingField,

    #[error("Message too long: {0} characters (max {MAX_MESSAGE_LENGTH})")]
    TooLong(usize),

    #[error("Failed to write message file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode messages: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub message: String,
    /// Local time, `YYYY-MM-DD HH:MM:SS`
    #[serde(default)]
    pub timestamp: String,
}

impl ChatMessage {
    /// Create a message with a fresh ID and the current local time.
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        use rand::Rng;
        let id: u32 = rand::rng().random_range(100_000..=999_999);

        Self {
            id: id.to_string(),
            user: user.into(),
            message: message.into(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageFile {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct MessageFileRef<'a> {
    messages: &'a [ChatMessage],
}

/// Thread-safe, file-backed list of chat messages.
pub struct MessageStore {
    path: PathBuf,
    messages: RwLock<Vec<ChatMessage>>,
}

impl MessageStore {
    /// Open the store at `path`, loading any existing messages.
    ///
    /// A missing file starts an empty store. An unreadable or malformed file
    /// is logged and also starts empty; it is overwritten on the next change.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MessageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let messages = Self::load(&path);
        Ok(Self {
            path,
            messages: RwLock::new(messages),
        })
    }

    fn load(path: &Path) -> Vec<ChatMessage> {
        if !path.exists() {
            tracing::info!("No existing message file at {:?}, starting fresh", path);
            return Vec::new();
        }

        let parsed = fs::read_to_string(path)
            .map_err(MessageError::from)
            .and_then(|content| Ok(serde_json::from_str::<MessageFile>(&content)?));

        match parsed {
            Ok(file) => {
                tracing::info!("Loaded {} messages from {:?}", file.messages.len(), path);
                let mut messages = file.messages;
                Self::trim(&mut messages);
                messages
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable message file {:?}: {}", path, e);
                Vec::new()
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ChatMessage>> {
        self.messages.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ChatMessage>> {
        self.messages.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate, append, and persist a new message.
    pub fn add(&self, user: &str, text: &str) -> Result<ChatMessage, MessageError> {
        let user = user.trim();
        let text = text.trim();
        if user.is_empty() || text.is_empty() {
            return Err(MessageError::MissingField);
        }
        let length = text.chars().count();
        if length > MAX_MESSAGE_LENGTH {
            return Err(MessageError::TooLong(length));
        }

        let message = ChatMessage::new(user, text);

        // Persist while holding the lock so the file never reorders writes.
        // Memory only changes once the file has been written.
        let mut messages = self.write();
        let mut next = messages.clone();
        next.push(message.clone());
        Self::trim(&mut next);
        self.save(&next)?;
        *messages = next;

        Ok(message)
    }

    /// All messages, oldest first.
    pub fn all(&self) -> Vec<ChatMessage> {
        self.read().clone()
    }

    /// The newest `count` messages, oldest first.
    pub fn recent(&self, count: usize) -> Vec<ChatMessage> {
        let messages = self.read();
        let start = messages.len().saturating_sub(count);
        messages[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every message and persist the empty list.
    ///
    /// On a write failure the messages are kept.
    pub fn clear(&self) -> Result<(), MessageError> {
        let mut messages = self.write();
        self.save(&[])?;
        messages.clear();
        Ok(())
    }

    fn trim(messages: &mut Vec<ChatMessage>) {
        if messages.len() > MAX_MESSAGES {
            let excess = messages.len() - MAX_MESSAGES;
            messages.drain(..excess);
        }
    }

    fn save(&self, messages: &[ChatMessage]) -> Result<(), MessageError> {
        let content = serde_json::to_string_pretty(&MessageFileRef { messages })?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MessageStore {
        MessageStore::open(dir.path().join("messages.json")).unwrap()
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_generates_id_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let msg = store.add("alice", "hello").unwrap();

        assert_eq!(msg.id.len(), 6);
        assert!(msg.id.chars().all(|c| c.is_ascii_digit()));
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(msg.timestamp.len(), 19);
        assert_eq!(store.all(), vec![msg]);
    }

    #[test]
    fn test_messages_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = store(&dir);
            store.add("alice", "first").unwrap();
            store.add("bob", "second").unwrap();
        }

        let reopened = store(&dir);
        let texts: Vec<_> = reopened.all().into_iter().map(|m| m.message).collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[test]
    fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add("alice", "hi").unwrap();

        let content = fs::read_to_string(dir.path().join("messages.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["messages"][0]["user"], "alice");
        assert_eq!(value["messages"][0]["message"], "hi");
    }

    #[test]
    fn test_rejects_blank_fields() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(matches!(store.add("", "hi"), Err(MessageError::MissingField)));
        assert!(matches!(store.add("alice", "   "), Err(MessageError::MissingField)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_overlong_message() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let text = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(matches!(store.add("alice", &text), Err(MessageError::TooLong(1001))));

        let text = "é".repeat(MAX_MESSAGE_LENGTH);
        assert!(store.add("alice", &text).is_ok());
    }

    #[test]
    fn test_oldest_trimmed_at_capacity() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for i in 0..MAX_MESSAGES + 5 {
            store.add("alice", &format!("msg {i}")).unwrap();
        }

        let all = store.all();
        assert_eq!(all.len(), MAX_MESSAGES);
        assert_eq!(all[0].message, "msg 5");
    }

    #[test]
    fn test_recent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for i in 0..5 {
            store.add("alice", &format!("msg {i}")).unwrap();
        }

        let recent: Vec<_> = store.recent(2).into_iter().map(|m| m.message).collect();
        assert_eq!(recent, ["msg 3", "msg 4"]);
        assert_eq!(store.recent(50).len(), 5);
    }

    #[test]
    fn test_clear_persists() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add("alice", "hi").unwrap();

        store.clear().unwrap();

        assert!(store.is_empty());
        assert!(super::MessageStore::open(dir.path().join("messages.json"))
            .unwrap()
            .is_empty());
    }

    /// Replace the message file with a directory so the next write fails.
    fn block_writes(dir: &TempDir) {
        let path = dir.path().join("messages.json");
        if path.exists() {
            fs::remove_file(&path).unwrap();
        }
        fs::create_dir(&path).unwrap();
    }

    #[test]
    fn test_failed_add_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add("alice", "kept").unwrap();
        block_writes(&dir);

        let result = store.add("alice", "hello");

        assert!(matches!(result, Err(MessageError::Io(_))));
        let texts: Vec<_> = store.all().into_iter().map(|m| m.message).collect();
        assert_eq!(texts, ["kept"]);
    }

    #[test]
    fn test_failed_clear_keeps_messages() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add("alice", "one").unwrap();
        store.add("bob", "two").unwrap();
        block_writes(&dir);

        assert!(matches!(store.clear(), Err(MessageError::Io(_))));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(&path, "[[[").unwrap();

        let store = MessageStore::open(&path).unwrap();
        assert!(store.is_empty());

        // Next write replaces the bad file
        store.add("alice", "hi").unwrap();
        assert_eq!(MessageStore::open(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_loads_records_with_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(&path, r#"{"messages":[{"user":"alice","message":"legacy"}]}"#).unwrap();

        let store = MessageStore::open(&path).unwrap();
        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "legacy");
        assert_eq!(all[0].id, "");
    }
}
