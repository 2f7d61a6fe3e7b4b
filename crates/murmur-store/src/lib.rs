pub mod aggregate;
pub mod files;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use murmur_types::models::{Message, MessageKind};
use murmur_types::timestamp;

pub use aggregate::Aggregator;

pub const USERS_FILE: &str = "users.json";
pub const CHANNELS_FILE: &str = "channels.json";
pub const MESSAGES_FILE: &str = "messages.json";
pub const REPORTS_DIR: &str = "reports";

/// Owner of the three durable collections: users, channels and the message
/// log. Every write replaces a whole file; the mutation methods below are the
/// only write path.
///
/// There is no locking: the store assumes a single writer process.
pub struct Store {
    dir: PathBuf,
    users: Vec<String>,
    channels: Vec<String>,
    messages: Vec<Message>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Store {
    /// Open the data directory, creating it (and its `reports/` directory)
    /// when missing, and load all collections.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(REPORTS_DIR))
            .with_context(|| format!("creating data directory {}", dir.display()))?;

        let mut store = Self {
            dir,
            users: Vec::new(),
            channels: Vec::new(),
            messages: Vec::new(),
            last_timestamp: None,
        };
        store.reload();

        for name in [USERS_FILE, CHANNELS_FILE, MESSAGES_FILE] {
            let path = store.dir.join(name);
            if !path.exists() {
                files::write_json(&path, &Vec::<String>::new())?;
            }
        }

        info!(
            "Store opened at {} ({} users, {} channels, {} messages)",
            store.dir.display(),
            store.users.len(),
            store.channels.len(),
            store.messages.len()
        );
        Ok(store)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.dir.join(REPORTS_DIR)
    }

    /// Re-read every collection from disk. Unreadable files load as empty.
    pub fn reload(&mut self) {
        self.users = files::load_or_default(&self.dir.join(USERS_FILE));
        self.channels = files::load_or_default(&self.dir.join(CHANNELS_FILE));
        self.messages = files::load_or_default(&self.dir.join(MESSAGES_FILE));

        if let Some(last) = self.messages.last() {
            self.last_timestamp = self.last_timestamp.max(Some(last.timestamp));
        }
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.users.iter().any(|u| u == user)
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Add a user if absent. Returns whether the set changed.
    pub fn add_user(&mut self, user: &str) -> Result<bool> {
        let path = self.dir.join(USERS_FILE);
        insert_unique(&mut self.users, user, &path)
    }

    /// Add a channel if absent. Returns whether the set changed.
    pub fn add_channel(&mut self, channel: &str) -> Result<bool> {
        let path = self.dir.join(CHANNELS_FILE);
        insert_unique(&mut self.channels, channel, &path)
    }

    /// Append a message to the log and persist it. The timestamp never goes
    /// backwards relative to the previous append, even if the clock does.
    pub fn append_message(
        &mut self,
        kind: MessageKind,
        from: &str,
        to: &str,
        text: &str,
    ) -> Result<Message> {
        let now = timestamp::now();
        let stamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        let message = Message {
            kind,
            from: from.to_string(),
            to: to.to_string(),
            text: text.to_string(),
            timestamp: stamp,
        };

        self.messages.push(message.clone());
        if let Err(e) = files::write_json(&self.dir.join(MESSAGES_FILE), &self.messages) {
            self.messages.pop();
            return Err(e);
        }

        self.last_timestamp = Some(stamp);
        debug!("Appended {} message {} -> {}", kind, from, to);
        Ok(message)
    }
}

fn insert_unique(set: &mut Vec<String>, value: &str, path: &Path) -> Result<bool> {
    if set.iter().any(|v| v == value) {
        return Ok(false);
    }

    set.push(value.to_string());
    if let Err(e) = files::write_json(path, set) {
        set.pop();
        return Err(e);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let store = Store::open(&root).unwrap();

        assert!(store.reports_dir().is_dir());
        for name in [USERS_FILE, CHANNELS_FILE, MESSAGES_FILE] {
            assert_eq!(fs::read_to_string(root.join(name)).unwrap(), "[]");
        }
    }

    #[test]
    fn add_user_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();

        assert!(store.add_user("alice").unwrap());
        assert!(!store.add_user("alice").unwrap());
        assert!(store.add_channel("geral").unwrap());
        assert!(!store.add_channel("geral").unwrap());

        store.reload();
        assert_eq!(store.users(), ["alice"]);
        assert_eq!(store.channels(), ["geral"]);
    }

    #[test]
    fn reload_sees_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();

        files::write_json(&dir.path().join(USERS_FILE), &["bob"]).unwrap();
        store.reload();
        assert!(store.has_user("bob"));
    }

    #[test]
    fn append_keeps_timestamps_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();

        // A log written by a clock that ran ahead.
        let future = timestamp::parse("2099-01-01T00:00:00Z").unwrap();
        let seeded = vec![Message {
            kind: MessageKind::Public,
            from: "alice".into(),
            to: "geral".into(),
            text: "first".into(),
            timestamp: future,
        }];
        files::write_json(&dir.path().join(MESSAGES_FILE), &seeded).unwrap();
        store.reload();

        let msg = store
            .append_message(MessageKind::Private, "alice", "bob", "second")
            .unwrap();
        assert_eq!(msg.timestamp, future);

        store.reload();
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[1].text, "second");
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let mut store = Store::open(&root).unwrap();

        fs::remove_dir_all(&root).unwrap();
        assert!(store.add_user("alice").is_err());
        assert!(store.append_message(MessageKind::Public, "alice", "geral", "oi").is_err());
        assert!(store.users().is_empty());
        assert!(store.messages().is_empty());
    }
}
