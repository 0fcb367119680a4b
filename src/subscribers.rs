use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::transport::ChatId;

/// Broadcast recipients.
///
/// `subscribe`/`unsubscribe` report whether the set changed. Implementations
/// serialise read-modify-write within one process only.
pub trait SubscriberStore: Send + Sync {
    fn list(&self) -> Result<Vec<ChatId>>;

    fn subscribe(&self, chat_id: ChatId) -> Result<bool>;

    fn unsubscribe(&self, chat_id: ChatId) -> Result<bool>;

    fn contains(&self, chat_id: ChatId) -> Result<bool> {
        Ok(self.list()?.contains(&chat_id))
    }
}

/// Subscribers kept as a JSON array, replaced whole on every change.
pub struct JsonSubscriberStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonSubscriberStore {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };
        // Fail early on a corrupt file.
        store.read()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<ChatId>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid subscriber file {}: {}", self.path.display(), e)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(anyhow!(
                "failed to read subscriber file {}: {}",
                self.path.display(),
                err
            )),
        }
    }

    fn write(&self, ids: &[ChatId]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(ids)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut Vec<ChatId>) -> bool) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ids = self.read()?;
        if !change(&mut ids) {
            return Ok(false);
        }
        self.write(&ids)?;
        Ok(true)
    }
}

impl SubscriberStore for JsonSubscriberStore {
    fn list(&self) -> Result<Vec<ChatId>> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.read()
    }

    fn subscribe(&self, chat_id: ChatId) -> Result<bool> {
        self.modify(|ids| add_unique(ids, chat_id))
    }

    fn unsubscribe(&self, chat_id: ChatId) -> Result<bool> {
        self.modify(|ids| remove(ids, chat_id))
    }
}

#[derive(Default)]
pub struct InMemorySubscriberStore {
    ids: Mutex<Vec<ChatId>>,
}

impl InMemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscribers(ids: impl IntoIterator<Item = ChatId>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for id in ids {
                add_unique(&mut guard, id);
            }
        }
        store
    }
}

impl SubscriberStore for InMemorySubscriberStore {
    fn list(&self) -> Result<Vec<ChatId>> {
        Ok(self
            .ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn subscribe(&self, chat_id: ChatId) -> Result<bool> {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(add_unique(&mut ids, chat_id))
    }

    fn unsubscribe(&self, chat_id: ChatId) -> Result<bool> {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(remove(&mut ids, chat_id))
    }
}

fn add_unique(ids: &mut Vec<ChatId>, chat_id: ChatId) -> bool {
    if ids.contains(&chat_id) {
        return false;
    }
    ids.push(chat_id);
    true
}

fn remove(ids: &mut Vec<ChatId>, chat_id: ChatId) -> bool {
    let before = ids.len();
    ids.retain(|id| *id != chat_id);
    ids.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_keeps_insertion_order() {
        let store = InMemorySubscriberStore::with_subscribers([3, 1, 3, 2]);
        assert_eq!(store.list().unwrap(), vec![3, 1, 2]);
        assert!(!store.subscribe(1).unwrap());
        assert!(store.unsubscribe(1).unwrap());
        assert!(!store.unsubscribe(1).unwrap());
        assert_eq!(store.list().unwrap(), vec![3, 2]);
    }

    #[test]
    fn corrupt_file_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscribers.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonSubscriberStore::open(&path).is_err());
    }
}
