use crate::model::{Area, Identity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

pub const PENDING_KEY: &str = "pending_coords";
pub const USER_KEY: &str = "user";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One key/value storage backend. Tiers are chosen at startup by capability
/// probing; a backend that refuses writes is replaced by the next one in the
/// chain and never consulted again.
pub trait PersistenceTier {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str);
    fn label(&self) -> &'static str;
}

/// Fallback tier. Always works, vanishes with the process.
#[derive(Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl PersistenceTier for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn label(&self) -> &'static str {
        "memory"
    }
}

/// File-per-key store rooted at a directory. Used both for the durable tier
/// (config directory, survives restarts) and for the session tier (temp
/// directory scoped to this process, removed on drop).
pub struct FileStore {
    root: PathBuf,
    label: &'static str,
    cleanup_on_drop: bool,
}

impl FileStore {
    pub fn durable() -> Option<Self> {
        let root = dirs::config_dir()?.join("parcelmap");
        Some(Self {
            root,
            label: "file",
            cleanup_on_drop: false,
        })
    }

    pub fn session() -> Self {
        let root = std::env::temp_dir().join(format!("parcelmap-session-{}", std::process::id()));
        Self {
            root,
            label: "session-file",
            cleanup_on_drop: true,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if self.cleanup_on_drop {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}

impl PersistenceTier for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

fn probe(store: &mut dyn PersistenceTier) -> bool {
    match store.set("__probe", "1") {
        Ok(()) => {
            store.remove("__probe");
            true
        }
        Err(err) => {
            log::warn!("{} tier unavailable, falling back: {err}", store.label());
            false
        }
    }
}

/// First working backend of the chain, memory as the last resort.
pub fn select_tier(chain: Vec<Box<dyn PersistenceTier>>) -> Box<dyn PersistenceTier> {
    for mut store in chain {
        if probe(store.as_mut()) {
            log::debug!("selected {} tier", store.label());
            return store;
        }
    }
    Box::new(MemoryStore::default())
}

pub fn durable_tier() -> Box<dyn PersistenceTier> {
    let mut chain: Vec<Box<dyn PersistenceTier>> = Vec::new();
    if let Some(store) = FileStore::durable() {
        chain.push(Box::new(store));
    }
    select_tier(chain)
}

pub fn session_tier() -> Box<dyn PersistenceTier> {
    select_tier(vec![Box::new(FileStore::session())])
}

/// Areas created under a non-authenticated identity, awaiting a server
/// write. Insertion order is the flush order.
pub struct PendingQueue {
    tier: Box<dyn PersistenceTier>,
}

impl PendingQueue {
    pub fn new(tier: Box<dyn PersistenceTier>) -> Self {
        Self { tier }
    }

    fn read(&self) -> Vec<Area> {
        let Some(raw) = self.tier.get(PENDING_KEY) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn write(&mut self, items: &[Area]) {
        match serde_json::to_string(items) {
            Ok(raw) => {
                if let Err(err) = self.tier.set(PENDING_KEY, &raw) {
                    log::warn!("failed to persist pending queue: {err}");
                }
            }
            Err(err) => log::warn!("failed to encode pending queue: {err}"),
        }
    }

    pub fn push(&mut self, area: Area) {
        let mut items = self.read();
        items.push(area);
        self.write(&items);
    }

    /// Drains the queue for a flush attempt. Items that fail the flush are
    /// handed back via `append`.
    pub fn take_all(&mut self) -> Vec<Area> {
        let items = self.read();
        self.tier.remove(PENDING_KEY);
        items
    }

    /// Re-queues items at the tail, preserving their relative order.
    pub fn append(&mut self, areas: Vec<Area>) {
        if areas.is_empty() {
            return;
        }
        let mut items = self.read();
        items.extend(areas);
        self.write(&items);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredUser {
    username: String,
}

/// Authenticated identity survives restarts; guest identity is never
/// persisted (matching the tier rules of the pending queue).
pub fn load_identity(tier: &dyn PersistenceTier) -> Identity {
    let Some(raw) = tier.get(USER_KEY) else {
        return Identity::Guest;
    };
    match serde_json::from_str::<StoredUser>(&raw) {
        Ok(user) if user.username != "guest" => Identity::Authenticated(user.username),
        _ => Identity::Guest,
    }
}

pub fn store_identity(tier: &mut dyn PersistenceTier, identity: &Identity) {
    match identity {
        Identity::Authenticated(username) => {
            let user = StoredUser {
                username: username.clone(),
            };
            match serde_json::to_string(&user) {
                Ok(raw) => {
                    if let Err(err) = tier.set(USER_KEY, &raw) {
                        log::warn!("failed to persist identity: {err}");
                    }
                }
                Err(err) => log::warn!("failed to encode identity: {err}"),
            }
        }
        Identity::Uninitialized | Identity::Guest => tier.remove(USER_KEY),
    }
}
