use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::*;

/// Key-value store of JSON documents.
///
/// Everything the application persists goes through this trait: the Spin
/// component uses the host key-value store, the native server and the tests
/// use [`MemoryStore`]. Each call is an independent operation; nothing spans
/// several keys atomically.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    fn delete(&self, key: &str) -> anyhow::Result<()>;

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, &serde_json::to_vec(value)?)
    }
}

/// In-process store, optionally mirrored to a JSON snapshot file after
/// every write.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by `path`, loading it when the file exists.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let mut entries = HashMap::new();
        if path.exists() {
            let raw = std::fs::read(&path)?;
            let saved: HashMap<String, String> = serde_json::from_slice(&raw)?;
            entries = saved.into_iter().map(|(k, v)| (k, v.into_bytes())).collect();
            log::info!("Loaded {} keys from {}", entries.len(), path.display());
        }
        Ok(Self {
            entries: Mutex::new(entries),
            snapshot: Some(path),
        })
    }

    fn persist(&self, entries: &HashMap<String, Vec<u8>>) -> anyhow::Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let saved: HashMap<&str, String> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v).into_owned()))
            .collect();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&saved)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_vec());
        self.persist(&entries)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// The Spin host's default key-value store.
#[cfg(target_arch = "wasm32")]
pub struct SpinStore(spin_sdk::key_value::Store);

#[cfg(target_arch = "wasm32")]
impl SpinStore {
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self(spin_sdk::key_value::Store::open_default()?))
    }
}

#[cfg(target_arch = "wasm32")]
impl KvStore for SpinStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.0.get(key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(self.0.set(key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(self.0.delete(key)?)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.0.exists(key)?)
    }
}

// === Id lists ===

pub fn get_list(store: &impl KvStore, key: &str) -> anyhow::Result<Vec<String>> {
    Ok(store.get_json(key)?.unwrap_or_default())
}

/// Prepends `id` unless already present. Returns whether the list changed.
pub fn push_front(store: &impl KvStore, key: &str, id: &str) -> anyhow::Result<bool> {
    let mut list = get_list(store, key)?;
    if list.iter().any(|x| x == id) {
        return Ok(false);
    }
    list.insert(0, id.to_string());
    store.set_json(key, &list)?;
    Ok(true)
}

/// Appends `id` unless already present. Returns whether the list changed.
pub fn push_back(store: &impl KvStore, key: &str, id: &str) -> anyhow::Result<bool> {
    let mut list = get_list(store, key)?;
    if list.iter().any(|x| x == id) {
        return Ok(false);
    }
    list.push(id.to_string());
    store.set_json(key, &list)?;
    Ok(true)
}

/// Removes `id`. Returns whether it was present.
pub fn remove_from_list(store: &impl KvStore, key: &str, id: &str) -> anyhow::Result<bool> {
    let mut list = get_list(store, key)?;
    let before = list.len();
    list.retain(|x| x != id);
    if list.len() == before {
        return Ok(false);
    }
    if list.is_empty() {
        store.delete(key)?;
    } else {
        store.set_json(key, &list)?;
    }
    Ok(true)
}

// === Demo data ===

/// Seeds the demo accounts `test`, `alice` and `bob` with a few posts, and
/// makes `test` follow `bob`. Accounts that already exist are left alone.
pub fn init_test_data(store: &impl KvStore) -> anyhow::Result<()> {
    use crate::follow::follow_user;
    use crate::posts::publish_post;
    use crate::users::{create_user, find_by_username};

    let demo: [(&str, &str, &[&str]); 3] = [
        ("test", "Test user bio", &["This is my first post on the network!"]),
        (
            "alice",
            "Hello, I'm Alice!",
            &[
                "Welcome to my page! Excited to share thoughts here. #hello",
                "Just finished an amazing project. Feeling productive today!",
            ],
        ),
        (
            "bob",
            "Bob's corner of the internet",
            &["Hey everyone! Just joined, looking forward to connecting with you all. @alice"],
        ),
    ];

    for (username, bio, posts) in demo {
        if store.exists(&username_key(username))? {
            continue;
        }
        let mut user = create_user(store, username, &format!("{}@example.com", username), username)
            .map_err(|e| anyhow::anyhow!("seeding {}: {}", username, e))?;
        user.bio = Some(bio.to_string());
        store.set_json(&user_key(&user.id), &user)?;
        for content in posts {
            publish_post(store, &user, content, None, None)?;
        }
        log::info!("Seeded demo user {}", username);
    }

    if let (Some(test), Some(bob)) = (
        find_by_username(store, "test")?,
        find_by_username(store, "bob")?,
    ) {
        follow_user(store, &test.id, &bob.id)?;
    }

    Ok(())
}
