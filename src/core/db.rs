//! Document storage.
//!
//! Records are JSON documents under string keys. Liking-sets and ordered
//! reference lists (a post's comments, an account's posts, the global feed) are
//! member-sets: every member lives under its own key `{set}/{member}` holding
//! an insertion stamp. Adding or removing one account's like therefore never
//! rewrites a shared list, so concurrent likes by different accounts cannot
//! overwrite each other.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context};
use serde::{de::DeserializeOwned, Serialize};
use spin_sdk::key_value::Store;

pub trait DocumentStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("corrupt document at {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)
    }

    /// Set-union: returns `true` when the member was not present before.
    fn add_member(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        let key = member_key(set, member);
        if self.exists(&key)? {
            return Ok(false);
        }
        self.set(&key, insertion_stamp().as_bytes())?;
        Ok(true)
    }

    /// Returns `true` when the member was present. Removing an absent member is a no-op.
    fn remove_member(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        let key = member_key(set, member);
        if !self.exists(&key)? {
            return Ok(false);
        }
        self.delete(&key)?;
        Ok(true)
    }

    /// Flips membership and returns whether the member is present afterwards.
    fn toggle_member(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        if self.remove_member(set, member)? {
            Ok(false)
        } else {
            self.add_member(set, member)?;
            Ok(true)
        }
    }

    fn is_member(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        self.exists(&member_key(set, member))
    }

    /// Members in insertion order.
    fn members(&self, set: &str) -> anyhow::Result<Vec<String>> {
        let prefix = member_prefix(set);
        let mut stamped = Vec::new();
        for key in self.keys_with_prefix(&prefix)? {
            let stamp = self
                .get(&key)?
                .map(|raw| String::from_utf8_lossy(&raw).into_owned())
                .unwrap_or_default();
            stamped.push((stamp, key[prefix.len()..].to_string()));
        }
        stamped.sort();
        Ok(stamped.into_iter().map(|(_, member)| member).collect())
    }

    fn clear_set(&self, set: &str) -> anyhow::Result<()> {
        for key in self.keys_with_prefix(&member_prefix(set))? {
            self.delete(&key)?;
        }
        Ok(())
    }
}

fn member_prefix(set: &str) -> String {
    format!("{}/", set)
}

fn member_key(set: &str, member: &str) -> String {
    format!("{}/{}", set, member)
}

fn insertion_stamp() -> String {
    let now = chrono::Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
    format!("{:020}", nanos)
}

// === Spin key-value backend ===

impl DocumentStore for Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(Store::get(self, key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(Store::set(self, key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(Store::delete(self, key)?)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(Store::exists(self, key)?)
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let keys = Store::get_keys(self)?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}

// === Request-scoped key listing ===

/// Wraps a store whose key listing is a full scan (Spin's `get_keys`). The
/// listing is taken once, on the first prefix query, and kept current with
/// this handle's own writes. Clones share the listing, so one handle should
/// live no longer than one request.
pub struct SnapshotStore<S> {
    inner: Rc<S>,
    keys: Rc<RefCell<Option<BTreeSet<String>>>>,
}

impl<S> Clone for SnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            keys: Rc::clone(&self.keys),
        }
    }
}

impl<S: DocumentStore> SnapshotStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Rc::new(inner),
            keys: Rc::new(RefCell::new(None)),
        }
    }
}

impl<S: DocumentStore> DocumentStore for SnapshotStore<S> {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.inner.set(key, value)?;
        if let Some(keys) = self.keys.borrow_mut().as_mut() {
            keys.insert(key.to_string());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key)?;
        if let Some(keys) = self.keys.borrow_mut().as_mut() {
            keys.remove(key);
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.exists(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut cached = self.keys.borrow_mut();
        if cached.is_none() {
            *cached = Some(self.inner.keys_with_prefix("")?.into_iter().collect());
        }
        Ok(cached
            .as_ref()
            .map(|keys| {
                keys.range(prefix.to_string()..)
                    .take_while(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// === In-process backend ===

/// Shared in-memory store used by the native server and the tests. Clones
/// share the same map. Set mutations run under a single lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.inner.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let map = self.lock()?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn add_member(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        let key = member_key(set, member);
        let mut map = self.lock()?;
        if map.contains_key(&key) {
            return Ok(false);
        }
        map.insert(key, insertion_stamp().into_bytes());
        Ok(true)
    }

    fn remove_member(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        Ok(self.lock()?.remove(&member_key(set, member)).is_some())
    }

    fn toggle_member(&self, set: &str, member: &str) -> anyhow::Result<bool> {
        let key = member_key(set, member);
        let mut map = self.lock()?;
        if map.remove(&key).is_some() {
            Ok(false)
        } else {
            map.insert(key, insertion_stamp().into_bytes());
            Ok(true)
        }
    }
}

/// Delegates to a [`MemoryStore`] but fails every write or delete of a key
/// under `prefix`.
#[cfg(test)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    prefix: String,
}

#[cfg(test)]
impl FailingStore {
    pub(crate) fn new(inner: MemoryStore, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.to_string(),
        }
    }

    fn check(&self, key: &str) -> anyhow::Result<()> {
        if key.starts_with(&self.prefix) {
            anyhow::bail!("store unavailable for {}", key);
        }
        Ok(())
    }
}

#[cfg(test)]
impl DocumentStore for FailingStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.check(key)?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.check(key)?;
        self.inner.delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }
}
