//! JSON document store.
//!
//! Documents live under string keys (`user:{id}`, `post:{id}`, ...) in a
//! single map guarded by a mutex. Every write goes through the lock, so
//! [`Store::update_json`] is an atomic read-modify-write of one document.
//! Handlers rely on that for the set-style list mutations (followers,
//! following, likes) instead of read-then-write on a detached copy.
//!
//! When opened with a snapshot path the whole map is rewritten to disk after
//! each mutation (temp file + rename), which is enough to resume an
//! interrupted account deletion after a restart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    docs: Mutex<HashMap<String, Value>>,
    snapshot: Option<PathBuf>,
}

impl Store {
    /// Create a store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                docs: Mutex::new(HashMap::new()),
                snapshot: None,
            }),
        }
    }

    /// Open a store backed by a snapshot file, loading it if present.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let docs = if path.exists() {
            let raw = fs::read(&path)?;
            let docs: HashMap<String, Value> = serde_json::from_slice(&raw)?;
            info!(path = %path.display(), documents = docs.len(), "Loaded store snapshot");
            docs
        } else {
            HashMap::new()
        };

        Ok(Self {
            inner: Arc::new(Inner {
                docs: Mutex::new(docs),
                snapshot: Some(path),
            }),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Value>>> {
        self.inner.docs.lock().map_err(|_| StoreError::Poisoned)
    }

    fn persist(&self, docs: &HashMap<String, Value>) -> StoreResult<()> {
        let Some(path) = &self.inner.snapshot else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(docs)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Store snapshot written");
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let docs = self.lock()?;
        match docs.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        let mut docs = self.lock()?;
        docs.insert(key.to_string(), value);
        self.persist(&docs)
    }

    /// Store `value` only if `key` is vacant. Returns whether it was written.
    pub fn insert_if_absent<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<bool> {
        let value = serde_json::to_value(value)?;
        let mut docs = self.lock()?;
        if docs.contains_key(key) {
            return Ok(false);
        }
        docs.insert(key.to_string(), value);
        self.persist(&docs)?;
        Ok(true)
    }

    /// Deleting a missing key is not an error.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        let mut docs = self.lock()?;
        if docs.remove(key).is_some() {
            self.persist(&docs)?;
        }
        Ok(())
    }

    /// Atomically mutate the document at `key`. Returns `None` when the
    /// document does not exist; nothing is written in that case.
    pub fn update_json<T, R, F>(&self, key: &str, f: F) -> StoreResult<Option<R>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R,
    {
        let mut docs = self.lock()?;
        let Some(current) = docs.get(key) else {
            return Ok(None);
        };
        let mut doc: T = serde_json::from_value(current.clone())?;
        let out = f(&mut doc);
        docs.insert(key.to_string(), serde_json::to_value(&doc)?);
        self.persist(&docs)?;
        Ok(Some(out))
    }

    /// Atomically mutate the document at `key`, writing it back only when
    /// `f` reports a change. Returns `None` when the document does not exist.
    pub fn modify_json<T, F>(&self, key: &str, f: F) -> StoreResult<Option<bool>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> bool,
    {
        let mut docs = self.lock()?;
        let Some(current) = docs.get(key) else {
            return Ok(None);
        };
        let mut doc: T = serde_json::from_value(current.clone())?;
        if !f(&mut doc) {
            return Ok(Some(false));
        }
        docs.insert(key.to_string(), serde_json::to_value(&doc)?);
        self.persist(&docs)?;
        Ok(Some(true))
    }

    /// Atomically mutate two distinct documents under one lock. Returns
    /// `None`, writing nothing, unless both exist.
    pub fn update_pair_json<A, B, R, F>(&self, key_a: &str, key_b: &str, f: F) -> StoreResult<Option<R>>
    where
        A: Serialize + DeserializeOwned,
        B: Serialize + DeserializeOwned,
        F: FnOnce(&mut A, &mut B) -> R,
    {
        let mut docs = self.lock()?;
        let (Some(raw_a), Some(raw_b)) = (docs.get(key_a), docs.get(key_b)) else {
            return Ok(None);
        };
        let mut a: A = serde_json::from_value(raw_a.clone())?;
        let mut b: B = serde_json::from_value(raw_b.clone())?;
        let out = f(&mut a, &mut b);
        docs.insert(key_a.to_string(), serde_json::to_value(&a)?);
        docs.insert(key_b.to_string(), serde_json::to_value(&b)?);
        self.persist(&docs)?;
        Ok(Some(out))
    }

    /// Remove the document at `key` and return it, in one step.
    pub fn take_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let mut docs = self.lock()?;
        let Some(value) = docs.remove(key) else {
            return Ok(None);
        };
        self.persist(&docs)?;
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Like [`Store::update_json`] but starts from `T::default()` when the
    /// document is missing. Used for the id lists (`feed`, `users_list`, ...).
    pub fn upsert_json<T, R, F>(&self, key: &str, f: F) -> StoreResult<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let mut docs = self.lock()?;
        let mut doc: T = match docs.get(key) {
            Some(current) => serde_json::from_value(current.clone())?,
            None => T::default(),
        };
        let out = f(&mut doc);
        docs.insert(key.to_string(), serde_json::to_value(&doc)?);
        self.persist(&docs)?;
        Ok(out)
    }
}
