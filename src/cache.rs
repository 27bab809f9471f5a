//! Resolution cache: canonical reference → resolved chat.
//!
//! Loaded once from a [`CacheStore`] and written back in full after every
//! change. Writers hold the map lock across the store write so snapshots
//! reach the backend in the order they were made.
//!
//! Callers that resolve a reference take [`ResolutionCache::lock_key`] first
//! and hold it across read → resolve → write, so two batches resolving the
//! same reference cannot interleave.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{Chat, ChatId};
use crate::store::{CacheEntry, CacheStore};

pub struct ResolutionCache {
    store: Arc<dyn CacheStore>,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResolutionCache {
    /// Load the persisted cache.
    pub async fn open(store: Arc<dyn CacheStore>) -> Result<Self> {
        let entries = store.load().await?;
        Ok(Self {
            store,
            entries: Mutex::new(entries),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn get(&self, canonical: &str) -> Option<ChatId> {
        self.entries
            .lock()
            .await
            .get(canonical)
            .map(|e| ChatId(e.chat_id))
    }

    /// Insert or replace an entry and persist the whole map.
    pub async fn put(&self, canonical: &str, chat: &Chat) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            canonical.to_string(),
            CacheEntry {
                chat_id: chat.id.0,
                title: chat.title.clone(),
            },
        );
        self.store.save(&entries).await
    }

    /// Exclusive access to one canonical key.
    pub async fn lock_key(&self, canonical: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            Arc::clone(locks.entry(canonical.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop every entry and persist the empty map. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        self.store.save(&entries).await?;
        Ok(removed)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, CacheEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
