//! Persistence abstraction.
//!
//! Two kinds of state survive a restart:
//!
//! | Trait | Data |
//! |-------|------|
//! | [`LineStore`] | tracked channels and search targets, one entry per line |
//! | [`CacheStore`] | canonical reference → resolved chat id and title |
//! | [`JoinLogStore`] | timestamps of recent joins, so quota spans restarts |
//!
//! Backends are chosen once at startup by [`open_store`]. There is no runtime
//! fallback from one backend to another: a misconfigured backend is a load
//! error.
//!
//! Implementations must be `Send + Sync`; the engine shares them across
//! batches.

pub mod files;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{StorageBackend, StorageConfig};

pub use files::FileStore;
pub use memory::InMemoryStore;

/// Which line list to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListKind {
    /// Channels under surveillance (canonical references).
    Channels,
    /// Search targets (canonical links or free-text keywords).
    Targets,
}

impl ListKind {
    pub fn label(&self) -> &'static str {
        match self {
            ListKind::Channels => "channels",
            ListKind::Targets => "targets",
        }
    }
}

/// A resolved chat as persisted in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub chat_id: i64,
    #[serde(default)]
    pub title: String,
}

#[async_trait]
pub trait LineStore: Send + Sync {
    /// Load a list. A list that was never saved is empty.
    async fn load(&self, kind: ListKind) -> Result<Vec<String>>;

    /// Replace a list. Implementations store the output of
    /// [`normalize_lines`].
    async fn save(&self, kind: ListKind, lines: &[String]) -> Result<()>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self) -> Result<BTreeMap<String, CacheEntry>>;
    async fn save(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()>;
}

/// Join timestamps recorded by the governor, ascending.
#[async_trait]
pub trait JoinLogStore: Send + Sync {
    /// A log that was never saved is empty.
    async fn load(&self) -> Result<Vec<DateTime<Utc>>>;
    async fn save(&self, joins: &[DateTime<Utc>]) -> Result<()>;
}

/// Trim, drop empties, deduplicate and sort.
pub fn normalize_lines(lines: &[String]) -> Vec<String> {
    let mut out: Vec<String> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Every part of an opened backend.
#[derive(Clone)]
pub struct Stores {
    pub lines: Arc<dyn LineStore>,
    pub cache: Arc<dyn CacheStore>,
    pub joins: Arc<dyn JoinLogStore>,
}

impl Stores {
    /// All three parts served by one backend value.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: LineStore + CacheStore + JoinLogStore + 'static,
    {
        Self {
            lines: store.clone(),
            cache: store.clone(),
            joins: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(InMemoryStore::new()))
    }
}

/// Open the configured backend.
pub fn open_store(config: &StorageConfig) -> Result<Stores> {
    match config.backend {
        StorageBackend::Files => Ok(Stores::shared(Arc::new(FileStore::open(&config.data_dir)?))),
        StorageBackend::Memory => Ok(Stores::in_memory()),
    }
}
