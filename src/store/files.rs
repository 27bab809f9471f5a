//! Flat-file [`LineStore`] and [`CacheStore`].
//!
//! Layout under the data directory:
//!
//! ```text
//! data/
//! ├── channels.txt          tracked channels, one per line
//! ├── links.txt             search targets, one per line
//! ├── channels_cache.json   { "<canonical>": { "chat_id": .., "title": .. } }
//! └── joins.json            [ "<rfc3339 timestamp>", .. ]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::{normalize_lines, CacheEntry, CacheStore, JoinLogStore, LineStore, ListKind};

const CHANNELS_FILE: &str = "channels.txt";
const TARGETS_FILE: &str = "links.txt";
const CACHE_FILE: &str = "channels_cache.json";
const JOINS_FILE: &str = "joins.json";

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the data directory.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create data directory: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn list_path(&self, kind: ListKind) -> PathBuf {
        match kind {
            ListKind::Channels => self.root.join(CHANNELS_FILE),
            ListKind::Targets => self.root.join(TARGETS_FILE),
        }
    }

    fn cache_path(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    fn joins_path(&self) -> PathBuf {
        self.root.join(JOINS_FILE)
    }
}

/// Read `path`, or `None` if it does not exist. Other I/O errors propagate.
async fn read_if_exists(path: &Path) -> Result<Option<String>> {
    let exists = tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    if !exists {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Some(content))
}

#[async_trait]
impl LineStore for FileStore {
    async fn load(&self, kind: ListKind) -> Result<Vec<String>> {
        let Some(content) = read_if_exists(&self.list_path(kind)).await? else {
            return Ok(Vec::new());
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn save(&self, kind: ListKind, lines: &[String]) -> Result<()> {
        let path = self.list_path(kind);
        let content = normalize_lines(lines).join("\n");
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn load(&self) -> Result<BTreeMap<String, CacheEntry>> {
        let path = self.cache_path();
        let Some(content) = read_if_exists(&path).await? else {
            return Ok(BTreeMap::new());
        };
        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "resolution cache unreadable, starting empty");
                Ok(BTreeMap::new())
            }
        }
    }

    async fn save(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let path = self.cache_path();
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[async_trait]
impl JoinLogStore for FileStore {
    async fn load(&self) -> Result<Vec<DateTime<Utc>>> {
        let path = self.joins_path();
        let Some(content) = read_if_exists(&path).await? else {
            return Ok(Vec::new());
        };
        // Unlike the cache, a corrupt log is a load error.
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse join log: {}", path.display()))
    }

    async fn save(&self, joins: &[DateTime<Utc>]) -> Result<()> {
        let path = self.joins_path();
        let json = serde_json::to_string(joins)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}
