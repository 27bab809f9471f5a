//! In-memory [`LineStore`], [`CacheStore`] and [`JoinLogStore`] for tests
//! and the `memory` backend.
//!
//! State is lost when the process exits.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{normalize_lines, CacheEntry, CacheStore, JoinLogStore, LineStore, ListKind};

#[derive(Default)]
pub struct InMemoryStore {
    lists: RwLock<HashMap<ListKind, Vec<String>>>,
    cache: RwLock<BTreeMap<String, CacheEntry>>,
    joins: RwLock<Vec<DateTime<Utc>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LineStore for InMemoryStore {
    async fn load(&self, kind: ListKind) -> Result<Vec<String>> {
        Ok(self
            .lists
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, kind: ListKind, lines: &[String]) -> Result<()> {
        self.lists
            .write()
            .await
            .insert(kind, normalize_lines(lines));
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn load(&self) -> Result<BTreeMap<String, CacheEntry>> {
        Ok(self.cache.read().await.clone())
    }

    async fn save(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        *self.cache.write().await = entries.clone();
        Ok(())
    }
}

#[async_trait]
impl JoinLogStore for InMemoryStore {
    async fn load(&self) -> Result<Vec<DateTime<Utc>>> {
        Ok(self.joins.read().await.clone())
    }

    async fn save(&self, joins: &[DateTime<Utc>]) -> Result<()> {
        *self.joins.write().await = joins.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_are_independent() {
        let store = InMemoryStore::new();
        LineStore::save(&store, ListKind::Targets, &["kw".to_string(), "kw".to_string()])
            .await
            .unwrap();
        assert_eq!(
            LineStore::load(&store, ListKind::Targets).await.unwrap(),
            vec!["kw"]
        );
        assert!(LineStore::load(&store, ListKind::Channels)
            .await
            .unwrap()
            .is_empty());
    }
}
