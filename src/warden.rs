//! The service object.
//!
//! [`Warden`] owns everything a batch needs: the engine (chat client,
//! governor, resolution cache), the line stores, the live flood settings and
//! the status sink. Each operation below corresponds to one user command.
//! Settings are snapshotted at the start of a batch; setters affect the next
//! batch, not the running one.
//!
//! List updates are read-modify-write against the store and are serialized
//! by an internal lock. Batches do not hold it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::ResolutionCache;
use crate::chat::ChatApi;
use crate::config::{Config, FloodSettings, CHECK_LIMIT_RANGE};
use crate::governor::{Governor, QuotaSnapshot};
use crate::links::{canonicalize, parse_lines, ChatRef, Classification};
use crate::orchestrator::Engine;
use crate::report::{BatchOutcome, ScanReport};
use crate::status::{notify, StatusSink};
use crate::store::{open_store, CacheEntry, JoinLogStore, LineStore, ListKind, Stores};

/// Most rejected lines echoed back by [`Warden::add_channels`].
const REJECTED_SHOWN: usize = 20;

/// Result of [`Warden::add_channels`].
#[derive(Debug, Default)]
pub struct AddChannels {
    /// Lines that are not platform links, canonicalized.
    pub rejected: Vec<String>,
    /// Canonical references that were not tracked before, sorted.
    pub added: Vec<String>,
    /// Outcome of auto-verifying the first few additions.
    pub verified: Option<BatchOutcome>,
    /// Additions left for a manual verify.
    pub unverified: usize,
}

pub struct Warden {
    engine: Engine,
    lines: Arc<dyn LineStore>,
    settings: RwLock<FloodSettings>,
    status: Arc<dyn StatusSink>,
    list_lock: Mutex<()>,
}

impl Warden {
    /// Open the configured backend and build the service.
    pub async fn open(
        config: &Config,
        chat: Arc<dyn ChatApi>,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        let stores = open_store(&config.storage)?;
        Self::with_stores(stores, chat, config.flood.clone(), status).await
    }

    pub async fn with_stores(
        stores: Stores,
        chat: Arc<dyn ChatApi>,
        settings: FloodSettings,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        settings.validate()?;
        let cache = ResolutionCache::open(stores.cache).await?;
        let mut governor = Governor::new(
            settings.hourly_join_cap,
            settings.daily_join_cap,
            settings.join_delay_secs,
        );
        let history = stores.joins.load().await?;
        info!(joins = history.len(), "join log loaded");
        governor.restore(history);
        let engine = Engine::new(chat, governor.shared(), Arc::new(cache)).with_join_log(stores.joins);
        Ok(Self {
            engine,
            lines: stores.lines,
            settings: RwLock::new(settings),
            status,
            list_lock: Mutex::new(()),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn settings(&self) -> FloodSettings {
        self.settings.read().await.clone()
    }

    // ---- channels ----

    /// Track every platform link in `raw` (one per line) and auto-verify the
    /// first `max_autoverify_per_add` new ones.
    pub async fn add_channels(&self, raw: &str, cancel: &CancellationToken) -> Result<AddChannels> {
        let mut result = AddChannels::default();
        let mut good = BTreeSet::new();
        for r in parse_lines(raw) {
            if r.is_platform() {
                good.insert(r.canonical().to_string());
            } else {
                result.rejected.push(r.canonical().to_string());
            }
        }
        if !result.rejected.is_empty() {
            let shown: Vec<&str> = result
                .rejected
                .iter()
                .take(REJECTED_SHOWN)
                .map(String::as_str)
                .collect();
            notify(
                self.status.as_ref(),
                &format!("Skipped (not platform links):\n{}", shown.join("\n")),
            )
            .await;
        }

        {
            let _guard = self.list_lock.lock().await;
            let mut existing = self.lines.load(ListKind::Channels).await?;
            let before: BTreeSet<String> = existing.iter().cloned().collect();
            result.added = good.difference(&before).cloned().collect();
            existing.extend(result.added.iter().cloned());
            self.lines.save(ListKind::Channels, &existing).await?;
        }

        if result.added.is_empty() {
            notify(
                self.status.as_ref(),
                "No new links added (they may already be tracked).",
            )
            .await;
            return Ok(result);
        }

        let settings = self.settings().await;
        let k = settings.max_autoverify_per_add.min(result.added.len());
        info!(added = result.added.len(), autoverify = k, "channels added");
        notify(
            self.status.as_ref(),
            &format!(
                "Added {} links.\nAuto-verify started (max {} items)…",
                result.added.len(),
                settings.max_autoverify_per_add
            ),
        )
        .await;

        let subset: Vec<ChatRef> = result.added[..k]
            .iter()
            .filter_map(|c| ChatRef::parse(c))
            .collect();
        if !subset.is_empty() {
            let outcome = self
                .engine
                .resolve_batch(&subset, &settings, self.status.as_ref(), cancel)
                .await;
            result.verified = Some(outcome);
        }
        result.unverified = result.added.len() - k;
        if result.unverified > 0 {
            notify(
                self.status.as_ref(),
                &format!(
                    "{} remaining were not auto-verified. Run verify to check all.",
                    result.unverified
                ),
            )
            .await;
        }
        Ok(result)
    }

    /// Stop tracking a channel. Returns the canonical form if it was tracked.
    pub async fn remove_channel(&self, raw: &str) -> Result<Option<String>> {
        let canonical = canonicalize(raw);
        let removed = self.remove_line(ListKind::Channels, &canonical).await?;
        Ok(removed.then_some(canonical))
    }

    pub async fn clear_channels(&self) -> Result<usize> {
        self.clear_list(ListKind::Channels).await
    }

    pub async fn channels(&self) -> Result<Vec<String>> {
        self.lines.load(ListKind::Channels).await
    }

    async fn tracked_refs(&self) -> Result<Vec<ChatRef>> {
        Ok(self
            .channels()
            .await?
            .iter()
            .filter_map(|c| ChatRef::parse(c))
            .collect())
    }

    // ---- search targets ----

    /// Add a search target (a link or a free-text keyword), stored verbatim.
    pub async fn add_target(&self, item: &str) -> Result<String> {
        let item = item.trim();
        if item.is_empty() {
            bail!("target must not be empty");
        }
        let _guard = self.list_lock.lock().await;
        let mut targets = self.lines.load(ListKind::Targets).await?;
        targets.push(item.to_string());
        self.lines.save(ListKind::Targets, &targets).await?;
        Ok(item.to_string())
    }

    pub async fn remove_target(&self, item: &str) -> Result<bool> {
        self.remove_line(ListKind::Targets, item.trim()).await
    }

    pub async fn clear_targets(&self) -> Result<usize> {
        self.clear_list(ListKind::Targets).await
    }

    pub async fn targets(&self) -> Result<Vec<String>> {
        self.lines.load(ListKind::Targets).await
    }

    async fn remove_line(&self, kind: ListKind, item: &str) -> Result<bool> {
        let _guard = self.list_lock.lock().await;
        let mut lines = self.lines.load(kind).await?;
        let Some(pos) = lines.iter().position(|l| l == item) else {
            return Ok(false);
        };
        lines.remove(pos);
        self.lines.save(kind, &lines).await?;
        info!(list = kind.label(), item, "removed");
        Ok(true)
    }

    async fn clear_list(&self, kind: ListKind) -> Result<usize> {
        let _guard = self.list_lock.lock().await;
        let removed = self.lines.load(kind).await?.len();
        self.lines.save(kind, &[]).await?;
        info!(list = kind.label(), removed, "cleared");
        Ok(removed)
    }

    // ---- batches ----

    /// Verify every tracked channel.
    pub async fn verify_all(&self, cancel: &CancellationToken) -> Result<BatchOutcome> {
        let refs = self.tracked_refs().await?;
        if refs.is_empty() {
            bail!("no channels tracked; add some with `channels add`");
        }
        let settings = self.settings().await;
        Ok(self
            .engine
            .resolve_batch(&refs, &settings, self.status.as_ref(), cancel)
            .await)
    }

    /// Join every invite link and public handle in `raw` (one per line).
    pub async fn join(&self, raw: &str, cancel: &CancellationToken) -> Result<BatchOutcome> {
        let mut seen = BTreeSet::new();
        let refs: Vec<ChatRef> = parse_lines(raw)
            .into_iter()
            .filter(|r| {
                matches!(
                    r.classification(),
                    Classification::InviteLink
                        | Classification::PublicUsername
                        | Classification::PublicPost
                )
            })
            .filter(|r| seen.insert(r.canonical().to_string()))
            .collect();
        if refs.is_empty() {
            bail!("no valid invite links or public handles");
        }
        let settings = self.settings().await;
        Ok(self
            .engine
            .join_batch(&refs, &settings, self.status.as_ref(), cancel)
            .await)
    }

    /// Scan tracked channels for any search target. `limit` is clamped to
    /// [`CHECK_LIMIT_RANGE`]; `None` uses the configured default.
    pub async fn check(&self, limit: Option<usize>, cancel: &CancellationToken) -> Result<ScanReport> {
        let settings = self.settings().await;
        let limit = limit
            .unwrap_or(settings.check_limit)
            .clamp(*CHECK_LIMIT_RANGE.start(), *CHECK_LIMIT_RANGE.end());
        let channels = self.tracked_refs().await?;
        if channels.is_empty() {
            bail!("no channels tracked; add some with `channels add`");
        }
        let targets = self.targets().await?;
        if targets.is_empty() {
            bail!("no search targets; add some with `targets add`");
        }
        Ok(self
            .engine
            .scan(&channels, &targets, limit, &settings, self.status.as_ref(), cancel)
            .await)
    }

    // ---- quota and cache ----

    pub async fn quota_status(&self) -> QuotaSnapshot {
        self.engine.governor.lock().await.snapshot(Utc::now())
    }

    pub async fn cache_entries(&self) -> BTreeMap<String, CacheEntry> {
        self.engine.cache.snapshot().await
    }

    pub async fn clear_cache(&self) -> Result<usize> {
        self.engine.cache.clear().await
    }

    // ---- runtime settings ----

    /// Change the baseline delay and reset the adaptive delay to it.
    pub async fn set_join_delay(&self, secs: u64) {
        self.settings.write().await.join_delay_secs = secs;
        self.engine.governor.lock().await.set_baseline(secs);
    }

    pub async fn set_batch_size(&self, size: usize) -> Result<()> {
        if size == 0 {
            bail!("batch size must be >= 1");
        }
        self.settings.write().await.batch_size = size;
        Ok(())
    }

    pub async fn set_batch_cooldown(&self, secs: u64) {
        self.settings.write().await.batch_cooldown_secs = secs;
    }

    /// Replace both join caps. The governor's join history is discarded,
    /// in the join log as well.
    pub async fn set_caps(&self, hourly: usize, daily: usize) -> Result<()> {
        let mut settings = self.settings.write().await;
        let mut next = settings.clone();
        next.hourly_join_cap = hourly;
        next.daily_join_cap = daily;
        next.validate()?;
        *settings = next;
        let mut governor = self.engine.governor.lock().await;
        governor.reconfigure(hourly, daily);
        self.engine.persist_joins(&governor).await;
        info!(hourly, daily, "join caps changed");
        Ok(())
    }
}
