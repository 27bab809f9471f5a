//! Join and verify batches.
//!
//! [`Engine`] bundles the chat client with the shared governor and
//! resolution cache. Two batch entry points run on it:
//!
//! - [`Engine::resolve_batch`] establishes a chat identity for each
//!   reference (cache, then public handle, then a governed invite join) and
//!   confirms it with a lookup. Used by verify-all and by auto-verify after
//!   channels are added.
//! - [`Engine::join_batch`] joins invites and public handles with batch
//!   cooldowns, a self-throttling local delay, and an abort on severe
//!   congestion.
//!
//! No per-item failure ends a batch. Daily quota exhaustion and
//! abort-threshold congestion end a join batch; cancellation ends either.
//!
//! # Lock order
//!
//! A cache key lock may be held while taking the governor lock, never the
//! other way round. The governor lock is never held across a sleep.
//!
//! # Join log
//!
//! Every recorded join is written to the engine's [`JoinLogStore`] before the
//! governor guard is released.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResolutionCache;
use crate::chat::{ChatApi, ChatTarget};
use crate::config::FloodSettings;
use crate::error::ChatError;
use crate::governor::{Admission, Governor, QuotaWindow, SharedGovernor, SEVERE_FLOOR_SECS};
use crate::links::ChatRef;
use crate::models::Chat;
use crate::pace::{congestion_sleep, jittered, pause, MAX_CONGESTION_SLEEP};
use crate::report::{BatchOutcome, FailureReason, Halt};
use crate::status::{notify, StatusSink};
use crate::store::{InMemoryStore, JoinLogStore};

/// Extra seconds slept on top of a reported congestion wait.
const CONGESTION_BUFFER_SECS: u64 = 10;
/// Ceiling for the self-throttling delay inside a join batch.
const LOCAL_DELAY_CEILING_SECS: u64 = 20;
/// Shortest cooldown after an hourly block inside a join batch.
const HOURLY_BLOCK_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Successful result of a governed join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinAttempt {
    Joined(Chat),
    AlreadyMember,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// Refused locally; no call was made.
    Quota(QuotaWindow),
    Chat(ChatError),
}

impl From<JoinError> for FailureReason {
    fn from(e: JoinError) -> Self {
        match e {
            JoinError::Quota(w) => FailureReason::Quota(w),
            JoinError::Chat(e) => e.into(),
        }
    }
}

/// Work item of a join batch.
#[derive(Debug, Clone)]
enum JoinWork<'a> {
    Invite(&'a ChatRef),
    Public { reference: &'a ChatRef, handle: &'a str },
}

impl JoinWork<'_> {
    fn label(&self) -> String {
        match self {
            JoinWork::Invite(r) => r.canonical().to_string(),
            JoinWork::Public { handle, .. } => format!("@{}", handle),
        }
    }

    /// What to hand to `join_chat`.
    fn join_reference(&self) -> &str {
        match self {
            JoinWork::Invite(r) => r.canonical(),
            JoinWork::Public { handle, .. } => handle,
        }
    }

    /// Cache key for a successful join.
    fn cache_key(&self) -> String {
        match self {
            JoinWork::Invite(r) => r.canonical().to_string(),
            JoinWork::Public { reference, handle } => ChatRef::from_handle(handle)
                .map(|r| r.canonical().to_string())
                .unwrap_or_else(|| reference.canonical().to_string()),
        }
    }
}

/// Chat client plus the process-wide shared state every batch uses.
#[derive(Clone)]
pub struct Engine {
    pub chat: Arc<dyn ChatApi>,
    pub governor: SharedGovernor,
    pub cache: Arc<ResolutionCache>,
    pub join_log: Arc<dyn JoinLogStore>,
}

impl Engine {
    /// An engine whose join log lives in process memory.
    pub fn new(chat: Arc<dyn ChatApi>, governor: SharedGovernor, cache: Arc<ResolutionCache>) -> Self {
        Self {
            chat,
            governor,
            cache,
            join_log: Arc::new(InMemoryStore::new()),
        }
    }

    pub fn with_join_log(mut self, join_log: Arc<dyn JoinLogStore>) -> Self {
        self.join_log = join_log;
        self
    }

    /// Write the governor's window to the join log. Callers hold the guard.
    pub(crate) async fn persist_joins(&self, governor: &Governor) {
        if let Err(e) = self.join_log.save(&governor.history()).await {
            warn!(error = %e, "failed to persist join log");
        }
    }

    /// Check quota, join and record, all under one governor guard.
    ///
    /// `count_existing` decides whether an "already a participant" answer is
    /// recorded as a join.
    pub async fn guarded_join(
        &self,
        reference: &str,
        count_existing: bool,
    ) -> Result<JoinAttempt, JoinError> {
        let mut governor = self.governor.lock().await;
        if let Admission::Blocked(window) = governor.check(Utc::now()) {
            info!(reference, %window, "join refused by quota");
            return Err(JoinError::Quota(window));
        }
        match self.chat.join_chat(reference).await {
            Ok(chat) => {
                governor.record_join(Utc::now());
                self.persist_joins(&governor).await;
                Ok(JoinAttempt::Joined(chat))
            }
            Err(ChatError::AlreadyParticipant) => {
                if count_existing {
                    governor.record_join(Utc::now());
                    self.persist_joins(&governor).await;
                }
                Ok(JoinAttempt::AlreadyMember)
            }
            Err(e) => Err(JoinError::Chat(e)),
        }
    }

    async fn remember(&self, canonical: &str, chat: &Chat) {
        if let Err(e) = self.cache.put(canonical, chat).await {
            warn!(canonical, error = %e, "failed to persist resolution cache");
        }
    }

    /// Establish a lookup target for `r`, joining an uncached invite if the
    /// governor allows it.
    pub(crate) async fn resolve_target(&self, r: &ChatRef) -> Result<ChatTarget, FailureReason> {
        let canonical = r.canonical();
        let _key = self.cache.lock_key(canonical).await;

        if let Some(id) = self.cache.get(canonical).await {
            debug!(canonical, %id, "resolution cache hit");
            return Ok(ChatTarget::Id(id));
        }
        if let Some(handle) = r.handle() {
            return Ok(ChatTarget::Handle(handle.to_string()));
        }
        if !r.is_invite() {
            return Err(FailureReason::Unresolvable);
        }

        let chat = match self.guarded_join(canonical, false).await? {
            JoinAttempt::Joined(chat) => chat,
            JoinAttempt::AlreadyMember => self
                .chat
                .get_chat(&ChatTarget::Link(canonical.to_string()))
                .await?,
        };
        self.remember(canonical, &chat).await;
        Ok(ChatTarget::Id(chat.id))
    }

    /// Congestion handling shared by both batch kinds when the wait is below
    /// any abort threshold. Returns `false` if the pause was cancelled.
    async fn absorb_congestion(&self, wait_secs: u64, cancel: &CancellationToken) -> bool {
        self.governor.lock().await.on_congestion(wait_secs);
        let sleep = congestion_sleep(wait_secs, CONGESTION_BUFFER_SECS);
        warn!(wait_secs, sleep_secs = sleep.as_secs(), "congestion, pausing batch");
        pause(sleep, cancel).await.is_ok()
    }

    async fn current_delay(&self) -> u64 {
        self.governor.lock().await.current_delay()
    }

    /// Resolve and confirm every reference in order.
    pub async fn resolve_batch(
        &self,
        refs: &[ChatRef],
        settings: &FloodSettings,
        status: &dyn StatusSink,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let total = refs.len();
        let mut out = BatchOutcome::new(total);
        info!(total, "verify batch started");
        notify(status, "Verifying channels…").await;

        for (i, r) in refs.iter().enumerate() {
            let done = i + 1;
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }

            let result = match self.resolve_target(r).await {
                Ok(target) => self.chat.get_chat(&target).await.map_err(FailureReason::from),
                Err(reason) => Err(reason),
            };
            match result {
                Ok(chat) => {
                    debug!(reference = r.canonical(), chat = %chat.id, "verified");
                    out.succeed(chat.display_title(r.canonical()));
                }
                Err(reason) => {
                    info!(reference = r.canonical(), %reason, "verify failed");
                    let wait = reason.congestion_wait();
                    out.fail(r.canonical(), reason);
                    if let Some(wait) = wait {
                        if !self.absorb_congestion(wait, cancel).await {
                            out.cancelled = true;
                            break;
                        }
                    }
                }
            }

            if done % settings.status_interval == 0 || done == total {
                notify(status, &out.verify_progress(done)).await;
            }
            if done < total && pause(jittered(self.current_delay().await), cancel).await.is_err() {
                out.cancelled = true;
                break;
            }
        }

        info!(ok = out.ok.len(), bad = out.bad.len(), cancelled = out.cancelled, "verify batch finished");
        notify(status, &out.render_verify()).await;
        out
    }

    /// Join invites first, then public handles. References of any other
    /// classification are ignored.
    pub async fn join_batch(
        &self,
        refs: &[ChatRef],
        settings: &FloodSettings,
        status: &dyn StatusSink,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let invites = refs.iter().filter(|r| r.is_invite()).map(JoinWork::Invite);
        let publics = refs.iter().filter_map(|r| {
            r.handle().map(|handle| JoinWork::Public {
                reference: r,
                handle,
            })
        });
        let work: Vec<JoinWork<'_>> = invites.chain(publics).collect();

        let total = work.len();
        let mut out = BatchOutcome::new(total);
        let baseline = settings.join_delay_secs;
        let mut local_delay = baseline;
        let mut in_batch = 0usize;
        self.governor.lock().await.reset_delay();
        info!(total, "join batch started");
        notify(status, "Starting join…").await;

        for (i, item) in work.iter().enumerate() {
            let done = i + 1;
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }

            let admission = self.governor.lock().await.check(Utc::now());
            match admission {
                Admission::Blocked(QuotaWindow::Hourly) => {
                    let cooldown = Duration::from_secs(settings.batch_cooldown_secs).max(HOURLY_BLOCK_COOLDOWN);
                    info!(cooldown_secs = cooldown.as_secs(), "hourly cap reached, cooling down");
                    notify(
                        status,
                        &format!("Hourly cap reached. Cooling down {} min…", cooldown.as_secs() / 60),
                    )
                    .await;
                    if pause(cooldown, cancel).await.is_err() {
                        out.cancelled = true;
                        break;
                    }
                }
                Admission::Blocked(QuotaWindow::Daily) => {
                    info!("daily cap reached, stopping join batch");
                    notify(status, "Daily cap reached. Stopping join.").await;
                    out.halted = Some(Halt::DailyQuota);
                    break;
                }
                Admission::Allowed => {}
            }

            let cache_key = item.cache_key();
            let key_guard = self.cache.lock_key(&cache_key).await;
            let attempt = self.guarded_join(item.join_reference(), true).await;
            if let Ok(JoinAttempt::Joined(chat)) = &attempt {
                self.remember(&cache_key, chat).await;
            }
            drop(key_guard);

            match attempt {
                Ok(JoinAttempt::Joined(chat)) => {
                    out.succeed(chat.display_title(&item.label()));
                    local_delay = (local_delay.max(baseline) + 1).min(LOCAL_DELAY_CEILING_SECS);
                }
                Ok(JoinAttempt::AlreadyMember) => {
                    out.succeed(format!("(already joined) {}", item.label()));
                    local_delay = (local_delay.max(baseline) + 1).min(LOCAL_DELAY_CEILING_SECS);
                }
                Err(JoinError::Chat(ChatError::Congestion { wait_secs }))
                    if wait_secs >= settings.flood_abort_secs =>
                {
                    self.governor.lock().await.raise_floor(SEVERE_FLOOR_SECS);
                    warn!(wait_secs, "congestion at abort threshold, stopping join batch");
                    notify(
                        status,
                        &format!("Congestion {}s (at or above abort threshold). Long cooldown 60 min.", wait_secs),
                    )
                    .await;
                    let slept = pause(MAX_CONGESTION_SLEEP, cancel).await;
                    out.fail(item.label(), FailureReason::CongestionAbort(wait_secs));
                    out.halted = Some(Halt::Congestion(wait_secs));
                    out.cancelled = slept.is_err();
                    break;
                }
                Err(JoinError::Chat(ChatError::Congestion { wait_secs })) => {
                    notify(status, &format!("Congestion {}s (pausing)…", wait_secs)).await;
                    let completed = self.absorb_congestion(wait_secs, cancel).await;
                    out.fail(item.label(), FailureReason::Congestion(wait_secs));
                    if !completed {
                        out.cancelled = true;
                        break;
                    }
                }
                Err(e) => {
                    let reason = FailureReason::from(e);
                    info!(reference = %item.label(), %reason, "join failed");
                    out.fail(item.label(), reason);
                }
            }

            let delay = local_delay.max(self.current_delay().await);
            if done % settings.status_interval == 0 || done == total {
                notify(status, &out.join_progress(done, delay)).await;
            }

            in_batch += 1;
            if done < total {
                let sleep = if in_batch >= settings.batch_size {
                    notify(
                        status,
                        &format!(
                            "Batch done ({}). Cooldown {} min…",
                            in_batch,
                            settings.batch_cooldown_secs / 60
                        ),
                    )
                    .await;
                    in_batch = 0;
                    Duration::from_secs(settings.batch_cooldown_secs)
                } else {
                    jittered(delay)
                };
                if pause(sleep, cancel).await.is_err() {
                    out.cancelled = true;
                    break;
                }
            }
        }

        info!(
            joined = out.ok.len(),
            failed = out.bad.len(),
            halted = ?out.halted,
            cancelled = out.cancelled,
            "join batch finished"
        );
        notify(status, &out.render_join()).await;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::memory::FixtureChat;
    use crate::chat::InMemoryChat;
    use crate::models::ChatId;
    use crate::status::RecordingStatus;

    async fn engine(chat: InMemoryChat, hourly: usize, daily: usize) -> (Engine, Arc<InMemoryChat>) {
        let chat = Arc::new(chat);
        let cache = ResolutionCache::open(Arc::new(InMemoryStore::new()))
            .await
            .unwrap();
        let engine = Engine::new(
            chat.clone(),
            Governor::new(hourly, daily, 1).shared(),
            Arc::new(cache),
        );
        (engine, chat)
    }

    fn refs(raw: &[&str]) -> Vec<ChatRef> {
        raw.iter().filter_map(|r| ChatRef::parse(r)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_join_records_only_real_joins() {
        let chat = InMemoryChat::new()
            .with_chat(FixtureChat::new(-1, "A").invite("t.me/+AAA"))
            .with_chat(FixtureChat::new(-2, "B").invite("t.me/+BBB").member());
        let (engine, _) = engine(chat, 5, 10).await;

        assert!(matches!(
            engine.guarded_join("https://t.me/+AAA", false).await,
            Ok(JoinAttempt::Joined(_))
        ));
        assert_eq!(
            engine.guarded_join("https://t.me/+BBB", false).await,
            Ok(JoinAttempt::AlreadyMember)
        );
        let snap = engine.governor.lock().await.snapshot(Utc::now());
        assert_eq!(snap.joins_last_hour, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_caches_invite_joins() {
        let chat = InMemoryChat::new().with_chat(FixtureChat::new(-7, "Secret").invite("t.me/+Secret"));
        let (engine, chat) = engine(chat, 5, 10).await;
        let status = RecordingStatus::new();
        let settings = FloodSettings::default();
        let cancel = CancellationToken::new();
        let batch = refs(&["t.me/+Secret"]);

        let first = engine.resolve_batch(&batch, &settings, &status, &cancel).await;
        assert_eq!(first.ok, vec!["Secret"]);
        assert_eq!(chat.join_calls(), 1);

        let second = engine.resolve_batch(&batch, &settings, &status, &cancel).await;
        assert_eq!(second.ok, vec!["Secret"]);
        assert_eq!(chat.join_calls(), 1);
        assert!(status.last().unwrap().starts_with("Verification finished."));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_marks_unclassified_unresolvable() {
        let (engine, chat) = engine(InMemoryChat::new(), 5, 10).await;
        let out = engine
            .resolve_batch(
                &refs(&["https://t.me/joinchat"]),
                &FloodSettings::default(),
                &RecordingStatus::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.bad[0].reason, FailureReason::Unresolvable);
        assert_eq!(chat.join_calls(), 0);
        assert_eq!(chat.lookup_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn join_batch_stops_on_daily_cap() {
        let chat = InMemoryChat::new()
            .with_chat(FixtureChat::new(-1, "A").handle("alpha_chan"))
            .with_chat(FixtureChat::new(-2, "B").handle("beta_chan"))
            .with_chat(FixtureChat::new(-3, "C").handle("gamma_chan"));
        let (engine, chat) = engine(chat, 5, 2).await;
        let out = engine
            .join_batch(
                &refs(&["@alpha_chan", "@beta_chan", "@gamma_chan"]),
                &FloodSettings::default(),
                &RecordingStatus::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.ok.len(), 2);
        assert_eq!(out.halted, Some(Halt::DailyQuota));
        assert_eq!(chat.join_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn join_batch_aborts_on_severe_congestion() {
        let chat = InMemoryChat::new()
            .with_chat(FixtureChat::new(-1, "A").handle("alpha_chan"))
            .with_chat(FixtureChat::new(-2, "B").handle("beta_chan"))
            .fail_join("alpha_chan", ChatError::Congestion { wait_secs: 900 });
        let (engine, chat) = engine(chat, 5, 10).await;
        let out = engine
            .join_batch(
                &refs(&["alpha_chan", "beta_chan"]),
                &FloodSettings::default(),
                &RecordingStatus::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.halted, Some(Halt::Congestion(900)));
        assert_eq!(out.bad[0].reason, FailureReason::CongestionAbort(900));
        assert_eq!(chat.join_calls(), 1);
        assert_eq!(engine.current_delay().await, SEVERE_FLOOR_SECS);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_batch_reports_partial_outcome() {
        let chat = InMemoryChat::new()
            .with_chat(FixtureChat::new(-1, "A").handle("alpha_chan"))
            .with_chat(FixtureChat::new(-2, "B").handle("beta_chan"));
        let (engine, _) = engine(chat, 5, 10).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = engine
            .resolve_batch(
                &refs(&["alpha_chan", "beta_chan"]),
                &FloodSettings::default(),
                &RecordingStatus::new(),
                &cancel,
            )
            .await;
        assert!(out.cancelled);
        assert!(out.ok.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_joins_reach_the_join_log() {
        let chat = InMemoryChat::new()
            .with_chat(FixtureChat::new(-1, "A").invite("t.me/+AAA"))
            .with_chat(FixtureChat::new(-2, "B").invite("t.me/+BBB").member());
        let (engine, _) = engine(chat, 5, 10).await;
        let log = Arc::new(InMemoryStore::new());
        let engine = engine.with_join_log(log.clone());

        engine.guarded_join("https://t.me/+AAA", false).await.unwrap();
        engine.guarded_join("https://t.me/+BBB", false).await.unwrap();
        assert_eq!(JoinLogStore::load(log.as_ref()).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_batch_waits_for_the_cache_key() {
        let chat = InMemoryChat::new().with_chat(FixtureChat::new(-1, "A").handle("alpha_chan"));
        let (engine, chat) = engine(chat, 5, 10).await;
        let held = engine.cache.lock_key("https://t.me/alpha_chan").await;

        let runner = engine.clone();
        let batch = tokio::spawn(async move {
            runner
                .join_batch(
                    &refs(&["@alpha_chan"]),
                    &FloodSettings::default(),
                    &RecordingStatus::new(),
                    &CancellationToken::new(),
                )
                .await
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(chat.join_calls(), 0);

        drop(held);
        let out = batch.await.unwrap();
        assert_eq!(out.ok, vec!["A"]);
        assert_eq!(
            engine.cache.get("https://t.me/alpha_chan").await,
            Some(ChatId(-1))
        );
    }
}
