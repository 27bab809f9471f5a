//! Join-rate governor.
//!
//! Tracks a rolling window of join timestamps against an hourly and a daily
//! cap, and owns the adaptive delay every batch sleeps between items.
//!
//! # Quota
//!
//! - Timestamps older than 24h are pruned before every check.
//! - The trailing hour is counted against `hourly_cap` first (the tighter
//!   budget), then the whole window against `daily_cap`.
//! - The backing deque holds at most `2 * daily_cap` entries and drops the
//!   oldest on overflow, independent of the prune.
//!
//! # Adaptive delay
//!
//! Starts at the configured baseline. Congestion signals raise the floor
//! (≥300s observed wait → 15s, ≥1200s → 20s) and never lower it.
//! [`Governor::reset_delay`] restores the baseline.
//!
//! The governor is plain state; callers share it as [`SharedGovernor`] and
//! hold the lock across check → join → record so two batches cannot spend
//! the same slot.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Observed wait at which the delay floor rises to [`MODERATE_FLOOR_SECS`].
pub const MODERATE_CONGESTION_SECS: u64 = 300;
/// Observed wait at which the delay floor rises to [`SEVERE_FLOOR_SECS`].
pub const SEVERE_CONGESTION_SECS: u64 = 1200;
pub const MODERATE_FLOOR_SECS: u64 = 15;
pub const SEVERE_FLOOR_SECS: u64 = 20;

pub type SharedGovernor = Arc<Mutex<Governor>>;

/// Which budget blocked a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    Hourly,
    Daily,
}

impl std::fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaWindow::Hourly => f.write_str("hourly"),
            QuotaWindow::Daily => f.write_str("daily"),
        }
    }
}

/// Answer to "may I join now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Blocked(QuotaWindow),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn blocked_by(&self) -> Option<QuotaWindow> {
        match self {
            Admission::Allowed => None,
            Admission::Blocked(w) => Some(*w),
        }
    }
}

/// Point-in-time view of the governor for status output.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    pub joins_last_hour: usize,
    pub joins_last_day: usize,
    pub hourly_cap: usize,
    pub daily_cap: usize,
    pub delay_secs: u64,
    pub baseline_secs: u64,
}

#[derive(Debug)]
pub struct Governor {
    joins: VecDeque<DateTime<Utc>>,
    capacity: usize,
    hourly_cap: usize,
    daily_cap: usize,
    baseline_secs: u64,
    delay_secs: u64,
}

impl Governor {
    pub fn new(hourly_cap: usize, daily_cap: usize, baseline_secs: u64) -> Self {
        let capacity = daily_cap.saturating_mul(2).max(1);
        Self {
            joins: VecDeque::with_capacity(capacity),
            capacity,
            hourly_cap,
            daily_cap,
            baseline_secs,
            delay_secs: baseline_secs,
        }
    }

    pub fn shared(self) -> SharedGovernor {
        Arc::new(Mutex::new(self))
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(24);
        while self.joins.front().is_some_and(|t| *t < horizon) {
            self.joins.pop_front();
        }
    }

    fn joins_since(&self, since: DateTime<Utc>) -> usize {
        // Sorted ascending, so the tail past the partition point is the window.
        self.joins.len() - self.joins.partition_point(|t| *t < since)
    }

    /// Check both budgets at `now`. Prunes first.
    pub fn check(&mut self, now: DateTime<Utc>) -> Admission {
        self.prune(now);
        if self.joins_since(now - Duration::hours(1)) >= self.hourly_cap {
            return Admission::Blocked(QuotaWindow::Hourly);
        }
        if self.joins.len() >= self.daily_cap {
            return Admission::Blocked(QuotaWindow::Daily);
        }
        Admission::Allowed
    }

    /// Record a join at `at`, keeping the window sorted.
    pub fn record_join(&mut self, at: DateTime<Utc>) {
        let idx = self.joins.partition_point(|t| *t <= at);
        self.joins.insert(idx, at);
        while self.joins.len() > self.capacity {
            self.joins.pop_front();
        }
    }

    /// Replay a persisted join log, oldest entries past capacity dropped.
    pub fn restore(&mut self, joins: impl IntoIterator<Item = DateTime<Utc>>) {
        for at in joins {
            self.record_join(at);
        }
    }

    /// The recorded window, ascending, for persistence.
    pub fn history(&self) -> Vec<DateTime<Utc>> {
        self.joins.iter().copied().collect()
    }

    pub fn current_delay(&self) -> u64 {
        self.delay_secs
    }

    pub fn baseline(&self) -> u64 {
        self.baseline_secs
    }

    /// Escalate the delay floor for an observed congestion wait.
    pub fn on_congestion(&mut self, observed_wait_secs: u64) {
        if observed_wait_secs >= MODERATE_CONGESTION_SECS {
            self.raise_floor(MODERATE_FLOOR_SECS);
        }
        if observed_wait_secs >= SEVERE_CONGESTION_SECS {
            self.raise_floor(SEVERE_FLOOR_SECS);
        }
    }

    /// Raise the delay to at least `secs`. Never lowers it.
    pub fn raise_floor(&mut self, secs: u64) {
        self.delay_secs = self.delay_secs.max(secs);
    }

    pub fn reset_delay(&mut self) {
        self.delay_secs = self.baseline_secs;
    }

    /// Change the baseline and reset the adaptive delay to it.
    pub fn set_baseline(&mut self, secs: u64) {
        self.baseline_secs = secs;
        self.reset_delay();
    }

    /// Replace both caps. The rolling window starts over: history is
    /// discarded rather than re-evaluated under the new caps.
    pub fn reconfigure(&mut self, hourly_cap: usize, daily_cap: usize) {
        self.hourly_cap = hourly_cap;
        self.daily_cap = daily_cap;
        self.capacity = daily_cap.saturating_mul(2).max(1);
        self.joins = VecDeque::with_capacity(self.capacity);
    }

    pub fn snapshot(&mut self, now: DateTime<Utc>) -> QuotaSnapshot {
        self.prune(now);
        QuotaSnapshot {
            joins_last_hour: self.joins_since(now - Duration::hours(1)),
            joins_last_day: self.joins.len(),
            hourly_cap: self.hourly_cap,
            daily_cap: self.daily_cap,
            delay_secs: self.delay_secs,
            baseline_secs: self.baseline_secs,
        }
    }

    /// Number of timestamps currently held, after pruning at `now`.
    pub fn window_len(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.joins.len()
    }
}
