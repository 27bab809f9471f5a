//! Sleeps between batch steps.
//!
//! Every suspension in a batch goes through [`pause`] so an operator can
//! cancel a long cooldown. Inter-item delays are jittered upward by 20–40%
//! of the base so consecutive operations never land on a fixed cadence.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Longest single congestion sleep.
pub const MAX_CONGESTION_SLEEP: Duration = Duration::from_secs(60 * 60);

/// Sleep for `duration`, returning early with [`Cancelled`] if `cancel` fires.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Cancelled),
    }
}

/// `base_secs` plus a random 20–40% on top.
pub fn jittered(base_secs: u64) -> Duration {
    let factor = rand::thread_rng().gen_range(0.2..0.4);
    let base = base_secs as f64;
    Duration::from_secs_f64(base + base * factor)
}

/// Sleep owed after a congestion signal: the reported wait plus `buffer_secs`,
/// capped at one hour.
pub fn congestion_sleep(wait_secs: u64, buffer_secs: u64) -> Duration {
    Duration::from_secs(wait_secs.saturating_add(buffer_secs)).min(MAX_CONGESTION_SLEEP)
}
