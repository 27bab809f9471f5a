//! Bounded history scan of tracked channels for references to a target set.
//!
//! For each channel the scanner resolves a lookup target the same way a
//! verify batch does, but a refused invite join only yields
//! [`ChannelVerdict::NeedsVerify`]; it never fails the scan. History is
//! pulled lazily and the channel stops at the first message that matches
//! any target.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FloodSettings;
use crate::error::{Cancelled, ChatError};
use crate::extract::extract_all;
use crate::links::{is_platform_link, ChatRef};
use crate::models::Message;
use crate::orchestrator::Engine;
use crate::pace::{congestion_sleep, jittered, pause};
use crate::report::{ChannelLine, ChannelVerdict, FailureReason, ScanReport};
use crate::status::{notify, StatusSink};

const CONGESTION_BUFFER_SECS: u64 = 5;

/// Link-like targets match extracted references only. Free-text targets
/// also match the message body.
pub fn is_link_target(target: &str) -> bool {
    target.to_ascii_lowercase().starts_with("http") || is_platform_link(target)
}

/// Whether `message` mentions any of `targets`, case-insensitively.
pub fn message_matches(message: &Message, targets: &[String]) -> bool {
    let refs: Vec<String> = extract_all(message)
        .iter()
        .map(|r| r.canonical().to_lowercase())
        .collect();
    let body = message.body().unwrap_or_default().to_lowercase();

    targets.iter().any(|target| {
        let needle = target.to_lowercase();
        let in_refs = refs.iter().any(|r| r.contains(&needle));
        if is_link_target(target) {
            in_refs
        } else {
            in_refs || body.contains(&needle)
        }
    })
}

/// Why one channel scan stopped early.
enum Interrupt {
    Congestion(u64),
    Cancelled,
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Interrupt::Cancelled
    }
}

impl Engine {
    /// Scan up to `limit` recent messages of each channel for `targets`.
    pub async fn scan(
        &self,
        channels: &[ChatRef],
        targets: &[String],
        limit: usize,
        settings: &FloodSettings,
        status: &dyn StatusSink,
        cancel: &CancellationToken,
    ) -> ScanReport {
        let total = channels.len();
        let mut report = ScanReport::new(total);
        info!(total, targets = targets.len(), limit, "scan started");
        notify(status, &format!("Starting check (limit {} per channel)…", limit)).await;

        for (i, channel) in channels.iter().enumerate() {
            let done = i + 1;
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let verdict = match self.scan_channel(channel, targets, limit, cancel).await {
                Ok(line) => line,
                Err(Interrupt::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(Interrupt::Congestion(wait_secs)) => {
                    self.governor.lock().await.on_congestion(wait_secs);
                    warn!(channel = channel.canonical(), wait_secs, "congestion during scan, pausing");
                    report.record(ChannelLine {
                        channel: channel.canonical().to_string(),
                        verdict: ChannelVerdict::Congestion { wait_secs },
                    });
                    if pause(congestion_sleep(wait_secs, CONGESTION_BUFFER_SECS), cancel)
                        .await
                        .is_err()
                    {
                        report.cancelled = true;
                        break;
                    }
                    None
                }
            };
            if let Some(line) = verdict {
                debug!(channel = channel.canonical(), line = %line, "channel scanned");
                report.record(line);
            }

            if done % settings.status_interval == 0 || done == total {
                notify(status, &report.progress(done)).await;
            }
            if done < total {
                let delay = self.governor.lock().await.current_delay();
                if pause(jittered(delay), cancel).await.is_err() {
                    report.cancelled = true;
                    break;
                }
            }
        }

        info!(
            processed = report.processed,
            found = report.found,
            cancelled = report.cancelled,
            "scan finished"
        );
        notify(status, &report.render()).await;
        report
    }

    async fn scan_channel(
        &self,
        channel: &ChatRef,
        targets: &[String],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelLine>, Interrupt> {
        let line = |verdict| {
            Ok(Some(ChannelLine {
                channel: channel.canonical().to_string(),
                verdict,
            }))
        };

        let target = match self.resolve_target(channel).await {
            Ok(target) => target,
            Err(FailureReason::Quota(w)) => {
                return line(ChannelVerdict::NeedsVerify { quota: Some(w) })
            }
            Err(FailureReason::Unresolvable) => return line(ChannelVerdict::NeedsVerify { quota: None }),
            Err(FailureReason::Congestion(w)) | Err(FailureReason::CongestionAbort(w)) => {
                return Err(Interrupt::Congestion(w))
            }
            Err(other) => {
                return line(ChannelVerdict::Error {
                    message: other.to_string(),
                })
            }
        };

        let chat = match self.chat.get_chat(&target).await {
            Ok(chat) => chat,
            Err(e) => return chat_failure(channel, e),
        };
        let title = chat.display_title(channel.canonical()).to_string();
        let finished = |verdict| {
            Ok(Some(ChannelLine {
                channel: title.clone(),
                verdict,
            }))
        };

        let mut history = match self.chat.get_history(chat.id, limit).await {
            Ok(h) => h,
            Err(e) => return chat_failure(channel, e),
        };
        let mut pulled = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            match history.next().await {
                Ok(Some(message)) => {
                    pulled += 1;
                    if message_matches(&message, targets) {
                        debug!(channel = %title, message = message.id, pulled, "target found");
                        return finished(ChannelVerdict::Matched);
                    }
                }
                Ok(None) => return finished(ChannelVerdict::NotMatched),
                Err(e) => return chat_failure(channel, e),
            }
        }
    }
}

fn chat_failure(channel: &ChatRef, e: ChatError) -> Result<Option<ChannelLine>, Interrupt> {
    match e {
        ChatError::Congestion { wait_secs } => Err(Interrupt::Congestion(wait_secs)),
        other => Ok(Some(ChannelLine {
            channel: channel.canonical().to_string(),
            verdict: ChannelVerdict::Error {
                message: other.to_string(),
            },
        })),
    }
}
