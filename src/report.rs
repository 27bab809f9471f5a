//! Batch outcomes and their rendered text.
//!
//! Every batch returns a structured value and posts a rendered summary
//! through the status sink. Renderers truncate: verify and join reports show
//! at most [`SAMPLE_LIMIT`] entries per list, scan reports at most
//! [`SCAN_LINE_LIMIT`] channel lines, and scan progress the last
//! [`PROGRESS_TAIL`] lines.

use std::fmt;

use serde::Serialize;

use crate::error::ChatError;
use crate::governor::QuotaWindow;

pub const SAMPLE_LIMIT: usize = 30;
pub const SCAN_LINE_LIMIT: usize = 200;
pub const PROGRESS_TAIL: usize = 10;

/// Why a single reference did not resolve or join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Quota(QuotaWindow),
    Congestion(u64),
    /// Congestion at or above the abort threshold; ends a join batch.
    CongestionAbort(u64),
    InviteInvalid,
    InviteExpired,
    Unresolvable,
    Other(String),
}

impl FailureReason {
    /// The reported wait, for congestion failures.
    pub fn congestion_wait(&self) -> Option<u64> {
        match self {
            FailureReason::Congestion(w) | FailureReason::CongestionAbort(w) => Some(*w),
            _ => None,
        }
    }
}

impl From<ChatError> for FailureReason {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::InviteInvalid => FailureReason::InviteInvalid,
            ChatError::InviteExpired => FailureReason::InviteExpired,
            ChatError::Congestion { wait_secs } => FailureReason::Congestion(wait_secs),
            other => FailureReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Quota(w) => write!(f, "quota {} reached (skipped)", w),
            FailureReason::Congestion(w) => write!(f, "congestion {}s (skipped)", w),
            FailureReason::CongestionAbort(w) => write!(f, "congestion {}s (abort)", w),
            FailureReason::InviteInvalid => f.write_str("INVITE INVALID"),
            FailureReason::InviteExpired => f.write_str("INVITE EXPIRED"),
            FailureReason::Unresolvable => f.write_str("cannot resolve — skip"),
            FailureReason::Other(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub reference: String,
    pub reason: FailureReason,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.reference, self.reason)
    }
}

/// Why a join batch stopped before its last item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Halt {
    DailyQuota,
    Congestion(u64),
}

/// Result of `resolve_batch` or `join_batch`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub ok: Vec<String>,
    pub bad: Vec<Failure>,
    pub cancelled: bool,
    pub halted: Option<Halt>,
}

impl BatchOutcome {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn succeed(&mut self, label: impl Into<String>) {
        self.ok.push(label.into());
    }

    pub fn fail(&mut self, reference: impl Into<String>, reason: FailureReason) {
        self.bad.push(Failure {
            reference: reference.into(),
            reason,
        });
    }

    pub fn verify_progress(&self, done: usize) -> String {
        format!(
            "Verifying… {}/{} done.\nOK: {} | Bad: {}",
            done,
            self.total,
            self.ok.len(),
            self.bad.len()
        )
    }

    pub fn render_verify(&self) -> String {
        let mut text = format!(
            "Verification finished.\nOK: {} | Bad: {}",
            self.ok.len(),
            self.bad.len()
        );
        self.push_footer(&mut text);
        push_sample(&mut text, "VALID (sample):", self.ok.iter());
        push_sample(&mut text, "INVALID/ERROR:", self.bad.iter());
        text
    }

    pub fn join_progress(&self, done: usize, delay_secs: u64) -> String {
        format!(
            "Join progress: {}/{}\nJoined: {} | Failed: {}\nAdaptive delay: ~{}s",
            done,
            self.total,
            self.ok.len(),
            self.bad.len(),
            delay_secs
        )
    }

    pub fn render_join(&self) -> String {
        let mut text = format!(
            "Join finished.\nTotal attempts: {} | Joined: {} | Failed: {}",
            self.total,
            self.ok.len(),
            self.bad.len()
        );
        self.push_footer(&mut text);
        push_sample(&mut text, "Joined (sample):", self.ok.iter());
        push_sample(&mut text, "Failed/skipped (sample):", self.bad.iter());
        text
    }

    fn push_footer(&self, text: &mut String) {
        match self.halted {
            Some(Halt::DailyQuota) => text.push_str("\nStopped: daily cap reached."),
            Some(Halt::Congestion(w)) => {
                text.push_str(&format!("\nStopped: congestion {}s at or above abort threshold.", w))
            }
            None => {}
        }
        if self.cancelled {
            text.push_str("\nCancelled before completion.");
        }
    }
}

fn push_sample<T: fmt::Display>(text: &mut String, heading: &str, items: impl ExactSizeIterator<Item = T>) {
    if items.len() == 0 {
        return;
    }
    text.push_str("\n\n");
    text.push_str(heading);
    for item in items.take(SAMPLE_LIMIT) {
        text.push('\n');
        text.push_str(&item.to_string());
    }
}

/// What a scan concluded for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ChannelVerdict {
    Matched,
    NotMatched,
    /// No identity to scan yet. `quota` is set when an invite join was
    /// skipped because a budget was exhausted.
    NeedsVerify { quota: Option<QuotaWindow> },
    /// Skipped after a congestion pause; not counted as processed.
    Congestion { wait_secs: u64 },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelLine {
    /// Display title when resolvable, otherwise the canonical reference.
    pub channel: String,
    #[serde(flatten)]
    pub verdict: ChannelVerdict,
}

impl fmt::Display for ChannelLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.verdict {
            ChannelVerdict::Matched => write!(f, "{}: YES", self.channel),
            ChannelVerdict::NotMatched => write!(f, "{}: NO", self.channel),
            ChannelVerdict::NeedsVerify { quota: Some(w) } => write!(
                f,
                "{}: quota {} reached, invite not joined. Run verify.",
                self.channel, w
            ),
            ChannelVerdict::NeedsVerify { quota: None } => write!(
                f,
                "{}: not accessible (invite not cached). Run verify.",
                self.channel
            ),
            ChannelVerdict::Congestion { wait_secs } => write!(
                f,
                "{}: congestion {}s (skipped temporarily)",
                self.channel, wait_secs
            ),
            ChannelVerdict::Error { message } => write!(f, "{}: error: {}", self.channel, message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub total: usize,
    pub processed: usize,
    pub found: usize,
    pub cancelled: bool,
    pub lines: Vec<ChannelLine>,
}

impl ScanReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, line: ChannelLine) {
        match line.verdict {
            ChannelVerdict::Matched => {
                self.found += 1;
                self.processed += 1;
            }
            ChannelVerdict::Congestion { .. } => {}
            _ => self.processed += 1,
        }
        self.lines.push(line);
    }

    pub fn progress(&self, done: usize) -> String {
        let start = self.lines.len().saturating_sub(PROGRESS_TAIL);
        let sample: Vec<String> = self.lines[start..].iter().map(|l| l.to_string()).collect();
        format!(
            "Checking… {}/{}\nMatched: {}\nSample:\n{}",
            done,
            self.total,
            self.found,
            sample.join("\n")
        )
    }

    pub fn render(&self) -> String {
        let mut text = format!(
            "Check finished.\nChannels checked: {}\nMatched: {}",
            self.processed, self.found
        );
        if self.cancelled {
            text.push_str("\nCancelled before completion.");
        }
        text.push_str("\n\n");
        let shown: Vec<String> = self
            .lines
            .iter()
            .take(SCAN_LINE_LIMIT)
            .map(|l| l.to_string())
            .collect();
        text.push_str(&shown.join("\n"));
        if self.lines.len() > SCAN_LINE_LIMIT {
            text.push_str(&format!("\n…({} more)", self.lines.len() - SCAN_LINE_LIMIT));
        }
        text
    }
}
