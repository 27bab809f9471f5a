//! Batch status reporting.
//!
//! Every batch posts incremental progress text and a final report through a
//! [`StatusSink`]. Delivery is best-effort: [`notify`] logs a failed update
//! and carries on, so a broken status channel never fails a batch.
//!
//! The built-in sinks write to **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

/// Receives user-visible status text.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update(&self, text: &str) -> Result<()>;
}

/// Deliver `text`, logging and swallowing any failure.
pub async fn notify(sink: &dyn StatusSink, text: &str) {
    if let Err(e) = sink.update(text).await {
        warn!(error = %e, "status update not delivered");
    }
}

/// Human-friendly status on stderr, one blank line between updates.
pub struct StderrStatus;

#[async_trait]
impl StatusSink for StderrStatus {
    async fn update(&self, text: &str) -> Result<()> {
        let mut err = std::io::stderr().lock();
        writeln!(err, "{}\n", text)?;
        err.flush()?;
        Ok(())
    }
}

/// Machine-readable status: one JSON object per line on stderr.
pub struct JsonStatus;

#[async_trait]
impl StatusSink for JsonStatus {
    async fn update(&self, text: &str) -> Result<()> {
        let obj = serde_json::json!({
            "event": "status",
            "text": text,
        });
        let line = serde_json::to_string(&obj)?;
        let mut err = std::io::stderr().lock();
        writeln!(err, "{}", line)?;
        err.flush()?;
        Ok(())
    }
}

/// No-op sink when status is disabled.
pub struct NoStatus;

#[async_trait]
impl StatusSink for NoStatus {
    async fn update(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps every update in memory. Useful for tests and for embedding the
/// engine behind another command layer.
#[derive(Default, Clone)]
pub struct RecordingStatus {
    updates: Arc<Mutex<Vec<String>>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<String> {
        self.updates
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.updates().pop()
    }
}

#[async_trait]
impl StatusSink for RecordingStatus {
    async fn update(&self, text: &str) -> Result<()> {
        self.updates
            .lock()
            .map_err(|_| anyhow::anyhow!("status log poisoned"))?
            .push(text.to_string());
        Ok(())
    }
}

/// Status mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusMode {
    Off,
    Human,
    Json,
}

impl StatusMode {
    /// Default: human status when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            StatusMode::Human
        } else {
            StatusMode::Off
        }
    }

    pub fn sink(&self) -> Arc<dyn StatusSink> {
        match self {
            StatusMode::Off => Arc::new(NoStatus),
            StatusMode::Human => Arc::new(StderrStatus),
            StatusMode::Json => Arc::new(JsonStatus),
        }
    }
}
