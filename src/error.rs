//! Error types for chat client calls and batch cancellation.
//!
//! Client calls return a closed [`ChatError`]; anything the client cannot
//! classify lands in [`ChatError::Other`] with a short message. Storage and
//! startup paths use `anyhow` instead.

use thiserror::Error;

/// Outcome kinds a chat client call can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The invite token does not exist. Terminal for the reference.
    #[error("INVITE INVALID")]
    InviteInvalid,

    /// The invite token existed but has expired or was revoked. Terminal.
    #[error("INVITE EXPIRED")]
    InviteExpired,

    /// The account is already a member. Callers treat this as a resolution
    /// path, not a failure.
    #[error("already a participant")]
    AlreadyParticipant,

    /// The platform demands a pause of `wait_secs` before further calls.
    #[error("congestion: wait {wait_secs}s")]
    Congestion { wait_secs: u64 },

    /// Opaque client failure.
    #[error("{0}")]
    Other(String),
}

impl ChatError {
    pub fn other(msg: impl Into<String>) -> Self {
        ChatError::Other(msg.into())
    }
}

/// A batch was cancelled at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("batch cancelled")]
pub struct Cancelled;
