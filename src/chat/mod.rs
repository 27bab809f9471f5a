//! Chat client seam.
//!
//! The engine never speaks the chat protocol itself. It consumes a
//! [`ChatApi`] that can join a chat, look one up and stream recent history.
//! A real deployment wraps its protocol client in this trait;
//! [`InMemoryChat`] is a scripted implementation for tests and offline runs.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use tg_warden::chat::{ChatApi, ChatTarget, HistoryCursor};
//! use tg_warden::error::ChatError;
//! use tg_warden::models::{Chat, ChatId};
//!
//! struct Offline;
//!
//! #[async_trait]
//! impl ChatApi for Offline {
//!     async fn join_chat(&self, _reference: &str) -> Result<Chat, ChatError> {
//!         Err(ChatError::other("offline"))
//!     }
//!     async fn get_chat(&self, _target: &ChatTarget) -> Result<Chat, ChatError> {
//!         Err(ChatError::other("offline"))
//!     }
//!     async fn get_history(
//!         &self,
//!         _chat: ChatId,
//!         _limit: usize,
//!     ) -> Result<Box<dyn HistoryCursor>, ChatError> {
//!         Err(ChatError::other("offline"))
//!     }
//! }
//! ```

pub mod memory;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::models::{Chat, ChatId, Message};

pub use memory::InMemoryChat;

/// What to look a chat up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    /// A previously resolved identity.
    Id(ChatId),
    /// A public handle, without `@`.
    Handle(String),
    /// A canonical link (used for invite links after joining).
    Link(String),
}

impl std::fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatTarget::Id(id) => write!(f, "{}", id),
            ChatTarget::Handle(h) => write!(f, "@{}", h),
            ChatTarget::Link(l) => f.write_str(l),
        }
    }
}

/// A lazy, finite, non-restartable walk over a chat's history, most recent
/// first. Each call to [`next`](HistoryCursor::next) may hit the network.
#[async_trait]
pub trait HistoryCursor: Send {
    async fn next(&mut self) -> Result<Option<Message>, ChatError>;
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Join by canonical invite link or public handle.
    async fn join_chat(&self, reference: &str) -> Result<Chat, ChatError>;

    async fn get_chat(&self, target: &ChatTarget) -> Result<Chat, ChatError>;

    /// Up to `limit` most recent messages.
    async fn get_history(
        &self,
        chat: ChatId,
        limit: usize,
    ) -> Result<Box<dyn HistoryCursor>, ChatError>;
}
