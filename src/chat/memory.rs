//! Scripted in-memory [`ChatApi`].
//!
//! Holds a fixed set of chats, each reachable by id, public handle and/or
//! invite links, with a canned history. Errors can be queued per join
//! reference or lookup target; each queued error is returned once, in order,
//! before normal behaviour resumes. Call counters let tests assert exactly
//! how much network traffic a batch would have caused.
//!
//! The same shape deserializes from JSON so the CLI can run batches against a
//! fixture file:
//!
//! ```json
//! {
//!   "chats": [
//!     { "id": -1001, "title": "News", "handle": "news_chan",
//!       "history": [ { "id": 2, "content": { "type": "text", "text": "see t.me/+Abc" } } ] },
//!     { "id": -1002, "title": "Private", "invites": ["https://t.me/+Abc"] }
//!   ],
//!   "join_errors": { "https://t.me/+Dead": [ { "kind": "invite_expired" } ] }
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{ChatApi, ChatTarget, HistoryCursor};
use crate::error::ChatError;
use crate::links::{canonicalize, classify, public_handle, Classification};
use crate::models::{Chat, ChatId, Message};

/// One chat known to the fake client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureChat {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub invites: Vec<String>,
    /// Whether the account is already a member.
    #[serde(default)]
    pub member: bool,
    /// Most recent first.
    #[serde(default)]
    pub history: Vec<Message>,
}

impl FixtureChat {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn invite(mut self, link: impl Into<String>) -> Self {
        self.invites.push(link.into());
        self
    }

    pub fn member(mut self) -> Self {
        self.member = true;
        self
    }

    pub fn history(mut self, messages: Vec<Message>) -> Self {
        self.history = messages;
        self
    }

    fn as_chat(&self) -> Chat {
        Chat::new(self.id, self.title.clone())
    }

    fn answers_to(&self, reference: &str) -> bool {
        let canon = canonicalize(reference);
        if self.invites.iter().any(|i| canonicalize(i) == canon) {
            return true;
        }
        match (&self.handle, public_handle(&canon)) {
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            _ => false,
        }
    }
}

/// Serializable form of a queued [`ChatError`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedError {
    InviteInvalid,
    InviteExpired,
    AlreadyParticipant,
    Congestion { wait_secs: u64 },
    Other { message: String },
}

impl From<ScriptedError> for ChatError {
    fn from(e: ScriptedError) -> Self {
        match e {
            ScriptedError::InviteInvalid => ChatError::InviteInvalid,
            ScriptedError::InviteExpired => ChatError::InviteExpired,
            ScriptedError::AlreadyParticipant => ChatError::AlreadyParticipant,
            ScriptedError::Congestion { wait_secs } => ChatError::Congestion { wait_secs },
            ScriptedError::Other { message } => ChatError::Other(message),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub chats: Vec<FixtureChat>,
    /// Keyed by the exact reference passed to `join_chat`.
    #[serde(default)]
    pub join_errors: HashMap<String, Vec<ScriptedError>>,
    /// Keyed by the lookup target as displayed (`-1001`, `@handle`, link).
    #[serde(default)]
    pub lookup_errors: HashMap<String, Vec<ScriptedError>>,
}

#[derive(Default)]
struct State {
    chats: Vec<FixtureChat>,
    join_errors: HashMap<String, VecDeque<ChatError>>,
    lookup_errors: HashMap<String, VecDeque<ChatError>>,
    joined: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryChat {
    state: Mutex<State>,
    join_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    pulled: Arc<AtomicUsize>,
}

impl InMemoryChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut chat = Self::new();
        let state = chat.state.get_mut();
        state.chats = fixture.chats;
        state.join_errors = queue(fixture.join_errors);
        state.lookup_errors = queue(fixture.lookup_errors);
        chat
    }

    pub fn from_fixture_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        let fixture: Fixture = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_chat(mut self, chat: FixtureChat) -> Self {
        self.state.get_mut().chats.push(chat);
        self
    }

    /// Queue an error for the next `join_chat(reference)`.
    pub fn fail_join(mut self, reference: &str, err: ChatError) -> Self {
        self.state
            .get_mut()
            .join_errors
            .entry(reference.to_string())
            .or_default()
            .push_back(err);
        self
    }

    /// Queue an error for the next `get_chat` whose target displays as `target`.
    pub fn fail_lookup(mut self, target: &str, err: ChatError) -> Self {
        self.state
            .get_mut()
            .lookup_errors
            .entry(target.to_string())
            .or_default()
            .push_back(err);
        self
    }

    pub fn join_calls(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Messages handed out by history cursors so far.
    pub fn messages_pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// References passed to `join_chat`, in call order.
    pub async fn joined_references(&self) -> Vec<String> {
        self.state.lock().await.joined.clone()
    }
}

fn queue(map: HashMap<String, Vec<ScriptedError>>) -> HashMap<String, VecDeque<ChatError>> {
    map.into_iter()
        .map(|(k, v)| (k, v.into_iter().map(ChatError::from).collect()))
        .collect()
}

#[async_trait]
impl ChatApi for InMemoryChat {
    async fn join_chat(&self, reference: &str) -> Result<Chat, ChatError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.joined.push(reference.to_string());
        if let Some(err) = state
            .join_errors
            .get_mut(reference)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        match state.chats.iter_mut().find(|c| c.answers_to(reference)) {
            Some(chat) if chat.member => Err(ChatError::AlreadyParticipant),
            Some(chat) => {
                chat.member = true;
                Ok(chat.as_chat())
            }
            None if classify(&canonicalize(reference)) == Classification::InviteLink => {
                Err(ChatError::InviteInvalid)
            }
            None => Err(ChatError::other("USERNAME_NOT_OCCUPIED")),
        }
    }

    async fn get_chat(&self, target: &ChatTarget) -> Result<Chat, ChatError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(err) = state
            .lookup_errors
            .get_mut(&target.to_string())
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        let found = match target {
            ChatTarget::Id(id) => state.chats.iter().find(|c| c.id == id.0),
            ChatTarget::Handle(h) => state
                .chats
                .iter()
                .find(|c| c.handle.as_deref().is_some_and(|mine| mine.eq_ignore_ascii_case(h))),
            ChatTarget::Link(link) => state.chats.iter().find(|c| c.answers_to(link)),
        };
        match found {
            // Private chats only resolve for members.
            Some(chat) if chat.handle.is_none() && !chat.member => {
                Err(ChatError::other("CHANNEL_PRIVATE"))
            }
            Some(chat) => Ok(chat.as_chat()),
            None => Err(ChatError::other("CHAT_NOT_FOUND")),
        }
    }

    async fn get_history(
        &self,
        chat: ChatId,
        limit: usize,
    ) -> Result<Box<dyn HistoryCursor>, ChatError> {
        let state = self.state.lock().await;
        let found = state
            .chats
            .iter()
            .find(|c| c.id == chat.0)
            .ok_or_else(|| ChatError::other("CHAT_NOT_FOUND"))?;
        let messages: VecDeque<Message> = found.history.iter().take(limit).cloned().collect();
        Ok(Box::new(MemoryCursor {
            messages,
            pulled: Arc::clone(&self.pulled),
        }))
    }
}

struct MemoryCursor {
    messages: VecDeque<Message>,
    pulled: Arc<AtomicUsize>,
}

#[async_trait]
impl HistoryCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<Message>, ChatError> {
        let next = self.messages.pop_front();
        if next.is_some() {
            self.pulled.fetch_add(1, Ordering::SeqCst);
        }
        Ok(next)
    }
}
