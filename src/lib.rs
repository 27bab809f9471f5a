//! # tg-warden
//!
//! Flood-safe join, verify and channel-scan orchestration for chat userbots.
//!
//! The crate turns messy user-supplied chat references into canonical
//! deep-links, resolves each one to a stable chat identity at most once, and
//! drives bulk join, verify and history-scan batches under an hourly/daily
//! join budget with adaptive, jittered pacing. The chat protocol itself is a
//! collaborator behind [`chat::ChatApi`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────────┐
//! │   links    │──▶│  extract   │──▶│     scanner      │
//! │ canonical  │   │ msg → refs │   │ bounded history  │
//! └─────┬──────┘   └────────────┘   └────────┬─────────┘
//!       │                                    │
//!       ▼                                    ▼
//! ┌────────────┐   ┌────────────┐   ┌──────────────────┐
//! │  governor  │◀──│orchestrator│──▶│ cache ─▶ store   │
//! │ caps+delay │   │ join/verify│   │ files | memory   │
//! └────────────┘   └─────┬──────┘   └──────────────────┘
//!                        ▼
//!                  ┌────────────┐
//!                  │   warden   │  service object, one method per command
//!                  └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! warden normalize "@durov" "t.me/+AbC"
//! warden channels add "t.me/news_chan" "https://t.me/+Invite"
//! warden targets add "giveaway"
//! warden verify --fixture ./fixtures/chats.json
//! warden check --fixture ./fixtures/chats.json --limit 50
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`links`] | Canonicalize and classify chat references |
//! | [`extract`] | Pull every reference out of a message |
//! | [`governor`] | Hourly/daily join caps and adaptive delay |
//! | [`pace`] | Cancellable, jittered sleeps |
//! | [`cache`] | Canonical reference → resolved chat |
//! | [`orchestrator`] | Verify and join batches |
//! | [`scanner`] | Bounded channel history scan |
//! | [`warden`] | Service object and high-level operations |
//! | [`chat`] | Chat client seam and scripted in-memory client |
//! | [`store`] | Line lists and cache persistence |
//! | [`status`] | Best-effort status reporting |
//! | [`report`] | Batch outcomes and rendered summaries |
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chat and message shapes |
//! | [`error`] | Chat client error taxonomy |

pub mod cache;
pub mod chat;
pub mod config;
pub mod error;
pub mod extract;
pub mod governor;
pub mod links;
pub mod models;
pub mod orchestrator;
pub mod pace;
pub mod report;
pub mod scanner;
pub mod status;
pub mod store;
pub mod warden;
