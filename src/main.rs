//! # tg-warden CLI (`warden`)
//!
//! Manages the tracked channel list and search targets, and drives verify,
//! join and check batches. Batch commands run against a scripted chat
//! fixture (see [`tg_warden::chat::memory`]) so every flow can be exercised
//! offline.
//!
//! ## Usage
//!
//! ```bash
//! warden --config ./config/warden.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `warden normalize <raw>...` | Print canonical form and classification |
//! | `warden channels add\|remove\|clear\|show` | Manage tracked channels |
//! | `warden targets add\|remove\|clear\|show` | Manage search targets |
//! | `warden cache show\|clear` | Inspect or reset the resolution cache |
//! | `warden quota` | Show join budget usage |
//! | `warden verify --fixture <json>` | Resolve every tracked channel |
//! | `warden join --fixture <json> <refs>...` | Join invites and public handles |
//! | `warden check --fixture <json> [--limit N]` | Scan tracked channels for targets |
//!
//! Reports go to stdout; status updates and logs go to stderr. Ctrl-C
//! cancels a running batch at its next suspension point and still prints
//! the partial report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tg_warden::chat::{ChatApi, InMemoryChat};
use tg_warden::config::{self, Config};
use tg_warden::links::ChatRef;
use tg_warden::status::StatusMode;
use tg_warden::warden::Warden;

/// Flood-safe join, verify and channel-scan orchestration.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "warden",
    about = "tg-warden: flood-safe join, verify and channel-scan orchestration for chat userbots",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/warden.toml")]
    config: PathBuf,

    /// Status output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    status: Option<StatusArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Human,
    Json,
    Off,
}

impl From<StatusArg> for StatusMode {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Human => StatusMode::Human,
            StatusArg::Json => StatusMode::Json,
            StatusArg::Off => StatusMode::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize and classify references without touching any state.
    Normalize {
        #[arg(required = true)]
        raw: Vec<String>,
    },

    #[command(flatten)]
    State(StateCommand),
}

/// Commands that open the configured stores.
#[derive(Subcommand)]
enum StateCommand {
    /// Manage tracked channels.
    Channels {
        #[command(subcommand)]
        action: ChannelAction,
    },

    /// Manage search targets (links or free-text keywords).
    Targets {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Inspect or reset the resolution cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show join budget usage.
    Quota,

    /// Resolve and confirm every tracked channel.
    Verify {
        /// Chat fixture (JSON) standing in for the chat client.
        #[arg(long)]
        fixture: PathBuf,
    },

    /// Join invite links and public handles.
    Join {
        #[arg(long)]
        fixture: PathBuf,

        /// References, one per argument.
        #[arg(required = true)]
        refs: Vec<String>,
    },

    /// Scan recent history of every tracked channel for any search target.
    Check {
        #[arg(long)]
        fixture: PathBuf,

        /// Messages per channel (clamped to 10..=1000).
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ChannelAction {
    /// Track channels. New ones are auto-verified when `--fixture` is given.
    Add {
        #[arg(required = true)]
        refs: Vec<String>,

        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Stop tracking a channel.
    Remove { reference: String },
    /// Stop tracking every channel.
    Clear,
    /// Print tracked channels.
    Show,
}

#[derive(Subcommand)]
enum TargetAction {
    Add { item: String },
    Remove { item: String },
    Clear,
    Show,
}

#[derive(Subcommand)]
enum CacheAction {
    Show,
    Clear,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

fn chat_from(fixture: Option<&Path>) -> Result<Arc<dyn ChatApi>> {
    Ok(match fixture {
        Some(path) => Arc::new(InMemoryChat::from_fixture_file(path)?),
        None => Arc::new(InMemoryChat::new()),
    })
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling batch");
            token.cancel();
        }
    });
}

fn print_list(lines: &[String]) {
    if lines.is_empty() {
        println!("(empty)");
    }
    for line in lines {
        println!("{}", line);
    }
}

fn normalize(raw: &[String]) {
    for item in raw {
        match ChatRef::parse(item) {
            Some(r) => println!("{}\t{}", r.canonical(), r.classification()),
            None => println!("\t(empty)"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config: config_path,
        status,
        command,
    } = Cli::parse();
    init_tracing();

    let command = match command {
        Commands::Normalize { raw } => {
            normalize(&raw);
            return Ok(());
        }
        Commands::State(command) => command,
    };

    let mut cfg = load_or_default(&config_path)?;
    let status = status
        .map(StatusMode::from)
        .unwrap_or_else(StatusMode::default_for_tty)
        .sink();
    let cancel = CancellationToken::new();

    let fixture = match &command {
        StateCommand::Verify { fixture }
        | StateCommand::Join { fixture, .. }
        | StateCommand::Check { fixture, .. } => Some(fixture.as_path()),
        StateCommand::Channels {
            action: ChannelAction::Add { fixture, .. },
        } => {
            if fixture.is_none() {
                // Nothing to verify against.
                cfg.flood.max_autoverify_per_add = 0;
            }
            fixture.as_deref()
        }
        _ => None,
    };
    let chat = chat_from(fixture)?;
    let warden = Warden::open(&cfg, chat, status).await?;

    match command {
        StateCommand::Channels { action } => match action {
            ChannelAction::Add { refs, .. } => {
                cancel_on_ctrl_c(cancel.clone());
                let out = warden.add_channels(&refs.join("\n"), &cancel).await?;
                for r in &out.rejected {
                    println!("skipped (not a platform link): {}", r);
                }
                println!("added {} channel(s)", out.added.len());
                if let Some(verified) = &out.verified {
                    println!("{}", verified.render_verify());
                }
                if out.unverified > 0 {
                    println!("{} not verified; run `warden verify`", out.unverified);
                }
            }
            ChannelAction::Remove { reference } => match warden.remove_channel(&reference).await? {
                Some(canonical) => println!("removed {}", canonical),
                None => anyhow::bail!("channel not tracked: {}", reference),
            },
            ChannelAction::Clear => {
                println!("removed {} channel(s)", warden.clear_channels().await?);
            }
            ChannelAction::Show => print_list(&warden.channels().await?),
        },
        StateCommand::Targets { action } => match action {
            TargetAction::Add { item } => println!("added {}", warden.add_target(&item).await?),
            TargetAction::Remove { item } => {
                if !warden.remove_target(&item).await? {
                    anyhow::bail!("target not found: {}", item);
                }
                println!("removed {}", item.trim());
            }
            TargetAction::Clear => println!("removed {} target(s)", warden.clear_targets().await?),
            TargetAction::Show => print_list(&warden.targets().await?),
        },
        StateCommand::Cache { action } => match action {
            CacheAction::Show => {
                let entries = warden.cache_entries().await;
                if entries.is_empty() {
                    println!("(empty)");
                }
                for (key, entry) in entries {
                    println!("{}\t{}\t{}", key, entry.chat_id, entry.title);
                }
            }
            CacheAction::Clear => println!("removed {} cache entries", warden.clear_cache().await?),
        },
        StateCommand::Quota => {
            let q = warden.quota_status().await;
            println!("joins last hour: {}/{}", q.joins_last_hour, q.hourly_cap);
            println!("joins last day:  {}/{}", q.joins_last_day, q.daily_cap);
            println!("delay: {}s (baseline {}s)", q.delay_secs, q.baseline_secs);
        }
        StateCommand::Verify { .. } => {
            cancel_on_ctrl_c(cancel.clone());
            let out = warden.verify_all(&cancel).await?;
            println!("{}", out.render_verify());
        }
        StateCommand::Join { refs, .. } => {
            cancel_on_ctrl_c(cancel.clone());
            let out = warden.join(&refs.join("\n"), &cancel).await?;
            println!("{}", out.render_join());
        }
        StateCommand::Check { limit, .. } => {
            cancel_on_ctrl_c(cancel.clone());
            let report = warden.check(limit, &cancel).await?;
            println!("{}", report.render());
        }
    }

    Ok(())
}
