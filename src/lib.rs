//! # phone-linker
//!
//! Relay HTTP messages to Telegram users addressed by phone number.
//!
//! ## Overview
//!
//! Users register by sharing their contact card with the bot; the relay
//! stores the phone ⇄ chat mapping. Backend services then `POST` a message
//! for a phone number and the relay delivers it to the matching chat.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use phone_linker::{AppBuilder, Config, Logger};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (config, _) = phone_linker::bootstrap::load_config(None)?;
//! let log = Logger::new("phone-linker");
//! let (app, errors) = AppBuilder::new(config).logger(log.clone()).build();
//! phone_linker::bootstrap::serve(app, errors, &log).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Lifecycle**: ordered initialization, start/stop delegates, bounded shutdown
//! - **Registration**: per-event state machine driven by the mapping store
//! - **Gateway**: authenticated `POST /v1/message` relay endpoint
//! - **MappingStore** trait: SQLite and in-memory implementations
//! - **ChatConnector** trait: Telegram Bot API (long polling or webhook)

pub mod app;
pub mod bootstrap;
pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod logging;
pub mod registration;
pub mod store;

/// Chat identity on the chat platform
pub type ChatId = i64;

// Re-export core types
pub use app::{App, AppBuilder};
pub use channels::{ChatConnector, ChatEvent, EventKind, OutboundMessage, TelegramConnector};
pub use config::Config;
pub use context::CallContext;
pub use error::{Error, InitStep, Result};
pub use lifecycle::Lifecycle;
pub use logging::Logger;
pub use registration::{Messages, Registration};
pub use store::{MappingStore, MemoryMappingStore, SqliteMappingStore};
