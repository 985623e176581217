//! Chat connector trait and common types

use super::message::{BotCommand, ChatEvent, OutboundMessage};
use crate::context::CallContext;
use crate::error::Result;
use crate::ChatId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identity of the connected bot account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub username: String,
}

/// Trait for chat platform connectors
///
/// The lifecycle is `connect` (during initialization), then `run` on a
/// start task until the shutdown token fires or `stop` is called.
#[async_trait]
pub trait ChatConnector: Send + Sync {
    /// Get the connector name
    fn name(&self) -> &str;

    /// Verify credentials and prepare the update transport
    async fn connect(&self, ctx: &CallContext) -> Result<BotIdentity>;

    /// Advertise the command menu
    async fn set_commands(&self, ctx: &CallContext, commands: &[BotCommand]) -> Result<()>;

    /// Deliver inbound events to `events` until `shutdown` fires or `stop` is called
    ///
    /// Returns an error only for conditions the connector cannot recover
    /// from (e.g., the webhook listener failing to bind).
    async fn run(&self, events: mpsc::Sender<ChatEvent>, shutdown: CancellationToken)
        -> Result<()>;

    /// Stop the delivery loop
    async fn stop(&self) -> Result<()>;

    /// Send a message
    async fn send_message(&self, ctx: &CallContext, message: OutboundMessage) -> Result<()>;

    /// Send plain text to a chat
    async fn send_text(&self, ctx: &CallContext, chat_id: ChatId, text: &str) -> Result<()> {
        self.send_message(ctx, OutboundMessage::text(chat_id, text))
            .await
    }

    /// Check if the connector is connected
    fn is_connected(&self) -> bool;
}

/// Connector status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    /// Not started
    Stopped,
    /// Connected, delivery loop not running yet
    Connected,
    /// Delivering events
    Running,
    /// Stopping
    Stopping,
    /// Error state
    Error,
}

/// Base implementation helper for connectors
pub struct AdapterBase {
    name: String,
    status: AtomicU8,
}

impl AdapterBase {
    /// Create a new adapter base
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AtomicU8::new(AdapterStatus::Stopped as u8),
        }
    }

    /// Get the adapter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current status
    pub fn status(&self) -> AdapterStatus {
        match self.status.load(Ordering::SeqCst) {
            0 => AdapterStatus::Stopped,
            1 => AdapterStatus::Connected,
            2 => AdapterStatus::Running,
            3 => AdapterStatus::Stopping,
            _ => AdapterStatus::Error,
        }
    }

    /// Set status
    pub fn set_status(&self, status: AdapterStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    /// Connected or delivering events
    pub fn is_connected(&self) -> bool {
        matches!(
            self.status(),
            AdapterStatus::Connected | AdapterStatus::Running
        )
    }
}
