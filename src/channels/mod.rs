//! Chat platform connectors
//!
//! Provides the connector interface the registration flow and the relay
//! gateway talk to, and its Telegram implementation.

mod adapter;
mod message;
mod telegram;
mod webhook;

pub use adapter::{AdapterBase, AdapterStatus, BotIdentity, ChatConnector};
pub use message::{
    parse_text, BotCommand, ChatEvent, Contact, ContactKeyboard, EventKind, OutboundMessage,
};
pub use telegram::{parse_update, TelegramConnector};

/// Resolve a credential reference: try environment variable first, fall back to inline value.
///
/// This allows config files to use either:
/// - An env var name: `"BOT_TOKEN"` → reads `$BOT_TOKEN`
/// - An inline secret: `"123456:ABC..."` → used directly
pub(crate) fn resolve_credential(credential_ref: &str) -> crate::error::Result<String> {
    if let Ok(val) =
        std::env::var(credential_ref).or_else(|_| std::env::var(credential_ref.to_uppercase()))
    {
        return Ok(val);
    }
    if !credential_ref.is_empty() {
        return Ok(credential_ref.to_string());
    }
    Err(crate::error::Error::Config(format!(
        "Failed to resolve credential: {}",
        credential_ref
    )))
}
