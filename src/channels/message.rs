//! Chat events and outbound messages

use crate::ChatId;
use serde::{Deserialize, Serialize};

/// Contact card shared inside a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Phone number as sent by the client
    pub phone_number: String,
    /// Platform user the contact belongs to, if known
    pub user_id: Option<i64>,
}

/// Discriminated content of an inbound chat event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `/name args`, bot suffix (`@my_bot`) already stripped
    Command { name: String, args: String },
    /// Contact-share event; `None` when the payload was missing or empty
    Contact(Option<Contact>),
    /// Any other text
    Text(String),
}

/// Inbound notification for a single chat session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub chat_id: ChatId,
    pub kind: EventKind,
}

impl ChatEvent {
    pub fn new(chat_id: ChatId, kind: EventKind) -> Self {
        Self { chat_id, kind }
    }

    /// Build a text or command event from raw message text.
    pub fn from_text(chat_id: ChatId, text: &str) -> Self {
        Self::new(chat_id, parse_text(text))
    }

    pub fn contact(chat_id: ChatId, contact: Option<Contact>) -> Self {
        Self::new(chat_id, EventKind::Contact(contact))
    }
}

/// Classify raw message text as a command or free text.
pub fn parse_text(text: &str) -> EventKind {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return EventKind::Text(text.to_string());
    };

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return EventKind::Text(text.to_string());
    }

    EventKind::Command {
        name: name.to_string(),
        args: args.to_string(),
    }
}

/// Reply keyboard with a single "share contact" button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactKeyboard {
    /// Button label
    pub button: String,
    /// Hide the keyboard after one use
    pub one_time: bool,
}

/// Message to deliver to a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub keyboard: Option<ContactKeyboard>,
}

impl OutboundMessage {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: ContactKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Entry of the bot command menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCommand {
    /// Command without the leading slash
    pub command: String,
    /// Human label shown in the menu
    pub description: String,
}

impl BotCommand {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into().trim_start_matches('/').to_string(),
            description: description.into(),
        }
    }
}
