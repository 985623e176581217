//! Phone registration flow
//!
//! Reacts to chat events for one session at a time. Nothing is kept
//! between events: the session state is recomputed from the mapping store
//! every time, so a failed lookup heals on the next event.
//!
//! | State        | Event              | Replies                                  |
//! |--------------|--------------------|------------------------------------------|
//! | Unregistered | `/start`           | welcome, contact prompt                  |
//! | Registered   | `/start`           | welcome                                  |
//! | any          | `/phone`           | contact prompt (one-time keyboard)       |
//! | any          | contact with phone | save mapping; confirmation or error      |
//! | any          | empty contact      | nothing                                  |
//! | any          | anything else      | unknown command                          |

mod dispatch;
mod messages;

pub use dispatch::dispatch_events;
pub use messages::Messages;

use crate::channels::{ChatEvent, Contact, ContactKeyboard, EventKind, OutboundMessage};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::store::{canonical_phone, redact_phone, MappingStore};
use crate::ChatId;
use std::sync::Arc;

/// Handler selected for an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Start,
    Phone,
    Contact,
    Unknown,
}

impl Route {
    /// Pick the handler for an event kind.
    pub fn of(kind: &EventKind) -> Self {
        match kind {
            EventKind::Command { name, .. } if name == "start" => Route::Start,
            EventKind::Command { name, .. } if name == "phone" => Route::Phone,
            EventKind::Contact(_) => Route::Contact,
            EventKind::Command { .. } | EventKind::Text(_) => Route::Unknown,
        }
    }
}

/// Registration state of a chat, derived from the mapping store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No mapping for the chat
    Unregistered,
    /// A mapping with a phone exists
    Registered,
    /// A mapping exists but its phone is empty
    Incomplete,
}

/// Registration state machine
pub struct Registration {
    store: Arc<dyn MappingStore>,
    messages: Arc<Messages>,
    log: Logger,
}

impl Registration {
    pub fn new(store: Arc<dyn MappingStore>, messages: Arc<Messages>, log: Logger) -> Self {
        Self {
            store,
            messages,
            log,
        }
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Compute the state of `chat`. `NotFound` counts as unregistered.
    pub async fn session_state(&self, ctx: &CallContext, chat: ChatId) -> Result<SessionState> {
        match self.store.lookup_phone_by_chat(ctx, chat).await {
            Ok(phone) if phone.is_empty() => Ok(SessionState::Incomplete),
            Ok(_) => Ok(SessionState::Registered),
            Err(Error::NotFound) => Ok(SessionState::Unregistered),
            Err(e) => Err(e),
        }
    }

    /// Handle one event and return the replies to send, in order.
    pub async fn handle(&self, ctx: &CallContext, event: &ChatEvent) -> Vec<OutboundMessage> {
        let chat = event.chat_id;
        match (Route::of(&event.kind), &event.kind) {
            (Route::Start, _) => self.on_start(ctx, chat).await,
            (Route::Phone, _) => vec![self.contact_prompt(chat, &self.messages.request_contact, true)],
            (Route::Contact, EventKind::Contact(contact)) => {
                self.on_contact(ctx, chat, contact.as_ref()).await
            }
            _ => vec![OutboundMessage::text(chat, &self.messages.unknown_command)],
        }
    }

    async fn on_start(&self, ctx: &CallContext, chat: ChatId) -> Vec<OutboundMessage> {
        match self.session_state(ctx, chat).await {
            Ok(SessionState::Unregistered) => vec![
                OutboundMessage::text(chat, &self.messages.welcome),
                self.contact_prompt(chat, &self.messages.request_contact_first, false),
            ],
            Ok(SessionState::Registered) => {
                vec![OutboundMessage::text(chat, &self.messages.welcome)]
            }
            Ok(SessionState::Incomplete) => Vec::new(),
            Err(e) => {
                self.log
                    .error(format_args!("Failed to load registration of chat {}: {}", chat, e));
                vec![OutboundMessage::text(chat, &self.messages.save_error)]
            }
        }
    }

    async fn on_contact(
        &self,
        ctx: &CallContext,
        chat: ChatId,
        contact: Option<&Contact>,
    ) -> Vec<OutboundMessage> {
        let Some(contact) = contact.filter(|c| !c.phone_number.trim().is_empty()) else {
            self.log
                .debug(format_args!("Ignoring contact without phone from chat {}", chat));
            return Vec::new();
        };
        let Some(phone) = canonical_phone(&contact.phone_number) else {
            self.log.warn(format_args!(
                "Rejected malformed phone {} from chat {}",
                redact_phone(&contact.phone_number),
                chat
            ));
            return vec![OutboundMessage::text(chat, &self.messages.save_error)];
        };

        match self.store.upsert_mapping(ctx, &phone, chat).await {
            Ok(()) => {
                self.log.info(format_args!(
                    "Registered phone {} for chat {}",
                    redact_phone(&phone),
                    chat
                ));
                vec![OutboundMessage::text(chat, &self.messages.phone_saved)]
            }
            Err(e) => {
                self.log
                    .error(format_args!("Failed to save phone for chat {}: {}", chat, e));
                vec![OutboundMessage::text(chat, &self.messages.save_error)]
            }
        }
    }

    fn contact_prompt(&self, chat: ChatId, text: &str, one_time: bool) -> OutboundMessage {
        OutboundMessage::text(chat, text).with_keyboard(ContactKeyboard {
            button: self.messages.share_phone_button.clone(),
            one_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMappingStore;
    use async_trait::async_trait;

    /// Store whose every call fails with an I/O-style error
    struct BrokenStore;

    #[async_trait]
    impl MappingStore for BrokenStore {
        async fn lookup_chat_by_phone(&self, _ctx: &CallContext, _phone: &str) -> Result<ChatId> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn lookup_phone_by_chat(&self, _ctx: &CallContext, _chat: ChatId) -> Result<String> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn upsert_mapping(&self, _ctx: &CallContext, _phone: &str, _chat: ChatId) -> Result<()> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    fn machine(store: Arc<dyn MappingStore>) -> Registration {
        Registration::new(store, Arc::new(Messages::default()), Logger::new("test"))
    }

    fn ctx() -> CallContext {
        CallContext::background()
    }

    fn contact(phone: &str) -> Option<Contact> {
        Some(Contact {
            phone_number: phone.to_string(),
            user_id: None,
        })
    }

    #[test]
    fn test_route_table() {
        let cmd = |name: &str| EventKind::Command {
            name: name.into(),
            args: String::new(),
        };
        assert_eq!(Route::of(&cmd("start")), Route::Start);
        assert_eq!(Route::of(&cmd("phone")), Route::Phone);
        assert_eq!(Route::of(&cmd("help")), Route::Unknown);
        assert_eq!(Route::of(&EventKind::Contact(None)), Route::Contact);
        assert_eq!(Route::of(&EventKind::Text("hi".into())), Route::Unknown);
    }

    #[tokio::test]
    async fn test_start_unregistered_sends_welcome_and_prompt() {
        let reg = machine(Arc::new(MemoryMappingStore::new()));
        let replies = reg.handle(&ctx(), &ChatEvent::from_text(42, "/start")).await;

        let messages = Messages::default();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], OutboundMessage::text(42, &messages.welcome));
        assert_eq!(replies[1].text, messages.request_contact_first);
        let keyboard = replies[1].keyboard.as_ref().unwrap();
        assert_eq!(keyboard.button, messages.share_phone_button);
        assert!(!keyboard.one_time);
    }

    #[tokio::test]
    async fn test_start_registered_sends_welcome_only() {
        let store = Arc::new(MemoryMappingStore::new());
        store.upsert_mapping(&ctx(), "+15551230000", 42).await.unwrap();
        let reg = machine(store);

        let replies = reg.handle(&ctx(), &ChatEvent::from_text(42, "/start")).await;
        assert_eq!(
            replies,
            vec![OutboundMessage::text(42, &Messages::default().welcome)]
        );
    }

    #[tokio::test]
    async fn test_start_with_broken_store_replies_error() {
        let reg = machine(Arc::new(BrokenStore));
        let replies = reg.handle(&ctx(), &ChatEvent::from_text(42, "/start")).await;
        assert_eq!(
            replies,
            vec![OutboundMessage::text(42, &Messages::default().save_error)]
        );
    }

    #[tokio::test]
    async fn test_phone_prompts_in_any_state() {
        let store = Arc::new(MemoryMappingStore::new());
        let reg = machine(store.clone());

        let before = reg.handle(&ctx(), &ChatEvent::from_text(42, "/phone")).await;
        store.upsert_mapping(&ctx(), "+1555", 42).await.unwrap();
        let after = reg.handle(&ctx(), &ChatEvent::from_text(42, "/phone")).await;

        assert_eq!(before, after);
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].text, Messages::default().request_contact);
        assert!(before[0].keyboard.as_ref().unwrap().one_time);
    }

    #[tokio::test]
    async fn test_contact_registers_phone() {
        let store = Arc::new(MemoryMappingStore::new());
        let reg = machine(store.clone());

        let replies = reg
            .handle(&ctx(), &ChatEvent::contact(42, contact("15551230000")))
            .await;

        assert_eq!(
            replies,
            vec![OutboundMessage::text(42, &Messages::default().phone_saved)]
        );
        assert_eq!(
            store.lookup_chat_by_phone(&ctx(), "+15551230000").await.unwrap(),
            42
        );
        assert_eq!(
            reg.session_state(&ctx(), 42).await.unwrap(),
            SessionState::Registered
        );
    }

    #[tokio::test]
    async fn test_contact_without_payload_is_noop() {
        let store = Arc::new(MemoryMappingStore::new());
        let reg = machine(store.clone());

        assert!(reg.handle(&ctx(), &ChatEvent::contact(42, None)).await.is_empty());
        assert!(reg
            .handle(&ctx(), &ChatEvent::contact(42, contact("  ")))
            .await
            .is_empty());
        assert!(store.is_empty().await);
        assert_eq!(
            reg.session_state(&ctx(), 42).await.unwrap(),
            SessionState::Unregistered
        );
    }

    #[tokio::test]
    async fn test_contact_with_malformed_phone_replies_error() {
        let store = Arc::new(MemoryMappingStore::new());
        let reg = machine(store.clone());

        let replies = reg
            .handle(&ctx(), &ChatEvent::contact(5, contact("+44 7700 900123 ext")))
            .await;

        assert_eq!(
            replies,
            vec![OutboundMessage::text(5, &Messages::default().save_error)]
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_contact_with_broken_store_replies_error() {
        let reg = machine(Arc::new(BrokenStore));
        let replies = reg
            .handle(&ctx(), &ChatEvent::contact(42, contact("+15551230000")))
            .await;
        assert_eq!(
            replies,
            vec![OutboundMessage::text(42, &Messages::default().save_error)]
        );
    }

    #[tokio::test]
    async fn test_free_text_is_unknown() {
        let reg = machine(Arc::new(MemoryMappingStore::new()));
        for text in ["hello", "/help", "/start_over"] {
            let replies = reg.handle(&ctx(), &ChatEvent::from_text(1, text)).await;
            assert_eq!(
                replies,
                vec![OutboundMessage::text(1, &Messages::default().unknown_command)]
            );
        }
    }

    #[tokio::test]
    async fn test_reregistration_moves_phone() {
        let store = Arc::new(MemoryMappingStore::new());
        let reg = machine(store.clone());

        reg.handle(&ctx(), &ChatEvent::contact(1, contact("+1555"))).await;
        reg.handle(&ctx(), &ChatEvent::contact(2, contact("+1555"))).await;

        assert_eq!(store.lookup_chat_by_phone(&ctx(), "+1555").await.unwrap(), 2);
        assert_eq!(
            reg.session_state(&ctx(), 1).await.unwrap(),
            SessionState::Unregistered
        );
    }
}
