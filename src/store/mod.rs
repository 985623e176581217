//! Phone ⇄ chat mapping store
//!
//! `MappingStore` is the single persistence seam of the crate. Both the
//! registration flow and the relay gateway share one store handle; every
//! operation is a single atomic row operation and no extra locking is
//! layered on top.

use crate::context::CallContext;
use crate::error::Result;
use crate::ChatId;
use async_trait::async_trait;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryMappingStore;
pub use sqlite::SqliteMappingStore;

/// Key-value relation between a phone number and a chat identity
///
/// At most one chat per phone and one phone per chat. A write that
/// shares either key with an existing row replaces that row.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Resolve the chat registered for `phone`.
    ///
    /// Fails with `NotFound` on a miss and `StoreUnavailable` on I/O errors.
    async fn lookup_chat_by_phone(&self, ctx: &CallContext, phone: &str) -> Result<ChatId>;

    /// Resolve the phone registered from `chat`.
    async fn lookup_phone_by_chat(&self, ctx: &CallContext, chat: ChatId) -> Result<String>;

    /// Insert or overwrite the mapping `phone ⇄ chat`. Idempotent.
    async fn upsert_mapping(&self, ctx: &CallContext, phone: &str, chat: ChatId) -> Result<()>;

    /// Release the underlying handle. Later calls fail with `StoreUnavailable`.
    async fn close(&self) -> Result<()>;

    /// Backend name (e.g., "sqlite", "memory")
    fn name(&self) -> &str;
}

/// Canonicalize a phone number as shared by a contact card.
///
/// Strips whitespace, dashes and parentheses and ensures a leading `+`.
/// Returns `None` when nothing but separators remain.
pub fn canonical_phone(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '+' | '.'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("+{}", digits))
}

/// Mask all but the last four digits of a phone number for logs.
pub fn redact_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = phone.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}
