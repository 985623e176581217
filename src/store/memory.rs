//! In-memory mapping store
//!
//! Used by tests and by `--memory-store` development runs. Both lookup
//! directions live under one lock so an upsert is atomic across them.

use super::MappingStore;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::ChatId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    chat_by_phone: HashMap<String, ChatId>,
    phone_by_chat: HashMap<ChatId, String>,
}

/// Mapping store backed by two hash maps
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored mappings
    pub async fn len(&self) -> usize {
        self.tables.read().await.chat_by_phone.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("store is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn lookup_chat_by_phone(&self, ctx: &CallContext, phone: &str) -> Result<ChatId> {
        ctx.run(async {
            self.ensure_open()?;
            self.tables
                .read()
                .await
                .chat_by_phone
                .get(phone)
                .copied()
                .ok_or(Error::NotFound)
        })
        .await
    }

    async fn lookup_phone_by_chat(&self, ctx: &CallContext, chat: ChatId) -> Result<String> {
        ctx.run(async {
            self.ensure_open()?;
            self.tables
                .read()
                .await
                .phone_by_chat
                .get(&chat)
                .cloned()
                .ok_or(Error::NotFound)
        })
        .await
    }

    async fn upsert_mapping(&self, ctx: &CallContext, phone: &str, chat: ChatId) -> Result<()> {
        ctx.run(async {
            self.ensure_open()?;
            let mut tables = self.tables.write().await;

            // Drop rows that share either key before inserting
            if let Some(old_chat) = tables.chat_by_phone.remove(phone) {
                tables.phone_by_chat.remove(&old_chat);
            }
            if let Some(old_phone) = tables.phone_by_chat.remove(&chat) {
                tables.chat_by_phone.remove(&old_phone);
            }

            tables.chat_by_phone.insert(phone.to_string(), chat);
            tables.phone_by_chat.insert(chat, phone.to_string());
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
