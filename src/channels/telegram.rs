//! Telegram connector
//!
//! Implements the Telegram Bot API for sending messages and receiving
//! updates. Updates arrive by long polling or through a webhook listener,
//! optionally served with a self-managed TLS certificate.
//!
//! API Reference: https://core.telegram.org/bots/api

use super::adapter::{AdapterBase, AdapterStatus, BotIdentity, ChatConnector};
use super::message::{BotCommand, ChatEvent, Contact, OutboundMessage};
use super::webhook;
use crate::config::{TelegramConfig, UpdaterKind};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Delay before retrying a failed `getUpdates`
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Extra time the HTTP client waits on top of the long-poll timeout
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Telegram connector
pub struct TelegramConnector {
    config: TelegramConfig,
    /// Log raw updates
    verbose: bool,
    base: AdapterBase,
    /// HTTP client for Telegram Bot API
    client: reqwest::Client,
    /// Resolved bot token (from env var or inline)
    bot_token: RwLock<Option<String>>,
    /// Fired by `stop`
    stop_token: CancellationToken,
    log: Logger,
}

impl TelegramConnector {
    /// Create a new Telegram connector
    pub fn new(config: TelegramConfig, verbose: bool, log: Logger) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            config,
            verbose,
            base: AdapterBase::new("telegram"),
            client,
            bot_token: RwLock::new(None),
            stop_token: CancellationToken::new(),
            log,
        })
    }

    /// Resolve the bot token from env var or inline value
    fn resolve_token(&self) -> Result<String> {
        super::resolve_credential(&self.config.token)
    }

    /// Build API URL for a method
    fn api_url(api_base: &str, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", api_base.trim_end_matches('/'), token, method)
    }

    async fn method_url(&self, method: &str) -> Result<String> {
        let token = self.bot_token.read().await;
        let token = token
            .as_ref()
            .ok_or_else(|| Error::Connector("Telegram bot token not resolved".to_string()))?;
        Ok(Self::api_url(&self.config.api_base, token, method))
    }

    /// Call Telegram Bot API and return the result
    async fn api_call(
        &self,
        ctx: &CallContext,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self.method_url(method).await?;
        ctx.run(async {
            let resp = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| Error::Connector(format!("Telegram API request failed: {}", e)))?;
            Self::read_result(resp).await
        })
        .await
    }

    async fn read_result(resp: reqwest::Response) -> Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Connector(format!("Failed to parse Telegram response: {}", e)))?;

        if !status.is_success() || body.get("ok") != Some(&serde_json::Value::Bool(true)) {
            let description = body["description"].as_str().unwrap_or("unknown error");
            return Err(Error::Connector(format!(
                "Telegram API error ({}): {}",
                status, description
            )));
        }

        Ok(body["result"].clone())
    }

    /// Register the webhook, uploading the certificate in custom-cert mode
    async fn register_webhook(&self, ctx: &CallContext) -> Result<()> {
        match self.config.updater_kind {
            UpdaterKind::LongPolling => {
                // getUpdates is refused while a webhook is set
                self.api_call(ctx, "deleteWebhook", &serde_json::json!({}))
                    .await?;
            }
            UpdaterKind::Webhook => {
                self.api_call(
                    ctx,
                    "setWebhook",
                    &serde_json::json!({
                        "url": self.config.webhook_url,
                        "allowed_updates": ["message"],
                    }),
                )
                .await?;
            }
            UpdaterKind::WebhookCustomCert => {
                let cert = tokio::fs::read(&self.config.webhook_tls_cert).await?;
                let url = self.method_url("setWebhook").await?;
                let form = reqwest::multipart::Form::new()
                    .text("url", self.config.webhook_url.clone())
                    .text("allowed_updates", r#"["message"]"#)
                    .part(
                        "certificate",
                        reqwest::multipart::Part::bytes(cert).file_name("certificate.pem"),
                    );
                ctx.run(async {
                    let resp =
                        self.client.post(&url).multipart(form).send().await.map_err(|e| {
                            Error::Connector(format!("Telegram API request failed: {}", e))
                        })?;
                    Self::read_result(resp).await
                })
                .await?;
            }
        }
        Ok(())
    }

    /// A token that fires when either the process shuts down or `stop` is called.
    fn halt_token(&self, shutdown: &CancellationToken) -> CancellationToken {
        let halt = CancellationToken::new();
        let (merged, process, stop) = (halt.clone(), shutdown.clone(), self.stop_token.clone());
        tokio::spawn(async move {
            tokio::select! {
                _ = process.cancelled() => {}
                _ = stop.cancelled() => {}
                _ = merged.cancelled() => {}
            }
            merged.cancel();
        });
        halt
    }

    /// Long polling loop for receiving updates
    async fn poll_loop(
        &self,
        events: mpsc::Sender<ChatEvent>,
        halt: CancellationToken,
    ) -> Result<()> {
        let url = self.method_url("getUpdates").await?;
        let poll_timeout = self.config.poll_timeout_secs;
        let mut offset: i64 = 0;

        self.log.info("Telegram long polling started");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": poll_timeout,
                "allowed_updates": ["message"]
            });
            let request = self
                .client
                .post(&url)
                .json(&body)
                .timeout(Duration::from_secs(poll_timeout) + POLL_TIMEOUT_MARGIN)
                .send();

            let result = tokio::select! {
                resp = request => resp,
                _ = halt.cancelled() => break,
            };

            let failure = match result {
                Ok(resp) => match Self::read_result(resp).await {
                    Ok(updates) => {
                        for update in updates.as_array().into_iter().flatten() {
                            if let Some(update_id) = update["update_id"].as_i64() {
                                offset = update_id + 1;
                            }
                            if self.verbose {
                                self.log.debug(format_args!("Telegram update: {}", update));
                            }
                            if let Some(event) = parse_update(update) {
                                if events.send(event).await.is_err() {
                                    self.log.warn("Event channel closed, stopping poll loop");
                                    return Ok(());
                                }
                            }
                        }
                        None
                    }
                    Err(e) => Some(e.to_string()),
                },
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = failure {
                self.log.warn(format_args!(
                    "Telegram poll error: {}, retrying in {}s",
                    reason,
                    POLL_RETRY_DELAY.as_secs()
                ));
                tokio::select! {
                    _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    _ = halt.cancelled() => break,
                }
            }
        }

        self.log.info("Telegram long polling stopped");
        Ok(())
    }

    /// Build the `reply_markup` for a contact-request keyboard
    fn reply_markup(message: &OutboundMessage) -> Option<serde_json::Value> {
        message.keyboard.as_ref().map(|keyboard| {
            serde_json::json!({
                "keyboard": [[{ "text": keyboard.button, "request_contact": true }]],
                "resize_keyboard": true,
                "one_time_keyboard": keyboard.one_time,
            })
        })
    }
}

/// Parse a Telegram Update into a ChatEvent
///
/// Returns `None` for updates that carry neither text nor a contact
/// (stickers, photos, service messages).
pub fn parse_update(update: &serde_json::Value) -> Option<ChatEvent> {
    let message = update.get("message")?;
    let chat_id = message["chat"]["id"].as_i64()?;

    if let Some(contact) = message.get("contact") {
        let contact = contact["phone_number"]
            .as_str()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .map(|phone| Contact {
                phone_number: phone.to_string(),
                user_id: contact["user_id"].as_i64(),
            });
        return Some(ChatEvent::contact(chat_id, contact));
    }

    let text = message.get("text")?.as_str()?;
    Some(ChatEvent::from_text(chat_id, text))
}

#[async_trait]
impl ChatConnector for TelegramConnector {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn connect(&self, ctx: &CallContext) -> Result<BotIdentity> {
        let token = self.resolve_token()?;
        *self.bot_token.write().await = Some(token);

        // Verify token with getMe
        let me = self
            .api_call(ctx, "getMe", &serde_json::json!({}))
            .await
            .map_err(|e| Error::Connector(format!("Failed to verify Telegram bot token: {}", e)))?;

        self.register_webhook(ctx).await?;
        self.base.set_status(AdapterStatus::Connected);

        Ok(BotIdentity {
            id: me["id"].as_i64().unwrap_or_default(),
            username: me["username"].as_str().unwrap_or("unknown").to_string(),
        })
    }

    async fn set_commands(&self, ctx: &CallContext, commands: &[BotCommand]) -> Result<()> {
        self.api_call(
            ctx,
            "setMyCommands",
            &serde_json::json!({ "commands": commands }),
        )
        .await?;
        Ok(())
    }

    async fn run(
        &self,
        events: mpsc::Sender<ChatEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        if !self.base.is_connected() {
            return Err(Error::Connector("Telegram connector not connected".to_string()));
        }
        let halt = self.halt_token(&shutdown);
        let _guard = halt.clone().drop_guard();
        self.base.set_status(AdapterStatus::Running);

        let result = match self.config.updater_kind {
            UpdaterKind::LongPolling => self.poll_loop(events, halt).await,
            UpdaterKind::Webhook => {
                let router = webhook::webhook_router(events, self.verbose, self.log.clone());
                webhook::serve_plain(&self.config.webhook_listen, router, halt, &self.log).await
            }
            UpdaterKind::WebhookCustomCert => {
                let router = webhook::webhook_router(events, self.verbose, self.log.clone());
                let tls = webhook::load_tls_config(
                    &self.config.webhook_tls_cert,
                    &self.config.webhook_tls_key,
                )?;
                webhook::serve_tls(&self.config.webhook_listen, tls, router, halt, &self.log)
                    .await
            }
        };

        self.base.set_status(match result {
            Ok(()) => AdapterStatus::Stopped,
            Err(_) => AdapterStatus::Error,
        });
        result
    }

    async fn stop(&self) -> Result<()> {
        self.base.set_status(AdapterStatus::Stopping);
        self.stop_token.cancel();
        self.log.info("Telegram connector stopped");
        Ok(())
    }

    async fn send_message(&self, ctx: &CallContext, message: OutboundMessage) -> Result<()> {
        if !self.base.is_connected() {
            return Err(Error::Connector("Telegram connector not running".to_string()));
        }

        let mut body = serde_json::json!({
            "chat_id": message.chat_id,
            "text": message.text,
        });
        if let Some(markup) = Self::reply_markup(&message) {
            body["reply_markup"] = markup;
        }

        self.api_call(ctx, "sendMessage", &body).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::message::{ContactKeyboard, EventKind};

    fn create_test_connector() -> TelegramConnector {
        TelegramConnector::new(
            TelegramConfig {
                token: "test_token".to_string(),
                ..TelegramConfig::default()
            },
            false,
            Logger::new("test"),
        )
        .unwrap()
    }

    #[test]
    fn test_connector_creation() {
        let connector = create_test_connector();
        assert_eq!(connector.name(), "telegram");
        assert!(!connector.is_connected());
    }

    #[test]
    fn test_api_url() {
        let url = TelegramConnector::api_url("https://api.telegram.org/", "123:ABC", "sendMessage");
        assert_eq!(url, "https://api.telegram.org/bot123:ABC/sendMessage");
    }

    #[test]
    fn test_reply_markup() {
        let plain = OutboundMessage::text(1, "hi");
        assert!(TelegramConnector::reply_markup(&plain).is_none());

        let prompt = OutboundMessage::text(1, "share").with_keyboard(ContactKeyboard {
            button: "Send phone".into(),
            one_time: true,
        });
        let markup = TelegramConnector::reply_markup(&prompt).unwrap();
        assert_eq!(markup["keyboard"][0][0]["text"], "Send phone");
        assert_eq!(markup["keyboard"][0][0]["request_contact"], true);
        assert_eq!(markup["one_time_keyboard"], true);
        assert_eq!(markup["resize_keyboard"], true);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let connector = create_test_connector();
        let err = connector
            .send_text(&CallContext::background(), 1, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connector(_)));
    }

    #[tokio::test]
    async fn test_run_requires_connection() {
        let connector = create_test_connector();
        let (tx, _rx) = mpsc::channel(1);
        let err = connector.run(tx, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Connector(_)));
    }

    #[test]
    fn test_parse_update_command() {
        let update = serde_json::json!({
            "update_id": 100,
            "message": {
                "message_id": 42,
                "from": { "id": 12345, "first_name": "John" },
                "chat": { "id": 12345, "type": "private" },
                "text": "/start"
            }
        });

        let event = parse_update(&update).unwrap();
        assert_eq!(event.chat_id, 12345);
        assert_eq!(
            event.kind,
            EventKind::Command {
                name: "start".into(),
                args: String::new()
            }
        );
    }

    #[test]
    fn test_parse_update_text() {
        let update = serde_json::json!({
            "update_id": 101,
            "message": {
                "message_id": 43,
                "chat": { "id": 7, "type": "private" },
                "text": "what is this"
            }
        });

        let event = parse_update(&update).unwrap();
        assert_eq!(event.kind, EventKind::Text("what is this".into()));
    }

    #[test]
    fn test_parse_update_contact() {
        let update = serde_json::json!({
            "update_id": 102,
            "message": {
                "message_id": 44,
                "chat": { "id": 42, "type": "private" },
                "contact": {
                    "phone_number": "15551230000",
                    "first_name": "Jane",
                    "user_id": 42
                }
            }
        });

        let event = parse_update(&update).unwrap();
        assert_eq!(event.chat_id, 42);
        assert_eq!(
            event.kind,
            EventKind::Contact(Some(Contact {
                phone_number: "15551230000".into(),
                user_id: Some(42),
            }))
        );
    }

    #[test]
    fn test_parse_update_contact_without_phone() {
        let update = serde_json::json!({
            "update_id": 103,
            "message": {
                "message_id": 45,
                "chat": { "id": 42, "type": "private" },
                "contact": { "phone_number": "  ", "first_name": "Jane" }
            }
        });

        let event = parse_update(&update).unwrap();
        assert_eq!(event.kind, EventKind::Contact(None));
    }

    #[test]
    fn test_parse_update_ignores_other_content() {
        let sticker = serde_json::json!({
            "update_id": 104,
            "message": {
                "message_id": 46,
                "chat": { "id": 1, "type": "private" },
                "sticker": { "file_id": "abc" }
            }
        });
        assert!(parse_update(&sticker).is_none());

        let callback = serde_json::json!({ "update_id": 105, "callback_query": {} });
        assert!(parse_update(&callback).is_none());
    }
}
