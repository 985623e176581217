//! phone-linker configuration management
//!
//! Configuration is read from an HCL file (or YAML, detected by extension)
//! and then overridden by environment variables, so container deployments
//! can run without any file at all.

use crate::error::{Error, Result};
use crate::registration::Messages;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Relay gateway settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Telegram connector settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Mapping store settings
    #[serde(default)]
    pub db: DatabaseConfig,

    /// Deployment flavour
    #[serde(default)]
    pub env: EnvType,

    /// Reply texts shown to chat users
    #[serde(default)]
    pub messages: Messages,
}

/// Relay gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (`host:port`)
    pub address: String,

    /// Shared secret expected in the `Authorization` header
    pub secret: String,

    /// Prefix for all routes, e.g. `/relay`
    pub base_path: String,

    /// Upper bound for a single relay request
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            secret: String::new(),
            base_path: String::new(),
            request_timeout_secs: 10,
        }
    }
}

/// How the connector receives updates from Telegram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdaterKind {
    /// `getUpdates` long polling
    #[default]
    LongPolling,
    /// Webhook behind a TLS-terminating proxy
    Webhook,
    /// Webhook served directly with a self-managed certificate
    #[serde(rename = "webhook_with_custom_cert")]
    WebhookCustomCert,
}

impl std::str::FromStr for UpdaterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "long_polling" => Ok(UpdaterKind::LongPolling),
            "webhook" => Ok(UpdaterKind::Webhook),
            "webhook_with_custom_cert" => Ok(UpdaterKind::WebhookCustomCert),
            other => Err(Error::Config(format!("Unknown updater kind: {}", other))),
        }
    }
}

/// Telegram connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token, or the name of an env var holding it
    pub token: String,

    /// Update transport
    #[serde(alias = "updaterKind")]
    pub updater_kind: UpdaterKind,

    /// Public URL registered with `setWebhook`
    pub webhook_url: String,

    /// Local address the webhook listener binds
    pub webhook_listen: String,

    /// PEM private key for the custom-certificate webhook
    pub webhook_tls_key: String,

    /// PEM certificate for the custom-certificate webhook
    pub webhook_tls_cert: String,

    /// Bot API base URL (override for a self-hosted Bot API server)
    pub api_base: String,

    /// Timeout for a single Bot API call
    pub timeout_secs: u64,

    /// `getUpdates` long-poll timeout
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            updater_kind: UpdaterKind::default(),
            webhook_url: String::new(),
            webhook_listen: String::new(),
            webhook_tls_key: String::new(),
            webhook_tls_cert: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            timeout_secs: 10,
            poll_timeout_secs: 30,
        }
    }
}

/// Mapping store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("phone-linker.db"),
        }
    }
}

/// Deployment flavour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvType {
    #[default]
    Stable,
    Dev,
}

impl Config {
    /// Parse configuration from an HCL string.
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))
    }

    /// Read a config file, choosing the parser by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_hcl(&content),
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (env-style keys).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("SERVER_ADDRESS") {
            self.server.address = v;
        }
        if let Some(v) = get("SERVER_PORT") {
            let port: u16 = v
                .parse()
                .map_err(|_| Error::Config(format!("Invalid SERVER_PORT: {}", v)))?;
            self.server.address = with_port(&self.server.address, port);
        }
        if let Some(v) = get("SERVER_SECRET") {
            self.server.secret = v;
        }
        if let Some(v) = get("SERVER_BASE_PATH") {
            self.server.base_path = v;
        }
        if let Some(v) = get("TELEGRAM_TOKEN") {
            self.telegram.token = v;
        }
        if let Some(v) = get("TELEGRAM_UPDATER_KIND") {
            self.telegram.updater_kind = v.parse()?;
        }
        if let Some(v) = get("TELEGRAM_WEBHOOK_URL") {
            self.telegram.webhook_url = v;
        }
        if let Some(v) = get("TELEGRAM_WEBHOOK_LISTEN") {
            self.telegram.webhook_listen = v;
        }
        if let Some(v) = get("TELEGRAM_WEBHOOK_TLS_KEY") {
            self.telegram.webhook_tls_key = v;
        }
        if let Some(v) = get("TELEGRAM_WEBHOOK_TLS_CERT") {
            self.telegram.webhook_tls_cert = v;
        }
        if let Some(v) = get("DB_PATH") {
            self.db.path = PathBuf::from(v);
        }
        if let Some(v) = get("ENV") {
            self.env = match v.trim() {
                "dev" => EnvType::Dev,
                "stable" => EnvType::Stable,
                other => return Err(Error::Config(format!("Unknown env type: {}", other))),
            };
        }
        Ok(())
    }

    /// Check that everything needed to start is present.
    pub fn validate(&self) -> Result<()> {
        if self.server.secret.is_empty() {
            return Err(Error::Config("server.secret is required".to_string()));
        }
        if self.telegram.token.is_empty() {
            return Err(Error::Config("telegram.token is required".to_string()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(Error::Config(
                "server.request_timeout_secs must be positive".to_string(),
            ));
        }
        let base = &self.server.base_path;
        if !base.is_empty() && (!base.starts_with('/') || base == "/") {
            return Err(Error::Config(format!(
                "server.base_path must start with '/' and not be '/': {}",
                base
            )));
        }

        match self.telegram.updater_kind {
            UpdaterKind::LongPolling => {}
            UpdaterKind::Webhook | UpdaterKind::WebhookCustomCert => {
                if self.telegram.webhook_url.is_empty() || self.telegram.webhook_listen.is_empty()
                {
                    return Err(Error::Config(
                        "telegram.webhook_url and telegram.webhook_listen are required for webhook updaters"
                            .to_string(),
                    ));
                }
            }
        }

        if self.telegram.updater_kind == UpdaterKind::WebhookCustomCert
            && (self.telegram.webhook_tls_key.is_empty()
                || self.telegram.webhook_tls_cert.is_empty())
        {
            return Err(Error::Config(
                "telegram.webhook_tls_key and telegram.webhook_tls_cert are required for webhook_with_custom_cert"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Copy of the config with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.server.secret.is_empty() {
            copy.server.secret = "********".to_string();
        }
        if !copy.telegram.token.is_empty() {
            copy.telegram.token = "********".to_string();
        }
        copy
    }
}

/// Replace (or append) the port of a `host:port` address.
fn with_port(address: &str, port: u16) -> String {
    let host = match address.rsplit_once(':') {
        Some((host, _)) => host,
        None => address,
    };
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    format!("{}:{}", host, port)
}
