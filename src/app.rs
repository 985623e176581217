//! Application assembly
//!
//! [`App::initialize`] runs the startup steps in a fixed order (store, chat,
//! gateway). Each step builds its subsystem and registers its start and
//! stop delegates with the [`Lifecycle`]. The first failing step aborts the
//! rest; nothing already built is rolled back.

use crate::channels::{BotCommand, ChatConnector, TelegramConnector};
use crate::config::{Config, EnvType};
use crate::context::CallContext;
use crate::error::{Error, InitStep, Result};
use crate::gateway::{gateway_router, GatewayState};
use crate::lifecycle::Lifecycle;
use crate::logging::Logger;
use crate::registration::{dispatch_events, Registration};
use crate::store::{MappingStore, SqliteMappingStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

/// Budget for connecting to the chat platform during startup
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget for handling one chat event, replies included
const EVENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Inbound chat event buffer
const EVENT_BUFFER: usize = 256;

/// Builder for [`App`]
///
/// Store and connector default to SQLite and Telegram built from the
/// config; tests and `--memory-store` runs inject their own.
pub struct AppBuilder {
    config: Config,
    store: Option<Arc<dyn MappingStore>>,
    connector: Option<Arc<dyn ChatConnector>>,
    log: Logger,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            connector: None,
            log: Logger::new("phone-linker"),
        }
    }

    pub fn store(mut self, store: Arc<dyn MappingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn ChatConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn logger(mut self, log: Logger) -> Self {
        self.log = log;
        self
    }

    /// Build the app and the receiver of its fatal error channel.
    pub fn build(self) -> (App, mpsc::Receiver<Error>) {
        let (lifecycle, errors) = Lifecycle::new(self.log.named("lifecycle"));
        let app = App {
            config: self.config,
            store: self.store,
            connector: self.connector,
            lifecycle,
            gateway_addr: None,
            log: self.log,
        };
        (app, errors)
    }
}

/// Assembled relay process
pub struct App {
    config: Config,
    store: Option<Arc<dyn MappingStore>>,
    connector: Option<Arc<dyn ChatConnector>>,
    lifecycle: Lifecycle,
    gateway_addr: Option<SocketAddr>,
    log: Logger,
}

impl App {
    /// Run the startup steps in order, stopping at the first failure.
    pub async fn initialize(&mut self) -> Result<()> {
        let store = self
            .init_store()
            .map_err(|e| Error::initialization(InitStep::Store, e))?;
        self.init_chat(store.clone())
            .await
            .map_err(|e| Error::initialization(InitStep::Chat, e))?;
        self.init_gateway(store)
            .await
            .map_err(|e| Error::initialization(InitStep::Gateway, e))?;
        Ok(())
    }

    /// Start the connector loop and the gateway listener.
    pub fn run(&mut self) {
        self.lifecycle.run();
    }

    /// Cancel everything and wait for the stop delegates, at most `timeout`.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        self.lifecycle.shutdown(timeout).await
    }

    /// Address the gateway is bound to, once initialized.
    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway_addr
    }

    fn init_store(&mut self) -> Result<Arc<dyn MappingStore>> {
        let store: Arc<dyn MappingStore> = match &self.store {
            Some(store) => store.clone(),
            None => Arc::new(SqliteMappingStore::open(&self.config.db.path)?),
        };
        self.log.info(format_args!("Mapping store ready ({})", store.name()));

        let closing = store.clone();
        let log = self.log.named("store");
        self.lifecycle.add_stop_delegate("store", move |_| async move {
            if let Err(e) = closing.close().await {
                log.warn(format_args!("Failed to close store: {}", e));
            }
        });

        self.store = Some(store.clone());
        Ok(store)
    }

    async fn init_chat(&mut self, store: Arc<dyn MappingStore>) -> Result<()> {
        let connector: Arc<dyn ChatConnector> = match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(TelegramConnector::new(
                self.config.telegram.clone(),
                self.config.env == EnvType::Dev,
                self.log.named("telegram"),
            )?),
        };

        let ctx = CallContext::new(self.lifecycle.token()).with_timeout(CONNECT_TIMEOUT);
        let identity = connector.connect(&ctx).await?;
        self.log.info(format_args!(
            "Authorized on account {} ({})",
            identity.username,
            connector.name()
        ));

        let messages = Arc::new(self.config.messages.clone());
        connector
            .set_commands(
                &ctx,
                &[BotCommand::new("/phone", &messages.phone_command_label)],
            )
            .await?;

        let registration = Arc::new(Registration::new(
            store,
            messages,
            self.log.named("registration"),
        ));

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let running = connector.clone();
        let log = self.log.named("dispatch");
        self.lifecycle.add_start_delegate("chat", move |token| async move {
            let dispatcher = tokio::spawn(dispatch_events(
                registration,
                running.clone(),
                events_rx,
                token.clone(),
                EVENT_TIMEOUT,
                log.clone(),
            ));
            let result = running.run(events_tx, token).await;
            if let Err(e) = dispatcher.await {
                log.error(format_args!("Event dispatcher panicked: {}", e));
            }
            result
        });

        let stopping = connector.clone();
        let log = self.log.named("chat");
        self.lifecycle.add_stop_delegate("chat", move |_| async move {
            if let Err(e) = stopping.stop().await {
                log.warn(format_args!("Failed to stop connector: {}", e));
            }
        });

        self.connector = Some(connector);
        Ok(())
    }

    async fn init_gateway(&mut self, store: Arc<dyn MappingStore>) -> Result<()> {
        let connector = self
            .connector
            .clone()
            .ok_or_else(|| Error::Connector("chat connector not initialized".to_string()))?;

        let listener = TcpListener::bind(&self.config.server.address).await?;
        let addr = listener.local_addr()?;
        self.gateway_addr = Some(addr);

        let log = self.log.named("gateway");
        let state = GatewayState {
            store,
            connector,
            secret: Arc::from(self.config.server.secret.as_str()),
            request_timeout: Duration::from_secs(self.config.server.request_timeout_secs),
            shutdown: self.lifecycle.token(),
            log: log.clone(),
        };
        let router = gateway_router(state, &self.config.server.base_path);

        let (done_tx, mut done_rx) = watch::channel(false);
        self.lifecycle.add_start_delegate("gateway", move |token| async move {
            log.info(format_args!("Relay gateway listening on {}", addr));
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            let _ = done_tx.send(true);
            served?;
            log.info("Relay gateway stopped");
            Ok::<(), Error>(())
        });

        self.lifecycle.add_stop_delegate("gateway", move |deadline| async move {
            // Resolves early if the serving task was dropped without running
            let _ = tokio::time::timeout_at(deadline, done_rx.wait_for(|done| *done)).await;
        });

        Ok(())
    }
}
