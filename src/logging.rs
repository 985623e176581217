//! Logging setup and the injected [`Logger`] capability
//!
//! One `Logger` is built in `main` and handed to every component at
//! construction. Components derive a named child with [`Logger::named`] so
//! that each event carries the emitting component.

use std::fmt::Display;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for the process-wide subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins over `verbose` when set.
pub fn init(verbose: bool, format: LogFormat) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("phone_linker={},tower_http=info", level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}

/// Logging capability passed into components
#[derive(Debug, Clone)]
pub struct Logger {
    component: &'static str,
    span: Span,
}

impl Logger {
    /// Create the root logger.
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            span: tracing::info_span!("component", name = component),
        }
    }

    /// Derive a logger for a sub-component.
    pub fn named(&self, component: &'static str) -> Self {
        Self {
            component,
            span: tracing::info_span!(parent: &self.span, "component", name = component),
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn debug(&self, message: impl Display) {
        self.span.in_scope(|| tracing::debug!("{}", message));
    }

    pub fn info(&self, message: impl Display) {
        self.span.in_scope(|| tracing::info!("{}", message));
    }

    pub fn warn(&self, message: impl Display) {
        self.span.in_scope(|| tracing::warn!("{}", message));
    }

    pub fn error(&self, message: impl Display) {
        self.span.in_scope(|| tracing::error!("{}", message));
    }
}
