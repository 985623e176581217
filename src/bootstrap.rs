//! Process bootstrap shared by the CLI commands.
//!
//! Loads configuration through the standard priority chain and drives an
//! [`App`] from initialization to shutdown.

use crate::app::App;
use crate::config::Config;
use crate::error::Error;
use crate::logging::Logger;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Deadline for the stop delegates once a signal arrives
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Config files probed in the working directory, in order
const DEFAULT_CONFIG_FILES: &[&str] = &["phone-linker.hcl", "phone-linker.yaml", "phone-linker.yml"];

/// Load configuration using the standard priority chain.
///
/// Priority: explicit path > `./phone-linker.hcl` > `./phone-linker.yaml`
///           > `./phone-linker.yml` > default. Environment variables are
/// applied on top and the result is validated.
pub fn load_config(explicit_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    let path = match explicit_path {
        Some(path) => Some(path.clone()),
        None => DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists()),
    };

    let mut config = match &path {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };

    config
        .apply_env()
        .context("Invalid environment override")?;
    config.validate().context("Invalid configuration")?;
    Ok((config, path))
}

fn read_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Initialize `app`, run it, and shut it down on a signal or a fatal error.
///
/// A fatal error from a running subsystem or a shutdown that misses its
/// deadline is returned as an error so the process exits non-zero.
pub async fn serve(mut app: App, mut errors: mpsc::Receiver<Error>, log: &Logger) -> Result<()> {
    app.initialize().await.context("Startup failed")?;
    app.run();
    log.info("phone-linker started");

    let fatal = tokio::select! {
        _ = shutdown_signal() => {
            log.info("Received shutdown signal");
            None
        }
        Some(err) = errors.recv() => {
            log.error(format_args!("Fatal error: {}", err));
            Some(err)
        }
    };

    let stopped = app.shutdown(SHUTDOWN_TIMEOUT).await;
    if let Some(err) = fatal {
        return Err(anyhow::Error::new(err).context("Subsystem failed"));
    }
    stopped.context("Shutdown failed")?;
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
