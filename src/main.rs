//! phone-linker - Telegram relay addressed by phone number
//!
//! Registers Telegram users by their shared contact and relays messages
//! posted over HTTP to the chat registered for a phone number.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phone_linker::config::EnvType;
use phone_linker::logging::{self, LogFormat};
use phone_linker::{AppBuilder, Logger, MemoryMappingStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "phone-linker")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Relay HTTP messages to Telegram chats resolved by phone number")]
struct Cli {
    /// Configuration file path (.hcl or .yaml)
    #[arg(short, long, env = "PHONE_LINKER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Serve {
        /// Keep mappings in memory instead of SQLite
        #[arg(long)]
        memory_store: bool,
    },

    /// Validate the configuration and print it with secrets masked
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = phone_linker::bootstrap::load_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Commands::Serve {
        memory_store: false,
    }) {
        Commands::CheckConfig => {
            let rendered = serde_json::to_string_pretty(&config.redacted())
                .context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
        Commands::Serve { memory_store } => {
            let format = match config.env {
                EnvType::Stable => LogFormat::Json,
                EnvType::Dev => LogFormat::Pretty,
            };
            logging::init(cli.verbose, format).context("Failed to initialize logging")?;

            let log = Logger::new("phone-linker");
            match &config_path {
                Some(path) => log.info(format_args!("Loaded config from {}", path.display())),
                None => log.info("No config file found, using defaults and environment"),
            }

            let mut builder = AppBuilder::new(config).logger(log.clone());
            if memory_store {
                log.warn("Using in-memory mapping store; registrations are lost on exit");
                builder = builder.store(Arc::new(MemoryMappingStore::new()));
            }

            let (app, errors) = builder.build();
            phone_linker::bootstrap::serve(app, errors, &log).await
        }
    }
}
