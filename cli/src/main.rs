// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0

//! # enclavejs broker CLI
//!
//! The `enclavejs` binary serves secure JavaScript execution sessions over
//! HTTP/NDJSON (§4.11) and doubles as a standalone Guard/config tool:
//!
//! - `enclavejs serve` — runs the broker: `POST /sessions`, `/sessions/{id}/cancel`,
//!   `GET /healthz`, and the `/runtime` remote-sandbox-host channel.
//! - `enclavejs validate <file>` — runs the Static Guard against a source
//!   file without starting a session.
//! - `enclavejs config show|validate` — inspects the broker configuration
//!   manifest (§4.12).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use enclavejs_cli::commands::{config::ConfigCommand, validate::ValidateArgs};
use enclavejs_cli::config::BrokerConfigManifest;
use enclavejs_cli::server::tools::ToolRegistry;
use enclavejs_cli::{commands, server};

#[derive(Parser)]
#[command(name = "enclavejs")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the broker configuration manifest (overrides discovery).
    #[arg(short, long, global = true, env = "ENCLAVEJS_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "ENCLAVEJS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker: binds `spec.listen` and serves sessions until killed.
    Serve,
    /// Run the Static Guard against a source file.
    Validate(ValidateArgs),
    /// Inspect the broker configuration manifest.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve) => {
            let config = BrokerConfigManifest::load_or_default(cli.config)?;
            config.validate().context("broker config failed validation")?;
            server::serve(config, ToolRegistry::demo()).await
        }
        Some(Commands::Validate(args)) => commands::validate::run(args).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| tracing_subscriber::EnvFilter::try_new(level)).context("failed to build log filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_thread_ids(false).with_file(false).with_line_number(false).compact().init();

    Ok(())
}
