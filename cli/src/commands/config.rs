// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The `config` subcommand (§4.12): inspects and validates the broker's
//! configuration manifest without starting a listener.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crate::config::BrokerConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (file + env overrides applied).
    Show {
        /// Print the discovery paths checked, in precedence order.
        #[arg(long)]
        paths: bool,
    },
    /// Validate a configuration file (default: discover one).
    Validate {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = BrokerConfigManifest::load_or_default(config_override.clone()).context("failed to load broker config")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. ENCLAVEJS_CONFIG_PATH: {}",
            std::env::var("ENCLAVEJS_CONFIG_PATH").unwrap_or_else(|_| "(not set)".to_string()).dimmed()
        );
        println!("  3. ./enclavejs.yaml");
        println!("  4. ~/.enclavejs/config.yaml");
        println!("  5. /etc/enclavejs/config.yaml");
        println!();
    }

    println!("{}", config.to_yaml_string()?);
    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    let config = match &config_path {
        Some(path) => BrokerConfigManifest::from_yaml_file(path)?,
        None => BrokerConfigManifest::load_or_default(None)?,
    };

    match config.validate() {
        Ok(()) => {
            println!("{}", "Configuration is valid".green());
            Ok(())
        }
        Err(err) => {
            println!("{}", format!("Configuration is invalid: {err}").red());
            std::process::exit(1);
        }
    }
}
