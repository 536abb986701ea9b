// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The `validate` subcommand (§4.12): runs the Guard against a source file
//! standalone and prints every issue it finds, without executing anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use enclavejs_core::domain::guard::{validate, GuardPreset};

#[derive(Args)]
pub struct ValidateArgs {
    /// Source file to validate.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Guard preset to validate against (STRICT, SECURE/STANDARD, PERMISSIVE).
    #[arg(long, default_value = "SECURE")]
    pub preset: String,
}

pub async fn run(args: ValidateArgs) -> Result<()> {
    let source = std::fs::read_to_string(&args.file).with_context(|| format!("failed to read {:?}", args.file))?;
    let preset = GuardPreset::parse(&args.preset).with_context(|| format!("unknown guard preset '{}'", args.preset))?;

    let report = validate(&source, preset);
    if report.ok {
        println!("{}", format!("{} passes the {} guard", args.file.display(), args.preset.to_uppercase()).green());
        return Ok(());
    }

    println!("{}", format!("{} rejected by the {} guard ({} issue(s)):", args.file.display(), args.preset.to_uppercase(), report.issues.len()).red());
    for issue in &report.issues {
        let location = match (issue.line, issue.col) {
            (Some(line), Some(col)) => format!(" ({line}:{col})"),
            _ => String::new(),
        };
        println!("  {} {}{}", issue.code.as_str().yellow(), issue.message, location);
    }
    std::process::exit(1);
}
