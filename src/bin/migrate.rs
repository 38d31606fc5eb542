// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Move legacy inline recordings to filesystem storage.
//!
//! ```text
//! migrate [--dry-run] [--clear-inline]
//! ```
//!
//! Reads the same environment as the server. Stop the server first: the
//! metadata database only admits one process at a time.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use audio_vault_server::{
    config::AppConfig,
    logging,
    state::AppState,
    storage::{MigrationOptions, MigrationTool},
};

const USAGE: &str = "Usage: migrate [--dry-run] [--clear-inline]";

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<MigrationOptions, String> {
    let mut options = MigrationOptions::default();
    for arg in args {
        match arg.as_str() {
            "--dry-run" => options.dry_run = true,
            "--clear-inline" => options.clear_inline = true,
            other => return Err(format!("Unknown argument: {other}")),
        }
    }
    Ok(options)
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.log_format);

    let state = match AppState::open(&config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to open storage: {e}");
            return ExitCode::FAILURE;
        }
    };

    let report = match MigrationTool::new(Arc::clone(&state.audio)).run(options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Migration aborted: {e}");
            return ExitCode::FAILURE;
        }
    };

    if options.dry_run {
        println!("Dry run: {} inline record(s) would be migrated.", report.candidates);
        return ExitCode::SUCCESS;
    }

    println!(
        "Candidates: {}\nMigrated:   {}\nCleared:    {}\nFailed:     {}",
        report.candidates, report.migrated, report.cleared, report.failed
    );

    if report.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
