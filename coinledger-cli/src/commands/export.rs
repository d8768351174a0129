//! Export and clear commands - backup CSVs and wiping one source

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use dialoguer::Confirm;
use serde_json::json;

use super::{get_context, get_logger, log_event, print_json, require_user};
use crate::output;
use coinledger_core::services::LogEvent;
use coinledger_core::TransactionSource;

#[derive(Args)]
pub struct ExportArgs {
    /// Directory for the backup file (defaults to <data dir>/exports)
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
pub enum ExportCommands {
    /// Back up Coinbase transactions
    Coinbase(ExportArgs),
    /// Back up Fidelity transactions
    Fidelity(ExportArgs),
}

#[derive(Args)]
pub struct ClearArgs {
    /// Skip confirmation prompt
    #[arg(long, short = 'f')]
    force: bool,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
pub enum ClearCommands {
    /// Delete all Coinbase transactions
    Coinbase(ClearArgs),
    /// Delete all Fidelity transactions
    Fidelity(ClearArgs),
}

pub fn run_export(command: ExportCommands) -> Result<()> {
    let (source, args) = match command {
        ExportCommands::Coinbase(args) => (TransactionSource::Coinbase, args),
        ExportCommands::Fidelity(args) => (TransactionSource::Fidelity, args),
    };

    let ctx = get_context()?;
    let logger = get_logger();
    let user_id = require_user(&ctx)?;
    let dir = args.dir.unwrap_or_else(|| ctx.data_dir.join("exports"));

    let result = match source {
        TransactionSource::Coinbase => ctx.export_service.export_coinbase(&user_id, &dir)?,
        TransactionSource::Fidelity => ctx.export_service.export_fidelity(&user_id, &dir)?,
    };

    let Some(result) = result else {
        if args.json {
            return print_json(&json!({"source": source, "rows": 0, "path": null}));
        }
        output::info(&format!("No {} transactions to export.", source));
        return Ok(());
    };

    log_event(
        &logger,
        LogEvent::new("export_completed")
            .with_command("export")
            .with_source(source.as_str()),
    );

    if args.json {
        return print_json(&result);
    }
    output::success(&format!("Exported {} {} transactions", result.rows, source));
    println!("  File: {}", result.path.display());
    println!(
        "Restore with 'coinledger import {}-backup {}'.",
        source,
        result.path.display()
    );
    Ok(())
}

pub fn run_clear(command: ClearCommands) -> Result<()> {
    let (source, args) = match command {
        ClearCommands::Coinbase(args) => (TransactionSource::Coinbase, args),
        ClearCommands::Fidelity(args) => (TransactionSource::Fidelity, args),
    };

    let ctx = get_context()?;
    let logger = get_logger();
    let user_id = require_user(&ctx)?;

    if !args.force && !args.json {
        let prompt = format!(
            "Delete all of your {} transactions? Export a backup first if you may need them.",
            source
        );
        if !Confirm::new().with_prompt(prompt).default(false).interact()? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let deleted = ctx.export_service.clear(&user_id, source)?;
    log_event(
        &logger,
        LogEvent::new("transactions_cleared")
            .with_command("clear")
            .with_source(source.as_str()),
    );

    if args.json {
        return print_json(&json!({"source": source, "deleted": deleted}));
    }
    output::success(&format!("Deleted {} {} transactions", deleted, source));
    Ok(())
}
