//! Sync command - pull Coinbase history through the API

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use super::{get_context, get_logger, log_event, print_json, require_user};
use crate::output;
use coinledger_core::services::LogEvent;

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let user_id = require_user(&ctx)?;

    let client = ctx.sync_service.client_for(&user_id)?;

    let spinner = if json {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
        pb.set_message("Fetching Coinbase accounts and transactions...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let result = ctx.sync_service.sync_coinbase(&user_id, &client);
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            log_event(
                &logger,
                LogEvent::new("sync_failed")
                    .with_command("sync")
                    .with_source("coinbase")
                    .with_error(format!("{:#}", e)),
            );
            return Err(e);
        }
    };

    for warning in &result.warnings {
        let event = if warning.transaction_id.is_some() {
            "sync_transaction_skipped"
        } else {
            "sync_account_failed"
        };
        log_event(
            &logger,
            LogEvent::new(event)
                .with_command("sync")
                .with_source("coinbase")
                .with_error(warning.message.clone()),
        );
    }
    log_event(
        &logger,
        LogEvent::new("sync_completed").with_command("sync").with_source("coinbase"),
    );

    if json {
        return print_json(&result);
    }

    output::success("Synced: coinbase");
    println!("  Accounts synced: {}", result.accounts_synced);
    for account in &result.accounts {
        println!(
            "    {} ({}): {} new, {} skipped",
            account.name, account.currency, account.imported, account.skipped
        );
    }
    println!("  Transaction breakdown:");
    println!("    Discovered: {}", result.discovered);
    println!("    New: {}", result.imported);
    println!("    Skipped: {}", result.skipped);

    if !result.warnings.is_empty() {
        println!();
        println!("{}", format!("{} warning(s):", result.warnings.len()).yellow());
        for warning in &result.warnings {
            println!("  {}", warning);
        }
    }

    Ok(())
}
