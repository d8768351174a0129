//! Import command - load a Coinbase/Fidelity CSV or a coinledger backup

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use super::{get_context, get_logger, log_event, print_json, require_user};
use crate::output;
use coinledger_core::services::{ImportFormat, LogEvent};

/// Preview rows shown before "... and N more"
const PREVIEW_ROWS: usize = 10;

pub fn run(format: ImportFormat, file: &Path, preview: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let user_id = require_user(&ctx)?;
    let source = format.source().as_str();

    let result = match ctx.import_service.import(&user_id, format, file, preview) {
        Ok(result) => result,
        Err(e) => {
            log_event(
                &logger,
                LogEvent::new("import_failed")
                    .with_command("import")
                    .with_source(source)
                    .with_error(format!("{:#}", e)),
            );
            return Err(e);
        }
    };

    for warning in &result.warnings {
        log_event(
            &logger,
            LogEvent::new("import_row_skipped")
                .with_command("import")
                .with_source(source)
                .with_error(warning.message.clone())
                .with_error_details(format!("row {}", warning.row)),
        );
    }
    if !preview {
        log_event(
            &logger,
            LogEvent::new("import_completed").with_command("import").with_source(source),
        );
    }

    if json {
        return print_json(&result);
    }

    if preview {
        println!("{}", "PREVIEW MODE - No changes applied".yellow());
        println!();

        if let Some(transactions) = &result.transactions {
            let mut table = output::create_table();
            table.set_header(vec!["Timestamp", "Type", "Asset", "Amount", "Price"]);
            for tx in transactions.iter().take(PREVIEW_ROWS) {
                table.add_row(vec![
                    tx.timestamp.as_str(),
                    tx.tx_type.as_str(),
                    tx.asset.as_str(),
                    tx.amount.as_str(),
                    tx.price.as_deref().unwrap_or("-"),
                ]);
            }
            println!("{}", table);
            if transactions.len() > PREVIEW_ROWS {
                println!("... and {} more", transactions.len() - PREVIEW_ROWS);
            }
        }
    } else {
        output::success(&format!("Import complete ({})", result.format));
    }

    println!();
    println!("  Discovered: {}", result.discovered);
    println!("  {}: {}", if preview { "Would import" } else { "Imported" }, result.imported);
    println!("  Skipped: {}", result.skipped);

    if !result.warnings.is_empty() {
        println!();
        println!("{}", format!("{} row(s) skipped:", result.warnings.len()).yellow());
        for warning in &result.warnings {
            println!("  {}", warning);
        }
    }

    Ok(())
}
