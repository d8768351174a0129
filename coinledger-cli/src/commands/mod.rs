//! CLI command implementations

pub mod account;
pub mod export;
pub mod import;
pub mod ledger;
pub mod logs;
pub mod settings;
pub mod sync;
pub mod two_factor;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use coinledger_core::config::DATA_DIR_ENV;
use coinledger_core::services::{LogEvent, LoggingService};
use coinledger_core::LedgerContext;

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let data_dir = get_data_dir().ok()?;
    std::fs::create_dir_all(&data_dir).ok()?;
    LoggingService::new(&data_dir, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Data directory from COINLEDGER_DIR or ~/.coinledger
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".coinledger"))
        .ok_or_else(|| anyhow!("Could not find home directory; set COINLEDGER_DIR"))
}

/// Open the ledger in the data directory
pub fn get_context() -> Result<LedgerContext> {
    let data_dir = get_data_dir()?;
    LedgerContext::new(&data_dir).context("Failed to open the coinledger data directory")
}

/// Logged-in user, or the "run login first" error
pub fn require_user(ctx: &LedgerContext) -> Result<Uuid> {
    ctx.current_user_id()
}

/// Print `value` as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prompt for a secret; piped stdin is read as one line per prompt
pub fn read_password(prompt: &str) -> Result<String> {
    if atty::isnt(atty::Stream::Stdin) {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }
    Ok(dialoguer::Password::new().with_prompt(prompt).interact()?)
}

/// Use `value` or ask for it
pub fn read_text(value: Option<String>, prompt: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => Ok(dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .interact_text()?),
    }
}
