//! Settings commands - email, password and Coinbase API credentials

use anyhow::Result;
use clap::Subcommand;

use super::{get_context, get_logger, log_event, read_password, read_text, require_user};
use crate::output;
use coinledger_core::services::LogEvent;

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Change the account email
    Email {
        email: Option<String>,
    },
    /// Change the password
    Password,
    /// Save Coinbase API credentials (stored encrypted)
    Credentials {
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Remove saved Coinbase API credentials
    ClearCredentials,
}

pub fn run(command: SettingsCommands) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let user_id = require_user(&ctx)?;

    match command {
        SettingsCommands::Email { email } => {
            let email = read_text(email, "New email")?;
            ctx.settings_service.update_email(&user_id, &email)?;
            log_event(&logger, LogEvent::new("email_updated").with_command("settings email"));
            output::success("Email updated");
        }
        SettingsCommands::Password => {
            let current = read_password("Current password")?;
            let new = read_password("New password")?;
            let confirm = read_password("Confirm new password")?;
            ctx.settings_service
                .update_password(&user_id, &current, &new, &confirm)?;
            log_event(&logger, LogEvent::new("password_updated").with_command("settings password"));
            output::success("Password updated");
        }
        SettingsCommands::Credentials { api_key } => {
            let api_key = read_text(api_key, "Coinbase API key")?;
            let api_secret = read_password("Coinbase API secret")?;
            ctx.settings_service
                .set_coinbase_credentials(&user_id, &api_key, &api_secret)?;
            log_event(
                &logger,
                LogEvent::new("credentials_updated")
                    .with_command("settings credentials")
                    .with_source("coinbase"),
            );
            output::success("Coinbase credentials saved");
            println!("Run 'coinledger sync' to pull your transactions.");
        }
        SettingsCommands::ClearCredentials => {
            ctx.settings_service.clear_coinbase_credentials(&user_id)?;
            log_event(
                &logger,
                LogEvent::new("credentials_updated")
                    .with_command("settings clear-credentials")
                    .with_source("coinbase"),
            );
            output::success("Coinbase credentials removed");
        }
    }

    Ok(())
}
