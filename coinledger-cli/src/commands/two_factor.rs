//! 2fa command - enable or disable authenticator codes

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;

use super::{get_context, get_logger, log_event, print_json, read_password, read_text, require_user};
use crate::output;
use coinledger_core::services::LogEvent;
use coinledger_core::{Error, LedgerContext, User};

#[derive(Subcommand)]
pub enum TwoFactorCommands {
    /// Generate a secret for your authenticator app
    Setup {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enable 2FA with a code from the authenticator
    Confirm {
        code: Option<String>,
    },
    /// Turn 2FA off (asks for your password)
    Disable,
}

fn current_user(ctx: &LedgerContext) -> Result<User> {
    let user_id = require_user(ctx)?;
    Ok(ctx
        .repository
        .get_user_by_id(&user_id)?
        .ok_or_else(|| Error::not_found(format!("User not found: {}", user_id)))?)
}

pub fn run(command: TwoFactorCommands) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let user = current_user(&ctx)?;

    match command {
        TwoFactorCommands::Setup { json } => {
            if user.two_factor_enabled() {
                bail!("Two-factor authentication is already enabled. Disable it first to re-enroll.");
            }
            let setup = ctx.two_factor_service.begin_setup(&user)?;

            let mut session = ctx.session_store.load()?;
            session.pending_totp_secret = Some(setup.secret.clone());
            ctx.session_store.save(&session)?;

            if json {
                return print_json(&setup);
            }
            println!("Add this account to your authenticator app:");
            println!();
            println!("  Secret: {}", setup.secret.bold());
            println!("  URI:    {}", setup.otpauth_uri);
            println!();
            println!("Then run 'coinledger 2fa confirm <code>'.");
        }
        TwoFactorCommands::Confirm { code } => {
            let mut session = ctx.session_store.load()?;
            let Some(secret) = session.pending_totp_secret.clone() else {
                bail!("No 2FA setup in progress. Run 'coinledger 2fa setup' first.");
            };
            let code = read_text(code, "Authenticator code")?;

            ctx.two_factor_service.confirm_setup(&user.id, &secret, &code)?;
            session.pending_totp_secret = None;
            ctx.session_store.save(&session)?;

            log_event(&logger, LogEvent::new("two_factor_enabled").with_command("2fa confirm"));
            output::success("Two-factor authentication enabled");
        }
        TwoFactorCommands::Disable => {
            if !user.two_factor_enabled() {
                output::info("Two-factor authentication is not enabled.");
                return Ok(());
            }
            let password = read_password("Password")?;
            if !ctx.auth_service.verify_password(&user, &password) {
                return Err(Error::authentication("Password is incorrect").into());
            }

            ctx.two_factor_service.disable(&user.id)?;
            log_event(&logger, LogEvent::new("two_factor_disabled").with_command("2fa disable"));
            output::success("Two-factor authentication disabled");
        }
    }

    Ok(())
}
